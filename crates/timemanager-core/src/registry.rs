use std::fs::File;
use std::num::NonZeroUsize;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::ptr::NonNull;

use nix::fcntl::OFlag;
use nix::sys::mman::{self, MapFlags, ProtFlags};
use nix::sys::signal::kill;
use nix::sys::stat::Mode;
use nix::unistd::Pid;

use crate::entry::{Entry, MAX_ENTRIES, SEGMENT_SIZE};
use crate::error::{Result, TmError};

/// Maps the named POSIX shared memory segment, creating it if needed.
///
/// Mirrors the create/open pairing used for `/dev/shm`-backed pipes: open or
/// create the descriptor, size it, then `mmap` it `MAP_SHARED` so every
/// process sees the same bytes.
fn map_segment(name: &str, create: bool) -> Result<(File, NonNull<u8>)> {
    let flags = if create {
        OFlag::O_CREAT | OFlag::O_RDWR
    } else {
        OFlag::O_RDWR
    };
    let mode = Mode::S_IRUSR | Mode::S_IWUSR;

    let fd = mman::shm_open(name, flags, mode).map_err(TmError::from)?;
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(SEGMENT_SIZE as u64)?;

    let size = NonZeroUsize::new(SEGMENT_SIZE).expect("SEGMENT_SIZE is non-zero");
    let ptr = unsafe {
        mman::mmap(
            None,
            size,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            &file,
            0,
        )
    }
    .map_err(TmError::from)?;

    let ptr = NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| TmError::malformed("mmap returned a null pointer"))?;
    Ok((file, ptr))
}

unsafe fn unmap(ptr: NonNull<u8>) {
    let _ = mman::munmap(ptr.as_ptr().cast(), SEGMENT_SIZE);
}

/// Returns whether the process group identified by `pgid` still has a live
/// leader, treating `ESRCH` as "no such process" and any other errno as
/// "assume alive" (we'd rather keep a stale-looking entry than drop a live
/// one on an unrelated permission error).
fn pgid_is_alive(pgid: i32) -> bool {
    if pgid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pgid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Loads all entries from the named segment, garbage-collecting rows whose
/// owning process group is no longer alive.
///
/// Decode failures for an individual line are logged and skipped rather than
/// failing the whole load: a single corrupted row must not make the rest of
/// the registry unreadable.
pub fn load(name: &str) -> Result<Vec<Entry>> {
    let (file, ptr) = map_segment(name, true)?;
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), SEGMENT_SIZE) }.to_vec();
    unsafe { unmap(ptr) };
    drop(file);

    let text_len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let text = String::from_utf8_lossy(&bytes[..text_len]);

    let mut entries = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        match Entry::decode(line) {
            Ok(entry) if pgid_is_alive(entry.pgid) => {
                entries.push(entry);
                if entries.len() >= MAX_ENTRIES {
                    break;
                }
            }
            Ok(entry) => {
                tracing::debug!(pgid = entry.pgid, "dropping entry for dead process group");
            }
            Err(err) => {
                tracing::warn!(%err, line, "skipping malformed registry record");
            }
        }
    }
    Ok(entries)
}

/// Encodes and writes the full entry set back to the named segment,
/// zero-filling the remainder so `load` can find the end of the list.
pub fn save(name: &str, entries: &[Entry]) -> Result<()> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(entry.encode()?.as_bytes());
    }
    if buf.len() > SEGMENT_SIZE {
        return Err(TmError::Exhausted(format!(
            "encoded registry ({} bytes) exceeds segment size ({SEGMENT_SIZE})",
            buf.len()
        )));
    }

    let (file, ptr) = map_segment(name, true)?;
    unsafe {
        std::ptr::write_bytes(ptr.as_ptr(), 0, SEGMENT_SIZE);
        std::ptr::copy_nonoverlapping(buf.as_ptr(), ptr.as_ptr(), buf.len());
        unmap(ptr);
    }
    drop(file);
    Ok(())
}

/// Removes the named shared memory segment. Tolerates the segment already
/// being gone.
pub fn unlink(name: &str) -> Result<()> {
    match mman::shm_unlink(name) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ENOENT) => Ok(()),
        Err(e) => Err(TmError::from(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn own_entry(caption: &str) -> Entry {
        Entry {
            pgid: std::process::id() as i32,
            lock: false,
            terminator: 0,
            start: 1_700_000_000,
            duration: 600,
            caption: caption.into(),
        }
    }

    /// Exercises the real shm_open/mmap path. Requires a writable /dev/shm,
    /// as is typical in any POSIX container or CI worker.
    #[test]
    fn save_then_load_round_trips_live_entries() {
        let name = format!("/tm_test_registry_{}", std::process::id());
        let entries = vec![own_entry("round trip")];
        save(&name, &entries).unwrap();
        let loaded = load(&name).unwrap();
        unlink(&name).unwrap();
        assert_eq!(loaded, entries);
    }

    #[test]
    fn load_drops_entries_for_dead_process_groups() {
        let name = format!("/tm_test_registry_gc_{}", std::process::id());
        let mut dead = own_entry("stale");
        dead.pgid = 999_999; // exceedingly unlikely to be a live pgid
        save(&name, &[dead]).unwrap();
        let loaded = load(&name).unwrap();
        unlink(&name).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn unlink_on_missing_segment_is_not_an_error() {
        let name = format!("/tm_test_registry_missing_{}", std::process::id());
        assert!(unlink(&name).is_ok());
    }
}
