use std::ffi::CString;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::entry::Entry;
use crate::error::{Result, TmError};
use crate::registry;

/// `nix` does not wrap named POSIX semaphores (`sem_open`/`sem_wait`/
/// `sem_post`), so this module calls into `libc` directly for them, the same
/// way raw `libc` syscalls are reached for when `nix` has no wrapper.
type SemT = *mut libc::sem_t;

/// Flips to `true` from inside the no-op `SIGALRM` handler; `sem_wait`
/// observes `EINTR` and the caller treats that as a timeout.
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

extern "C" fn noop_alarm_handler(_signum: libc::c_int) {
    ALARM_FIRED.store(true, Ordering::SeqCst);
}

fn open_semaphore(name: &str) -> Result<SemT> {
    let cname = CString::new(name).map_err(|_| TmError::malformed("semaphore name has a NUL byte"))?;
    let sem = unsafe { libc::sem_open(cname.as_ptr(), libc::O_CREAT, 0o600u32, 1u32) };
    if sem == libc::SEM_FAILED {
        return Err(TmError::Os(std::io::Error::last_os_error()));
    }
    Ok(sem)
}

fn close_semaphore(sem: SemT) {
    unsafe {
        libc::sem_close(sem);
    }
}

/// Removes the named semaphore. Tolerates it already being gone.
pub fn unlink_semaphore(name: &str) -> Result<()> {
    let cname = CString::new(name).map_err(|_| TmError::malformed("semaphore name has a NUL byte"))?;
    let rc = unsafe { libc::sem_unlink(cname.as_ptr()) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ENOENT) {
        return Ok(());
    }
    Err(TmError::Os(err))
}

fn install_alarm_handler() -> Result<SigAction> {
    let action = SigAction::new(
        SigHandler::Handler(noop_alarm_handler),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let prev = unsafe { sigaction(Signal::SIGALRM, &action) }.map_err(TmError::from)?;
    Ok(prev)
}

fn restore_alarm_handler(prev: SigAction) {
    unsafe {
        let _ = sigaction(Signal::SIGALRM, &prev);
    }
}

/// Blocking `sem_wait` bounded by `timeout`, implemented with `alarm(2)`
/// rather than `sem_timedwait` so the same plain `sem_wait` path is used
/// whether or not a deadline is in effect.
fn wait_with_timeout(sem: SemT, timeout: Duration) -> Result<()> {
    ALARM_FIRED.store(false, Ordering::SeqCst);
    let prev = install_alarm_handler()?;
    let secs = timeout.as_secs().max(1) as libc::c_uint;
    unsafe { libc::alarm(secs) };

    let rc = unsafe { libc::sem_wait(sem) };

    unsafe { libc::alarm(0) };
    restore_alarm_handler(prev);

    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EINTR) && ALARM_FIRED.load(Ordering::SeqCst) {
        return Err(TmError::Timeout);
    }
    Err(TmError::Os(err))
}

fn post_semaphore(sem: SemT) -> Result<()> {
    let rc = unsafe { libc::sem_post(sem) };
    if rc == 0 {
        return Ok(());
    }
    Err(TmError::Os(std::io::Error::last_os_error()))
}

/// Acquires the named lock for `pgid`, per the registry's single
/// binary-semaphore protocol:
///
/// 1. If `pgid` already holds the lock (reentrant caller), succeed without
///    touching the semaphore.
/// 2. Otherwise `sem_wait`, bounded by `timeout`.
/// 3. On success, mark the caller's entry `lock = true` in the registry.
pub fn acquire(sem_name: &str, db_name: &str, pgid: i32, timeout: Duration) -> Result<()> {
    let entries = registry::load(db_name)?;
    if let Some(entry) = entries.iter().find(|e| e.pgid == pgid) {
        if entry.lock {
            return Ok(());
        }
    }

    let sem = open_semaphore(sem_name)?;
    let wait_result = wait_with_timeout(sem, timeout);
    close_semaphore(sem);
    wait_result?;

    let mut entries = registry::load(db_name)?;
    match entries.iter_mut().find(|e| e.pgid == pgid) {
        Some(entry) => entry.lock = true,
        None => entries.push(Entry {
            pgid,
            lock: true,
            terminator: 0,
            start: 0,
            duration: 0,
            caption: String::new(),
        }),
    }
    registry::save(db_name, &entries)?;
    Ok(())
}

/// Releases the lock held by `pgid`. Idempotent: a caller with no entry, or
/// one already unlocked, is treated as already-released.
///
/// If the semaphore post fails, the registry's lock flag is restored to
/// `true` so a subsequent `release` can retry rather than silently wedging
/// the lock in an inconsistent state.
pub fn release(sem_name: &str, db_name: &str, pgid: i32) -> Result<()> {
    let mut entries = registry::load(db_name)?;
    let Some(entry) = entries.iter_mut().find(|e| e.pgid == pgid) else {
        return Ok(());
    };
    if !entry.lock {
        return Ok(());
    }
    entry.lock = false;
    registry::save(db_name, &entries)?;

    let sem = open_semaphore(sem_name)?;
    let post_result = post_semaphore(sem);
    close_semaphore(sem);

    if let Err(err) = post_result {
        let mut entries = registry::load(db_name)?;
        if let Some(entry) = entries.iter_mut().find(|e| e.pgid == pgid) {
            entry.lock = true;
            let _ = registry::save(db_name, &entries);
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sem_ptr_is_null_detects_null() {
        let sem: SemT = ptr::null_mut();
        assert!(ptr::eq(sem, ptr::null_mut()));
    }
}
