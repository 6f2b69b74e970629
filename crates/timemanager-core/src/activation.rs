use std::io::{Read, Write};
use std::sync::Mutex;
use std::time::Duration;

use nix::sys::signal::{kill, sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{close, fork, ForkResult, Pid};

use crate::error::{Result, TmError};
use crate::{lock, registry};

/// Everything an activation needs, gathered up front so the fork boundary
/// only has to carry owned data.
pub struct ActivationContext {
    pub sem_name: String,
    pub db_name: String,
    pub pgid: i32,
    pub signal: Signal,
    pub lock_timeout: Duration,
}

/// Snapshot consulted by the cleanup signal handlers while a command is
/// blocked inside `activate`. A process-global `static` rather than a
/// closure, because `sigaction` handlers can't carry captured state.
static CLEANUP_CTX: Mutex<Option<(String, String, i32)>> = Mutex::new(None);

extern "C" fn cleanup_and_exit(signum: libc::c_int) {
    if let Ok(guard) = CLEANUP_CTX.lock() {
        if let Some((sem_name, db_name, pgid)) = guard.as_ref() {
            let _ = lock::release(sem_name, db_name, *pgid);
        }
    }
    std::process::exit(128 + signum);
}

fn install_cleanup_handlers(sem_name: &str, db_name: &str, pgid: i32) -> Result<()> {
    *CLEANUP_CTX.lock().unwrap() = Some((sem_name.to_owned(), db_name.to_owned(), pgid));
    let action = SigAction::new(
        SigHandler::Handler(cleanup_and_exit),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
        unsafe { sigaction(sig, &action) }.map_err(TmError::from)?;
    }
    Ok(())
}

fn restore_default_handlers() {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
        unsafe {
            let _ = sigaction(sig, &action);
        }
    }
}

fn ignore_sigchld() {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGCHLD, &action);
    }
}

/// Sleeps until the given epoch second, returning immediately if it has
/// already passed.
fn sleep_until(target: i64) {
    loop {
        let remaining = target - crate::clock::now();
        if remaining <= 0 {
            return;
        }
        std::thread::sleep(Duration::from_secs(remaining as u64));
    }
}

/// Copies stdin to stdout in 8 KiB chunks until EOF, giving the parent a
/// transparent passthrough for the duration of the activation.
fn passthrough_stdin_to_stdout() -> Result<()> {
    let mut buf = [0u8; 8192];
    let mut stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        let n = stdin.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        stdout.write_all(&buf[..n])?;
        stdout.flush()?;
    }
}

/// Runs the activation protocol for the calling process group's entry:
/// acquire the lock, cancel any previous terminator, fork a detached timer
/// that fires at the entry's end time, wait until the entry's start time in
/// the parent, then pass stdin through to stdout until the fork's sibling
/// ends the activation by signalling the process group.
pub fn activate(ctx: &ActivationContext) -> Result<()> {
    lock::acquire(&ctx.sem_name, &ctx.db_name, ctx.pgid, ctx.lock_timeout)?;

    let run = (|| -> Result<()> {
        let mut entries = registry::load(&ctx.db_name)?;
        let idx = entries
            .iter()
            .position(|e| e.pgid == ctx.pgid)
            .ok_or_else(|| TmError::NotFound(format!("pgid {} (run `add` first)", ctx.pgid)))?;

        if entries[idx].terminator != 0 {
            let _ = kill(Pid::from_raw(entries[idx].terminator), Signal::SIGTERM);
        }

        let end = entries[idx].end();

        install_cleanup_handlers(&ctx.sem_name, &ctx.db_name, ctx.pgid)?;
        ignore_sigchld();

        match unsafe { fork() }.map_err(TmError::from)? {
            ForkResult::Child => {
                restore_default_handlers();
                let _ = close(0);
                let _ = close(1);
                sleep_until(end);
                let _ = kill(Pid::from_raw(-ctx.pgid), ctx.signal);
                std::process::exit(0);
            }
            ForkResult::Parent { child } => {
                entries[idx].terminator = child.as_raw();
                registry::save(&ctx.db_name, &entries)?;
                Ok(())
            }
        }
    })();

    // The lock only needs to be held long enough to fork the timer and
    // record it; release unconditionally, then propagate any error.
    lock::release(&ctx.sem_name, &ctx.db_name, ctx.pgid)?;
    run?;

    sleep_until(start_of(ctx)?);
    passthrough_stdin_to_stdout()
}

fn start_of(ctx: &ActivationContext) -> Result<i64> {
    let entries = registry::load(&ctx.db_name)?;
    entries
        .iter()
        .find(|e| e.pgid == ctx.pgid)
        .map(|e| e.start)
        .ok_or_else(|| TmError::NotFound(format!("pgid {}", ctx.pgid)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_until_returns_immediately_for_past_targets() {
        let before = std::time::Instant::now();
        sleep_until(crate::clock::now() - 10);
        assert!(before.elapsed() < Duration::from_millis(500));
    }
}
