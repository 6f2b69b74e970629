use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use eyre::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpgid, Pid};

use timemanager_core::activation::{self, ActivationContext};
use timemanager_core::entry::ScheduleString;
use timemanager_core::{interval, lock, registry, Entry, TmError};

use crate::cli::Command;
use crate::config::Names;

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_MISUSE: i32 = 2;
pub const EXIT_DOMAIN: i32 = 3;

pub fn caller_pgid() -> Result<i32> {
    Ok(getpgid(None).wrap_err("failed to read this process's group id")?.as_raw())
}

/// Top-level entry point: dispatches, then maps any error to an exit code
/// and writes a diagnostic to stderr.
pub fn run(command: Command, names: &Names) -> i32 {
    match dispatch(command, names) {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            exit_code_for(&report)
        }
    }
}

fn exit_code_for(report: &eyre::Report) -> i32 {
    match report.downcast_ref::<TmError>() {
        Some(TmError::Malformed(_)) => EXIT_MISUSE,
        Some(TmError::Timeout) | Some(TmError::NotFound(_)) => EXIT_DOMAIN,
        _ => EXIT_FAILURE,
    }
}

fn dispatch(command: Command, names: &Names) -> Result<i32> {
    let pgid = caller_pgid()?;
    match command {
        Command::Add => cmd_add(names, pgid)?,
        Command::Activate { signal } => cmd_activate(names, pgid, &signal)?,
        Command::Set { signal } => cmd_set(names, pgid, &signal)?,
        Command::Schedule { all, raw } => cmd_schedule(names, pgid, all, raw)?,
        Command::Unoccupied { begin, range } => cmd_unoccupied(names, begin, range)?,
        Command::Crontab { expression, past, future } => {
            cmd_crontab(&expression, past, future)?
        }
        Command::Lock { timeout } => cmd_lock(names, pgid, timeout)?,
        Command::Unlock => cmd_unlock(names, pgid)?,
        Command::Reset => cmd_reset(names)?,
        Command::Terminate => cmd_terminate(pgid)?,
        Command::Autoextend { interval: every, range } => {
            cmd_autoextend(names, pgid, every, range)?
        }
    }
    Ok(EXIT_OK)
}

fn read_schedule_string() -> Result<ScheduleString> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .wrap_err("failed to read schedule string from stdin")?;
    Ok(ScheduleString::decode(input.trim_end())?)
}

/// Runs `body` while the registry lock is held for `pgid`, releasing it
/// unconditionally before returning `body`'s result.
fn with_lock<T>(names: &Names, pgid: i32, timeout: Duration, body: impl FnOnce() -> Result<T>) -> Result<T> {
    lock::acquire(&names.sem, &names.shm, pgid, timeout)?;
    let result = body();
    lock::release(&names.sem, &names.shm, pgid)?;
    result
}

fn cmd_add(names: &Names, pgid: i32) -> Result<()> {
    let sched = read_schedule_string().wrap_err("invalid schedule string on stdin")?;
    with_lock(names, pgid, Duration::from_secs(5), || {
        let mut entries = registry::load(&names.shm)?;
        if let Some(conflict) = interval::conflicts(pgid, sched.start, sched.duration, &entries) {
            return Err(TmError::Conflict {
                existing: conflict.pgid,
                start: sched.start,
                end: sched.start + sched.duration,
            }
            .into());
        }

        match entries.iter_mut().find(|e| e.pgid == pgid) {
            Some(entry) => {
                entry.start = sched.start;
                entry.duration = sched.duration;
                entry.caption = sched.caption.clone();
            }
            None => {
                if entries.len() >= timemanager_core::entry::MAX_ENTRIES {
                    return Err(TmError::Exhausted("schedule registry is full".into()).into());
                }
                entries.push(Entry {
                    pgid,
                    lock: true,
                    terminator: 0,
                    start: sched.start,
                    duration: sched.duration,
                    caption: sched.caption.clone(),
                });
            }
        }
        registry::save(&names.shm, &entries)?;
        Ok(())
    })
}

fn cmd_activate(names: &Names, pgid: i32, signal: &str) -> Result<()> {
    let signal = Signal::from_str(signal)
        .map_err(|_| TmError::malformed(format!("unrecognized signal: {signal}")))?;
    let ctx = ActivationContext {
        sem_name: names.sem.clone(),
        db_name: names.shm.clone(),
        pgid,
        signal,
        lock_timeout: Duration::from_secs(5),
    };
    activation::activate(&ctx)?;
    Ok(())
}

fn cmd_set(names: &Names, pgid: i32, signal: &str) -> Result<()> {
    if let Err(err) = cmd_add(names, pgid) {
        let _ = cmd_terminate(pgid);
        return Err(err);
    }
    if let Err(err) = cmd_activate(names, pgid, signal) {
        let _ = cmd_terminate(pgid);
        return Err(err);
    }
    Ok(())
}

fn cmd_schedule(names: &Names, pgid: i32, all: bool, raw: bool) -> Result<()> {
    let entries = registry::load(&names.shm)?;
    for entry in entries.iter().filter(|e| all || e.pgid == pgid) {
        if raw {
            println!("{}:{}:{}", entry.start, entry.duration, entry.caption);
        } else {
            println!(
                "pgid={} lock={} start={} duration={} caption={}",
                entry.pgid, entry.lock, entry.start, entry.duration, entry.caption
            );
        }
    }
    Ok(())
}

fn cmd_unoccupied(names: &Names, begin: i64, range: i64) -> Result<()> {
    let sched = read_schedule_string().wrap_err("invalid schedule string on stdin")?;
    let entries = registry::load(&names.shm)?;
    let gaps = interval::unoccupied(&entries, begin, range);
    let gap = gaps
        .into_iter()
        .find(|g| g.duration >= sched.duration)
        .ok_or_else(|| TmError::NotFound("no window large enough for this duration".into()))?;
    let result = ScheduleString {
        start: gap.start,
        duration: gap.duration,
        caption: sched.caption,
    };
    println!("{}", result.encode());
    Ok(())
}

fn cmd_crontab(expression: &str, past: i64, future: i64) -> Result<()> {
    let sched = read_schedule_string().wrap_err("invalid schedule string on stdin")?;
    let cron = timemanager_core::cron::CronSchedule::parse(expression)
        .map_err(TmError::malformed)?;
    let next = cron
        .next_after(sched.start - past, sched.start + future)
        .ok_or_else(|| TmError::NotFound("no cron match within the search window".into()))?;
    let result = ScheduleString {
        start: next,
        duration: sched.duration,
        caption: sched.caption,
    };
    println!("{}", result.encode());
    Ok(())
}

fn cmd_lock(names: &Names, pgid: i32, timeout: u64) -> Result<()> {
    lock::acquire(&names.sem, &names.shm, pgid, Duration::from_secs(timeout))?;
    Ok(())
}

fn cmd_unlock(names: &Names, pgid: i32) -> Result<()> {
    lock::release(&names.sem, &names.shm, pgid)?;
    Ok(())
}

fn cmd_reset(names: &Names) -> Result<()> {
    registry::unlink(&names.shm)?;
    lock::unlink_semaphore(&names.sem)?;
    Ok(())
}

fn cmd_terminate(pgid: i32) -> Result<()> {
    kill(Pid::from_raw(-pgid), Signal::SIGTERM).wrap_err("failed to signal process group")?;
    Ok(())
}

/// Runs until killed: periodically checks whether this process group's
/// reservation is immediately followed by free time and, if so, extends it.
fn cmd_autoextend(names: &Names, pgid: i32, every_secs: u64, range: i64) -> Result<()> {
    loop {
        with_lock(names, pgid, Duration::from_secs(5), || {
            let mut entries = registry::load(&names.shm)?;
            let idx = entries
                .iter()
                .position(|e| e.pgid == pgid)
                .ok_or_else(|| TmError::NotFound(format!("no entry for pgid {pgid}")))?;
            let current_end = entries[idx].end();
            let gaps = interval::unoccupied(&entries, current_end, range);
            if let Some(first) = gaps.first() {
                if first.start == current_end && first.duration > 0 {
                    entries[idx].duration += first.duration;
                    registry::save(&names.shm, &entries)?;
                }
            }
            Ok(())
        })?;
        std::thread::sleep(Duration::from_secs(every_secs));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_for_malformed_is_misuse() {
        let report = eyre::Report::new(TmError::malformed("bad input"));
        assert_eq!(exit_code_for(&report), EXIT_MISUSE);
    }

    #[test]
    fn exit_code_for_not_found_is_domain() {
        let report = eyre::Report::new(TmError::NotFound("missing".into()));
        assert_eq!(exit_code_for(&report), EXIT_DOMAIN);
    }

    #[test]
    fn exit_code_for_os_error_is_failure() {
        let report =
            eyre::Report::new(TmError::Os(std::io::Error::new(std::io::ErrorKind::Other, "x")));
        assert_eq!(exit_code_for(&report), EXIT_FAILURE);
    }

    #[test]
    fn exit_code_for_conflict_is_failure_not_domain() {
        let report = eyre::Report::new(TmError::Conflict {
            existing: 100,
            start: 1000,
            end: 1600,
        });
        assert_eq!(exit_code_for(&report), EXIT_FAILURE);
    }
}
