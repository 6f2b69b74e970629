use clap::{ArgAction, Parser, Subcommand};

/// Process-group-oriented temporal dispatcher.
///
/// Every sub-command acts on the process group of the calling shell,
/// reading and writing a shared schedule registry keyed by an optional
/// database index (`-d`).
#[derive(Debug, Parser)]
#[command(name = "timemanager", version, about)]
pub struct Opts {
    #[command(flatten)]
    pub flags: GlobalFlags,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Parser)]
pub struct GlobalFlags {
    /// Select one of five independent registries (1-5); falls back to
    /// `TM_DB_NUM`, then a single shared default registry.
    #[arg(short = 'd', long, value_parser = clap::value_parser!(u8).range(1..=5))]
    pub db: Option<u8>,

    /// Increase log verbosity; repeatable (`-v`, `-vv`).
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reserve an interval for this process group. Reads a
    /// `start:duration:caption` schedule string from stdin.
    Add,

    /// Run the activation protocol for this process group's reserved
    /// interval, sending `signal` to the process group when it ends.
    Activate {
        #[arg(default_value = "SIGTERM")]
        signal: String,
    },

    /// `add` followed by `activate`; on failure, terminates the process
    /// group rather than leaving a half-registered reservation.
    Set {
        #[arg(default_value = "SIGTERM")]
        signal: String,
    },

    /// List registry entries. By default only this process group's entry is
    /// shown.
    Schedule {
        /// Show every entry in the registry, not just this process group's.
        #[arg(short = 'a', long)]
        all: bool,

        /// Print the raw `start:duration:caption` wire form.
        #[arg(short = 'r', long)]
        raw: bool,
    },

    /// Read a `start:duration:caption` schedule string from stdin and print
    /// the first free window of at least that duration within
    /// `[begin, begin + range)`.
    Unoccupied {
        #[arg(long, default_value_t = 0)]
        begin: i64,

        #[arg(long, default_value_t = 86_400)]
        range: i64,
    },

    /// Read a `start:duration:caption` schedule string from stdin and print
    /// the next time it would run under the given cron expression, searched
    /// within `[start - past, start + future)`.
    Crontab {
        expression: String,

        #[arg(long, default_value_t = 0)]
        past: i64,

        #[arg(long, default_value_t = 31_536_000)]
        future: i64,
    },

    /// Acquire the registry lock for this process group, blocking up to
    /// `timeout` seconds.
    Lock {
        #[arg(default_value_t = 5)]
        timeout: u64,
    },

    /// Release the registry lock held by this process group.
    Unlock,

    /// Remove the shared memory segment and semaphore backing the current
    /// registry.
    Reset,

    /// Send `SIGTERM` to this process group, ending any active run.
    Terminate,

    /// Periodically extend this process group's reservation while it stays
    /// immediately followed by free time.
    Autoextend {
        #[arg(long, default_value_t = 30)]
        interval: u64,

        #[arg(long, default_value_t = 3_600)]
        range: i64,
    },
}
