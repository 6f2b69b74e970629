use std::fmt;

/// Errors surfaced by the registry, lock and activation layers.
///
/// Variants map roughly to the CLI's exit-code table: callers that need a
/// specific exit code downcast to this type rather than inspecting message
/// text.
#[derive(Debug, thiserror::Error)]
pub enum TmError {
    /// A stored or incoming record failed to parse.
    #[error("malformed entry: {0}")]
    Malformed(String),

    /// The registry segment has no room left for another entry.
    #[error("schedule registry is full: {0}")]
    Exhausted(String),

    /// Lock acquisition did not complete within the requested timeout.
    #[error("timed out waiting for lock")]
    Timeout,

    /// No entry exists for the calling process group.
    #[error("no schedule entry for this process group: {0}")]
    NotFound(String),

    /// The candidate interval overlaps an existing entry.
    #[error("double booking: interval [{start}, {end}) conflicts with pgid {existing}")]
    Conflict {
        existing: i32,
        start: i64,
        end: i64,
    },

    /// A syscall into shared memory, a semaphore or process control failed.
    #[error("system call failed: {0}")]
    Os(#[from] std::io::Error),

    /// A `nix`-wrapped syscall failed with an errno this crate doesn't treat
    /// specially.
    #[error("system call failed: {0}")]
    Errno(#[from] nix::Error),
}

impl TmError {
    pub fn malformed(msg: impl fmt::Display) -> Self {
        Self::Malformed(msg.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TmError>;
