use std::time::{SystemTime, UNIX_EPOCH};

/// The current time as a Unix epoch second.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs() as i64
}
