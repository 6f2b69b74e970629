use crate::error::{Result, TmError};

/// Maximum length of a caption, in bytes, accepted by the codec.
pub const MAX_CAPTION_LEN: usize = 256;

/// Maximum length of one encoded record line, including its trailing `\n`.
pub const MAX_RECORD_LEN: usize = 510;

/// Size, in bytes, of the shared memory segment backing the registry.
pub const SEGMENT_SIZE: usize = 65536;

/// Hard cap on the number of entries the registry will hold at once.
pub const MAX_ENTRIES: usize = 1024;

/// One row of the schedule registry: a reservation held by a process group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub pgid: i32,
    pub lock: bool,
    /// pid of the detached timer process that will end this activation, or
    /// 0 if the interval has never been activated.
    pub terminator: i32,
    pub start: i64,
    pub duration: i64,
    pub caption: String,
}

impl Entry {
    pub fn end(&self) -> i64 {
        self.start + self.duration
    }

    /// Strict interval overlap: touching endpoints do not conflict.
    pub fn overlaps(&self, start: i64, duration: i64) -> bool {
        let end = start + duration;
        self.start < end && start < self.end()
    }

    pub fn encode(&self) -> Result<String> {
        if self.caption.len() > MAX_CAPTION_LEN {
            return Err(TmError::malformed("caption exceeds maximum length"));
        }
        if self.caption.contains('\n') {
            return Err(TmError::malformed("caption must not contain a newline"));
        }
        let line = format!(
            "{}:{}:{}:{}:{}:{}\n",
            self.pgid, self.lock as u8, self.terminator, self.start, self.duration, self.caption
        );
        if line.len() > MAX_RECORD_LEN {
            return Err(TmError::malformed("encoded record exceeds maximum length"));
        }
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self> {
        let mut fields = line.splitn(6, ':');
        let pgid = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing pgid field"))?
            .parse::<i32>()
            .map_err(|e| TmError::malformed(format!("invalid pgid: {e}")))?;
        if pgid <= 0 {
            return Err(TmError::malformed("pgid must be positive"));
        }
        let lock = match fields.next() {
            Some("0") => false,
            Some("1") => true,
            _ => return Err(TmError::malformed("invalid lock field")),
        };
        let terminator = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing terminator field"))?
            .parse::<i32>()
            .map_err(|e| TmError::malformed(format!("invalid terminator: {e}")))?;
        if terminator < 0 {
            return Err(TmError::malformed("terminator must not be negative"));
        }
        let start = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing start field"))?
            .parse::<i64>()
            .map_err(|e| TmError::malformed(format!("invalid start: {e}")))?;
        if start < 0 {
            return Err(TmError::malformed("start must not be negative"));
        }
        let duration = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing duration field"))?
            .parse::<i64>()
            .map_err(|e| TmError::malformed(format!("invalid duration: {e}")))?;
        if duration < 0 {
            return Err(TmError::malformed("duration must not be negative"));
        }
        let caption = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing caption field"))?
            .to_owned();
        if caption.len() > MAX_CAPTION_LEN {
            return Err(TmError::malformed("caption exceeds maximum length"));
        }
        Ok(Self {
            pgid,
            lock,
            terminator,
            start,
            duration,
            caption,
        })
    }
}

/// The stand-alone `start:duration:caption` wire form used on stdin/stdout
/// by `add`, `unoccupied` and `crontab`.
///
/// This is deliberately a separate codec from [`Entry`], not a thin wrapper
/// that prepends placeholder pgid/lock/terminator fields: reusing `Entry`'s
/// codec here would let a colon embedded in the caption shift field
/// boundaries on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleString {
    pub start: i64,
    pub duration: i64,
    pub caption: String,
}

impl ScheduleString {
    pub fn encode(&self) -> String {
        format!("{}:{}:{}", self.start, self.duration, self.caption)
    }

    pub fn decode(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\n', '\r']);
        let mut fields = line.splitn(3, ':');
        let start = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing start field"))?
            .parse::<i64>()
            .map_err(|e| TmError::malformed(format!("invalid start: {e}")))?;
        if start < 0 {
            return Err(TmError::malformed("start must not be negative"));
        }
        let duration = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing duration field"))?
            .parse::<i64>()
            .map_err(|e| TmError::malformed(format!("invalid duration: {e}")))?;
        if duration < 0 {
            return Err(TmError::malformed("duration must not be negative"));
        }
        let caption = fields
            .next()
            .ok_or_else(|| TmError::malformed("missing caption field"))?
            .to_owned();
        if caption.len() > MAX_CAPTION_LEN {
            return Err(TmError::malformed("caption exceeds maximum length"));
        }
        Ok(Self {
            start,
            duration,
            caption,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Entry {
        Entry {
            pgid: 4242,
            lock: false,
            terminator: 0,
            start: 1_700_000_000,
            duration: 3600,
            caption: "nightly backup".into(),
        }
    }

    #[test]
    fn entry_round_trips() {
        let e = sample();
        let line = e.encode().unwrap();
        let decoded = Entry::decode(line.trim_end_matches('\n')).unwrap();
        assert_eq!(e, decoded);
    }

    #[test]
    fn entry_rejects_embedded_newline_in_caption() {
        let mut e = sample();
        e.caption = "bad\ncaption".into();
        assert!(e.encode().is_err());
    }

    #[test]
    fn entry_decode_rejects_malformed_lock_field() {
        let line = "4242:maybe:0:1700000000:3600:oops";
        assert!(Entry::decode(line).is_err());
    }

    #[test]
    fn entry_decode_rejects_non_positive_pgid() {
        assert!(Entry::decode("0:0:0:1700000000:3600:oops").is_err());
        assert!(Entry::decode("-1:0:0:1700000000:3600:oops").is_err());
    }

    #[test]
    fn entry_decode_rejects_negative_start() {
        assert!(Entry::decode("4242:0:0:-5:3600:oops").is_err());
    }

    #[test]
    fn schedule_string_preserves_embedded_colons_in_caption() {
        let s = ScheduleString {
            start: 10,
            duration: 20,
            caption: "build: stage 2: deploy".into(),
        };
        let encoded = s.encode();
        let decoded = ScheduleString::decode(&encoded).unwrap();
        assert_eq!(s, decoded);
    }

    #[test]
    fn schedule_string_rejects_negative_duration() {
        assert!(ScheduleString::decode("10:-5:oops").is_err());
    }

    #[test]
    fn schedule_string_rejects_negative_start() {
        assert!(ScheduleString::decode("-10:5:oops").is_err());
    }

    #[test]
    fn overlap_is_strict_at_touching_endpoints() {
        let e = sample();
        assert!(!e.overlaps(e.end(), 100));
        assert!(!e.overlaps(e.start - 100, 100));
        assert!(e.overlaps(e.start, 1));
        assert!(e.overlaps(e.end() - 1, 10));
    }
}
