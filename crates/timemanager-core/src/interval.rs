use crate::entry::Entry;

/// Returns the first existing entry, other than `pgid`'s own, that strictly
/// overlaps the candidate interval, if any. Same-pgid entries are ignored
/// because `add` upserts in place rather than booking a second interval.
pub fn conflicts<'a>(
    pgid: i32,
    start: i64,
    duration: i64,
    existing: &'a [Entry],
) -> Option<&'a Entry> {
    existing
        .iter()
        .find(|e| e.pgid != pgid && e.overlaps(start, duration))
}

/// A free window within `[begin, begin + range)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub start: i64,
    pub duration: i64,
}

/// Enumerates the free windows within `[begin, begin + range)` given the
/// currently occupied entries.
///
/// Entries are sorted by start time and walked left to right; every gap
/// between the cursor and the next entry's start is emitted, as is the
/// trailing gap after the last entry. Zero-duration gaps are never
/// produced.
pub fn unoccupied(existing: &[Entry], begin: i64, range: i64) -> Vec<Gap> {
    let window_end = begin + range;
    let mut sorted: Vec<&Entry> = existing
        .iter()
        .filter(|e| e.start < window_end && e.end() > begin)
        .collect();
    sorted.sort_by_key(|e| e.start);

    let mut gaps = Vec::new();
    let mut cursor = begin;
    for e in sorted {
        let clamped_start = e.start.max(begin);
        if clamped_start > cursor {
            gaps.push(Gap {
                start: cursor,
                duration: clamped_start - cursor,
            });
        }
        cursor = cursor.max(e.end());
    }
    if cursor < window_end {
        gaps.push(Gap {
            start: cursor,
            duration: window_end - cursor,
        });
    }
    gaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(pgid: i32, start: i64, duration: i64) -> Entry {
        Entry {
            pgid,
            lock: false,
            terminator: 0,
            start,
            duration,
            caption: String::new(),
        }
    }

    #[test]
    fn conflicts_finds_strict_overlap() {
        let existing = vec![entry(1, 100, 100)];
        assert!(conflicts(2, 150, 10, &existing).is_some());
        assert!(conflicts(2, 200, 10, &existing).is_none());
        assert!(conflicts(2, 0, 100, &existing).is_none());
    }

    #[test]
    fn conflicts_ignores_the_caller_s_own_overlapping_entry() {
        let existing = vec![entry(1, 100, 100)];
        assert!(conflicts(1, 150, 10, &existing).is_none());
    }

    #[test]
    fn conflicts_is_not_masked_by_a_preceding_same_pgid_overlap() {
        // pgid 1's own (overlapping but irrelevant) entry sorts before pgid
        // 2's genuinely conflicting entry; the real conflict must still be
        // found rather than short-circuiting on the first overlap.
        let existing = vec![entry(1, 140, 100), entry(2, 100, 100)];
        let hit = conflicts(1, 150, 10, &existing).expect("pgid 2 conflicts");
        assert_eq!(hit.pgid, 2);
    }

    #[test]
    fn unoccupied_covers_whole_window_when_empty() {
        let gaps = unoccupied(&[], 0, 1000);
        assert_eq!(gaps, vec![Gap { start: 0, duration: 1000 }]);
    }

    #[test]
    fn unoccupied_skips_occupied_spans_and_emits_trailing_gap() {
        let existing = vec![entry(1, 100, 100), entry(2, 300, 50)];
        let gaps = unoccupied(&existing, 0, 500);
        assert_eq!(
            gaps,
            vec![
                Gap { start: 0, duration: 100 },
                Gap { start: 200, duration: 100 },
                Gap { start: 350, duration: 150 },
            ]
        );
    }

    #[test]
    fn unoccupied_never_emits_zero_duration_gaps() {
        let existing = vec![entry(1, 0, 100), entry(2, 100, 100)];
        let gaps = unoccupied(&existing, 0, 200);
        assert!(gaps.is_empty());
    }

    #[test]
    fn unoccupied_clamps_entries_overlapping_window_edges() {
        let existing = vec![entry(1, -50, 100)];
        let gaps = unoccupied(&existing, 0, 100);
        assert_eq!(gaps, vec![Gap { start: 50, duration: 50 }]);
    }
}
