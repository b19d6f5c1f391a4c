//! Interval primitives and clock abstraction
//!
//! Every busy-window source is normalized to half-open `[start, end)`
//! UTC intervals before anything else looks at it. Wall-clock rule times
//! are converted here as well, so timezone handling stays in one place.

use std::cmp::{max, min};
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Half-open UTC interval `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a new window. Callers are expected to pass `start < end`;
    /// degenerate windows are harmless but never match anything.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window covering `duration_minutes` from `start`
    pub fn from_duration(start: DateTime<Utc>, duration_minutes: u32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Two half-open windows overlap when each starts before the other ends
    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether an instant falls inside the window
    pub fn contains_instant(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Window extended by `minutes` on both sides
    pub fn padded(&self, minutes: u32) -> Self {
        let pad = Duration::minutes(i64::from(minutes));
        Self {
            start: self.start - pad,
            end: self.end + pad,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339(),
            self.end.to_rfc3339()
        )
    }
}

/// Merge overlapping or adjacent windows into a minimal sorted disjoint set.
///
/// Classic sweep: sort by start, extend the running window while the next
/// one starts at or before its end, otherwise flush. O(n log n).
pub fn merge_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.retain(|w| w.start < w.end);
    if windows.len() <= 1 {
        return windows;
    }
    windows.sort_by_key(|w| w.start);

    let mut merged = Vec::with_capacity(windows.len());
    let mut current = windows[0];
    for next in windows.into_iter().skip(1) {
        if next.start <= current.end {
            current.end = max(current.end, next.end);
        } else {
            merged.push(current);
            current = next;
        }
    }
    merged.push(current);
    merged
}

/// Interval difference: the parts of `base` not covered by `busy`.
///
/// `base` must be sorted and disjoint (rule expansion produces it that
/// way); `busy` is merged here before the sweep.
pub fn subtract_windows(base: &[TimeWindow], busy: &[TimeWindow]) -> Vec<TimeWindow> {
    let busy = merge_windows(busy.to_vec());
    let mut free = Vec::new();

    for win in base {
        let mut cursor = win.start;
        for b in &busy {
            if b.end <= cursor {
                continue;
            }
            if b.start >= win.end {
                break;
            }
            if b.start > cursor {
                free.push(TimeWindow::new(cursor, min(b.start, win.end)));
            }
            cursor = max(cursor, b.end);
            if cursor >= win.end {
                break;
            }
        }
        if cursor < win.end {
            free.push(TimeWindow::new(cursor, win.end));
        }
    }

    free
}

/// Convert a provider-local wall-clock window on a given date to UTC.
///
/// Returns `None` for local times that do not exist on that date (DST
/// spring-forward gap) or that collapse to an empty window. Ambiguous
/// times (fall-back hour) resolve to the earlier instant.
pub fn local_window_to_utc(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
) -> Option<TimeWindow> {
    let start = tz.from_local_datetime(&date.and_time(start)).earliest()?;
    let end = tz.from_local_datetime(&date.and_time(end)).earliest()?;
    let window = TimeWindow::new(start.with_timezone(&Utc), end.with_timezone(&Utc));
    (window.start < window.end).then_some(window)
}

/// Injectable time source so slot generation and policy checks stay
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn win(start: &str, end: &str) -> TimeWindow {
        TimeWindow::new(utc(start), utc(end))
    }

    #[test]
    fn test_overlap_half_open() {
        let a = win("2026-09-07T09:00:00Z", "2026-09-07T10:00:00Z");
        let b = win("2026-09-07T10:00:00Z", "2026-09-07T11:00:00Z");
        let c = win("2026-09-07T09:30:00Z", "2026-09-07T10:30:00Z");
        // Touching windows do not overlap
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_merge_windows() {
        let merged = merge_windows(vec![
            win("2026-09-07T12:00:00Z", "2026-09-07T13:00:00Z"),
            win("2026-09-07T09:00:00Z", "2026-09-07T10:00:00Z"),
            win("2026-09-07T09:30:00Z", "2026-09-07T11:00:00Z"),
            win("2026-09-07T11:00:00Z", "2026-09-07T11:30:00Z"),
        ]);
        assert_eq!(
            merged,
            vec![
                win("2026-09-07T09:00:00Z", "2026-09-07T11:30:00Z"),
                win("2026-09-07T12:00:00Z", "2026-09-07T13:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_merge_drops_degenerate_windows() {
        let merged = merge_windows(vec![
            win("2026-09-07T10:00:00Z", "2026-09-07T10:00:00Z"),
            win("2026-09-07T09:00:00Z", "2026-09-07T09:30:00Z"),
        ]);
        assert_eq!(merged, vec![win("2026-09-07T09:00:00Z", "2026-09-07T09:30:00Z")]);
    }

    #[test]
    fn test_subtract_windows() {
        let base = vec![win("2026-09-07T09:00:00Z", "2026-09-07T12:00:00Z")];
        let busy = vec![
            win("2026-09-07T10:00:00Z", "2026-09-07T10:30:00Z"),
            win("2026-09-07T08:00:00Z", "2026-09-07T09:15:00Z"),
        ];
        assert_eq!(
            subtract_windows(&base, &busy),
            vec![
                win("2026-09-07T09:15:00Z", "2026-09-07T10:00:00Z"),
                win("2026-09-07T10:30:00Z", "2026-09-07T12:00:00Z"),
            ]
        );
    }

    #[test]
    fn test_subtract_fully_covered() {
        let base = vec![win("2026-09-07T09:00:00Z", "2026-09-07T10:00:00Z")];
        let busy = vec![win("2026-09-07T08:00:00Z", "2026-09-07T11:00:00Z")];
        assert!(subtract_windows(&base, &busy).is_empty());
    }

    #[test]
    fn test_local_window_to_utc() {
        let window = local_window_to_utc(
            NaiveDate::from_ymd_opt(2026, 1, 12).unwrap(),
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            chrono_tz::America::New_York,
        )
        .unwrap();
        assert_eq!(window, win("2026-01-12T14:00:00Z", "2026-01-12T17:00:00Z"));
    }

    #[test]
    fn test_local_window_dst_gap_skipped() {
        // 2026-03-08 02:30 does not exist in America/New_York
        let window = local_window_to_utc(
            NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0).unwrap(),
            chrono_tz::America::New_York,
        );
        assert!(window.is_none());
    }

    #[test]
    fn test_padded() {
        let padded = win("2026-09-07T10:00:00Z", "2026-09-07T10:30:00Z").padded(10);
        assert_eq!(padded, win("2026-09-07T09:50:00Z", "2026-09-07T10:40:00Z"));
    }
}
