//! Slot generation
//!
//! Pure function from (available windows, busy picture, policy, now) to
//! an ordered list of offerable slot starts. No clock reads, no I/O,
//! no randomness: identical inputs always produce identical output.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::time::{TimeWindow, merge_windows, subtract_windows};

/// Slot placement policy for one generation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPolicy {
    pub duration_minutes: u32,
    /// Breathing room demanded on both sides of any adjacent busy
    /// interval. Not applied at availability-window edges.
    pub buffer_minutes: u32,
    /// Slots starting earlier than now + this are discarded
    pub min_notice_minutes: u32,
    /// Slots starting later than now + this are discarded
    pub max_advance_days: u32,
}

/// Generate candidate slot starts.
///
/// Busy windows are padded by the buffer and subtracted from the
/// available windows; padding grows the busy side only, so gaps at the
/// edge of an availability window stay usable to the edge. Within each
/// remaining free gap, slots are placed from the gap start stepping by
/// the slot duration.
pub fn generate_slots(
    available: &[TimeWindow],
    busy: &[TimeWindow],
    policy: &SlotPolicy,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    if policy.duration_minutes == 0 {
        return Vec::new();
    }

    let earliest = now + Duration::minutes(i64::from(policy.min_notice_minutes));
    let latest = now + Duration::days(i64::from(policy.max_advance_days));
    let duration = Duration::minutes(i64::from(policy.duration_minutes));

    let padded_busy: Vec<TimeWindow> = busy
        .iter()
        .map(|w| w.padded(policy.buffer_minutes))
        .collect();
    let free = subtract_windows(&merge_windows(available.to_vec()), &padded_busy);

    let mut slots = Vec::new();
    for gap in free {
        let mut start = gap.start;
        while start + duration <= gap.end {
            if start >= earliest && start <= latest {
                slots.push(start);
            }
            start += duration;
        }
    }

    slots
}
