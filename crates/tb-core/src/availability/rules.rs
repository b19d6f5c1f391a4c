//! Recurring weekly availability rules
//!
//! A provider publishes one or more wall-clock windows per weekday,
//! each flagged available or unavailable. Available windows form the
//! candidate universe for slot generation; everything outside them is
//! implicitly busy, so unavailable rules are holes rather than busy
//! intervals.

use std::cmp::{max, min};
use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::time::{TimeWindow, local_window_to_utc, merge_windows};

/// A weekly recurring rule. `day_of_week` uses 0 = Sunday .. 6 = Saturday.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRule {
    pub id: String,
    pub provider_id: String,
    pub day_of_week: u8,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    pub is_available: bool,
}

impl AvailabilityRule {
    pub fn new(
        provider_id: impl Into<String>,
        day_of_week: u8,
        start_local: NaiveTime,
        end_local: NaiveTime,
        is_available: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.into(),
            day_of_week,
            start_local,
            end_local,
            is_available,
        }
    }
}

fn weekday_number(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

/// Validate a rule set before it is persisted.
///
/// Each rule needs `start_local < end_local` and a weekday in range;
/// rules for the same provider and day must not overlap.
pub fn validate_rules(rules: &[AvailabilityRule]) -> Result<()> {
    let mut by_day: HashMap<(&str, u8), Vec<&AvailabilityRule>> = HashMap::new();

    for rule in rules {
        if rule.day_of_week > 6 {
            return Err(Error::Validation(format!(
                "day_of_week must be 0-6, got {}",
                rule.day_of_week
            )));
        }
        if rule.start_local >= rule.end_local {
            return Err(Error::Validation(format!(
                "rule {} has start {} not before end {}",
                rule.id, rule.start_local, rule.end_local
            )));
        }
        by_day
            .entry((rule.provider_id.as_str(), rule.day_of_week))
            .or_default()
            .push(rule);
    }

    for ((provider_id, day), mut day_rules) in by_day {
        day_rules.sort_by_key(|r| r.start_local);
        for pair in day_rules.windows(2) {
            if pair[1].start_local < pair[0].end_local {
                return Err(Error::Validation(format!(
                    "overlapping rules for provider {provider_id} on day {day}: \
                     {}-{} and {}-{}",
                    pair[0].start_local, pair[0].end_local, pair[1].start_local, pair[1].end_local
                )));
            }
        }
    }

    Ok(())
}

/// Expand the available rules over every provider-local calendar day the
/// range touches, convert to UTC, clamp to the range and merge.
pub fn expand_available(
    rules: &[AvailabilityRule],
    tz: Tz,
    range_start: DateTime<Utc>,
    range_days: u32,
) -> Vec<TimeWindow> {
    let range_end = range_start + Duration::days(i64::from(range_days));
    let mut date = range_start.with_timezone(&tz).date_naive();
    let last_date = range_end.with_timezone(&tz).date_naive();

    let mut windows = Vec::new();
    while date <= last_date {
        let day = weekday_number(date.weekday());
        for rule in rules
            .iter()
            .filter(|r| r.is_available && r.day_of_week == day)
        {
            // DST-gap local times yield no window for that date
            if let Some(window) = local_window_to_utc(date, rule.start_local, rule.end_local, tz) {
                let start = max(window.start, range_start);
                let end = min(window.end, range_end);
                if start < end {
                    windows.push(TimeWindow::new(start, end));
                }
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }

    merge_windows(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let rules = vec![AvailabilityRule::new("p1", 1, time(12, 0), time(9, 0), true)];
        assert!(matches!(
            validate_rules(&rules),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_same_day_overlap() {
        let rules = vec![
            AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true),
            AvailabilityRule::new("p1", 1, time(11, 0), time(14, 0), false),
        ];
        assert!(matches!(
            validate_rules(&rules),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validate_allows_touching_and_other_days() {
        let rules = vec![
            AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true),
            AvailabilityRule::new("p1", 1, time(12, 0), time(14, 0), true),
            AvailabilityRule::new("p1", 2, time(9, 0), time(12, 0), true),
            AvailabilityRule::new("p2", 1, time(10, 0), time(13, 0), true),
        ];
        assert!(validate_rules(&rules).is_ok());
    }

    #[test]
    fn test_expand_single_weekly_rule() {
        // Mondays 09:00-12:00 UTC, two weeks of range starting on a Sunday
        let rules = vec![AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true)];
        let windows = expand_available(&rules, chrono_tz::UTC, utc("2026-09-06T00:00:00Z"), 14);
        assert_eq!(
            windows,
            vec![
                TimeWindow::new(utc("2026-09-07T09:00:00Z"), utc("2026-09-07T12:00:00Z")),
                TimeWindow::new(utc("2026-09-14T09:00:00Z"), utc("2026-09-14T12:00:00Z")),
            ]
        );
    }

    #[test]
    fn test_expand_applies_provider_timezone() {
        let rules = vec![AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true)];
        let windows = expand_available(
            &rules,
            chrono_tz::America::New_York,
            utc("2026-01-11T00:00:00Z"),
            7,
        );
        // 09:00 Eastern is 14:00 UTC in January
        assert_eq!(
            windows,
            vec![TimeWindow::new(
                utc("2026-01-12T14:00:00Z"),
                utc("2026-01-12T17:00:00Z")
            )]
        );
    }

    #[test]
    fn test_expand_skips_unavailable_rules() {
        let rules = vec![
            AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true),
            AvailabilityRule::new("p1", 1, time(13, 0), time(17, 0), false),
        ];
        let windows = expand_available(&rules, chrono_tz::UTC, utc("2026-09-06T00:00:00Z"), 7);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end, utc("2026-09-07T12:00:00Z"));
    }

    #[test]
    fn test_expand_clamps_to_range() {
        let rules = vec![AvailabilityRule::new("p1", 1, time(9, 0), time(12, 0), true)];
        let windows = expand_available(&rules, chrono_tz::UTC, utc("2026-09-07T10:00:00Z"), 1);
        assert_eq!(
            windows,
            vec![TimeWindow::new(
                utc("2026-09-07T10:00:00Z"),
                utc("2026-09-07T12:00:00Z")
            )]
        );
    }
}
