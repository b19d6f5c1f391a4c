//! Commit-time conflict validation
//!
//! A slot list is stale the moment it is rendered. The validator
//! re-derives the busy picture from the latest state at validation
//! time, so a slot consumed by a concurrent booking since the client
//! last looked is rejected instead of double-booked. Reschedules pass
//! their own booking id so they do not conflict with themselves.

use chrono::Duration;

use crate::availability::BusyAggregator;
use crate::error::Result;
use crate::time::TimeWindow;

/// Verdict of a commit-time validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    /// Slot is free against the latest picture
    Clear {
        /// External calendar was unreadable while validating; the
        /// own-system picture still cleared the slot
        degraded: bool,
    },
    /// Slot overlaps a busy window (buffer included)
    Conflict(TimeWindow),
}

pub struct ConflictValidator<'a> {
    aggregator: &'a BusyAggregator,
}

impl<'a> ConflictValidator<'a> {
    pub fn new(aggregator: &'a BusyAggregator) -> Self {
        Self { aggregator }
    }

    /// Validate a proposed window against the current busy picture.
    ///
    /// The aggregation range spans a day either side of the proposal so
    /// long adjacent bookings and buffer padding are all visible.
    pub async fn validate(
        &self,
        provider_id: &str,
        proposed: TimeWindow,
        buffer_minutes: u32,
        exclude_booking: Option<&str>,
    ) -> Result<ValidationVerdict> {
        let range_start = proposed.start - Duration::days(1);
        let picture = self
            .aggregator
            .busy_windows(provider_id, range_start, 2, exclude_booking)
            .await?;

        let padded = picture.padded_windows(buffer_minutes);
        match padded.iter().find(|w| w.overlaps(&proposed)) {
            Some(window) => Ok(ValidationVerdict::Conflict(*window)),
            None => Ok(ValidationVerdict::Clear {
                degraded: picture.degraded,
            }),
        }
    }
}
