//! Busy-window aggregation
//!
//! Merges the provider's active bookings, ad-hoc blocked times and the
//! external calendar's busy intervals into one sorted, disjoint picture
//! of "cannot accept a booking here". The external source is
//! non-authoritative: when it fails, its intervals are omitted and the
//! picture is marked degraded so callers can warn rather than refuse.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::collab::ExternalBusySource;
use crate::error::Result;
use crate::store::{self, BookingStore};
use crate::time::{TimeWindow, merge_windows};

/// Provider-authored ad-hoc unavailability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTime {
    pub id: String,
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: Option<String>,
}

impl BlockedTime {
    pub fn new(
        provider_id: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.into(),
            start_time,
            end_time,
            reason,
        }
    }

    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_time, self.end_time)
    }
}

/// Where a busy interval came from. Sources have different shapes at
/// the edges of the system; they are normalized to tagged windows here
/// and nowhere else branches on the source type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusySourceKind {
    Booking,
    Block,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusyInterval {
    pub window: TimeWindow,
    pub kind: BusySourceKind,
}

/// Merged busy picture for one provider over one range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyPicture {
    /// Sorted, disjoint busy windows in UTC
    pub windows: Vec<TimeWindow>,
    /// True when the external calendar could not be read and its
    /// intervals are missing from the picture
    pub degraded: bool,
}

impl BusyPicture {
    /// First busy window overlapping a candidate, if any
    pub fn first_overlap(&self, candidate: &TimeWindow) -> Option<TimeWindow> {
        self.windows.iter().copied().find(|w| w.overlaps(candidate))
    }

    /// Busy windows padded by the provider's buffer and re-merged
    pub fn padded_windows(&self, buffer_minutes: u32) -> Vec<TimeWindow> {
        if buffer_minutes == 0 {
            return self.windows.clone();
        }
        merge_windows(self.windows.iter().map(|w| w.padded(buffer_minutes)).collect())
    }
}

/// Collapse tagged intervals into a minimal disjoint window set
pub fn collapse(intervals: Vec<BusyInterval>) -> Vec<TimeWindow> {
    merge_windows(intervals.into_iter().map(|i| i.window).collect())
}

/// Aggregates busy windows from the store and the external calendar
pub struct BusyAggregator {
    store: Arc<BookingStore>,
    external: Arc<dyn ExternalBusySource>,
}

impl BusyAggregator {
    pub fn new(store: Arc<BookingStore>, external: Arc<dyn ExternalBusySource>) -> Self {
        Self { store, external }
    }

    /// Merged busy windows for a provider over `[range_start,
    /// range_start + range_days)`. `exclude_booking` removes one booking
    /// from the picture so a reschedule does not conflict with itself.
    pub async fn busy_windows(
        &self,
        provider_id: &str,
        range_start: DateTime<Utc>,
        range_days: u32,
        exclude_booking: Option<&str>,
    ) -> Result<BusyPicture> {
        let range = TimeWindow::new(
            range_start,
            range_start + Duration::days(i64::from(range_days)),
        );

        let mut intervals: Vec<BusyInterval> = Vec::new();

        let (bookings, blocks) = self.store.with_conn(|conn| {
            Ok((
                store::active_bookings_in_range(conn, provider_id, &range, exclude_booking)?,
                store::blocked_times_in_range(conn, provider_id, &range)?,
            ))
        })?;

        intervals.extend(bookings.iter().map(|b| BusyInterval {
            window: b.window(),
            kind: BusySourceKind::Booking,
        }));
        intervals.extend(blocks.iter().map(|b| BusyInterval {
            window: b.window(),
            kind: BusySourceKind::Block,
        }));

        let mut degraded = false;
        match self
            .external
            .fetch_busy_windows(provider_id, range_start, range_days)
            .await
        {
            Ok(external) => {
                intervals.extend(external.into_iter().map(|window| BusyInterval {
                    window,
                    kind: BusySourceKind::External,
                }));
            }
            Err(e) => {
                warn!(
                    "external calendar unavailable for provider {}, omitting its windows: {}",
                    provider_id, e
                );
                degraded = true;
            }
        }

        debug!(
            "aggregated {} busy intervals for provider {} over {} days",
            intervals.len(),
            provider_id,
            range_days
        );

        Ok(BusyPicture {
            windows: collapse(intervals),
            degraded,
        })
    }
}
