//! Booking domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::TimeWindow;

/// Booking lifecycle state.
///
/// `pending -> confirmed -> completed`, with `cancelled` reachable from
/// either non-terminal state. Bookings are soft-cancelled, never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }

    /// Active bookings occupy their window against new bookings
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Allowed lifecycle transitions
    pub fn can_transition(&self, to: BookingStatus) -> bool {
        matches!(
            (self, to),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment settlement state, mutated only by the payment collaborator
/// callback and the refund path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

/// A booked session between a provider and a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub provider_id: String,
    pub client_id: String,
    pub service_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub reschedule_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        provider_id: impl Into<String>,
        client_id: impl Into<String>,
        service_id: Option<String>,
        scheduled_at: DateTime<Utc>,
        duration_minutes: u32,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            provider_id: provider_id.into(),
            client_id: client_id.into(),
            service_id,
            scheduled_at,
            duration_minutes,
            status,
            payment_status: PaymentStatus::Unpaid,
            reschedule_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The half-open window this booking occupies
    pub fn window(&self) -> TimeWindow {
        TimeWindow::from_duration(self.scheduled_at, self.duration_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert!(BookingStatus::Pending.can_transition(BookingStatus::Confirmed));
        assert!(BookingStatus::Pending.can_transition(BookingStatus::Cancelled));
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Completed));
        assert!(BookingStatus::Confirmed.can_transition(BookingStatus::Cancelled));
        assert!(!BookingStatus::Completed.can_transition(BookingStatus::Cancelled));
        assert!(!BookingStatus::Cancelled.can_transition(BookingStatus::Pending));
        assert!(!BookingStatus::Pending.can_transition(BookingStatus::Completed));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(BookingStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BookingStatus::parse("unknown"), None);
    }

    #[test]
    fn test_booking_window() {
        let now = Utc::now();
        let booking = Booking::new(
            "p1",
            "c1",
            None,
            "2026-09-07T10:00:00Z".parse().unwrap(),
            30,
            BookingStatus::Pending,
            now,
        );
        let window = booking.window();
        assert_eq!(window.duration_minutes(), 30);
        assert_eq!(window.start, booking.scheduled_at);
    }
}
