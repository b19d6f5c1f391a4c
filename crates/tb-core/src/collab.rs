//! Collaborator interfaces
//!
//! The engine talks to its external collaborators (calendar sync,
//! payments, notifications) through these traits. Deployments without a
//! given collaborator wire the null implementation; tests substitute
//! fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::booking::Booking;
use crate::error::Result;
use crate::time::TimeWindow;

/// Read-only source of busy windows mirrored from a third-party
/// calendar account. Failures are non-fatal to the aggregator.
#[async_trait]
pub trait ExternalBusySource: Send + Sync {
    async fn fetch_busy_windows(
        &self,
        provider_id: &str,
        range_start: DateTime<Utc>,
        range_days: u32,
    ) -> Result<Vec<TimeWindow>>;
}

/// Source for providers without a linked external calendar
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalCalendar;

#[async_trait]
impl ExternalBusySource for NoExternalCalendar {
    async fn fetch_busy_windows(
        &self,
        _provider_id: &str,
        _range_start: DateTime<Utc>,
        _range_days: u32,
    ) -> Result<Vec<TimeWindow>> {
        Ok(Vec::new())
    }
}

/// Write-back path that mirrors a committed booking into the provider's
/// external calendar. Invoked post-commit, fire-and-forget; failures are
/// logged and never retried synchronously.
#[async_trait]
pub trait CalendarMirror: Send + Sync {
    async fn mirror_booking(&self, booking: &Booking) -> Result<()>;
    async fn remove_booking(&self, booking_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCalendarMirror;

#[async_trait]
impl CalendarMirror for NoCalendarMirror {
    async fn mirror_booking(&self, _booking: &Booking) -> Result<()> {
        Ok(())
    }

    async fn remove_booking(&self, _booking_id: &str) -> Result<()> {
        Ok(())
    }
}

/// Outcome of an opaque charge or refund call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Succeeded,
    Pending,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResult {
    pub status: ChargeStatus,
    /// Processor-side reference id
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundResult {
    pub status: ChargeStatus,
}

/// Opaque payment processor. All calls go through the idempotency layer
/// keyed by booking/operation id, so client retries never double-charge.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, booking_id: &str, amount_cents: i64, currency: &str)
    -> Result<ChargeResult>;

    async fn refund(&self, booking_id: &str) -> Result<RefundResult>;
}

/// Logs and reports success; stands in until a real processor is wired
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPaymentProcessor;

#[async_trait]
impl PaymentProcessor for LoggingPaymentProcessor {
    async fn charge(
        &self,
        booking_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> Result<ChargeResult> {
        info!(
            "charge (stub): booking={} amount={} {}",
            booking_id, amount_cents, currency
        );
        Ok(ChargeResult {
            status: ChargeStatus::Succeeded,
            reference: None,
        })
    }

    async fn refund(&self, booking_id: &str) -> Result<RefundResult> {
        info!("refund (stub): booking={}", booking_id);
        Ok(RefundResult {
            status: ChargeStatus::Succeeded,
        })
    }
}

/// Transactional email/notification templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    BookingCreated,
    BookingConfirmed,
    BookingRescheduled,
    BookingCancelled,
    PaymentFailed,
}

/// Best-effort notification delivery. Invoked post-commit and never
/// blocks or rolls back a booking mutation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        payload: serde_json::Value,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        template: NotificationTemplate,
        recipient: &str,
        _payload: serde_json::Value,
    ) -> Result<()> {
        info!("notification (stub): {:?} -> {}", template, recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_null_collaborators_are_inert() {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();

        let windows = tokio_test::block_on(
            NoExternalCalendar.fetch_busy_windows("prov-1", start, 7),
        )
        .unwrap();
        assert!(windows.is_empty());

        tokio_test::block_on(NoCalendarMirror.remove_booking("bk-1")).unwrap();
    }

    #[test]
    fn test_logging_processor_reports_success() {
        let charge =
            tokio_test::block_on(LoggingPaymentProcessor.charge("bk-1", 4500, "USD")).unwrap();
        assert_eq!(charge.status, ChargeStatus::Succeeded);

        let refund = tokio_test::block_on(LoggingPaymentProcessor.refund("bk-1")).unwrap();
        assert_eq!(refund.status, ChargeStatus::Succeeded);
    }
}
