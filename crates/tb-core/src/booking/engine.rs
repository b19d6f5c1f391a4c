//! Booking engine
//!
//! All mutating operations run here: create, reschedule, cancel,
//! payment settlement, and the provider-side rule/block/settings
//! management. Every mutation is idempotency-keyed, validated against a
//! freshly aggregated busy picture, committed in one transaction
//! together with its idempotency record and audit entry, and followed
//! by fire-and-forget notification and calendar-mirror side effects.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::audit::{self, AuditAction, AuditEntry, AuditOutcome};
use crate::availability::{
    AvailabilityRule, BlockedTime, BusyAggregator, SlotPolicy, expand_available, generate_slots,
    validate_rules,
};
use crate::booking::validate::{ConflictValidator, ValidationVerdict};
use crate::booking::{Booking, BookingStatus, PaymentStatus};
use crate::collab::{
    CalendarMirror, ChargeResult, ChargeStatus, ExternalBusySource, LoggingNotifier,
    LoggingPaymentProcessor, NoCalendarMirror, NoExternalCalendar, NotificationTemplate, Notifier,
    PaymentProcessor,
};
use crate::config::Config;
use crate::error::{Error, PolicyViolation, Result};
use crate::idempotency::{IdempotencyCheck, IdempotencyRecord, check_record, request_fingerprint};
use crate::provider::ProviderSettings;
use crate::store::{self, BookingStore};
use crate::time::{Clock, SystemClock, TimeWindow};

/// Longest bookable session
const MAX_DURATION_MINUTES: u32 = 480;
/// How far ahead the alternative-slot search looks after a conflict
const ALTERNATIVE_SEARCH_DAYS: u32 = 14;
const MAX_ALTERNATIVES: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingRequest {
    pub provider_id: String,
    pub client_id: String,
    #[serde(default)]
    pub service_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
    /// Paid sessions start pending and confirm on settlement; free
    /// sessions confirm immediately.
    #[serde(default)]
    pub requires_payment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub booking_id: String,
    pub actor_id: String,
    pub new_start: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub booking_id: String,
    pub actor_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBlockRequest {
    pub provider_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Result of a keyed booking mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingOutcome {
    pub booking: Booking,
    /// True when the stored result of an earlier execution was served
    pub replayed: bool,
}

/// Bookable slot starts for one provider and duration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotOffer {
    pub provider_id: String,
    pub duration_minutes: u32,
    pub slots: Vec<DateTime<Utc>>,
    /// External calendar was unreadable; slots reflect own-system
    /// state only
    pub degraded: bool,
}

/// A created block plus the active bookings it overlaps. Confirmed
/// bookings take precedence over a new block: they stay booked and are
/// reported back so the provider can resolve them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockCreated {
    pub block: BlockedTime,
    pub displaced: Vec<Booking>,
}

/// What the mutation transaction decided
enum Committed {
    Fresh,
    Replayed(Booking),
}

pub struct BookingEngine {
    store: Arc<BookingStore>,
    external: Arc<dyn ExternalBusySource>,
    mirror: Arc<dyn CalendarMirror>,
    payments: Arc<dyn PaymentProcessor>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl BookingEngine {
    /// Engine with null/logging collaborators; wire real ones with the
    /// builder methods.
    pub fn new(store: Arc<BookingStore>, config: Config) -> Self {
        Self {
            store,
            external: Arc::new(NoExternalCalendar),
            mirror: Arc::new(NoCalendarMirror),
            payments: Arc::new(LoggingPaymentProcessor),
            notifier: Arc::new(LoggingNotifier),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_external_calendar(mut self, source: Arc<dyn ExternalBusySource>) -> Self {
        self.external = source;
        self
    }

    pub fn with_calendar_mirror(mut self, mirror: Arc<dyn CalendarMirror>) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_payment_processor(mut self, payments: Arc<dyn PaymentProcessor>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<BookingStore> {
        &self.store
    }

    fn aggregator(&self) -> BusyAggregator {
        BusyAggregator::new(Arc::clone(&self.store), Arc::clone(&self.external))
    }

    /// Effective settings for a provider: stored overrides, else the
    /// workspace policy defaults.
    pub fn provider_settings(&self, provider_id: &str) -> Result<ProviderSettings> {
        let stored = self
            .store
            .with_conn(|conn| store::get_settings(conn, provider_id))?;
        Ok(stored.unwrap_or_else(|| ProviderSettings::defaults(provider_id, &self.config.booking)))
    }

    // ---- read surface ----

    pub fn booking(&self, id: &str) -> Result<Option<Booking>> {
        self.store.with_conn(|conn| store::get_booking(conn, id))
    }

    pub fn audit_trail(&self, target_id: &str) -> Result<Vec<AuditEntry>> {
        self.store
            .with_conn(|conn| store::list_audit_for_target(conn, target_id))
    }

    pub fn list_rules(&self, provider_id: &str) -> Result<Vec<AvailabilityRule>> {
        self.store
            .with_conn(|conn| store::list_rules(conn, provider_id))
    }

    /// Bookable slots for a provider over `[now, now + range_days)`
    pub async fn available_slots(
        &self,
        provider_id: &str,
        duration_minutes: u32,
        range_days: u32,
    ) -> Result<SlotOffer> {
        validate_duration(duration_minutes)?;
        if range_days == 0 || range_days > 90 {
            return Err(Error::Validation(format!(
                "range_days must be 1-90, got {range_days}"
            )));
        }

        let now = self.clock.now();
        let settings = self.provider_settings(provider_id)?;
        let tz = settings.tz()?;

        let rules = self.list_rules(provider_id)?;
        let available = expand_available(&rules, tz, now, range_days);
        let picture = self
            .aggregator()
            .busy_windows(provider_id, now, range_days, None)
            .await?;

        let policy = SlotPolicy {
            duration_minutes,
            buffer_minutes: settings.buffer_minutes,
            min_notice_minutes: settings.min_notice_minutes,
            max_advance_days: settings.max_advance_days,
        };
        let slots = generate_slots(&available, &picture.windows, &policy, now);

        Ok(SlotOffer {
            provider_id: provider_id.to_string(),
            duration_minutes,
            slots,
            degraded: picture.degraded,
        })
    }

    // ---- booking mutations ----

    pub async fn create_booking(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: CreateBookingRequest,
    ) -> Result<BookingOutcome> {
        let now = self.clock.now();
        let result = match self.try_create(key, trace_id, &req, now).await {
            Err(Error::Conflict {
                window,
                alternatives,
            }) if alternatives.is_empty() => Err(Error::Conflict {
                window,
                alternatives: self
                    .alternatives_near(&req.provider_id, req.duration_minutes, req.scheduled_at)
                    .await,
            }),
            other => other,
        };

        if let Err(err) = &result {
            self.note_failure(
                AuditAction::BookingCreated,
                &req.client_id,
                trace_id,
                None,
                now,
                err,
            );
        }
        result
    }

    async fn try_create(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: &CreateBookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome> {
        validate_create(req)?;
        let hash = request_fingerprint(req)?;
        let ttl = self.config.idempotency.ttl_hours;

        // Replay fast path, before any heavy work
        let record = self
            .store
            .with_conn(|conn| store::lookup_idempotency(conn, key, now, ttl))?;
        if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
            let booking: Booking = serde_json::from_str(&body)?;
            self.note_replay(AuditAction::BookingCreated, &req.client_id, trace_id, &booking, now)?;
            return Ok(BookingOutcome {
                booking,
                replayed: true,
            });
        }

        let settings = self.provider_settings(&req.provider_id)?;
        enforce_schedule_policy(&settings, req.scheduled_at, now)?;
        self.enforce_volume_limit(&settings, req.scheduled_at)?;

        let window = TimeWindow::from_duration(req.scheduled_at, req.duration_minutes);
        let aggregator = self.aggregator();
        let validator = ConflictValidator::new(&aggregator);
        match validator
            .validate(&req.provider_id, window, settings.buffer_minutes, None)
            .await?
        {
            ValidationVerdict::Conflict(busy) => {
                return Err(Error::Conflict {
                    window: busy,
                    alternatives: Vec::new(),
                });
            }
            ValidationVerdict::Clear { degraded } => {
                if degraded {
                    warn!(
                        "validating booking for provider {} without external calendar data",
                        req.provider_id
                    );
                }
            }
        }

        let status = if req.requires_payment {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };
        let booking = Booking::new(
            &req.provider_id,
            &req.client_id,
            req.service_id.clone(),
            req.scheduled_at,
            req.duration_minutes,
            status,
            now,
        );

        let entry = self
            .base_entry(AuditAction::BookingCreated, &req.client_id, trace_id, now)
            .with_target(&booking.id)
            .with_after(serde_json::to_value(&booking)?);
        let probe = window.padded(settings.buffer_minutes);

        let committed = self.store.with_tx(|tx| {
            // A concurrent request may have committed since the fast
            // path; the lock serializes us behind it.
            let record = store::lookup_idempotency(tx, key, now, ttl)?;
            if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
                return Ok(Committed::Replayed(serde_json::from_str(&body)?));
            }

            // Post-insert re-check equivalent: the same lock also
            // serializes conflicting inserts, so probing before the
            // insert inside the transaction is exact.
            let clashes = store::active_bookings_in_range(tx, &req.provider_id, &probe, None)?;
            if let Some(other) = clashes.first() {
                return Err(Error::Conflict {
                    window: other.window(),
                    alternatives: Vec::new(),
                });
            }
            let blocks = store::blocked_times_in_range(tx, &req.provider_id, &probe)?;
            if let Some(block) = blocks.first() {
                return Err(Error::Conflict {
                    window: block.window(),
                    alternatives: Vec::new(),
                });
            }

            store::insert_booking(tx, &booking)?;
            store::insert_idempotency(
                tx,
                &IdempotencyRecord {
                    key: key.to_string(),
                    request_hash: hash.clone(),
                    response_body: serde_json::to_string(&booking)?,
                    created_at: now,
                },
            )?;
            store::insert_audit(tx, &entry)?;
            Ok(Committed::Fresh)
        })?;

        match committed {
            Committed::Fresh => {
                audit::log_entry(&entry);
                info!(
                    "booking {} created for provider {} at {}",
                    booking.id, booking.provider_id, booking.scheduled_at
                );
                self.spawn_side_effects(booking.clone(), NotificationTemplate::BookingCreated);
                Ok(BookingOutcome {
                    booking,
                    replayed: false,
                })
            }
            Committed::Replayed(booking) => {
                self.note_replay(AuditAction::BookingCreated, &req.client_id, trace_id, &booking, now)?;
                Ok(BookingOutcome {
                    booking,
                    replayed: true,
                })
            }
        }
    }

    pub async fn reschedule_booking(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: RescheduleRequest,
    ) -> Result<BookingOutcome> {
        let now = self.clock.now();
        let result = match self.try_reschedule(key, trace_id, &req, now).await {
            Err(Error::Conflict {
                window,
                alternatives,
            }) if alternatives.is_empty() => {
                let (provider_id, duration) = self
                    .booking(&req.booking_id)?
                    .map(|b| (b.provider_id, b.duration_minutes))
                    .unwrap_or_default();
                Err(Error::Conflict {
                    window,
                    alternatives: self
                        .alternatives_near(&provider_id, duration, req.new_start)
                        .await,
                })
            }
            other => other,
        };

        if let Err(err) = &result {
            self.note_failure(
                AuditAction::BookingRescheduled,
                &req.actor_id,
                trace_id,
                Some(&req.booking_id),
                now,
                err,
            );
        }
        result
    }

    async fn try_reschedule(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: &RescheduleRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome> {
        let hash = request_fingerprint(req)?;
        let ttl = self.config.idempotency.ttl_hours;

        let record = self
            .store
            .with_conn(|conn| store::lookup_idempotency(conn, key, now, ttl))?;
        if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
            let booking: Booking = serde_json::from_str(&body)?;
            self.note_replay(
                AuditAction::BookingRescheduled,
                &req.actor_id,
                trace_id,
                &booking,
                now,
            )?;
            return Ok(BookingOutcome {
                booking,
                replayed: true,
            });
        }

        let booking = self
            .booking(&req.booking_id)?
            .ok_or_else(|| Error::NotFound(req.booking_id.clone()))?;
        if booking.status.is_terminal() {
            return Err(PolicyViolation::TerminalState(booking.status).into());
        }

        let settings = self.provider_settings(&booking.provider_id)?;
        if booking.reschedule_count >= settings.max_reschedules {
            return Err(PolicyViolation::RescheduleCap {
                max_reschedules: settings.max_reschedules,
            }
            .into());
        }
        enforce_schedule_policy(&settings, req.new_start, now)?;

        let window = TimeWindow::from_duration(req.new_start, booking.duration_minutes);
        let aggregator = self.aggregator();
        let validator = ConflictValidator::new(&aggregator);
        if let ValidationVerdict::Conflict(busy) = validator
            .validate(
                &booking.provider_id,
                window,
                settings.buffer_minutes,
                Some(&booking.id),
            )
            .await?
        {
            return Err(Error::Conflict {
                window: busy,
                alternatives: Vec::new(),
            });
        }

        let mut updated = booking.clone();
        updated.scheduled_at = req.new_start;
        updated.reschedule_count += 1;
        updated.updated_at = now;

        let entry = self
            .base_entry(AuditAction::BookingRescheduled, &req.actor_id, trace_id, now)
            .with_target(&booking.id)
            .with_before(serde_json::to_value(&booking)?)
            .with_after(serde_json::to_value(&updated)?);
        let probe = window.padded(settings.buffer_minutes);

        let committed = self.store.with_tx(|tx| {
            let record = store::lookup_idempotency(tx, key, now, ttl)?;
            if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
                return Ok(Committed::Replayed(serde_json::from_str(&body)?));
            }

            let clashes = store::active_bookings_in_range(
                tx,
                &booking.provider_id,
                &probe,
                Some(&booking.id),
            )?;
            if let Some(other) = clashes.first() {
                return Err(Error::Conflict {
                    window: other.window(),
                    alternatives: Vec::new(),
                });
            }
            let blocks = store::blocked_times_in_range(tx, &booking.provider_id, &probe)?;
            if let Some(block) = blocks.first() {
                return Err(Error::Conflict {
                    window: block.window(),
                    alternatives: Vec::new(),
                });
            }

            store::update_booking(tx, &updated)?;
            store::insert_idempotency(
                tx,
                &IdempotencyRecord {
                    key: key.to_string(),
                    request_hash: hash.clone(),
                    response_body: serde_json::to_string(&updated)?,
                    created_at: now,
                },
            )?;
            store::insert_audit(tx, &entry)?;
            Ok(Committed::Fresh)
        })?;

        match committed {
            Committed::Fresh => {
                audit::log_entry(&entry);
                info!(
                    "booking {} rescheduled to {} ({} of {} reschedules used)",
                    updated.id, updated.scheduled_at, updated.reschedule_count,
                    settings.max_reschedules
                );
                self.spawn_side_effects(updated.clone(), NotificationTemplate::BookingRescheduled);
                Ok(BookingOutcome {
                    booking: updated,
                    replayed: false,
                })
            }
            Committed::Replayed(booking) => {
                self.note_replay(
                    AuditAction::BookingRescheduled,
                    &req.actor_id,
                    trace_id,
                    &booking,
                    now,
                )?;
                Ok(BookingOutcome {
                    booking,
                    replayed: true,
                })
            }
        }
    }

    pub async fn cancel_booking(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: CancelRequest,
    ) -> Result<BookingOutcome> {
        let now = self.clock.now();
        let result = self.try_cancel(key, trace_id, &req, now).await;
        if let Err(err) = &result {
            self.note_failure(
                AuditAction::BookingCancelled,
                &req.actor_id,
                trace_id,
                Some(&req.booking_id),
                now,
                err,
            );
        }
        result
    }

    async fn try_cancel(
        &self,
        key: &str,
        trace_id: Option<&str>,
        req: &CancelRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome> {
        let hash = request_fingerprint(req)?;
        let ttl = self.config.idempotency.ttl_hours;

        let record = self
            .store
            .with_conn(|conn| store::lookup_idempotency(conn, key, now, ttl))?;
        if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
            let booking: Booking = serde_json::from_str(&body)?;
            self.note_replay(AuditAction::BookingCancelled, &req.actor_id, trace_id, &booking, now)?;
            return Ok(BookingOutcome {
                booking,
                replayed: true,
            });
        }

        let booking = self
            .booking(&req.booking_id)?
            .ok_or_else(|| Error::NotFound(req.booking_id.clone()))?;

        // Cancelling twice is a no-op success, not an error
        if booking.status == BookingStatus::Cancelled {
            let entry = self
                .base_entry(AuditAction::BookingCancelled, &req.actor_id, trace_id, now)
                .with_target(&booking.id)
                .with_after(serde_json::to_value(&booking)?);
            self.append_audit(entry)?;
            return Ok(BookingOutcome {
                booking,
                replayed: false,
            });
        }
        if booking.status == BookingStatus::Completed {
            return Err(PolicyViolation::TerminalState(booking.status).into());
        }

        let mut updated = booking.clone();
        updated.status = BookingStatus::Cancelled;
        updated.updated_at = now;

        let entry = self
            .base_entry(AuditAction::BookingCancelled, &req.actor_id, trace_id, now)
            .with_target(&booking.id)
            .with_before(serde_json::to_value(&booking)?)
            .with_after(serde_json::to_value(&updated)?);

        let committed = self.store.with_tx(|tx| {
            let record = store::lookup_idempotency(tx, key, now, ttl)?;
            if let IdempotencyCheck::Replay(body) = check_record(record, key, &hash)? {
                return Ok(Committed::Replayed(serde_json::from_str(&body)?));
            }
            store::update_booking(tx, &updated)?;
            store::insert_idempotency(
                tx,
                &IdempotencyRecord {
                    key: key.to_string(),
                    request_hash: hash.clone(),
                    response_body: serde_json::to_string(&updated)?,
                    created_at: now,
                },
            )?;
            store::insert_audit(tx, &entry)?;
            Ok(Committed::Fresh)
        })?;

        match committed {
            Committed::Fresh => {
                audit::log_entry(&entry);
                info!("booking {} cancelled by {}", updated.id, req.actor_id);
                if updated.payment_status == PaymentStatus::Paid {
                    updated = self.issue_refund(updated, trace_id, now).await;
                }
                self.spawn_cancel_side_effects(updated.clone());
                Ok(BookingOutcome {
                    booking: updated,
                    replayed: false,
                })
            }
            Committed::Replayed(booking) => {
                self.note_replay(AuditAction::BookingCancelled, &req.actor_id, trace_id, &booking, now)?;
                Ok(BookingOutcome {
                    booking,
                    replayed: true,
                })
            }
        }
    }

    /// Apply a payment collaborator callback. Naturally idempotent: a
    /// settlement already applied leaves the booking unchanged.
    pub async fn settle_payment(
        &self,
        booking_id: &str,
        charge: &ChargeResult,
        trace_id: Option<&str>,
    ) -> Result<Booking> {
        let now = self.clock.now();
        let booking = self
            .booking(booking_id)?
            .ok_or_else(|| Error::NotFound(booking_id.to_string()))?;

        let target = match charge.status {
            ChargeStatus::Pending => return Ok(booking),
            ChargeStatus::Succeeded => PaymentStatus::Paid,
            ChargeStatus::Failed => PaymentStatus::Failed,
        };
        if booking.payment_status == target {
            return Ok(booking);
        }

        let mut updated = booking.clone();
        updated.payment_status = target;
        updated.updated_at = now;
        // Settlement confirms a pending booking; failure never
        // auto-cancels, the client may retry payment.
        if target == PaymentStatus::Paid && updated.status == BookingStatus::Pending {
            updated.status = BookingStatus::Confirmed;
        }

        let entry = self
            .base_entry(AuditAction::PaymentSettled, "payments", trace_id, now)
            .with_target(&booking.id)
            .with_before(serde_json::to_value(&booking)?)
            .with_after(serde_json::to_value(&updated)?);

        self.store.with_tx(|tx| {
            store::update_booking(tx, &updated)?;
            store::insert_audit(tx, &entry)
        })?;
        audit::log_entry(&entry);

        match target {
            PaymentStatus::Paid => {
                self.spawn_side_effects(updated.clone(), NotificationTemplate::BookingConfirmed);
            }
            PaymentStatus::Failed => {
                let notifier = Arc::clone(&self.notifier);
                let booking = updated.clone();
                tokio::spawn(async move {
                    let payload = json!({ "booking_id": booking.id });
                    if let Err(e) = notifier
                        .send(NotificationTemplate::PaymentFailed, &booking.client_id, payload)
                        .await
                    {
                        warn!("payment-failed notification for {} failed: {}", booking.id, e);
                    }
                });
            }
            _ => {}
        }

        Ok(updated)
    }

    // ---- provider management ----

    /// Replace a provider's whole weekly rule set
    pub fn replace_provider_rules(
        &self,
        provider_id: &str,
        rules: Vec<AvailabilityRule>,
        actor_id: &str,
        trace_id: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now();
        let result = self.try_replace_rules(provider_id, &rules, actor_id, trace_id, now);
        if let Err(err) = &result {
            self.note_failure(
                AuditAction::RulesReplaced,
                actor_id,
                trace_id,
                Some(provider_id),
                now,
                err,
            );
        }
        result
    }

    fn try_replace_rules(
        &self,
        provider_id: &str,
        rules: &[AvailabilityRule],
        actor_id: &str,
        trace_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if rules.iter().any(|r| r.provider_id != provider_id) {
            return Err(Error::Validation(
                "rule provider_id does not match the target provider".to_string(),
            ));
        }
        validate_rules(rules)?;

        let before = self.list_rules(provider_id)?;
        let entry = self
            .base_entry(AuditAction::RulesReplaced, actor_id, trace_id, now)
            .with_target(provider_id)
            .with_before(serde_json::to_value(&before)?)
            .with_after(serde_json::to_value(rules)?);

        self.store.with_tx(|tx| {
            store::replace_rules(tx, provider_id, rules)?;
            store::insert_audit(tx, &entry)
        })?;
        audit::log_entry(&entry);
        Ok(())
    }

    /// Create an ad-hoc block. Overlapping active bookings are left in
    /// place and returned so the provider can deal with them.
    pub fn create_block(
        &self,
        req: CreateBlockRequest,
        actor_id: &str,
        trace_id: Option<&str>,
    ) -> Result<BlockCreated> {
        let now = self.clock.now();
        let result = self.try_create_block(&req, actor_id, trace_id, now);
        if let Err(err) = &result {
            self.note_failure(
                AuditAction::BlockCreated,
                actor_id,
                trace_id,
                Some(&req.provider_id),
                now,
                err,
            );
        }
        result
    }

    fn try_create_block(
        &self,
        req: &CreateBlockRequest,
        actor_id: &str,
        trace_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<BlockCreated> {
        if req.start_time >= req.end_time {
            return Err(Error::Validation(
                "block start must be before its end".to_string(),
            ));
        }

        let block = BlockedTime::new(
            &req.provider_id,
            req.start_time,
            req.end_time,
            req.reason.clone(),
        );
        let displaced = self.store.with_conn(|conn| {
            store::active_bookings_in_range(conn, &req.provider_id, &block.window(), None)
        })?;
        if !displaced.is_empty() {
            warn!(
                "block on provider {} overlaps {} active booking(s)",
                req.provider_id,
                displaced.len()
            );
        }

        let displaced_ids: Vec<&str> = displaced.iter().map(|b| b.id.as_str()).collect();
        let entry = self
            .base_entry(AuditAction::BlockCreated, actor_id, trace_id, now)
            .with_target(&block.id)
            .with_after(json!({ "block": block, "displaced": displaced_ids }));

        self.store.with_tx(|tx| {
            store::insert_block(tx, &block)?;
            store::insert_audit(tx, &entry)
        })?;
        audit::log_entry(&entry);

        Ok(BlockCreated { block, displaced })
    }

    pub fn remove_block(
        &self,
        provider_id: &str,
        block_id: &str,
        actor_id: &str,
        trace_id: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now();
        let entry = self
            .base_entry(AuditAction::BlockRemoved, actor_id, trace_id, now)
            .with_target(block_id);

        let result = self.store.with_tx(|tx| {
            if !store::delete_block(tx, provider_id, block_id)? {
                return Err(Error::NotFound(block_id.to_string()));
            }
            store::insert_audit(tx, &entry)
        });

        match result {
            Ok(()) => {
                audit::log_entry(&entry);
                Ok(())
            }
            Err(err) => {
                self.note_failure(
                    AuditAction::BlockRemoved,
                    actor_id,
                    trace_id,
                    Some(block_id),
                    now,
                    &err,
                );
                Err(err)
            }
        }
    }

    pub fn update_provider_settings(
        &self,
        settings: ProviderSettings,
        actor_id: &str,
        trace_id: Option<&str>,
    ) -> Result<()> {
        let now = self.clock.now();
        let result = self.try_update_settings(&settings, actor_id, trace_id, now);
        if let Err(err) = &result {
            self.note_failure(
                AuditAction::SettingsUpdated,
                actor_id,
                trace_id,
                Some(&settings.provider_id),
                now,
                err,
            );
        }
        result
    }

    fn try_update_settings(
        &self,
        settings: &ProviderSettings,
        actor_id: &str,
        trace_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        settings.tz()?;

        let before = self
            .store
            .with_conn(|conn| store::get_settings(conn, &settings.provider_id))?;
        let entry = self
            .base_entry(AuditAction::SettingsUpdated, actor_id, trace_id, now)
            .with_target(&settings.provider_id)
            .with_before(serde_json::to_value(&before)?)
            .with_after(serde_json::to_value(settings)?);

        self.store.with_tx(|tx| {
            store::upsert_settings(tx, settings)?;
            store::insert_audit(tx, &entry)
        })?;
        audit::log_entry(&entry);
        Ok(())
    }

    /// Drop expired idempotency records; meant for a periodic sweep
    pub fn purge_expired_records(&self) -> Result<usize> {
        let now = self.clock.now();
        let ttl = self.config.idempotency.ttl_hours;
        let purged = self.store.with_tx(|tx| store::purge_expired(tx, now, ttl))?;
        if purged > 0 {
            info!("purged {} expired idempotency record(s)", purged);
        }
        Ok(purged)
    }

    // ---- internals ----

    fn enforce_volume_limit(
        &self,
        settings: &ProviderSettings,
        scheduled_at: DateTime<Utc>,
    ) -> Result<()> {
        // Rolling 7-day window around the proposed start
        let week = TimeWindow::new(
            scheduled_at - Duration::days(3),
            scheduled_at + Duration::days(4),
        );
        let count = self.store.with_conn(|conn| {
            store::weekly_active_count(conn, &settings.provider_id, &week)
        })?;
        if count >= settings.max_bookings_per_week {
            return Err(PolicyViolation::VolumeLimit {
                max_bookings_per_week: settings.max_bookings_per_week,
            }
            .into());
        }
        Ok(())
    }

    /// Nearest still-open slot starts around a requested time, for
    /// conflict-error recovery. Best effort: failures here must not
    /// mask the conflict itself.
    async fn alternatives_near(
        &self,
        provider_id: &str,
        duration_minutes: u32,
        around: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        if provider_id.is_empty() {
            return Vec::new();
        }
        match self
            .available_slots(provider_id, duration_minutes, ALTERNATIVE_SEARCH_DAYS)
            .await
        {
            Ok(offer) => {
                let mut slots = offer.slots;
                slots.sort_by_key(|s| (*s - around).num_seconds().abs());
                slots.truncate(MAX_ALTERNATIVES);
                slots.sort();
                slots
            }
            Err(e) => {
                warn!(
                    "could not compute alternative slots for provider {}: {}",
                    provider_id, e
                );
                Vec::new()
            }
        }
    }

    fn base_entry(
        &self,
        action: AuditAction,
        actor_id: &str,
        trace_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> AuditEntry {
        let mut entry = AuditEntry::new(action, actor_id, now);
        if let Some(trace) = trace_id {
            entry = entry.with_trace_id(trace);
        }
        entry
    }

    fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.store.with_tx(|tx| store::insert_audit(tx, &entry))?;
        audit::log_entry(&entry);
        Ok(())
    }

    fn note_replay(
        &self,
        action: AuditAction,
        actor_id: &str,
        trace_id: Option<&str>,
        booking: &Booking,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let entry = self
            .base_entry(action, actor_id, trace_id, now)
            .with_target(&booking.id)
            .with_outcome(AuditOutcome::Replayed);
        self.append_audit(entry)
    }

    /// One audit entry for a failed invocation. Audit append errors are
    /// logged rather than returned so they never mask the original
    /// failure.
    fn note_failure(
        &self,
        action: AuditAction,
        actor_id: &str,
        trace_id: Option<&str>,
        target_id: Option<&str>,
        now: DateTime<Utc>,
        err: &Error,
    ) {
        let mut entry = self
            .base_entry(action, actor_id, trace_id, now)
            .with_outcome(audit_outcome(err))
            .with_after(json!({ "error": err.to_string() }));
        if let Some(target) = target_id {
            entry = entry.with_target(target);
        }
        if let Err(audit_err) = self.append_audit(entry) {
            error!("audit append failed for {:?}: {}", action, audit_err);
        }
    }

    async fn issue_refund(
        &self,
        booking: Booking,
        trace_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Booking {
        match self.payments.refund(&booking.id).await {
            Ok(refund) if refund.status == ChargeStatus::Succeeded => {
                let mut refunded = booking.clone();
                refunded.payment_status = PaymentStatus::Refunded;
                refunded.updated_at = now;

                let entry = self
                    .base_entry(AuditAction::RefundIssued, "payments", trace_id, now)
                    .with_target(&booking.id)
                    .with_before(serde_json::json!({ "payment_status": booking.payment_status }))
                    .with_after(serde_json::json!({ "payment_status": refunded.payment_status }));
                let written = self.store.with_tx(|tx| {
                    store::update_booking(tx, &refunded)?;
                    store::insert_audit(tx, &entry)
                });
                match written {
                    Ok(()) => {
                        audit::log_entry(&entry);
                        refunded
                    }
                    Err(e) => {
                        error!("refund for booking {} could not be recorded: {}", booking.id, e);
                        booking
                    }
                }
            }
            Ok(_) => {
                warn!("refund for booking {} did not succeed", booking.id);
                self.note_failure(
                    AuditAction::RefundIssued,
                    "payments",
                    trace_id,
                    Some(&booking.id),
                    now,
                    &Error::Collaborator("refund not completed".to_string()),
                );
                booking
            }
            Err(e) => {
                warn!("refund for booking {} failed: {}", booking.id, e);
                self.note_failure(
                    AuditAction::RefundIssued,
                    "payments",
                    trace_id,
                    Some(&booking.id),
                    now,
                    &e,
                );
                booking
            }
        }
    }

    /// Post-commit notification + calendar mirror, detached from the
    /// request. Failures are logged, never retried synchronously, and
    /// never roll back the booking.
    fn spawn_side_effects(&self, booking: Booking, template: NotificationTemplate) {
        let notifier = Arc::clone(&self.notifier);
        let mirror = Arc::clone(&self.mirror);
        tokio::spawn(async move {
            let payload = json!({
                "booking_id": booking.id,
                "provider_id": booking.provider_id,
                "scheduled_at": booking.scheduled_at,
            });
            if let Err(e) = notifier.send(template, &booking.client_id, payload).await {
                warn!("notification for booking {} failed: {}", booking.id, e);
            }
            if let Err(e) = mirror.mirror_booking(&booking).await {
                warn!("calendar mirror for booking {} failed: {}", booking.id, e);
            }
        });
    }

    fn spawn_cancel_side_effects(&self, booking: Booking) {
        let notifier = Arc::clone(&self.notifier);
        let mirror = Arc::clone(&self.mirror);
        tokio::spawn(async move {
            let payload = json!({
                "booking_id": booking.id,
                "provider_id": booking.provider_id,
            });
            if let Err(e) = notifier
                .send(NotificationTemplate::BookingCancelled, &booking.client_id, payload)
                .await
            {
                warn!("cancellation notice for booking {} failed: {}", booking.id, e);
            }
            if let Err(e) = mirror.remove_booking(&booking.id).await {
                warn!("calendar un-mirror for booking {} failed: {}", booking.id, e);
            }
        });
    }
}

fn validate_create(req: &CreateBookingRequest) -> Result<()> {
    if req.provider_id.is_empty() || req.client_id.is_empty() {
        return Err(Error::Validation(
            "provider_id and client_id are required".to_string(),
        ));
    }
    validate_duration(req.duration_minutes)
}

fn validate_duration(duration_minutes: u32) -> Result<()> {
    if duration_minutes == 0 || duration_minutes > MAX_DURATION_MINUTES {
        return Err(Error::Validation(format!(
            "duration_minutes must be 1-{MAX_DURATION_MINUTES}, got {duration_minutes}"
        )));
    }
    Ok(())
}

fn enforce_schedule_policy(
    settings: &ProviderSettings,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<()> {
    if start < now + Duration::minutes(i64::from(settings.min_notice_minutes)) {
        return Err(PolicyViolation::MinimumNotice {
            min_notice_minutes: settings.min_notice_minutes,
        }
        .into());
    }
    if start > now + Duration::days(i64::from(settings.max_advance_days)) {
        return Err(PolicyViolation::AdvanceWindow {
            max_advance_days: settings.max_advance_days,
        }
        .into());
    }
    Ok(())
}

fn audit_outcome(err: &Error) -> AuditOutcome {
    match err {
        Error::Validation(_) | Error::NotFound(_) => AuditOutcome::ValidationFailed,
        Error::Conflict { .. } => AuditOutcome::Conflict,
        Error::Policy(_) => AuditOutcome::PolicyViolation,
        _ => AuditOutcome::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::RefundResult;
    use crate::time::FixedClock;
    use async_trait::async_trait;
    use chrono::NaiveTime;
    use std::sync::Mutex;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    // Tests run against 2026-09-01 midnight UTC; 2026-09-07 is a Monday.
    const NOW: &str = "2026-09-01T00:00:00Z";
    const MONDAY_10: &str = "2026-09-07T10:00:00Z";

    fn engine() -> BookingEngine {
        let store = Arc::new(BookingStore::in_memory().unwrap());
        BookingEngine::new(store, Config::default()).with_clock(Arc::new(FixedClock(utc(NOW))))
    }

    fn engine_with_rules() -> BookingEngine {
        let engine = engine();
        let rules = vec![AvailabilityRule::new(
            "p1",
            1, // Monday
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            true,
        )];
        engine
            .replace_provider_rules("p1", rules, "p1", None)
            .unwrap();
        engine
    }

    fn create_req(start: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            provider_id: "p1".to_string(),
            client_id: "c1".to_string(),
            service_id: None,
            scheduled_at: utc(start),
            duration_minutes: 30,
            requires_payment: false,
        }
    }

    #[tokio::test]
    async fn test_create_confirms_and_audits() {
        let engine = engine_with_rules();
        let outcome = engine
            .create_booking("key-1", Some("trace-1"), create_req(MONDAY_10))
            .await
            .unwrap();

        assert!(!outcome.replayed);
        assert_eq!(outcome.booking.status, BookingStatus::Confirmed);

        let trail = engine.audit_trail(&outcome.booking.id).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::BookingCreated);
        assert_eq!(trail[0].outcome, AuditOutcome::Ok);
        assert_eq!(trail[0].trace_id.as_deref(), Some("trace-1"));
    }

    #[tokio::test]
    async fn test_paid_booking_starts_pending() {
        let engine = engine_with_rules();
        let mut req = create_req(MONDAY_10);
        req.requires_payment = true;
        let outcome = engine.create_booking("key-1", None, req).await.unwrap();
        assert_eq!(outcome.booking.status, BookingStatus::Pending);
        assert_eq!(outcome.booking.payment_status, PaymentStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_same_key_same_payload_replays() {
        let engine = engine_with_rules();
        let first = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        let second = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.booking.id, second.booking.id);

        // Both invocations audited, replay included
        let trail = engine.audit_trail(&first.booking.id).unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].outcome, AuditOutcome::Replayed);
    }

    #[tokio::test]
    async fn test_same_key_different_payload_is_misuse() {
        let engine = engine_with_rules();
        engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        let err = engine
            .create_booking("key-1", None, create_req("2026-09-07T11:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeyReuse(_)));
    }

    #[tokio::test]
    async fn test_conflict_carries_alternatives() {
        let engine = engine_with_rules();
        engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        let err = engine
            .create_booking("key-2", None, create_req(MONDAY_10))
            .await
            .unwrap_err();
        match err {
            Error::Conflict {
                window,
                alternatives,
            } => {
                assert_eq!(window.start, utc(MONDAY_10));
                assert!(!alternatives.is_empty());
                assert!(alternatives.len() <= 3);
                // Alternatives must actually be free
                assert!(!alternatives.contains(&utc(MONDAY_10)));
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_minimum_notice_enforced() {
        let engine = engine_with_rules();
        // Default notice is 120 minutes
        let err = engine
            .create_booking("key-1", None, create_req("2026-09-01T01:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::MinimumNotice { .. })
        ));
    }

    #[tokio::test]
    async fn test_advance_window_enforced() {
        let engine = engine_with_rules();
        // Default advance window is 60 days
        let err = engine
            .create_booking("key-1", None, create_req("2026-11-09T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::AdvanceWindow { .. })
        ));
    }

    #[tokio::test]
    async fn test_weekly_volume_limit() {
        let engine = engine_with_rules();
        let mut settings = ProviderSettings::defaults("p1", &Config::default().booking);
        settings.max_bookings_per_week = 1;
        engine.update_provider_settings(settings, "p1", None).unwrap();

        engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        let err = engine
            .create_booking("key-2", None, create_req("2026-09-07T11:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::VolumeLimit { .. })
        ));
    }

    #[tokio::test]
    async fn test_reschedule_moves_and_counts() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        let outcome = engine
            .reschedule_booking(
                "key-2",
                None,
                RescheduleRequest {
                    booking_id: created.booking.id.clone(),
                    actor_id: "c1".to_string(),
                    new_start: utc("2026-09-07T11:00:00Z"),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.booking.scheduled_at, utc("2026-09-07T11:00:00Z"));
        assert_eq!(outcome.booking.reschedule_count, 1);
    }

    #[tokio::test]
    async fn test_reschedule_does_not_conflict_with_itself() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        // Overlaps the old window; only the exclusion makes it legal
        let outcome = engine
            .reschedule_booking(
                "key-2",
                None,
                RescheduleRequest {
                    booking_id: created.booking.id.clone(),
                    actor_id: "c1".to_string(),
                    new_start: utc("2026-09-07T10:15:00Z"),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.booking.scheduled_at, utc("2026-09-07T10:15:00Z"));
    }

    #[tokio::test]
    async fn test_reschedule_into_blocked_time_conflicts() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        let id = created.booking.id.clone();

        engine
            .create_block(
                CreateBlockRequest {
                    provider_id: "p1".to_string(),
                    start_time: utc("2026-09-07T11:00:00Z"),
                    end_time: utc("2026-09-07T12:00:00Z"),
                    reason: None,
                },
                "p1",
                None,
            )
            .unwrap();

        let err = engine
            .reschedule_booking(
                "key-2",
                None,
                RescheduleRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                    new_start: utc("2026-09-07T11:30:00Z"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let booking = engine.booking(&id).unwrap().unwrap();
        assert_eq!(booking.scheduled_at, utc(MONDAY_10));
    }

    #[tokio::test]
    async fn test_reschedule_cap_leaves_schedule_unchanged() {
        let engine = engine_with_rules();
        let mut settings = ProviderSettings::defaults("p1", &Config::default().booking);
        settings.max_reschedules = 1;
        engine.update_provider_settings(settings, "p1", None).unwrap();

        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        let id = created.booking.id.clone();

        engine
            .reschedule_booking(
                "key-2",
                None,
                RescheduleRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                    new_start: utc("2026-09-07T11:00:00Z"),
                },
            )
            .await
            .unwrap();

        let err = engine
            .reschedule_booking(
                "key-3",
                None,
                RescheduleRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                    new_start: utc("2026-09-07T09:00:00Z"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Policy(PolicyViolation::RescheduleCap { .. })
        ));

        let booking = engine.booking(&id).unwrap().unwrap();
        assert_eq!(booking.scheduled_at, utc("2026-09-07T11:00:00Z"));
    }

    #[tokio::test]
    async fn test_cancel_then_cancel_again_is_noop() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        let id = created.booking.id.clone();

        let first = engine
            .cancel_booking(
                "key-2",
                None,
                CancelRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(first.booking.status, BookingStatus::Cancelled);

        // A second cancel under a fresh key is still a success
        let second = engine
            .cancel_booking(
                "key-3",
                None,
                CancelRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(second.booking.status, BookingStatus::Cancelled);
        assert!(!second.replayed);
    }

    #[tokio::test]
    async fn test_cancelled_slot_becomes_bookable_again() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();
        engine
            .cancel_booking(
                "key-2",
                None,
                CancelRequest {
                    booking_id: created.booking.id.clone(),
                    actor_id: "c1".to_string(),
                },
            )
            .await
            .unwrap();

        let rebooked = engine
            .create_booking("key-3", None, create_req(MONDAY_10))
            .await
            .unwrap();
        assert_eq!(rebooked.booking.scheduled_at, utc(MONDAY_10));
    }

    struct RecordingProcessor {
        refunds: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PaymentProcessor for RecordingProcessor {
        async fn charge(
            &self,
            _booking_id: &str,
            _amount_cents: i64,
            _currency: &str,
        ) -> Result<ChargeResult> {
            Ok(ChargeResult {
                status: ChargeStatus::Succeeded,
                reference: None,
            })
        }

        async fn refund(&self, booking_id: &str) -> Result<RefundResult> {
            self.refunds.lock().unwrap().push(booking_id.to_string());
            Ok(RefundResult {
                status: ChargeStatus::Succeeded,
            })
        }
    }

    #[tokio::test]
    async fn test_settlement_confirms_and_cancel_refunds() {
        let processor = Arc::new(RecordingProcessor {
            refunds: Mutex::new(Vec::new()),
        });
        let store = Arc::new(BookingStore::in_memory().unwrap());
        let engine = BookingEngine::new(store, Config::default())
            .with_clock(Arc::new(FixedClock(utc(NOW))))
            .with_payment_processor(Arc::clone(&processor) as Arc<dyn PaymentProcessor>);

        let mut req = create_req(MONDAY_10);
        req.requires_payment = true;
        let created = engine.create_booking("key-1", None, req).await.unwrap();
        let id = created.booking.id.clone();

        let settled = engine
            .settle_payment(
                &id,
                &ChargeResult {
                    status: ChargeStatus::Succeeded,
                    reference: Some("ch_123".to_string()),
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(settled.status, BookingStatus::Confirmed);
        assert_eq!(settled.payment_status, PaymentStatus::Paid);

        // Settling again changes nothing
        let again = engine
            .settle_payment(
                &id,
                &ChargeResult {
                    status: ChargeStatus::Succeeded,
                    reference: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(again, settled);

        let cancelled = engine
            .cancel_booking(
                "key-2",
                None,
                CancelRequest {
                    booking_id: id.clone(),
                    actor_id: "c1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.booking.payment_status, PaymentStatus::Refunded);
        assert_eq!(processor.refunds.lock().unwrap().as_slice(), [id.clone()]);

        let trail = engine.audit_trail(&id).unwrap();
        let actions: Vec<AuditAction> = trail.iter().map(|e| e.action).collect();
        assert!(actions.contains(&AuditAction::PaymentSettled));
        assert!(actions.contains(&AuditAction::RefundIssued));
    }

    #[tokio::test]
    async fn test_failed_settlement_keeps_booking_pending() {
        let engine = engine_with_rules();
        let mut req = create_req(MONDAY_10);
        req.requires_payment = true;
        let created = engine.create_booking("key-1", None, req).await.unwrap();

        let settled = engine
            .settle_payment(
                &created.booking.id,
                &ChargeResult {
                    status: ChargeStatus::Failed,
                    reference: None,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(settled.payment_status, PaymentStatus::Failed);
        assert_eq!(settled.status, BookingStatus::Pending);
    }

    #[tokio::test]
    async fn test_available_slots_reflect_bookings() {
        let engine = engine_with_rules();
        engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        let offer = engine.available_slots("p1", 30, 14).await.unwrap();
        assert!(!offer.degraded);
        assert!(!offer.slots.contains(&utc(MONDAY_10)));
        assert!(offer.slots.contains(&utc("2026-09-07T09:00:00Z")));
    }

    #[tokio::test]
    async fn test_block_reports_displaced_bookings() {
        let engine = engine_with_rules();
        let created = engine
            .create_booking("key-1", None, create_req(MONDAY_10))
            .await
            .unwrap();

        let result = engine
            .create_block(
                CreateBlockRequest {
                    provider_id: "p1".to_string(),
                    start_time: utc("2026-09-07T09:00:00Z"),
                    end_time: utc("2026-09-07T12:00:00Z"),
                    reason: Some("jury duty".to_string()),
                },
                "p1",
                None,
            )
            .unwrap();

        // The booking stays; the provider gets told about it
        assert_eq!(result.displaced.len(), 1);
        assert_eq!(result.displaced[0].id, created.booking.id);
        let booking = engine.booking(&created.booking.id).unwrap().unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        // The blocked Monday offers nothing; the following Monday is
        // untouched and still does
        let offer = engine.available_slots("p1", 30, 14).await.unwrap();
        assert!(!offer.slots.is_empty());
        assert!(offer.slots.iter().all(|s| *s >= utc("2026-09-08T00:00:00Z")));

        engine
            .remove_block("p1", &result.block.id, "p1", None)
            .unwrap();
        let err = engine
            .remove_block("p1", &result.block.id, "p1", None)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_overlapping_rules_rejected_and_audited() {
        let engine = engine();
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let eleven = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        let noon = NaiveTime::from_hms_opt(12, 0, 0).unwrap();

        let err = engine
            .replace_provider_rules(
                "p1",
                vec![
                    AvailabilityRule::new("p1", 1, nine, eleven, true),
                    AvailabilityRule::new("p1", 1, ten, noon, true),
                ],
                "p1",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let trail = engine.audit_trail("p1").unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].outcome, AuditOutcome::ValidationFailed);
    }
}
