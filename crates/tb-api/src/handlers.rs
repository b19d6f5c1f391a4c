//! HTTP API handlers
//!
//! Request handlers for availability, booking mutations and provider
//! management. Mutating booking endpoints require an `Idempotency-Key`
//! header; an `X-Request-Id` header, when present, is threaded through
//! to the audit trail as the trace id.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, NaiveTime, Utc};
use serde::Deserialize;
use tracing::debug;

use tb_core::{
    AuditEntry, AvailabilityRule, BlockCreated, Booking, BookingOutcome, CancelRequest,
    ChargeResult, CreateBlockRequest, CreateBookingRequest, ProviderSettings, RescheduleRequest,
    SlotOffer,
};

use crate::error::{ApiError, Result};
use crate::server::AppState;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    pub duration_minutes: u32,
    /// How many days ahead to offer slots
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    14
}

#[derive(Debug, Deserialize)]
pub struct RescheduleBody {
    pub actor_id: String,
    pub new_start: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBody {
    pub actor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct RuleBody {
    pub day_of_week: u8,
    pub start_local: NaiveTime,
    pub end_local: NaiveTime,
    #[serde(default = "default_true")]
    pub is_available: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct RulesBody {
    pub rules: Vec<RuleBody>,
}

#[derive(Debug, Deserialize)]
pub struct BlockBody {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Partial settings update; unset fields keep their effective value
#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    pub timezone: Option<String>,
    pub buffer_minutes: Option<u32>,
    pub min_notice_minutes: Option<u32>,
    pub max_advance_days: Option<u32>,
    pub max_reschedules: Option<u32>,
    pub max_bookings_per_week: Option<u32>,
}

// ============================================================================
// Header helpers
// ============================================================================

fn idempotency_key(headers: &HeaderMap) -> Result<&str> {
    headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingIdempotencyKey)
}

fn trace_id(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-request-id").and_then(|v| v.to_str().ok())
}

// ============================================================================
// Handler functions
// ============================================================================

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Bookable slots for a provider
pub async fn list_slots(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotOffer>> {
    debug!(
        "Slot query: provider={} duration={} days={}",
        provider_id, query.duration_minutes, query.days
    );
    let offer = state
        .engine
        .available_slots(&provider_id, query.duration_minutes, query.days)
        .await?;
    Ok(Json(offer))
}

/// Create a booking
pub async fn create_booking(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingOutcome>)> {
    let key = idempotency_key(&headers)?;
    let outcome = state
        .engine
        .create_booking(key, trace_id(&headers), req)
        .await?;
    let status = if outcome.replayed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(outcome)))
}

/// Fetch one booking
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>> {
    let booking = state
        .engine
        .booking(&booking_id)?
        .ok_or_else(|| tb_core::Error::NotFound(booking_id))?;
    Ok(Json(booking))
}

/// Move a booking to a new start time
pub async fn reschedule_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RescheduleBody>,
) -> Result<Json<BookingOutcome>> {
    let key = idempotency_key(&headers)?;
    let outcome = state
        .engine
        .reschedule_booking(
            key,
            trace_id(&headers),
            RescheduleRequest {
                booking_id,
                actor_id: body.actor_id,
                new_start: body.new_start,
            },
        )
        .await?;
    Ok(Json(outcome))
}

/// Cancel a booking (soft delete)
pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CancelBody>,
) -> Result<Json<BookingOutcome>> {
    let key = idempotency_key(&headers)?;
    let outcome = state
        .engine
        .cancel_booking(
            key,
            trace_id(&headers),
            CancelRequest {
                booking_id,
                actor_id: body.actor_id,
            },
        )
        .await?;
    Ok(Json(outcome))
}

/// Payment collaborator settlement callback
pub async fn settle_payment(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
    headers: HeaderMap,
    Json(charge): Json<ChargeResult>,
) -> Result<Json<Booking>> {
    let booking = state
        .engine
        .settle_payment(&booking_id, &charge, trace_id(&headers))
        .await?;
    Ok(Json(booking))
}

/// Audit trail of one booking
pub async fn booking_audit(
    State(state): State<AppState>,
    Path(booking_id): Path<String>,
) -> Result<Json<Vec<AuditEntry>>> {
    Ok(Json(state.engine.audit_trail(&booking_id)?))
}

/// A provider's weekly availability rules
pub async fn provider_rules(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
) -> Result<Json<Vec<AvailabilityRule>>> {
    Ok(Json(state.engine.list_rules(&provider_id)?))
}

/// Replace a provider's whole rule set
pub async fn replace_rules(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RulesBody>,
) -> Result<StatusCode> {
    let rules: Vec<AvailabilityRule> = body
        .rules
        .into_iter()
        .map(|r| {
            AvailabilityRule::new(
                &provider_id,
                r.day_of_week,
                r.start_local,
                r.end_local,
                r.is_available,
            )
        })
        .collect();
    state
        .engine
        .replace_provider_rules(&provider_id, rules, &provider_id, trace_id(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Block out ad-hoc time; reports overlapping active bookings back
pub async fn create_block(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<BlockBody>,
) -> Result<(StatusCode, Json<BlockCreated>)> {
    let created = state.engine.create_block(
        CreateBlockRequest {
            provider_id: provider_id.clone(),
            start_time: body.start_time,
            end_time: body.end_time,
            reason: body.reason,
        },
        &provider_id,
        trace_id(&headers),
    )?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn remove_block(
    State(state): State<AppState>,
    Path((provider_id, block_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    state
        .engine
        .remove_block(&provider_id, &block_id, &provider_id, trace_id(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Merge a partial settings update over the effective settings
pub async fn update_settings(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<SettingsBody>,
) -> Result<Json<ProviderSettings>> {
    let mut settings = state.engine.provider_settings(&provider_id)?;
    if let Some(timezone) = body.timezone {
        settings.timezone = timezone;
    }
    if let Some(v) = body.buffer_minutes {
        settings.buffer_minutes = v;
    }
    if let Some(v) = body.min_notice_minutes {
        settings.min_notice_minutes = v;
    }
    if let Some(v) = body.max_advance_days {
        settings.max_advance_days = v;
    }
    if let Some(v) = body.max_reschedules {
        settings.max_reschedules = v;
    }
    if let Some(v) = body.max_bookings_per_week {
        settings.max_bookings_per_week = v;
    }

    state
        .engine
        .update_provider_settings(settings.clone(), &provider_id, trace_id(&headers))?;
    Ok(Json(settings))
}
