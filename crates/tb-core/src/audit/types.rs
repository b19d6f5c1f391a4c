//! Audit trail entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mutating operations tracked in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    BookingCreated,
    BookingRescheduled,
    BookingCancelled,
    PaymentSettled,
    RefundIssued,
    RulesReplaced,
    BlockCreated,
    BlockRemoved,
    SettingsUpdated,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::BookingCreated => "booking_created",
            AuditAction::BookingRescheduled => "booking_rescheduled",
            AuditAction::BookingCancelled => "booking_cancelled",
            AuditAction::PaymentSettled => "payment_settled",
            AuditAction::RefundIssued => "refund_issued",
            AuditAction::RulesReplaced => "rules_replaced",
            AuditAction::BlockCreated => "block_created",
            AuditAction::BlockRemoved => "block_removed",
            AuditAction::SettingsUpdated => "settings_updated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "booking_created" => Some(AuditAction::BookingCreated),
            "booking_rescheduled" => Some(AuditAction::BookingRescheduled),
            "booking_cancelled" => Some(AuditAction::BookingCancelled),
            "payment_settled" => Some(AuditAction::PaymentSettled),
            "refund_issued" => Some(AuditAction::RefundIssued),
            "rules_replaced" => Some(AuditAction::RulesReplaced),
            "block_created" => Some(AuditAction::BlockCreated),
            "block_removed" => Some(AuditAction::BlockRemoved),
            "settings_updated" => Some(AuditAction::SettingsUpdated),
            _ => None,
        }
    }
}

/// Which branch the operation took. Every invocation of a mutating
/// operation leaves exactly one entry, whatever branch it exits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Ok,
    /// Idempotent replay served from the stored result
    Replayed,
    Conflict,
    PolicyViolation,
    ValidationFailed,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Ok => "ok",
            AuditOutcome::Replayed => "replayed",
            AuditOutcome::Conflict => "conflict",
            AuditOutcome::PolicyViolation => "policy_violation",
            AuditOutcome::ValidationFailed => "validation_failed",
            AuditOutcome::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(AuditOutcome::Ok),
            "replayed" => Some(AuditOutcome::Replayed),
            "conflict" => Some(AuditOutcome::Conflict),
            "policy_violation" => Some(AuditOutcome::PolicyViolation),
            "validation_failed" => Some(AuditOutcome::ValidationFailed),
            "error" => Some(AuditOutcome::Error),
            _ => None,
        }
    }
}

/// A single append-only audit entry with before/after snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub actor_id: String,
    pub action: AuditAction,
    pub target_id: Option<String>,
    /// State snapshot before the mutation, when one existed
    pub before: Option<serde_json::Value>,
    /// State snapshot after the mutation (or attempted state on failure)
    pub after: Option<serde_json::Value>,
    pub outcome: AuditOutcome,
    /// Request/correlation ID for tracing
    pub trace_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, actor_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            actor_id: actor_id.into(),
            action,
            target_id: None,
            before: None,
            after: None,
            outcome: AuditOutcome::Ok,
            trace_id: None,
            timestamp,
        }
    }

    pub fn with_target(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn with_before(mut self, before: serde_json::Value) -> Self {
        self.before = Some(before);
        self
    }

    pub fn with_after(mut self, after: serde_json::Value) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
