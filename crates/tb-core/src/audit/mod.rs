//! Append-only audit trail
//!
//! Every mutating operation writes exactly one [`AuditEntry`] inside the
//! same transaction as the mutation itself, including early-return
//! (cached/conflict) branches, so the trail reflects attempted actions
//! rather than only first executions. Entries are mirrored to tracing
//! for operators tailing logs.

mod types;

use tracing::{info, warn};

pub use types::{AuditAction, AuditEntry, AuditOutcome};

/// Mirror an entry to the structured log. Persistence happens in the
/// store; this is the operator-visible echo.
pub fn log_entry(entry: &AuditEntry) {
    match serde_json::to_string(entry) {
        Ok(json) => info!("[AUDIT] {}", json),
        Err(e) => warn!("[AUDIT] unserializable entry {}: {}", entry.id, e),
    }
}
