//! Error types for tb-core

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::booking::BookingStatus;
use crate::time::TimeWindow;

/// Policy checks that terminate a request without a side effect
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("booking starts beyond the advance window of {max_advance_days} days")]
    AdvanceWindow { max_advance_days: u32 },

    #[error("booking starts inside the minimum notice period of {min_notice_minutes} minutes")]
    MinimumNotice { min_notice_minutes: u32 },

    #[error("reschedule limit of {max_reschedules} reached")]
    RescheduleCap { max_reschedules: u32 },

    #[error("provider already has {max_bookings_per_week} active bookings that week")]
    VolumeLimit { max_bookings_per_week: u32 },

    #[error("booking is in terminal state {0}")]
    TerminalState(BookingStatus),
}

/// Main error type for tb-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("slot no longer available, overlaps {window}")]
    Conflict {
        window: TimeWindow,
        /// Nearest still-open slot starts, so the caller can recover
        /// without a second round trip.
        alternatives: Vec<DateTime<Utc>>,
    },

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    #[error("idempotency key '{0}' reused with a different payload")]
    KeyReuse(String),

    #[error("collaborator call failed: {0}")]
    Collaborator(String),

    #[error("booking not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tb-core
pub type Result<T> = std::result::Result<T, Error>;
