//! Error types for tb-api
//!
//! Maps the engine's error taxonomy onto HTTP statuses: 400 malformed,
//! 404 unknown target, 409 conflict or key misuse, 422 policy
//! rejection, 503 collaborator failure, 500 everything else. Conflict
//! responses carry the nearest alternative slots.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use tb_core::PolicyViolation;

/// tb-api error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("missing Idempotency-Key header")]
    MissingIdempotencyKey,

    #[error(transparent)]
    Core(#[from] tb_core::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alternatives: Option<Vec<DateTime<Utc>>>,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingIdempotencyKey => StatusCode::BAD_REQUEST,
            ApiError::Core(err) => match err {
                tb_core::Error::Validation(_) => StatusCode::BAD_REQUEST,
                tb_core::Error::NotFound(_) => StatusCode::NOT_FOUND,
                tb_core::Error::Conflict { .. } | tb_core::Error::KeyReuse(_) => {
                    StatusCode::CONFLICT
                }
                tb_core::Error::Policy(_) => StatusCode::UNPROCESSABLE_ENTITY,
                tb_core::Error::Collaborator(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingIdempotencyKey => "missing_idempotency_key",
            ApiError::Core(err) => match err {
                tb_core::Error::Validation(_) => "validation_failed",
                tb_core::Error::NotFound(_) => "not_found",
                tb_core::Error::Conflict { .. } => "slot_conflict",
                tb_core::Error::KeyReuse(_) => "idempotency_key_reuse",
                tb_core::Error::Policy(PolicyViolation::AdvanceWindow { .. }) => "advance_window",
                tb_core::Error::Policy(PolicyViolation::MinimumNotice { .. }) => "minimum_notice",
                tb_core::Error::Policy(PolicyViolation::RescheduleCap { .. }) => "reschedule_cap",
                tb_core::Error::Policy(PolicyViolation::VolumeLimit { .. }) => "volume_limit",
                tb_core::Error::Policy(PolicyViolation::TerminalState(_)) => "terminal_state",
                tb_core::Error::Collaborator(_) => "collaborator_unavailable",
                _ => "internal_error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self);
        }

        let alternatives = match &self {
            ApiError::Core(tb_core::Error::Conflict { alternatives, .. }) => {
                Some(alternatives.clone())
            }
            _ => None,
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            alternatives,
        };
        (status, Json(body)).into_response()
    }
}
