//! Error types for tb-calendar

use thiserror::Error;

/// tb-calendar error type
#[derive(Error, Debug)]
pub enum CalendarSyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<CalendarSyncError> for tb_core::Error {
    fn from(err: CalendarSyncError) -> Self {
        tb_core::Error::Collaborator(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CalendarSyncError>;
