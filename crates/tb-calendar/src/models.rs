//! Data models for the calendar-sync service API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar-sync client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarSyncConfig {
    /// Base URL of the calendar-sync service
    pub base_url: String,
    /// Bearer token for authentication
    pub api_token: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Read-path retries after the first attempt
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    2
}

impl CalendarSyncConfig {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_retry_attempts(mut self, retry_attempts: u32) -> Self {
        self.retry_attempts = retry_attempts;
        self
    }
}

/// One busy interval as the sync service reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyWindowDto {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Response body of the busy-windows endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusyResponse {
    #[serde(default)]
    pub windows: Vec<BusyWindowDto>,
}

/// Request body for mirroring a booking into the external calendar
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorEventRequest {
    pub booking_id: String,
    pub provider_id: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = CalendarSyncConfig::new("https://sync.example.com", "token")
            .with_timeout_secs(5)
            .with_retry_attempts(0);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retry_attempts, 0);
    }

    #[test]
    fn test_busy_response_decodes() {
        let body = r#"{"windows":[{"start":"2026-09-07T10:00:00Z","end":"2026-09-07T10:30:00Z"}]}"#;
        let response: BusyResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.windows.len(), 1);
        assert!(response.windows[0].start < response.windows[0].end);

        // A missing windows field means no busy time
        let empty: BusyResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.windows.is_empty());
    }
}
