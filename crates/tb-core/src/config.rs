//! Configuration management
//!
//! Settings are read from environment variables with sensible defaults.
//! The binary loads a `.env` file first (dotenvy), so deployments can
//! keep everything in one place. Per-provider settings stored in the
//! database override the booking-policy defaults configured here.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration for the booking engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Booking policy defaults
    #[serde(default)]
    pub booking: BookingPolicyConfig,

    /// Idempotency record retention
    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/tutorbook.db".to_string()
}

/// Booking policy defaults, overridable per provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingPolicyConfig {
    /// Maximum number of times a booking may be rescheduled
    #[serde(default = "default_max_reschedules")]
    pub max_reschedules: u32,

    /// Minimum notice before a slot may start, in minutes
    #[serde(default = "default_min_notice_minutes")]
    pub min_notice_minutes: u32,

    /// Maximum advance-booking window, in days
    #[serde(default = "default_max_advance_days")]
    pub max_advance_days: u32,

    /// Default breathing room around adjacent bookings, in minutes
    #[serde(default)]
    pub default_buffer_minutes: u32,

    /// Maximum active bookings per provider in any rolling week
    #[serde(default = "default_max_bookings_per_week")]
    pub max_bookings_per_week: u32,

    /// Fallback timezone for providers without settings
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for BookingPolicyConfig {
    fn default() -> Self {
        Self {
            max_reschedules: default_max_reschedules(),
            min_notice_minutes: default_min_notice_minutes(),
            max_advance_days: default_max_advance_days(),
            default_buffer_minutes: 0,
            max_bookings_per_week: default_max_bookings_per_week(),
            default_timezone: default_timezone(),
        }
    }
}

fn default_max_reschedules() -> u32 {
    2
}

fn default_min_notice_minutes() -> u32 {
    120
}

fn default_max_advance_days() -> u32 {
    60
}

fn default_max_bookings_per_week() -> u32 {
    25
}

fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    /// Hours before a stored idempotency record expires and a retried
    /// key is treated as a new request
    #[serde(default = "default_idempotency_ttl_hours")]
    pub ttl_hours: u32,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_idempotency_ttl_hours(),
        }
    }
}

fn default_idempotency_ttl_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Port for the HTTP API server
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("TB_DATABASE_PATH") {
            config.database.path = path;
        }
        if let Ok(port) = std::env::var("TB_API_PORT") {
            config.api.port = port
                .parse()
                .map_err(|_| Error::Validation(format!("invalid TB_API_PORT: {port}")))?;
        }
        if let Ok(v) = std::env::var("TB_MAX_RESCHEDULES") {
            config.booking.max_reschedules = parse_env("TB_MAX_RESCHEDULES", &v)?;
        }
        if let Ok(v) = std::env::var("TB_MIN_NOTICE_MINUTES") {
            config.booking.min_notice_minutes = parse_env("TB_MIN_NOTICE_MINUTES", &v)?;
        }
        if let Ok(v) = std::env::var("TB_MAX_ADVANCE_DAYS") {
            config.booking.max_advance_days = parse_env("TB_MAX_ADVANCE_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("TB_BUFFER_MINUTES") {
            config.booking.default_buffer_minutes = parse_env("TB_BUFFER_MINUTES", &v)?;
        }
        if let Ok(v) = std::env::var("TB_MAX_BOOKINGS_PER_WEEK") {
            config.booking.max_bookings_per_week = parse_env("TB_MAX_BOOKINGS_PER_WEEK", &v)?;
        }
        if let Ok(tz) = std::env::var("TB_DEFAULT_TIMEZONE") {
            config.booking.default_timezone = tz;
        }
        if let Ok(v) = std::env::var("TB_IDEMPOTENCY_TTL_HOURS") {
            config.idempotency.ttl_hours = parse_env("TB_IDEMPOTENCY_TTL_HOURS", &v)?;
        }

        Ok(config)
    }
}

fn parse_env(name: &str, value: &str) -> Result<u32> {
    value
        .parse()
        .map_err(|_| Error::Validation(format!("invalid {name}: {value}")))
}
