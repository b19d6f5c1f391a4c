//! tb-calendar: calendar-sync integration for the booking engine
//!
//! HTTP client for the calendar-sync service. Feeds external busy
//! windows into the availability aggregator (read path, retried) and
//! mirrors committed bookings back out (write path, fire-and-forget).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tb_calendar::{CalendarSyncClient, CalendarSyncConfig};
//!
//! let config = CalendarSyncConfig::new("https://sync.example.com", "token");
//! let client = CalendarSyncClient::new(config)?;
//!
//! let busy = client
//!     .fetch_busy("provider-1", chrono::Utc::now(), chrono::Utc::now() + chrono::Duration::days(14))
//!     .await?;
//! ```

pub mod client;
pub mod error;
pub mod models;

pub use client::CalendarSyncClient;
pub use error::{CalendarSyncError, Result};
pub use models::{BusyWindowDto, CalendarSyncConfig, MirrorEventRequest};
