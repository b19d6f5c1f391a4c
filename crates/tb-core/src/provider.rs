//! Per-provider booking settings
//!
//! Providers override the workspace policy defaults (buffer, notice,
//! advance window, volume limits) and carry the timezone their weekly
//! rules are written in.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::config::BookingPolicyConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider_id: String,
    /// IANA timezone name the provider's rules are expressed in
    pub timezone: String,
    pub buffer_minutes: u32,
    pub min_notice_minutes: u32,
    pub max_advance_days: u32,
    pub max_reschedules: u32,
    pub max_bookings_per_week: u32,
}

impl ProviderSettings {
    /// Settings for a provider that has never customized anything
    pub fn defaults(provider_id: impl Into<String>, policy: &BookingPolicyConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            timezone: policy.default_timezone.clone(),
            buffer_minutes: policy.default_buffer_minutes,
            min_notice_minutes: policy.min_notice_minutes,
            max_advance_days: policy.max_advance_days,
            max_reschedules: policy.max_reschedules,
            max_bookings_per_week: policy.max_bookings_per_week,
        }
    }

    /// Parse the stored timezone name
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| Error::Validation(format!("unknown timezone: {}", self.timezone)))
    }
}
