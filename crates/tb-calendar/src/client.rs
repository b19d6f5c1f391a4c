//! Calendar-sync HTTP client
//!
//! Talks to the calendar-sync service over JSON. The read path (busy
//! windows) retries with exponential backoff because the aggregator
//! polls it on every slot query; the write path (mirror/remove) does
//! not retry, since it runs post-commit and the caller only logs
//! failures.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tracing::{debug, info, warn};

use tb_core::{Booking, CalendarMirror, ExternalBusySource, TimeWindow};

use crate::error::{CalendarSyncError, Result};
use crate::models::{BusyResponse, CalendarSyncConfig, MirrorEventRequest};

const RETRY_BASE_DELAY_MS: u64 = 250;

/// Client for the calendar-sync service
pub struct CalendarSyncClient {
    client: Client,
    config: CalendarSyncConfig,
    base_url: String,
}

impl CalendarSyncClient {
    pub fn new(config: CalendarSyncConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CalendarSyncError::Configuration(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        info!("Calendar-sync client initialized for: {}", base_url);

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Busy windows for a provider within a range, with retries
    pub async fn fetch_busy(
        &self,
        provider_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>> {
        let url = format!("{}/providers/{}/busy", self.base_url, provider_id);

        let mut attempt = 0;
        loop {
            match self.fetch_busy_once(&url, start, end).await {
                Ok(windows) => return Ok(windows),
                Err(e) if attempt < self.config.retry_attempts => {
                    let delay = RETRY_BASE_DELAY_MS * (1 << attempt);
                    warn!(
                        "busy-window fetch attempt {} failed, retrying in {}ms: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_busy_once(
        &self,
        url: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeWindow>> {
        debug!("Fetching busy windows from: {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_token)
            .query(&[("start", start.to_rfc3339()), ("end", end.to_rfc3339())])
            .send()
            .await
            .map_err(|e| CalendarSyncError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarSyncError::Api { status, body });
        }

        let busy: BusyResponse = response
            .json()
            .await
            .map_err(|e| CalendarSyncError::Decode(e.to_string()))?;

        Ok(busy
            .windows
            .into_iter()
            .filter(|w| w.start < w.end)
            .map(|w| TimeWindow::new(w.start, w.end))
            .collect())
    }

    /// Mirror a booking into the provider's external calendar
    pub async fn put_event(&self, booking: &Booking) -> Result<()> {
        let url = format!(
            "{}/providers/{}/events",
            self.base_url, booking.provider_id
        );
        let body = MirrorEventRequest {
            booking_id: booking.id.clone(),
            provider_id: booking.provider_id.clone(),
            summary: format!("Tutoring session ({})", booking.client_id),
            start: booking.window().start,
            end: booking.window().end,
        };

        debug!("Mirroring booking {} to {}", booking.id, url);

        let response = self
            .client
            .put(&url)
            .bearer_auth(&self.config.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| CalendarSyncError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarSyncError::Api { status, body });
        }

        info!("Mirrored booking: {}", booking.id);
        Ok(())
    }

    /// Remove a mirrored booking from the external calendar
    pub async fn delete_event(&self, booking_id: &str) -> Result<()> {
        let url = format!("{}/events/{}", self.base_url, booking_id);

        debug!("Removing mirrored event: {}", booking_id);

        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await
            .map_err(|e| CalendarSyncError::Connection(e.to_string()))?;

        // Already gone is fine: removal is invoked after cancels and
        // may race the sync service's own cleanup.
        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarSyncError::Api { status, body });
        }

        info!("Removed mirrored event: {}", booking_id);
        Ok(())
    }
}

#[async_trait]
impl ExternalBusySource for CalendarSyncClient {
    async fn fetch_busy_windows(
        &self,
        provider_id: &str,
        range_start: DateTime<Utc>,
        range_days: u32,
    ) -> tb_core::Result<Vec<TimeWindow>> {
        let range_end = range_start + chrono::Duration::days(i64::from(range_days));
        let windows = self.fetch_busy(provider_id, range_start, range_end).await?;
        Ok(windows)
    }
}

#[async_trait]
impl CalendarMirror for CalendarSyncClient {
    async fn mirror_booking(&self, booking: &Booking) -> tb_core::Result<()> {
        self.put_event(booking).await?;
        Ok(())
    }

    async fn remove_booking(&self, booking_id: &str) -> tb_core::Result<()> {
        self.delete_event(booking_id).await?;
        Ok(())
    }
}
