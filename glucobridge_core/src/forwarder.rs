//! Submission of readings to the destination server.
//!
//! Every call sends exactly one entry and never retries: the entries API has
//! no idempotency key, so a retry could store the same reading twice.

use crate::config::{self, Config};
use crate::error::{Error, Failure, Result};
use crate::types::{ForwardEntry, Reading};
use chrono::Utc;
use chrono_tz::Tz;
use std::time::Duration;

/// Header carrying the destination's shared secret
pub const API_SECRET_HEADER: &str = "API-SECRET";

/// Entries endpoint relative to the destination base URL
pub const ENTRIES_PATH: &str = "/api/v1/entries.json";

/// Destination for novel readings
pub trait EntrySink {
    fn forward(&self, reading: &Reading) -> Result<()>;
}

/// Nightscout entries API client
pub struct NightscoutClient {
    http: reqwest::blocking::Client,
    entries_url: String,
    api_secret: String,
    timezone: Tz,
}

impl NightscoutClient {
    pub fn new(
        base_url: &str,
        api_secret: impl Into<String>,
        timezone: Tz,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_http_client(http, base_url, api_secret, timezone))
    }

    /// Use a caller-built HTTP client (proxy, TLS or timeout settings)
    pub fn with_http_client(
        http: reqwest::blocking::Client,
        base_url: &str,
        api_secret: impl Into<String>,
        timezone: Tz,
    ) -> Self {
        Self {
            http,
            entries_url: entries_url(base_url),
            api_secret: api_secret.into(),
            timezone,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config::required(&config.destination.url, config::env::NIGHTSCOUT_URL)?,
            config::required(&config.destination.api_secret, config::env::NIGHTSCOUT_SECRET)?,
            config.timezone()?,
            Duration::from_secs(config.destination.timeout_secs),
        )
    }

    pub fn entries_url(&self) -> &str {
        &self.entries_url
    }
}

impl EntrySink for NightscoutClient {
    fn forward(&self, reading: &Reading) -> Result<()> {
        let entry = ForwardEntry::from_reading(reading, Utc::now(), self.timezone);
        tracing::debug!("Sending entry to Nightscout: {:?}", entry);

        let response = self
            .http
            .post(&self.entries_url)
            .header(API_SECRET_HEADER, self.api_secret.as_str())
            .json(&[entry])
            .send()
            .map_err(|e| Error::Forward(Failure::from_reqwest(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Forward(Failure::Status(status.as_u16())));
        }

        tracing::info!(
            "Successfully sent glucose {} {} to Nightscout",
            reading.value,
            reading.trend
        );
        Ok(())
    }
}

fn entries_url(base_url: &str) -> String {
    format!("{}{}", base_url.trim().trim_end_matches('/'), ENTRIES_PATH)
}
