//! Source provider seam.
//!
//! The supervisor talks to the provider through [`GlucoseSource`] so the poll
//! loop can be exercised with fakes. [`LinkUpClient`] is the real HTTP client.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetcher;
use crate::session::{self, ClientInfo, Credentials, Session};
use crate::types::Reading;
use std::time::Duration;

/// Login and fetch against a glucose data provider
pub trait GlucoseSource {
    /// Authenticate and return a fresh session
    fn login(&self) -> Result<Session>;

    /// Fetch the latest reading using `session`
    fn fetch(&self, session: &Session) -> Result<Reading>;
}

/// LibreLinkUp follower API client
pub struct LinkUpClient {
    http: reqwest::blocking::Client,
    credentials: Credentials,
    client_info: ClientInfo,
    login_url: String,
    glucose_url: String,
}

impl LinkUpClient {
    pub fn new(
        credentials: Credentials,
        client_info: ClientInfo,
        login_url: impl Into<String>,
        glucose_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_http_client(
            http,
            credentials,
            client_info,
            login_url,
            glucose_url,
        ))
    }

    /// Use a caller-built HTTP client (proxy, TLS or timeout settings)
    pub fn with_http_client(
        http: reqwest::blocking::Client,
        credentials: Credentials,
        client_info: ClientInfo,
        login_url: impl Into<String>,
        glucose_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            credentials,
            client_info,
            login_url: login_url.into(),
            glucose_url: glucose_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            Credentials::from_config(config)?,
            ClientInfo::from_config(config),
            config.login_url(),
            config.glucose_url(),
            Duration::from_secs(config.source.timeout_secs),
        )
    }
}

impl GlucoseSource for LinkUpClient {
    fn login(&self) -> Result<Session> {
        session::login(&self.http, &self.login_url, &self.credentials, &self.client_info)
    }

    fn fetch(&self, session: &Session) -> Result<Reading> {
        fetcher::fetch(&self.http, &self.glucose_url, session)
    }
}
