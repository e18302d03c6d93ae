//! Configuration for glucobridge.
//!
//! Settings are layered: built-in defaults, then `$XDG_CONFIG_HOME/glucobridge/config.toml`
//! (or an explicit path), then environment variables. A `.env` file is loaded into the
//! process environment first so deployments can keep credentials out of the TOML file.

use crate::{Error, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable names recognised by [`Config::apply_env`]
pub mod env {
    pub const USERNAME: &str = "LIBRELINKUP_EMAIL";
    pub const PASSWORD: &str = "LIBRELINKUP_PASSWORD";
    pub const REGION: &str = "LIBRELINKUP_COUNTRY";
    pub const API_URL: &str = "LIBRELINKUP_API_URL";
    pub const NIGHTSCOUT_URL: &str = "NIGHTSCOUT_URL";
    pub const NIGHTSCOUT_SECRET: &str = "NIGHTSCOUT_API_SECRET";
    pub const TIMEZONE: &str = "TIMEZONE";
    pub const INTERVAL: &str = "POLL_INTERVAL_SECS";
    pub const MARKER_FILE: &str = "MARKER_FILE";
}

/// Longest accepted poll interval (one day)
pub const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub destination: DestinationConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

/// Source provider (LibreLinkUp) account and endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_region")]
    pub region: String,

    /// Overrides the region-derived base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_product")]
    pub product: String,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            region: default_region(),
            api_url: None,
            product: default_product(),
            version: default_version(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Destination server (Nightscout) endpoint and secret
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestinationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_secret: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

/// Poll loop parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Persist the last forwarded timestamp here so restarts do not re-forward
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker_file: Option<PathBuf>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            marker_file: None,
        }
    }
}

// Default value functions
fn default_region() -> String {
    "US".into()
}

fn default_product() -> String {
    "llu.android".into()
}

fn default_version() -> String {
    "4.7".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_interval_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("glucobridge").join("config.toml")
    }

    /// Load a dotenv file into the process environment.
    ///
    /// Existing variables win. With no explicit path a missing `.env` is not an error.
    pub fn load_dotenv(path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    Error::Config(format!("cannot load env file {}: {}", path.display(), e))
                })?;
                tracing::debug!("Loaded environment from {:?}", path);
            }
            None => {
                if let Ok(found) = dotenvy::dotenv() {
                    tracing::debug!("Loaded environment from {:?}", found);
                }
            }
        }
        Ok(())
    }

    /// Overlay values from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup`; empty values are treated as unset
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(env::USERNAME) {
            self.source.username = Some(v);
        }
        if let Some(v) = get(env::PASSWORD) {
            self.source.password = Some(v);
        }
        if let Some(v) = get(env::REGION) {
            self.source.region = v;
        }
        if let Some(v) = get(env::API_URL) {
            self.source.api_url = Some(v);
        }
        if let Some(v) = get(env::NIGHTSCOUT_URL) {
            self.destination.url = Some(v);
        }
        if let Some(v) = get(env::NIGHTSCOUT_SECRET) {
            self.destination.api_secret = Some(v);
        }
        if let Some(v) = get(env::TIMEZONE) {
            self.display.timezone = v;
        }
        if let Some(v) = get(env::INTERVAL) {
            self.polling.interval_secs = v.trim().parse().map_err(|_| {
                Error::Config(format!("{} must be a whole number of seconds, got {:?}", env::INTERVAL, v))
            })?;
        }
        if let Some(v) = get(env::MARKER_FILE) {
            self.polling.marker_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check that every required setting is present and well-formed
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        let required = [
            (&self.source.username, env::USERNAME),
            (&self.source.password, env::PASSWORD),
            (&self.destination.url, env::NIGHTSCOUT_URL),
            (&self.destination.api_secret, env::NIGHTSCOUT_SECRET),
        ];
        for (value, name) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                problems.push(format!("{} is not set", name));
            }
        }

        if let Err(e) = self.timezone() {
            problems.push(e.to_string());
        }
        if self.polling.interval_secs == 0 {
            problems.push("polling interval must be greater than zero".into());
        } else if self.polling.interval_secs > MAX_INTERVAL_SECS {
            problems.push(format!(
                "polling interval must be at most {} seconds, got {}",
                MAX_INTERVAL_SECS, self.polling.interval_secs
            ));
        }
        if self.source.api_url.is_none() {
            let region = self.source.region.trim();
            if region.is_empty() || !region.chars().all(|c| c.is_ascii_alphanumeric()) {
                problems.push(format!(
                    "{} must be a country code such as US or EU, got {:?}",
                    env::REGION, self.source.region
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }

    /// Display timezone
    pub fn timezone(&self) -> Result<Tz> {
        self.display
            .timezone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("unknown timezone {:?}", self.display.timezone)))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval_secs)
    }

    /// Base URL of the source provider, derived from the region unless overridden
    pub fn source_base_url(&self) -> String {
        if let Some(ref url) = self.source.api_url {
            return url.trim_end_matches('/').to_string();
        }
        let region = self.source.region.trim().to_lowercase();
        if region.is_empty() || region == "us" {
            "https://api.libreview.io".into()
        } else {
            format!("https://api-{}.libreview.io", region)
        }
    }

    pub fn login_url(&self) -> String {
        format!("{}/llu/auth/login", self.source_base_url())
    }

    pub fn glucose_url(&self) -> String {
        format!("{}/llu/v2/glucose", self.source_base_url())
    }

    /// Copy of this configuration with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "********".to_string());
        let mut copy = self.clone();
        copy.source.password = mask(&self.source.password);
        copy.destination.api_secret = mask(&self.destination.api_secret);
        copy
    }
}

/// Look up a required string setting, naming its environment variable on failure
pub(crate) fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{} is not set", name)))
}
