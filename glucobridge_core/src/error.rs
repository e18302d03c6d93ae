//! Error types for the glucobridge_core library.

use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for glucobridge_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Missing or invalid configuration (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Login against the source provider failed
    #[error("Authentication failed: {0}")]
    Auth(Failure),

    /// Retrieving or parsing the latest reading failed
    #[error("Fetch failed: {0}")]
    Fetch(Failure),

    /// Submitting an entry to the destination server failed
    #[error("Forward failed: {0}")]
    Forward(Failure),

    /// Marker persistence error
    #[error("State error: {0}")]
    State(String),
}

/// What went wrong on an HTTP exchange.
///
/// Kept separate from the step that failed so callers can tell an expired
/// session (401/403) apart from a network blip or a bad payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Failure {
    /// Connection, DNS, TLS or timeout error before a status was received
    Transport(String),
    /// Server answered with a non-success status code
    Status(u16),
    /// Response body was missing required fields or was not valid JSON
    Malformed(String),
}

impl Failure {
    /// True when the server rejected our credentials or token
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Failure::Status(401) | Failure::Status(403))
    }

    pub(crate) fn from_reqwest(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Failure::Status(status.as_u16())
        } else if e.is_decode() {
            Failure::Malformed(e.to_string())
        } else {
            Failure::Transport(e.to_string())
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Transport(msg) => write!(f, "transport error: {}", msg),
            Failure::Status(code) => write!(f, "HTTP status {}", code),
            Failure::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl Error {
    /// The HTTP failure behind a login/fetch/forward error, if any
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Error::Auth(f) | Error::Fetch(f) | Error::Forward(f) => Some(f),
            _ => None,
        }
    }
}
