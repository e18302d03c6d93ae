//! Session management against the source provider.
//!
//! A [`Session`] is created by a successful login and carries the headers
//! every authenticated request needs. It is never patched in place: a
//! re-login produces a new value that replaces the old one.

use crate::config::{self, Config};
use crate::error::{Error, Failure, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Account credentials for the source provider
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(
            config::required(&config.source.username, config::env::USERNAME)?,
            config::required(&config.source.password, config::env::PASSWORD)?,
        ))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Product metadata the provider requires on the login request
#[derive(Clone, Debug)]
pub struct ClientInfo {
    pub product: String,
    pub version: String,
}

impl ClientInfo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            product: config.source.product.clone(),
            version: config.source.version.clone(),
        }
    }
}

/// Authenticated session: bearer token plus the headers attached to every request
#[derive(Clone)]
pub struct Session {
    token: String,
    headers: HeaderMap,
}

impl Session {
    /// Build a session around an auth token
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            Error::Auth(Failure::Malformed(
                "auth token contains characters not allowed in a header".into(),
            ))
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self { token, headers })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Headers to attach to every authenticated request
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Log in and produce a fresh session. One HTTP call, never retried here.
pub(crate) fn login(
    http: &reqwest::blocking::Client,
    login_url: &str,
    credentials: &Credentials,
    client: &ClientInfo,
) -> Result<Session> {
    tracing::info!("Logging in to LibreLinkUp as {}", credentials.username);

    let response = http
        .post(login_url)
        .header("product", client.product.as_str())
        .header("version", client.version.as_str())
        .json(credentials)
        .send()
        .map_err(|e| Error::Auth(Failure::from_reqwest(e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Auth(Failure::Status(status.as_u16())));
    }

    let body: Value = response
        .json()
        .map_err(|e| Error::Auth(Failure::Malformed(format!("login response is not JSON: {}", e))))?;

    let token = parse_auth_token(&body).map_err(Error::Auth)?;
    let session = Session::new(token)?;

    tracing::info!("Login successful");
    Ok(session)
}

/// Extract the auth token from a login response body
pub fn parse_auth_token(body: &Value) -> std::result::Result<String, Failure> {
    let data = body
        .get("data")
        .ok_or_else(|| Failure::Malformed("login response has no data object".into()))?;

    if data.get("redirect").and_then(Value::as_bool) == Some(true) {
        let region = data
            .get("region")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(Failure::Malformed(format!(
            "account belongs to region {:?}; set {} accordingly",
            region,
            config::env::REGION
        )));
    }

    data.get("authTicket")
        .and_then(|ticket| ticket.get("token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Failure::Malformed("login response has no authTicket.token".into()))
}
