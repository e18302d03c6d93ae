//! Retrieval of the latest glucose measurement from the source provider.

use crate::error::{Error, Failure, Result};
use crate::session::Session;
use crate::types::{Reading, Trend};
use serde_json::Value;

/// Fetch the latest reading with an authenticated GET. No retries here.
pub(crate) fn fetch(
    http: &reqwest::blocking::Client,
    glucose_url: &str,
    session: &Session,
) -> Result<Reading> {
    tracing::debug!("Getting glucose data from {}", glucose_url);

    let response = http
        .get(glucose_url)
        .headers(session.headers().clone())
        .send()
        .map_err(|e| Error::Fetch(Failure::from_reqwest(e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch(Failure::Status(status.as_u16())));
    }

    let body: Value = response
        .json()
        .map_err(|e| Error::Fetch(Failure::Malformed(format!("glucose response is not JSON: {}", e))))?;

    parse_measurement(&body).map_err(Error::Fetch)
}

/// Extract the latest measurement from a glucose response body.
///
/// `Value` and `Timestamp` are required. The trend comes from `Trend` when present,
/// otherwise from the numeric `TrendArrow`, otherwise it is `Flat`.
pub fn parse_measurement(body: &Value) -> std::result::Result<Reading, Failure> {
    let measurement = body
        .get("data")
        .and_then(|data| data.get("glucoseMeasurement"))
        .filter(|m| m.is_object())
        .ok_or_else(|| Failure::Malformed("response has no data.glucoseMeasurement".into()))?;

    let value = match measurement.get("Value") {
        Some(Value::Number(n)) => n.clone(),
        Some(other) => {
            return Err(Failure::Malformed(format!(
                "measurement Value is not a number: {}",
                other
            )))
        }
        None => return Err(Failure::Malformed("measurement has no Value".into())),
    };

    let timestamp = match measurement.get("Timestamp") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(Failure::Malformed(format!(
                "measurement Timestamp is unusable: {}",
                other
            )))
        }
        None => return Err(Failure::Malformed("measurement has no Timestamp".into())),
    };

    Ok(Reading {
        value,
        trend: parse_trend(measurement),
        timestamp,
    })
}

fn parse_trend(measurement: &Value) -> Trend {
    match measurement.get("Trend") {
        Some(Value::String(s)) => {
            return s.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; reporting NOT COMPUTABLE", e);
                Trend::NotComputable
            });
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            tracing::warn!("Unexpected Trend value {}; reporting NOT COMPUTABLE", other);
            return Trend::NotComputable;
        }
    }

    match measurement.get("TrendArrow").and_then(Value::as_i64) {
        Some(arrow) => Trend::from_arrow(arrow).unwrap_or_else(|| {
            tracing::warn!("Unknown TrendArrow {}; reporting NOT COMPUTABLE", arrow);
            Trend::NotComputable
        }),
        None => Trend::default(),
    }
}
