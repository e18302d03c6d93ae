//! Core domain types for the glucose bridge.
//!
//! This module defines the values that flow through a poll cycle:
//! - Readings fetched from the source provider
//! - Trend directions shared by both services
//! - Entries submitted to the destination server

use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Fixed entry type for a sensor glucose value
pub const SGV_ENTRY_TYPE: &str = "sgv";

/// Device label attached to every forwarded entry
pub const DEVICE_LABEL: &str = "LibreLinkUp";

// ============================================================================
// Trend
// ============================================================================

/// Direction of glucose change, using the destination's direction names
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Trend {
    DoubleUp,
    SingleUp,
    FortyFiveUp,
    #[default]
    Flat,
    FortyFiveDown,
    SingleDown,
    DoubleDown,
    NotComputable,
    RateOutOfRange,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::DoubleUp => "DoubleUp",
            Trend::SingleUp => "SingleUp",
            Trend::FortyFiveUp => "FortyFiveUp",
            Trend::Flat => "Flat",
            Trend::FortyFiveDown => "FortyFiveDown",
            Trend::SingleDown => "SingleDown",
            Trend::DoubleDown => "DoubleDown",
            Trend::NotComputable => "NOT COMPUTABLE",
            Trend::RateOutOfRange => "RATE OUT OF RANGE",
        }
    }

    /// Map the provider's numeric trend arrow (1 = falling fast .. 5 = rising fast)
    pub fn from_arrow(arrow: i64) -> Option<Self> {
        match arrow {
            1 => Some(Trend::SingleDown),
            2 => Some(Trend::FortyFiveDown),
            3 => Some(Trend::Flat),
            4 => Some(Trend::FortyFiveUp),
            5 => Some(Trend::SingleUp),
            _ => None,
        }
    }
}

impl FromStr for Trend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DoubleUp" => Ok(Trend::DoubleUp),
            "SingleUp" => Ok(Trend::SingleUp),
            "FortyFiveUp" => Ok(Trend::FortyFiveUp),
            "Flat" => Ok(Trend::Flat),
            "FortyFiveDown" => Ok(Trend::FortyFiveDown),
            "SingleDown" => Ok(Trend::SingleDown),
            "DoubleDown" => Ok(Trend::DoubleDown),
            "NOT COMPUTABLE" | "NotComputable" => Ok(Trend::NotComputable),
            "RATE OUT OF RANGE" | "RateOutOfRange" => Ok(Trend::RateOutOfRange),
            other => Err(format!("unknown trend: {}", other)),
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Trend {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Reading
// ============================================================================

/// One glucose measurement as reported by the source provider
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    /// Glucose value, passed through exactly as the provider sent it
    pub value: serde_json::Number,
    pub trend: Trend,
    /// Provider-defined identity of the measurement. Compare by equality only.
    pub timestamp: String,
}

// ============================================================================
// Forward Entry
// ============================================================================

/// Destination-format record built from a reading at send time
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ForwardEntry {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Wall-clock time of the send, epoch milliseconds
    pub date: i64,
    /// Wall-clock time of the send in the configured timezone
    #[serde(rename = "dateString")]
    pub date_string: String,
    pub sgv: serde_json::Number,
    pub device: &'static str,
    pub direction: Trend,
}

impl ForwardEntry {
    /// Build an entry for `reading` stamped with `now`, not the reading's own timestamp
    pub fn from_reading(reading: &Reading, now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            kind: SGV_ENTRY_TYPE,
            date: now.timestamp_millis(),
            date_string: now
                .with_timezone(&tz)
                .to_rfc3339_opts(SecondsFormat::Micros, false),
            sgv: reading.value.clone(),
            device: DEVICE_LABEL,
            direction: reading.trend,
        }
    }
}
