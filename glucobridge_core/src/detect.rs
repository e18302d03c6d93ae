//! Novelty check for fetched readings.

use crate::types::Reading;

/// True when `reading` has not been forwarded yet.
///
/// Timestamps are opaque provider tokens: only equality is meaningful, never ordering.
pub fn is_new(reading: &Reading, last_marker: Option<&str>) -> bool {
    last_marker != Some(reading.timestamp.as_str())
}
