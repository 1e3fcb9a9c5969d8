//! ==============================================================================
//! domain.rs - sensor samples, temperature bands, timestamp normalization
//! ==============================================================================
//!
//! purpose:
//!     the shared vocabulary of the feed. both adapters produce `RawSample`s,
//!     the store turns them into canonical `Sample`s, and the presentation
//!     side derives a `Band` from the temperature on read.
//!
//! relationships:
//!     - used by: store.rs (validation + normalization on ingest)
//!     - used by: adapters/* (wire decoding, boundary checks)
//!     - used by: server.rs (band / banner rendering)
//!
//! ==============================================================================

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// anything below this is a seconds-epoch value
pub const MILLIS_THRESHOLD: f64 = 1_000_000_000_000.0;

/// band thresholds in °F
pub const COLD_BELOW: f64 = 60.0;
pub const HOT_FROM: f64 = 80.0;

/// location used when a payload carries none
pub const UNKNOWN_LOCATION: &str = "unknown";

// ==============================================================================
// timestamp normalizer
// ==============================================================================

/// Convert an epoch timestamp in seconds or milliseconds to milliseconds.
///
/// Values below 10^12 are treated as seconds. Callers must reject negative
/// and non-finite input before getting here; see [`RawTimestamp::validate`].
pub fn normalize(raw: f64) -> u64 {
    if raw < MILLIS_THRESHOLD {
        (raw * 1000.0).round() as u64
    } else {
        raw.round() as u64
    }
}

/// wall clock in epoch milliseconds
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

// ==============================================================================
// classifier
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Cold,
    Moderate,
    Hot,
}

/// 60 is Moderate and 80 is Hot; the image swap depends on it.
pub fn classify(temperature: f64) -> Band {
    if temperature < COLD_BELOW {
        Band::Cold
    } else if temperature < HOT_FROM {
        Band::Moderate
    } else {
        Band::Hot
    }
}

impl Band {
    pub fn label(self) -> &'static str {
        match self {
            Band::Cold => "Cold",
            Band::Moderate => "Moderate",
            Band::Hot => "Hot",
        }
    }

    pub fn css_class(self) -> &'static str {
        match self {
            Band::Cold => "cold",
            Band::Moderate => "moderate",
            Band::Hot => "hot",
        }
    }

    /// NFT artwork shown for this band
    pub fn image_file(self) -> &'static str {
        match self {
            Band::Cold => "cold.png",
            Band::Moderate => "moderate.png",
            Band::Hot => "hot.png",
        }
    }

    /// chart line colour
    pub fn colour(self) -> &'static str {
        match self {
            Band::Cold => "#3b82f6",
            Band::Moderate => "#4caf50",
            Band::Hot => "#ef4444",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// artwork shown before the first sample arrives
pub const DEFAULT_IMAGE: &str = "default.png";

// ==============================================================================
// samples
// ==============================================================================

/// A normalized sensor reading as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    /// degrees fahrenheit
    pub temperature: f64,
    /// sensor origin, e.g. "Warehouse-A"
    pub location: String,
    /// canonical epoch milliseconds
    pub timestamp_ms: u64,
    /// opaque link to an on-chain attestation, never inspected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof_reference: Option<String>,
}

impl Sample {
    pub fn band(&self) -> Band {
        classify(self.temperature)
    }
}

/// A sample exactly as an adapter received it.
///
/// Everything is optional on the wire; the store decides what is usable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawSample {
    #[serde(default, deserialize_with = "lenient_number")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub timestamp: Option<RawTimestamp>,
    #[serde(
        default,
        rename = "proofReference",
        alias = "proof_reference",
        alias = "txLink"
    )]
    pub proof_reference: Option<String>,
}

/// Timestamps show up as epoch numbers from the frontend and as ISO strings
/// from the python agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

impl RawTimestamp {
    /// Boundary check run by adapters before a sample is handed to the store.
    pub fn validate(&self) -> Result<(), IngestError> {
        match self {
            RawTimestamp::Epoch(v) if !v.is_finite() || *v < 0.0 => {
                Err(IngestError::InvalidTimestamp(v.to_string()))
            }
            RawTimestamp::Epoch(_) => Ok(()),
            RawTimestamp::Text(s) => parse_iso_millis(s)
                .map(|_| ())
                .ok_or_else(|| IngestError::InvalidTimestamp(s.clone())),
        }
    }

    /// Canonical milliseconds, or None when the value is unusable.
    pub fn to_millis(&self) -> Option<u64> {
        match self {
            RawTimestamp::Epoch(v) if v.is_finite() && *v >= 0.0 => Some(normalize(*v)),
            RawTimestamp::Epoch(_) => None,
            RawTimestamp::Text(s) => parse_iso_millis(s),
        }
    }
}

impl RawSample {
    /// Adapter-side check: reject timestamps the normalizer must never see.
    pub fn check_boundary(&self) -> Result<(), IngestError> {
        match &self.timestamp {
            Some(ts) => ts.validate(),
            None => Ok(()),
        }
    }

    /// Build the canonical sample. `arrived_ms` stands in for a missing
    /// timestamp.
    pub fn into_sample(self, arrived_ms: u64) -> Result<Sample, IngestError> {
        let temperature = match self.temperature {
            Some(t) if t.is_finite() => t,
            _ => return Err(IngestError::MissingTemperature),
        };
        let timestamp_ms = match &self.timestamp {
            Some(ts) => ts
                .to_millis()
                .ok_or_else(|| IngestError::InvalidTimestamp(format!("{:?}", ts)))?,
            None => arrived_ms,
        };
        Ok(Sample {
            temperature,
            location: self
                .location
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            timestamp_ms,
            proof_reference: self.proof_reference,
        })
    }
}

/// RFC 3339 first, then naive ISO-8601 (python's `isoformat()`) as UTC.
fn parse_iso_millis(s: &str) -> Option<u64> {
    let millis = match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => dt.timestamp_millis(),
        Err(_) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()?
            .and_utc()
            .timestamp_millis(),
    };
    u64::try_from(millis).ok()
}

/// numbers and numeric strings count; anything else is "no temperature"
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let number = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(number.filter(|t| t.is_finite()))
}

// ==============================================================================
// errors
// ==============================================================================

/// Conditions surfaced to the presentation layer. None of them are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[error("network error")]
    NetworkError,
    #[error("invalid payload")]
    InvalidPayload,
    #[error("channel disconnected")]
    ChannelDisconnected,
    #[error("no data received in time")]
    NoDataTimeout,
    #[error("invalid sample")]
    InvalidSample,
}

impl ErrorKind {
    /// banner text for the dashboard
    pub fn banner(self) -> &'static str {
        match self {
            ErrorKind::NetworkError | ErrorKind::InvalidPayload => {
                "Failed to load sensor data. Trying again..."
            }
            ErrorKind::ChannelDisconnected => "Connection lost. Reconnecting...",
            ErrorKind::NoDataTimeout => "No data received. Check WebSocket connection.",
            ErrorKind::InvalidSample => "Invalid sensor data received",
        }
    }
}

/// Why a delivered payload did not become a sample.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("sample has no usable temperature")]
    MissingTemperature,
    #[error("unusable timestamp: {0}")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_seconds_are_scaled() {
        assert_eq!(normalize(0.0), 0);
        assert_eq!(normalize(1_700_000_000.0), 1_700_000_000_000);
        assert_eq!(normalize(999_999_999_999.0), 999_999_999_999_000);
    }

    #[test]
    fn test_normalize_millis_unchanged() {
        assert_eq!(normalize(1_000_000_000_000.0), 1_000_000_000_000);
        assert_eq!(normalize(1_700_000_000_123.0), 1_700_000_000_123);
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(-10.0), Band::Cold);
        assert_eq!(classify(59.999), Band::Cold);
        assert_eq!(classify(60.0), Band::Moderate);
        assert_eq!(classify(79.999), Band::Moderate);
        assert_eq!(classify(80.0), Band::Hot);
        assert_eq!(classify(150.0), Band::Hot);
    }

    #[test]
    fn test_band_presentation() {
        assert_eq!(Band::Hot.image_file(), "hot.png");
        assert_eq!(Band::Cold.css_class(), "cold");
        assert_eq!(Band::Moderate.to_string(), "Moderate");
    }

    #[test]
    fn test_raw_sample_from_push_payload() {
        let raw: RawSample = serde_json::from_str(
            r#"{"temperature": 85, "location": "Warehouse-A", "timestamp": 1700000000}"#,
        )
        .unwrap();
        let sample = raw.into_sample(0).unwrap();
        assert_eq!(sample.timestamp_ms, 1_700_000_000_000);
        assert_eq!(sample.band(), Band::Hot);
        assert_eq!(sample.location, "Warehouse-A");
    }

    #[test]
    fn test_raw_sample_agent_shape() {
        // the python agent sends iso strings and a status we ignore
        let raw: RawSample = serde_json::from_str(
            r#"{"temperature": 71, "location": "Warehouse-C",
                "timestamp": "2023-11-14T22:13:20.000000", "status": "Normal"}"#,
        )
        .unwrap();
        let sample = raw.into_sample(0).unwrap();
        assert_eq!(sample.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_raw_sample_rfc3339_and_tx_link() {
        let raw: RawSample = serde_json::from_str(
            r#"{"temperature": "64.5", "timestamp": "2023-11-14T22:13:20Z",
                "txLink": "https://explorer.solana.com/tx/abc"}"#,
        )
        .unwrap();
        assert_eq!(raw.temperature, Some(64.5));
        let sample = raw.into_sample(0).unwrap();
        assert_eq!(sample.location, UNKNOWN_LOCATION);
        assert_eq!(sample.proof_reference.as_deref(), Some("https://explorer.solana.com/tx/abc"));
    }

    #[test]
    fn test_missing_temperature_rejected() {
        let raw: RawSample =
            serde_json::from_str(r#"{"location": "Warehouse-B", "temperature": null}"#).unwrap();
        assert_eq!(raw.into_sample(0), Err(IngestError::MissingTemperature));

        let raw: RawSample = serde_json::from_str(r#"{"temperature": "warm"}"#).unwrap();
        assert_eq!(raw.temperature, None);
    }

    #[test]
    fn test_non_finite_temperature_is_absent() {
        for text in ["NaN", "inf", "-infinity"] {
            let body = format!(r#"{{"temperature": "{}"}}"#, text);
            let raw: RawSample = serde_json::from_str(&body).unwrap();
            assert_eq!(raw.temperature, None, "{}", text);
        }
    }

    #[test]
    fn test_missing_timestamp_uses_arrival() {
        let raw = RawSample { temperature: Some(70.0), ..Default::default() };
        assert_eq!(raw.into_sample(1_700_000_000_999).unwrap().timestamp_ms, 1_700_000_000_999);
    }

    #[test]
    fn test_boundary_rejects_negative_and_garbage() {
        assert!(RawTimestamp::Epoch(-1.0).validate().is_err());
        assert!(RawTimestamp::Epoch(f64::INFINITY).validate().is_err());
        assert!(RawTimestamp::Text("yesterday".into()).validate().is_err());
        assert!(RawTimestamp::Epoch(1_700_000_000.0).validate().is_ok());
    }
}
