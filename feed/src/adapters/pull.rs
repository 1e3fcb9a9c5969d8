//! ==============================================================================
//! pull.rs - periodic http polling of the agent's /sensor-data endpoint
//! ==============================================================================
//!
//! cycle:
//!     fetch -> ok       -> deliver current, wait `interval`
//!           -> failure  -> signal fault, wait `retry.delay_for_attempt(n)`
//!                          (back to `interval` once the retry cap is spent)
//!
//! the endpoint answers `{ current: Sample|null, history: Sample[] }`.
//! a null `current` or one without a temperature is the agent's way of
//! saying "no data yet" and counts as InvalidPayload.
//!
//! ==============================================================================

use super::{pause, DataSource};
use crate::domain::{now_millis, ErrorKind, RawSample};
use crate::retry::RetryPolicy;
use crate::store::{IngestSink, SourceKind};

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct PullSettings {
    /// e.g. http://localhost:8000
    pub base_url: String,
    pub interval: Duration,
    pub request_timeout: Duration,
    /// append ?t=<now> to dodge caches
    pub cache_bust: bool,
    /// offer the payload history to the store on first success
    pub seed_history: bool,
    pub retry: RetryPolicy,
}

impl Default for PullSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            cache_bust: true,
            seed_history: true,
            retry: RetryPolicy::pull_default(),
        }
    }
}

/// Wire shape of the poll response.
#[derive(Debug, Deserialize)]
pub struct PullPayload {
    #[serde(default)]
    pub current: Option<RawSample>,
    #[serde(default)]
    pub history: Vec<RawSample>,
}

pub struct PullAdapter {
    client: reqwest::Client,
    endpoint: String,
    settings: PullSettings,
}

impl PullAdapter {
    pub fn new(settings: PullSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;
        let endpoint = format!("{}/sensor-data", settings.base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint, settings })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One poll. Only returns payloads whose `current` is usable.
    pub async fn fetch(&self) -> Result<PullPayload, ErrorKind> {
        let mut request = self.client.get(&self.endpoint);
        if self.settings.cache_bust {
            request = request.query(&[("t", now_millis())]);
        }

        let response = request.send().await.map_err(|e| {
            debug!(error = %e, "sensor-data request failed");
            ErrorKind::NetworkError
        })?;

        let status = response.status();
        if !status.is_success() {
            debug!(%status, "sensor-data returned non-success status");
            return Err(ErrorKind::NetworkError);
        }

        let body = response.bytes().await.map_err(|e| {
            debug!(error = %e, "sensor-data body read failed");
            ErrorKind::NetworkError
        })?;

        decode_payload(&body)
    }
}

/// Parse a poll body, rejecting the "no data" sentinel and bad timestamps.
pub fn decode_payload(body: &[u8]) -> Result<PullPayload, ErrorKind> {
    let payload: PullPayload = serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "sensor-data body is not a payload");
        ErrorKind::InvalidPayload
    })?;

    match &payload.current {
        Some(current) if current.temperature.is_some() => {
            current.check_boundary().map_err(|e| {
                debug!(error = %e, "sensor-data current rejected");
                ErrorKind::InvalidPayload
            })?;
            Ok(payload)
        }
        _ => Err(ErrorKind::InvalidPayload),
    }
}

/// History to backfill from a first poll. The agent appends `current` to its
/// own history, so a trailing copy is dropped here and `current` arrives
/// through the normal sample path instead.
pub fn seed_from(history: Vec<RawSample>, current: Option<&RawSample>) -> Vec<RawSample> {
    let mut history: Vec<RawSample> = history
        .into_iter()
        .filter(|raw| raw.check_boundary().is_ok())
        .collect();
    if current.is_some() && history.last() == current {
        history.pop();
    }
    history
}

impl DataSource for PullAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::Pull
    }

    fn run(self, sink: IngestSink, cancel: CancellationToken) -> impl Future<Output = ()> + Send {
        async move {
            let mut failures: u32 = 0;
            let mut seeded = !self.settings.seed_history;

            loop {
                let polled = tokio::select! {
                    _ = cancel.cancelled() => break,
                    polled = self.fetch() => polled,
                };

                let next = match polled {
                    Ok(payload) => {
                        failures = 0;
                        if !seeded {
                            seeded = true;
                            let history = seed_from(payload.history, payload.current.as_ref());
                            if !history.is_empty() && !sink.backfill(history).await {
                                break;
                            }
                        }
                        // decode_payload guarantees current is present
                        if let Some(current) = payload.current {
                            if !sink.sample(current).await {
                                break;
                            }
                        }
                        self.settings.interval
                    }
                    Err(kind) => {
                        failures = failures.saturating_add(1);
                        warn!(endpoint = %self.endpoint, error = %kind, failures, "poll failed");
                        if !sink.fault(kind).await {
                            break;
                        }
                        if self.settings.retry.exhausted(failures) {
                            self.settings.interval
                        } else {
                            self.settings.retry.delay_for_attempt(failures)
                        }
                    }
                };

                if !pause(next, &cancel).await {
                    break;
                }
            }
            debug!(endpoint = %self.endpoint, "pull loop exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_good_payload() {
        let body = br#"{"version": "1.0",
            "current": {"temperature": 72, "location": "Warehouse-B", "timestamp": 1700000000},
            "history": [{"temperature": 70, "location": "Warehouse-A", "timestamp": 1699999970}]}"#;
        let payload = decode_payload(body).unwrap();
        assert_eq!(payload.current.unwrap().temperature, Some(72.0));
        assert_eq!(payload.history.len(), 1);
    }

    #[test]
    fn test_decode_null_current_is_invalid() {
        assert_eq!(
            decode_payload(br#"{"current": null, "history": []}"#).unwrap_err(),
            ErrorKind::InvalidPayload
        );
    }

    #[test]
    fn test_decode_missing_temperature_is_invalid() {
        assert_eq!(
            decode_payload(br#"{"current": {"location": "Warehouse-C"}}"#).unwrap_err(),
            ErrorKind::InvalidPayload
        );
    }

    #[test]
    fn test_decode_nan_temperature_is_invalid() {
        assert_eq!(
            decode_payload(br#"{"current": {"temperature": "NaN", "timestamp": 1700000000}}"#).unwrap_err(),
            ErrorKind::InvalidPayload
        );
    }

    #[test]
    fn test_decode_garbage_is_invalid() {
        assert_eq!(decode_payload(b"<html>502</html>").unwrap_err(), ErrorKind::InvalidPayload);
        assert_eq!(
            decode_payload(br#"{"current": {"temperature": 70, "timestamp": -5}}"#).unwrap_err(),
            ErrorKind::InvalidPayload
        );
    }

    #[test]
    fn test_seed_drops_trailing_current() {
        let body = br#"{"current": {"temperature": 72, "location": "Warehouse-B", "timestamp": 1700000030},
            "history": [{"temperature": 70, "location": "Warehouse-A", "timestamp": 1700000000},
                        {"temperature": 72, "location": "Warehouse-B", "timestamp": 1700000030}]}"#;
        let payload = decode_payload(body).unwrap();
        let seeded = seed_from(payload.history, payload.current.as_ref());
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].location.as_deref(), Some("Warehouse-A"));
    }

    #[test]
    fn test_seed_keeps_history_without_current() {
        let body = br#"{"current": {"temperature": 72, "location": "Warehouse-B", "timestamp": 1700000060},
            "history": [{"temperature": 70, "location": "Warehouse-A", "timestamp": 1700000000},
                        {"temperature": 72, "location": "Warehouse-B", "timestamp": 1700000030}]}"#;
        let payload = decode_payload(body).unwrap();
        assert_eq!(seed_from(payload.history, payload.current.as_ref()).len(), 2);
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let adapter = PullAdapter::new(PullSettings {
            base_url: "http://127.0.0.1:8000/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(adapter.endpoint(), "http://127.0.0.1:8000/sensor-data");
    }
}
