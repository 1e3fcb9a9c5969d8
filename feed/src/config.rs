//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `feed.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - StoreSection: history capacity, no-data timeout, chart window.
//!     - PullSection: agent http endpoint, poll period, retry policy.
//!     - PushSection: websocket url, event name, reconnect policy.
//!     - SimulatorSection: offline sensor toggle.
//!     - ServerSection: dashboard bind address, artwork location.
//!     - LoggingSection: log level, per-sample logging.
//!
//! every section has defaults, so a partial file is fine.
//!
//! ==============================================================================

use crate::adapters::pull::PullSettings;
use crate::adapters::push::PushSettings;
use crate::adapters::simulator::SimulatorSettings;
use crate::retry::{Backoff, RetryPolicy, PULL_RETRY_MS, PUSH_RECONNECT_MS};
use crate::store::StoreConfig;

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct FeedConfig {
    pub store: StoreSection,
    pub pull: PullSection,
    pub push: PushSection,
    pub simulator: SimulatorSection,
    pub server: ServerSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreSection {
    pub history_capacity: usize,
    pub no_data_timeout_secs: u64,
    /// points shown on the chart
    pub chart_points: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { history_capacity: 100, no_data_timeout_secs: 10, chart_points: 20 }
    }
}

/// Retry/reconnect knobs. Omitted keys fall back to the owning section's
/// defaults; `max_attempts` omitted = unbounded.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RetrySection {
    pub delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff: Option<Backoff>,
    pub max_attempts: Option<u32>,
}

impl RetrySection {
    pub fn policy(&self, default_delay_ms: u64) -> RetryPolicy {
        let delay_ms = self.delay_ms.unwrap_or(default_delay_ms);
        let delay = Duration::from_millis(delay_ms);
        let max_delay = Duration::from_millis(self.max_delay_ms.unwrap_or(delay_ms));
        let backoff = self.backoff.unwrap_or(Backoff::Fixed);
        let mut policy = RetryPolicy::fixed(delay).with_backoff(backoff, max_delay);
        if let Some(max) = self.max_attempts {
            policy = policy.with_max_attempts(max);
        }
        policy
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PullSection {
    pub enabled: bool,
    pub base_url: String,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
    pub cache_bust: bool,
    pub seed_history: bool,
    pub retry: RetrySection,
}

impl Default for PullSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8000".to_string(),
            interval_ms: 2000,
            request_timeout_ms: 5000,
            cache_bust: true,
            seed_history: true,
            retry: RetrySection::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PushSection {
    pub enabled: bool,
    pub url: String,
    pub event: String,
    pub reconnect: RetrySection,
}

impl Default for PushSection {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://localhost:3001/socket.io/?EIO=4&transport=websocket".to_string(),
            event: "new_data".to_string(),
            reconnect: RetrySection::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorSection {
    pub enabled: bool,
    pub interval_ms: u64,
    pub seed: Option<u64>,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self { enabled: false, interval_ms: 30_000, seed: None }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    /// where the dashboard points its artwork links
    pub image_base: String,
    /// served at /images; leave empty to serve nothing
    pub images_dir: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
            image_base: "/images".to_string(),
            images_dir: "public/images".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl FeedConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load with default fallback. An explicit path wins over the search list.
    pub fn load_or_default(explicit: Option<PathBuf>) -> Self {
        let paths = match explicit {
            Some(path) => vec![path],
            None => vec![
                PathBuf::from("config").join("feed.toml"),
                PathBuf::from("..").join("config").join("feed.toml"),
            ],
        };

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: {:#}", e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let on_off = |b: bool| if b { "on" } else { "off" };
        println!("┌─────────────────────────────────────────┐");
        println!("│           FEED CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Pull: {} {} every {}ms", on_off(self.pull.enabled), self.pull.base_url, self.pull.interval_ms);
        println!("│ Push: {} {}", on_off(self.push.enabled), self.push.url);
        println!("│ Simulator: {}", on_off(self.simulator.enabled));
        println!("│ History: {} samples", self.store.history_capacity);
        println!("│ Dashboard: {}", self.server.bind);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            history_capacity: self.store.history_capacity,
            no_data_timeout: Duration::from_secs(self.store.no_data_timeout_secs),
            show_sensor_data: self.logging.show_sensor_data,
        }
    }

    pub fn pull_settings(&self) -> PullSettings {
        PullSettings {
            base_url: self.pull.base_url.clone(),
            interval: Duration::from_millis(self.pull.interval_ms),
            request_timeout: Duration::from_millis(self.pull.request_timeout_ms),
            cache_bust: self.pull.cache_bust,
            seed_history: self.pull.seed_history,
            retry: self.pull.retry.policy(PULL_RETRY_MS),
        }
    }

    pub fn push_settings(&self) -> PushSettings {
        PushSettings {
            url: self.push.url.clone(),
            event: self.push.event.clone(),
            reconnect: self.push.reconnect.policy(PUSH_RECONNECT_MS),
        }
    }

    /// None when no local artwork directory is configured
    pub fn images_dir(&self) -> Option<PathBuf> {
        let dir = self.server.images_dir.trim();
        (!dir.is_empty()).then(|| PathBuf::from(dir))
    }

    pub fn simulator_settings(&self) -> SimulatorSettings {
        SimulatorSettings {
            interval: Duration::from_millis(self.simulator.interval_ms),
            seed: self.simulator.seed,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = FeedConfig::parse("").unwrap();
        assert_eq!(config.store.history_capacity, 100);
        assert_eq!(config.pull_settings().retry, RetryPolicy::pull_default());
        assert_eq!(config.push_settings().reconnect, RetryPolicy::push_default());
        assert!(!config.simulator.enabled);
    }

    #[test]
    fn test_capped_reconnect_policy() {
        let config = FeedConfig::parse(
            r#"
            [push]
            url = "ws://10.0.0.5:3001/socket.io/?EIO=4&transport=websocket"
            [push.reconnect]
            delay_ms = 3000
            max_attempts = 5
            "#,
        )
        .unwrap();
        let settings = config.push_settings();
        assert_eq!(settings.reconnect.delay, Duration::from_millis(3000));
        assert_eq!(settings.reconnect.max_attempts, Some(5));
        assert_eq!(settings.event, "new_data");
    }

    #[test]
    fn test_partial_reconnect_keeps_push_delay() {
        let config = FeedConfig::parse("[push.reconnect]\nmax_attempts = 5\n").unwrap();
        let reconnect = config.push_settings().reconnect;
        assert_eq!(reconnect.delay, Duration::from_millis(1000));
        assert_eq!(reconnect.max_attempts, Some(5));
        assert_eq!(config.pull_settings().retry, RetryPolicy::pull_default());
    }

    #[test]
    fn test_partial_pull_retry_keeps_pull_delay() {
        let config = FeedConfig::parse("[pull.retry]\nmax_attempts = 3\n").unwrap();
        let retry = config.pull_settings().retry;
        assert_eq!(retry.delay, Duration::from_millis(500));
        assert_eq!(retry.max_attempts, Some(3));
        assert_eq!(config.push_settings().reconnect, RetryPolicy::push_default());
    }

    #[test]
    fn test_exponential_backoff_section() {
        let config = FeedConfig::parse(
            r#"
            [pull]
            base_url = "http://agent:8000"
            interval_ms = 5000
            [pull.retry]
            delay_ms = 250
            max_delay_ms = 4000
            backoff = "exponential"
            [store]
            history_capacity = 20
            "#,
        )
        .unwrap();
        let pull = config.pull_settings();
        assert_eq!(pull.interval, Duration::from_secs(5));
        assert_eq!(pull.retry.delay_for_attempt(10), Duration::from_millis(4000));
        assert_eq!(config.store_config().history_capacity, 20);
    }

    #[test]
    fn test_images_dir_can_be_disabled() {
        assert_eq!(FeedConfig::default().images_dir(), Some(PathBuf::from("public/images")));
        let config = FeedConfig::parse("[server]\nimages_dir = \"\"\nimage_base = \"https://cdn.example.com/nft\"").unwrap();
        assert_eq!(config.images_dir(), None);
        assert_eq!(config.server.image_base, "https://cdn.example.com/nft");
    }

    #[test]
    fn test_unknown_backoff_rejected() {
        assert!(FeedConfig::parse("[pull.retry]\nbackoff = \"random\"").is_err());
    }
}
