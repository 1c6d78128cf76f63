//! Queue and server configuration
//!
//! Durations are expressed in milliseconds on the wire (`consume_poll_ms = 250`)
//! and as [`Duration`] in code.

use crate::error::{QueueError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest poll interval the consumer will accept.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of resident work items
    pub capacity: usize,
    /// How long the consumer waits before re-checking an empty queue
    #[serde(rename = "consume_poll_ms", with = "duration_ms")]
    pub consume_poll: Duration,
    /// Fixed part of the simulated processing time
    #[serde(rename = "processing_delay_ms", with = "duration_ms")]
    pub processing_delay: Duration,
    /// Upper bound of the random extra processing time
    #[serde(rename = "processing_jitter_ms", with = "duration_ms")]
    pub processing_jitter: Duration,
    /// Optional upper bound on a single processing attempt
    #[serde(
        rename = "processing_timeout_ms",
        skip_serializing_if = "Option::is_none",
        with = "duration_ms_opt"
    )]
    pub processing_timeout: Option<Duration>,
    /// Occupancy at which the queue reports high load
    pub high_watermark: usize,
    /// Occupancy at which the queue reports normal load again
    pub low_watermark: usize,
    /// Retry policy for failed items
    pub retry_policy: RetryPolicy,
    /// Keep items that exhausted their retries in the dead letter queue
    pub dead_letter: bool,
    /// Dead letter queue size
    pub dead_letter_size: usize,
    /// Health monitor interval
    #[serde(rename = "monitor_interval_ms", with = "duration_ms")]
    pub monitor_interval: Duration,
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_u64(d.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 50,
            consume_poll: Duration::from_millis(250),
            processing_delay: Duration::from_millis(200),
            processing_jitter: Duration::from_millis(300),
            processing_timeout: None,
            high_watermark: 40,
            low_watermark: 10,
            retry_policy: RetryPolicy::none(),
            dead_letter: false,
            dead_letter_size: 100,
            monitor_interval: Duration::from_secs(10),
        }
    }
}

impl QueueConfig {
    /// Create a configuration with the given capacity.
    ///
    /// Watermarks are derived from the capacity (80% / 20%).
    pub fn new(capacity: usize) -> Self {
        let (high_watermark, low_watermark) = default_watermarks(capacity);
        Self {
            capacity,
            high_watermark,
            low_watermark,
            ..Self::default()
        }
    }

    /// Change the capacity and re-derive the watermarks from it
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        let (high_watermark, low_watermark) = default_watermarks(capacity);
        self.capacity = capacity;
        self.high_watermark = high_watermark;
        self.low_watermark = low_watermark;
        self
    }

    /// Set poll interval (builder pattern)
    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.consume_poll = poll.max(MIN_POLL_INTERVAL);
        self
    }

    /// Set simulated processing time (builder pattern)
    pub fn with_processing_delay(mut self, base: Duration, jitter: Duration) -> Self {
        self.processing_delay = base;
        self.processing_jitter = jitter;
        self
    }

    /// Set processing timeout (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = Some(timeout);
        self
    }

    /// Set retry policy (builder pattern)
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Enable the dead letter queue (builder pattern)
    pub fn with_dead_letter(mut self, size: usize) -> Self {
        self.dead_letter = true;
        self.dead_letter_size = size;
        self
    }

    /// Set load watermarks (builder pattern)
    pub fn with_watermarks(mut self, high: usize, low: usize) -> Self {
        self.high_watermark = high;
        self.low_watermark = low;
        self
    }

    /// Reject configurations the queue cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(QueueError::ConfigError(
                "capacity must be positive".to_string(),
            ));
        }
        if self.low_watermark >= self.high_watermark {
            return Err(QueueError::ConfigError(format!(
                "low_watermark ({}) must be below high_watermark ({})",
                self.low_watermark, self.high_watermark
            )));
        }
        if self.high_watermark > self.capacity {
            return Err(QueueError::ConfigError(format!(
                "high_watermark ({}) exceeds capacity ({})",
                self.high_watermark, self.capacity
            )));
        }
        if self.dead_letter && self.dead_letter_size == 0 {
            return Err(QueueError::ConfigError(
                "dead_letter_size must be positive when dead_letter is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_watermarks(capacity: usize) -> (usize, usize) {
    let high = (capacity * 4 / 5).max(1);
    let low = capacity / 5;
    if low >= high {
        (high, high.saturating_sub(1))
    } else {
        (high, low)
    }
}

/// Configuration for the HTTP server binary
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub bind: String,
    /// Queue settings
    pub queue: QueueConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            queue: QueueConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| QueueError::ConfigError(e.to_string()))
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            QueueError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply `WAVEQUEUE_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("WAVEQUEUE_BIND") {
            self.bind = bind;
        }
        if let Some(raw) = lookup("WAVEQUEUE_CAPACITY") {
            match raw.trim().parse::<usize>() {
                Ok(capacity) => self.queue = self.queue.clone().with_capacity(capacity),
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid WAVEQUEUE_CAPACITY"),
            }
        }
        if let Some(raw) = lookup("WAVEQUEUE_POLL_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => {
                    self.queue.consume_poll = Duration::from_millis(ms).max(MIN_POLL_INTERVAL)
                }
                Err(_) => tracing::warn!(value = %raw, "ignoring invalid WAVEQUEUE_POLL_MS"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_queue_config_default() {
        let config = QueueConfig::default();
        assert_eq!(config.capacity, 50);
        assert_eq!(config.consume_poll, Duration::from_millis(250));
        assert!(config.processing_timeout.is_none());
        assert_eq!(config.retry_policy, RetryPolicy::none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_config_new_derives_watermarks() {
        let config = QueueConfig::new(10);
        assert_eq!(config.capacity, 10);
        assert_eq!(config.high_watermark, 8);
        assert_eq!(config.low_watermark, 2);
        assert!(config.validate().is_ok());

        let tiny = QueueConfig::new(1);
        assert_eq!(tiny.high_watermark, 1);
        assert_eq!(tiny.low_watermark, 0);
        assert!(tiny.validate().is_ok());
    }

    #[test]
    fn test_with_capacity_keeps_other_settings() {
        let config = QueueConfig::new(10)
            .with_poll_interval(Duration::from_millis(30))
            .with_capacity(100);
        assert_eq!(config.capacity, 100);
        assert_eq!(config.high_watermark, 80);
        assert_eq!(config.low_watermark, 20);
        assert_eq!(config.consume_poll, Duration::from_millis(30));
    }

    #[test]
    fn test_poll_interval_clamped() {
        let config = QueueConfig::new(5).with_poll_interval(Duration::ZERO);
        assert_eq!(config.consume_poll, MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = QueueConfig {
            capacity: 0,
            ..QueueConfig::default()
        };
        assert!(matches!(config.validate(), Err(QueueError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let config = QueueConfig::new(10).with_watermarks(3, 5);
        assert!(matches!(config.validate(), Err(QueueError::ConfigError(_))));

        let config = QueueConfig::new(10).with_watermarks(11, 5);
        assert!(matches!(config.validate(), Err(QueueError::ConfigError(_))));
    }

    #[test]
    fn test_validate_rejects_empty_dead_letter_queue() {
        let config = QueueConfig::new(10).with_dead_letter(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_config_serialization() {
        let config = QueueConfig::new(20).with_timeout(Duration::from_secs(2));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"capacity\":20"));
        assert!(json.contains("\"consume_poll_ms\":250"));
        assert!(json.contains("\"processing_timeout_ms\":2000"));

        let parsed: QueueConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_server_config_from_toml() {
        let config = ServerConfig::from_toml_str(
            r#"
            bind = "0.0.0.0:8080"

            [queue]
            capacity = 5
            consume_poll_ms = 100
            high_watermark = 4
            low_watermark = 1
            dead_letter = true
            "#,
        )
        .unwrap();

        assert_eq!(config.bind, "0.0.0.0:8080");
        assert_eq!(config.queue.capacity, 5);
        assert_eq!(config.queue.consume_poll, Duration::from_millis(100));
        assert!(config.queue.dead_letter);
        assert_eq!(config.queue.dead_letter_size, 100);
        assert!(config.queue.validate().is_ok());
    }

    #[test]
    fn test_server_config_rejects_bad_toml() {
        let result = ServerConfig::from_toml_str("capacity = [");
        assert!(matches!(result, Err(QueueError::ConfigError(_))));
    }

    #[test]
    fn test_server_config_missing_file() {
        let result = ServerConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(QueueError::ConfigError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let vars = HashMap::from([
            ("WAVEQUEUE_BIND", "0.0.0.0:9000"),
            ("WAVEQUEUE_CAPACITY", "15"),
            ("WAVEQUEUE_POLL_MS", "0"),
        ]);
        let mut config = ServerConfig::default();
        config.apply_vars(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.queue.capacity, 15);
        assert_eq!(config.queue.high_watermark, 12);
        assert_eq!(config.queue.low_watermark, 3);
        assert_eq!(config.queue.consume_poll, MIN_POLL_INTERVAL);
    }

    #[test]
    fn test_env_overrides_ignore_garbage() {
        let mut config = ServerConfig::default();
        config.apply_vars(|name| match name {
            "WAVEQUEUE_CAPACITY" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.queue.capacity, 50);
    }
}
