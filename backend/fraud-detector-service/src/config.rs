//! Configuration for the fraud detector service
use serde::Deserialize;
use std::time::Duration;

use crate::error::AppError;

/// Environment prefix for every setting, e.g. `FRAUD_DETECTOR_WORKER_COUNT`
pub const ENV_PREFIX: &str = "FRAUD_DETECTOR_";

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kafka broker addresses
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    /// Topic carrying fraud events
    #[serde(default = "default_kafka_topic")]
    pub kafka_topic: String,

    /// Consumer group of the idempotent pipeline
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Number of workers; must evenly divide the topic's partition count
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Partition count the deployment was sized for; checked against the broker
    #[serde(default)]
    pub expected_partitions: Option<usize>,

    /// Redis URL for the dedup store
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Deadline for a single dedup-store command
    #[serde(default = "default_redis_timeout_ms")]
    pub redis_timeout_ms: u64,

    /// Prefix of completion-marker keys
    #[serde(default = "default_dedup_key_prefix")]
    pub dedup_key_prefix: String,

    /// Completion-marker retention in seconds
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,

    /// Amounts strictly above this are HIGH risk
    #[serde(default = "default_high_risk_threshold")]
    pub high_risk_threshold: f64,

    /// Amounts strictly above this (and not HIGH) are MEDIUM risk
    #[serde(default = "default_medium_risk_threshold")]
    pub medium_risk_threshold: f64,

    /// How long a worker waits on an idle partition before checking the next
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Initial redelivery backoff
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Redelivery backoff cap
    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    /// Also run the non-idempotent baseline listener
    #[serde(default)]
    pub run_unsafe_listener: bool,

    /// Consumer group of the baseline listener
    #[serde(default = "default_unsafe_consumer_group")]
    pub unsafe_consumer_group: String,

    /// Emit JSON logs
    #[serde(default)]
    pub log_json: bool,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_kafka_topic() -> String {
    "fraud-events".to_string()
}

fn default_consumer_group() -> String {
    "fraud-detector-safe".to_string()
}

fn default_unsafe_consumer_group() -> String {
    "fraud-detector-unsafe".to_string()
}

fn default_worker_count() -> usize {
    6 // matches the topic's partition count
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

fn default_dedup_key_prefix() -> String {
    idempotent_consumer::DEFAULT_KEY_PREFIX.to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    86400 // 24 hours
}

fn default_high_risk_threshold() -> f64 {
    crate::services::DEFAULT_HIGH_RISK_THRESHOLD
}

fn default_medium_risk_threshold() -> f64 {
    crate::services::DEFAULT_MEDIUM_RISK_THRESHOLD
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_retry_backoff_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kafka_brokers: default_kafka_brokers(),
            kafka_topic: default_kafka_topic(),
            consumer_group: default_consumer_group(),
            worker_count: default_worker_count(),
            expected_partitions: None,
            redis_url: default_redis_url(),
            redis_timeout_ms: default_redis_timeout_ms(),
            dedup_key_prefix: default_dedup_key_prefix(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            high_risk_threshold: default_high_risk_threshold(),
            medium_risk_threshold: default_medium_risk_threshold(),
            poll_timeout_ms: default_poll_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_retry_backoff_ms: default_max_retry_backoff_ms(),
            run_unsafe_listener: false,
            unsafe_consumer_group: default_unsafe_consumer_group(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load configuration from `.env` and `FRAUD_DETECTOR_*` environment variables
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let config: Config = envy::prefixed(ENV_PREFIX).from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the processing guarantees
    pub fn validate(&self) -> Result<(), AppError> {
        if self.worker_count == 0 {
            return Err(AppError::InvalidConfig("worker_count must be at least 1".into()));
        }

        if self.dedup_key_prefix.is_empty() {
            return Err(AppError::InvalidConfig("dedup_key_prefix cannot be empty".into()));
        }

        if self.dedup_ttl_secs == 0 {
            return Err(AppError::InvalidConfig("dedup_ttl_secs must be positive".into()));
        }

        for (name, value) in [
            ("high_risk_threshold", self.high_risk_threshold),
            ("medium_risk_threshold", self.medium_risk_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if self.medium_risk_threshold > self.high_risk_threshold {
            return Err(AppError::InvalidConfig(format!(
                "medium_risk_threshold ({}) exceeds high_risk_threshold ({})",
                self.medium_risk_threshold, self.high_risk_threshold
            )));
        }

        if self.retry_backoff_ms > self.max_retry_backoff_ms {
            return Err(AppError::InvalidConfig(
                "retry_backoff_ms exceeds max_retry_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
