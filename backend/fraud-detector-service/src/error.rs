use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

/// Startup and wiring failures; fatal to the process
#[derive(Debug, Error)]
pub enum AppError {
    /// Worker count does not evenly cover the source's partitions, so some
    /// partition would have zero or two owners
    #[error("configuration mismatch: {workers} workers cannot evenly own {partitions} partitions")]
    ConfigurationMismatch { workers: usize, partitions: usize },

    /// Source reports a different partition count than the deployment expects
    #[error("configuration mismatch: expected {expected} partitions, source has {actual}")]
    PartitionCountMismatch { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("environment error: {0}")]
    Env(#[from] envy::Error),

    #[error("event source error: {0}")]
    Source(#[from] SourceError),

    #[error("redis error: {0}")]
    Redis(String),
}

/// Event-source collaborator failures
#[derive(Debug, Error)]
pub enum SourceError {
    /// Broker unreachable or request failed
    #[error("transport error: {0}")]
    Transport(String),

    /// A delivery exists at this position but its payload is unusable
    #[error("undecodable payload at partition {partition} offset {offset}: {reason}")]
    Decode {
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("unknown partition {0}")]
    UnknownPartition(i32),

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Alert transport failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert transport failed: {0}")]
    Transport(String),
}

/// Failures while applying an event's side effects
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("invalid amount {amount} for event {event_id}")]
    InvalidAmount { event_id: String, amount: f64 },

    #[error("event {0} has no risk level; evaluate before firing")]
    NotEvaluated(String),

    #[error(transparent)]
    Alert(#[from] AlertError),
}

impl ProcessingError {
    /// Whether retrying the same event can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(self, ProcessingError::InvalidAmount { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_bad_input_is_permanent() {
        let invalid = ProcessingError::InvalidAmount {
            event_id: "E1".into(),
            amount: -1.0,
        };
        assert!(invalid.is_permanent());
        assert!(!ProcessingError::NotEvaluated("E1".into()).is_permanent());
        assert!(!ProcessingError::from(AlertError::Transport("down".into())).is_permanent());
    }
}
