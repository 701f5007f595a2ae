//! Error types for idempotent consumer library

use std::time::Duration;
use thiserror::Error;

/// Result type for idempotency operations
pub type IdempotencyResult<T> = Result<T, IdempotencyError>;

/// Failures reported by a dedup store backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Store could not be reached (connection refused, dropped, I/O)
    #[error("Dedup store unavailable: {0}")]
    Unavailable(String),

    /// Store did not answer within the deadline
    #[error("Dedup store timed out after {0:?}")]
    Timeout(Duration),

    /// Store answered with an error (bad reply, wrong type, etc.)
    #[error("Dedup store error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classify a Redis failure from a command run under `deadline`
    ///
    /// An elapsed deadline becomes `Timeout`; everything else follows the
    /// `From<RedisError>` mapping.
    pub fn from_redis(err: redis::RedisError, deadline: Duration) -> Self {
        if err.is_timeout() {
            StoreError::Timeout(deadline)
        } else {
            StoreError::from(err)
        }
    }

    /// Check if error is transient (should retry)
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}

/// Errors that can occur during idempotent event processing
#[derive(Error, Debug)]
pub enum IdempotencyError {
    /// Dedup store round trip failed; the event's status is unknown
    #[error("Dedup store error: {0}")]
    Store(#[from] StoreError),

    /// Event ID validation failed (empty)
    #[error("Invalid event ID: {0}")]
    InvalidEventId(String),

    /// JSON serialization error for the completion marker
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl IdempotencyError {
    /// Check if error is transient (should retry)
    ///
    /// Invalid event ids never become valid, so retrying them is pointless.
    pub fn is_transient(&self) -> bool {
        match self {
            IdempotencyError::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Unavailable("refused".into()).is_transient());
        assert!(StoreError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!StoreError::Backend("WRONGTYPE".into()).is_transient());

        assert!(IdempotencyError::from(StoreError::Timeout(Duration::from_millis(5))).is_transient());
        assert!(!IdempotencyError::InvalidEventId("empty".into()).is_transient());
    }

    #[tokio::test]
    async fn test_elapsed_deadline_maps_to_timeout() {
        let deadline = Duration::from_millis(10);
        let err = redis_utils::with_timeout(deadline, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), redis::RedisError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(StoreError::from_redis(err, deadline), StoreError::Timeout(deadline));
    }

    #[test]
    fn test_redis_io_error_maps_to_unavailable() {
        let err = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert!(matches!(
            StoreError::from_redis(err, Duration::from_secs(1)),
            StoreError::Unavailable(_)
        ));
    }
}
