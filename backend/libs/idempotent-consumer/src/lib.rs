//! # Idempotent Consumer Library
//!
//! Dedup guard for at-least-once event streams. A consumer asks the guard
//! whether an event id has already been fully processed, runs its side effects
//! only when it has not, and then records completion with a bounded retention
//! window. Combined with committing the source offset *after* the marker is
//! written, this gives exactly-once *effect* on top of at-least-once delivery.
//!
//! ## Architecture
//!
//! ```text
//! Partition → Worker → DedupGuard → Side effects → DedupGuard.mark → Commit offset
//!                          ↓                            ↓
//!                       EXISTS                     SET key EX ttl
//!                          ↓                            ↓
//!                                  DedupStore (Redis)
//! ```
//!
//! ## Usage Example
//!
//! ```ignore
//! use idempotent_consumer::{DedupGuard, ProcessedMarker, RedisDedupStore};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(redis: redis_utils::SharedConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
//! let guard = DedupGuard::new(
//!     Arc::new(RedisDedupStore::new(redis)),
//!     "dedup:",
//!     Duration::from_secs(24 * 3600),
//! );
//!
//! if guard.is_processed("event-123").await? {
//!     // Redelivery of an event whose effects already ran: skip and commit
//!     return Ok(());
//! }
//!
//! fire_alert().await?;
//!
//! guard
//!     .mark_processed("event-123", Some(ProcessedMarker::at(0, 12345)))
//!     .await?;
//! // ...only now commit the offset
//! # Ok(())
//! # }
//! # async fn fire_alert() -> Result<(), Box<dyn std::error::Error>> { Ok(()) }
//! ```
//!
//! ## Failure Semantics
//!
//! - **Store unreachable**: `is_processed` returns `Err`, never `Ok(false)`.
//!   Treating an outage as "not a duplicate" would re-run side effects.
//! - **Marker expiry**: after the TTL a redelivered id is processed again.
//!   The retention window must exceed the longest plausible redelivery delay.
//! - **Overwrites**: marking twice is harmless; the later marker wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

mod error;
mod redis_store;
mod store;

pub use error::{IdempotencyError, IdempotencyResult, StoreError};
pub use redis_store::RedisDedupStore;
pub use store::{DedupStore, InMemoryDedupStore};

/// Default key prefix for completion markers
pub const DEFAULT_KEY_PREFIX: &str = "dedup:";

/// Default marker retention (24 hours)
pub const DEFAULT_MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Completion marker stored under the dedup key
///
/// Only the key's presence carries meaning; the payload records where and when
/// the event was processed, for diagnosing redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMarker {
    /// When the side effects finished
    pub processed_at: DateTime<Utc>,

    /// Source partition of the processed delivery
    pub partition: Option<i32>,

    /// Source offset of the processed delivery
    pub offset: Option<i64>,

    /// Consumer group that processed it
    pub consumer_group: Option<String>,
}

impl ProcessedMarker {
    /// Marker for a delivery at `partition`/`offset`, stamped now
    pub fn at(partition: i32, offset: i64) -> Self {
        Self {
            processed_at: Utc::now(),
            partition: Some(partition),
            offset: Some(offset),
            consumer_group: None,
        }
    }

    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }
}

impl Default for ProcessedMarker {
    fn default() -> Self {
        Self {
            processed_at: Utc::now(),
            partition: None,
            offset: None,
            consumer_group: None,
        }
    }
}

/// Dedup guard for event processing
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct DedupGuard {
    store: Arc<dyn DedupStore>,
    key_prefix: String,
    ttl: Duration,
}

impl DedupGuard {
    /// Create a new dedup guard
    ///
    /// # Arguments
    ///
    /// * `store` - Key-value store holding completion markers
    /// * `key_prefix` - Namespace prepended to every event id (e.g. `dedup:`)
    /// * `ttl` - How long a completion marker stays live
    pub fn new(store: Arc<dyn DedupStore>, key_prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            ttl,
        }
    }

    /// Guard with the default `dedup:` prefix and 24 hour retention
    pub fn with_defaults(store: Arc<dyn DedupStore>) -> Self {
        Self::new(store, DEFAULT_KEY_PREFIX, DEFAULT_MARKER_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store key for an event id
    pub fn key_for(&self, event_id: &str) -> String {
        format!("{}{}", self.key_prefix, event_id)
    }

    /// Check if an event has already been processed
    ///
    /// # Returns
    ///
    /// - `Ok(true)` if a live completion marker exists
    /// - `Ok(false)` if the event was never processed or its marker expired
    /// - `Err` if the store could not answer; the caller must not process
    pub async fn is_processed(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let exists = self.store.exists(&self.key_for(event_id)).await?;

        if exists {
            debug!(event_id = %event_id, "Event already processed");
        }

        Ok(exists)
    }

    /// Mark an event as processed
    ///
    /// Writes the completion marker with the configured TTL. Overwriting an
    /// existing marker is harmless.
    pub async fn mark_processed(
        &self,
        event_id: &str,
        marker: Option<ProcessedMarker>,
    ) -> IdempotencyResult<()> {
        Self::validate_event_id(event_id)?;

        let marker = marker.unwrap_or_default();
        let value = serde_json::to_string(&marker)?;

        self.store
            .set_with_ttl(&self.key_for(event_id), &value, self.ttl)
            .await?;

        info!(
            event_id = %event_id,
            partition = ?marker.partition,
            offset = ?marker.offset,
            ttl_secs = self.ttl.as_secs(),
            "Event marked as processed"
        );

        Ok(())
    }

    /// Remove an event's completion marker ahead of its expiry
    ///
    /// Administrative use only (e.g. forcing a reprocess after a bad deploy).
    /// Returns whether a marker was removed.
    pub async fn cleanup(&self, event_id: &str) -> IdempotencyResult<bool> {
        Self::validate_event_id(event_id)?;

        let removed = self.store.delete(&self.key_for(event_id)).await?;

        if removed {
            info!(event_id = %event_id, "Completion marker removed");
        } else {
            debug!(event_id = %event_id, "No completion marker to remove");
        }

        Ok(removed)
    }

    /// Validate event_id format
    ///
    /// Ids are opaque; only an empty id is unusable as a dedup key.
    pub fn validate_event_id(event_id: &str) -> IdempotencyResult<()> {
        if event_id.is_empty() {
            return Err(IdempotencyError::InvalidEventId(
                "Event ID cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_event_id() {
        // Valid
        assert!(DedupGuard::validate_event_id("event-123").is_ok());
        assert!(DedupGuard::validate_event_id("a").is_ok());
        assert!(DedupGuard::validate_event_id(&"x".repeat(4096)).is_ok());

        // Invalid: empty
        let err = DedupGuard::validate_event_id("").unwrap_err();
        assert!(matches!(err, IdempotencyError::InvalidEventId(_)));
    }

    #[tokio::test]
    async fn test_long_event_id_is_marked() {
        let store = Arc::new(InMemoryDedupStore::new());
        let guard = DedupGuard::with_defaults(store);
        let event_id = "x".repeat(300);

        assert!(!guard.is_processed(&event_id).await.unwrap());
        guard.mark_processed(&event_id, None).await.unwrap();
        assert!(guard.is_processed(&event_id).await.unwrap());
    }

    #[test]
    fn test_key_uses_prefix() {
        let guard = DedupGuard::new(Arc::new(InMemoryDedupStore::new()), "fraud:", DEFAULT_MARKER_TTL);
        assert_eq!(guard.key_for("E1"), "fraud:E1");
    }

    #[test]
    fn test_marker_round_trips_through_json() {
        let marker = ProcessedMarker::at(3, 42).with_consumer_group("fraud-detector-safe");
        let json = serde_json::to_string(&marker).unwrap();
        let parsed: ProcessedMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, marker);
    }

    #[tokio::test]
    async fn test_invalid_id_never_reaches_store() {
        let store = Arc::new(InMemoryDedupStore::new());
        let guard = DedupGuard::with_defaults(store.clone());

        assert!(matches!(
            guard.mark_processed("", None).await,
            Err(IdempotencyError::InvalidEventId(_))
        ));
        assert!(store.is_empty().await);
    }
}
