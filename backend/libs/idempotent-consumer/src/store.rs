//! Key-value store interface behind the dedup guard.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::error::StoreError;

/// Minimal key-value contract the dedup guard needs.
///
/// Single-key operations must be atomic. Expiry is managed by the store: once
/// a key's TTL elapses, `exists` must report `false`.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Whether a live (non-expired) value is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Store `value` under `key`, replacing any previous value and TTL
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Remove `key`; returns whether a live value was removed
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// Process-local dedup store honouring TTLs.
///
/// Uses Tokio's clock so tests can pause and advance time deterministically.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored value for `key`, if still live
    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries.values().filter(|entry| entry.expires_at > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop expired entries; returns how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let purged = before - entries.len();

        if purged > 0 {
            debug!(purged, "Purged expired dedup markers");
        }

        purged
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await.is_some())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        Ok(entries
            .remove(key)
            .map(|entry| entry.expires_at > now)
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_then_exists() {
        let store = InMemoryDedupStore::new();
        assert!(!store.exists("dedup:a").await.unwrap());

        store
            .set_with_ttl("dedup:a", "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.exists("dedup:a").await.unwrap());
        assert_eq!(store.get("dedup:a").await.as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let store = InMemoryDedupStore::new();
        store
            .set_with_ttl("dedup:b", "1", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("dedup:b").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("dedup:b").await.unwrap());
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_ttl() {
        let store = InMemoryDedupStore::new();
        store
            .set_with_ttl("dedup:c", "1", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        store
            .set_with_ttl("dedup:c", "2", Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(store.get("dedup:c").await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_delete_reports_removal() {
        let store = InMemoryDedupStore::new();
        store
            .set_with_ttl("dedup:d", "1", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(store.delete("dedup:d").await.unwrap());
        assert!(!store.delete("dedup:d").await.unwrap());
        assert!(!store.exists("dedup:d").await.unwrap());
    }
}
