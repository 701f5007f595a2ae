//! Event-source collaborator: partitioned, at-least-once delivery.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::SourceError;
use crate::models::FraudEvent;

/// One event handed to a worker, with the position it was read from
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
    pub event: FraudEvent,
}

/// Partitioned event log with consumer-controlled read positions
///
/// Each partition must be driven by exactly one caller at a time; the pool
/// guarantees this by assigning every partition to a single worker.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Partitions are numbered `0..partition_count()`
    fn partition_count(&self) -> usize;

    /// Next event on `partition`, waiting up to `timeout`; `None` when idle
    async fn poll(&self, partition: i32, timeout: Duration) -> Result<Option<Delivery>, SourceError>;

    /// Advance the read position past `offset`: it is never redelivered
    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError>;

    /// Make `offset` the next delivery on `partition`
    async fn rewind(&self, partition: i32, offset: i64) -> Result<(), SourceError>;
}

#[derive(Debug, Default)]
struct PartitionLog {
    events: Vec<FraudEvent>,
    fetch_position: usize,
    committed: usize,
    commits: Vec<i64>,
}

#[derive(Debug, Default)]
struct PartitionSlot {
    log: Mutex<PartitionLog>,
    notify: Notify,
}

/// Process-local partitioned log
///
/// Keeps a fetch cursor and a committed position per partition, so a crash or
/// rebalance can be reproduced with [`InMemoryEventLog::restart_partition`]:
/// everything after the last commit is delivered again.
#[derive(Debug)]
pub struct InMemoryEventLog {
    partitions: Vec<PartitionSlot>,
}

impl InMemoryEventLog {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| PartitionSlot::default()).collect(),
        }
    }

    fn slot(&self, partition: i32) -> Result<&PartitionSlot, SourceError> {
        usize::try_from(partition)
            .ok()
            .and_then(|idx| self.partitions.get(idx))
            .ok_or(SourceError::UnknownPartition(partition))
    }

    /// Partition a key hashes to
    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions.len() as u64) as i32
    }

    /// Append to a partition; returns the event's offset
    pub fn publish(&self, partition: i32, event: FraudEvent) -> Result<i64, SourceError> {
        let slot = self.slot(partition)?;
        let offset = {
            let mut log = slot.log.lock();
            log.events.push(event);
            (log.events.len() - 1) as i64
        };
        slot.notify.notify_one();
        Ok(offset)
    }

    /// Append to the partition the event id hashes to
    pub fn publish_keyed(&self, event: FraudEvent) -> Delivery {
        let partition = self.partition_for(&event.event_id);
        let slot = &self.partitions[partition as usize];
        let offset = {
            let mut log = slot.log.lock();
            log.events.push(event.clone());
            (log.events.len() - 1) as i64
        };
        slot.notify.notify_one();
        Delivery {
            partition,
            offset,
            event,
        }
    }

    /// Simulate a consumer crash: redeliver everything after the last commit
    pub fn restart_partition(&self, partition: i32) -> Result<(), SourceError> {
        let slot = self.slot(partition)?;
        {
            let mut log = slot.log.lock();
            debug!(
                partition,
                from = log.fetch_position,
                to = log.committed,
                "Rewinding fetch cursor to committed position"
            );
            log.fetch_position = log.committed;
        }
        slot.notify.notify_one();
        Ok(())
    }

    pub fn restart_all(&self) {
        for partition in 0..self.partitions.len() as i32 {
            let _ = self.restart_partition(partition);
        }
    }

    /// Next offset a restarted consumer would read
    pub fn committed_position(&self, partition: i32) -> Result<i64, SourceError> {
        Ok(self.slot(partition)?.log.lock().committed as i64)
    }

    /// Every commit issued on the partition, in order
    pub fn commit_history(&self, partition: i32) -> Result<Vec<i64>, SourceError> {
        Ok(self.slot(partition)?.log.lock().commits.clone())
    }

    /// Number of events appended to the partition
    pub fn len(&self, partition: i32) -> Result<usize, SourceError> {
        Ok(self.slot(partition)?.log.lock().events.len())
    }

    /// Whether every partition's committed position has reached its end
    pub fn fully_committed(&self) -> bool {
        self.partitions.iter().all(|slot| {
            let log = slot.log.lock();
            log.committed >= log.events.len()
        })
    }
}

#[async_trait]
impl EventSource for InMemoryEventLog {
    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    async fn poll(&self, partition: i32, timeout: Duration) -> Result<Option<Delivery>, SourceError> {
        let slot = self.slot(partition)?;
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut log = slot.log.lock();
                if log.fetch_position < log.events.len() {
                    let offset = log.fetch_position;
                    log.fetch_position += 1;
                    return Ok(Some(Delivery {
                        partition,
                        offset: offset as i64,
                        event: log.events[offset].clone(),
                    }));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, slot.notify.notified()).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        let slot = self.slot(partition)?;
        let mut log = slot.log.lock();
        log.committed = (offset + 1).max(0) as usize;
        log.commits.push(offset);
        Ok(())
    }

    async fn rewind(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        let slot = self.slot(partition)?;
        {
            let mut log = slot.log.lock();
            log.fetch_position = (offset.max(0) as usize).min(log.events.len());
        }
        slot.notify.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_millis(20);

    fn event(id: &str) -> FraudEvent {
        FraudEvent::new(id, "CLAIM-1", 100.0, "TEST")
    }

    #[tokio::test]
    async fn test_poll_delivers_in_partition_order() {
        let log = InMemoryEventLog::new(2);
        log.publish(1, event("a")).unwrap();
        log.publish(1, event("b")).unwrap();

        let first = log.poll(1, IDLE).await.unwrap().unwrap();
        let second = log.poll(1, IDLE).await.unwrap().unwrap();
        assert_eq!((first.offset, first.event.event_id.as_str()), (0, "a"));
        assert_eq!((second.offset, second.event.event_id.as_str()), (1, "b"));
        assert!(log.poll(1, IDLE).await.unwrap().is_none());
        assert!(log.poll(0, IDLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_redelivers_uncommitted() {
        let log = InMemoryEventLog::new(1);
        log.publish(0, event("a")).unwrap();
        log.publish(0, event("b")).unwrap();

        let a = log.poll(0, IDLE).await.unwrap().unwrap();
        log.commit(0, a.offset).await.unwrap();
        let _b = log.poll(0, IDLE).await.unwrap().unwrap();

        log.restart_partition(0).unwrap();

        let redelivered = log.poll(0, IDLE).await.unwrap().unwrap();
        assert_eq!(redelivered.event.event_id, "b");
        assert_eq!(log.committed_position(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rewind_repeats_offset() {
        let log = InMemoryEventLog::new(1);
        log.publish(0, event("a")).unwrap();

        let first = log.poll(0, IDLE).await.unwrap().unwrap();
        log.rewind(0, first.offset).await.unwrap();
        let again = log.poll(0, IDLE).await.unwrap().unwrap();

        assert_eq!(first, again);
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let log = std::sync::Arc::new(InMemoryEventLog::new(1));
        let waiter = {
            let log = log.clone();
            tokio::spawn(async move { log.poll(0, Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.publish(0, event("late")).unwrap();

        let delivery = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.event.event_id, "late");
    }

    #[tokio::test]
    async fn test_unknown_partition() {
        let log = InMemoryEventLog::new(1);
        assert!(matches!(
            log.poll(3, IDLE).await,
            Err(SourceError::UnknownPartition(3))
        ));
        assert!(log.publish(-1, event("x")).is_err());
    }

    #[test]
    fn test_keyed_publish_is_stable() {
        let log = InMemoryEventLog::new(6);
        let first = log.publish_keyed(event("E1"));
        let second = log.publish_keyed(event("E1"));
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + 1);
    }
}
