//! Shared fixtures for fraud detector integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use fraud_detector_service::consumer::{
    Delivery, EventProcessor, EventSource, InMemoryEventLog, PoolConfig, RetryPolicy,
};
use fraud_detector_service::error::{AlertError, ProcessingError, SourceError};
use fraud_detector_service::models::{FraudEvent, RiskLevel};
use fraud_detector_service::services::{
    Alert, AlertDispatcher, AlertTransport, RiskEvaluator, ThresholdRiskEvaluator,
};
use idempotent_consumer::{DedupGuard, DedupStore, InMemoryDedupStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const POLL_TIMEOUT: Duration = Duration::from_millis(20);

pub fn event(id: &str, amount: f64) -> FraudEvent {
    FraudEvent::new(id, format!("CLAIM-{}", id), amount, "SUSPICIOUS_TRANSACTION")
}

/// Threshold evaluator that counts calls per event id
#[derive(Default)]
pub struct CountingEvaluator {
    inner: ThresholdRiskEvaluator,
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingEvaluator {
    pub fn calls_for(&self, event_id: &str) -> usize {
        self.calls.lock().get(event_id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

impl RiskEvaluator for CountingEvaluator {
    fn evaluate(&self, event: &mut FraudEvent) -> Result<RiskLevel, ProcessingError> {
        *self.calls.lock().entry(event.event_id.clone()).or_default() += 1;
        self.inner.evaluate(event)
    }
}

/// Transport that records delivered alerts and can fail the first N sends
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Alert>>,
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
}

impl RecordingTransport {
    pub fn failing_first(failures: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(failures),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Alert> {
        self.sent.lock().clone()
    }

    pub fn sent_for(&self, event_id: &str) -> usize {
        self.sent.lock().iter().filter(|a| a.event_id == event_id).count()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AlertTransport for RecordingTransport {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(AlertError::Transport("smtp connection reset".into()));
        }

        self.sent.lock().push(alert.clone());
        Ok(())
    }
}

/// Dedup store that can be taken down or made to drop marker writes
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryDedupStore,
    down: AtomicBool,
    write_failures: AtomicUsize,
}

impl FlakyStore {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.write_failures.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DedupStore for FlakyStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.exists(key).await
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let failing = self
            .write_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Timeout(Duration::from_millis(500)));
        }
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.delete(key).await
    }
}

/// Event log whose commits can be made to fail
pub struct UnreliableCommitLog {
    pub log: InMemoryEventLog,
    commit_failures: AtomicUsize,
}

impl UnreliableCommitLog {
    pub fn new(partitions: usize, commit_failures: usize) -> Self {
        Self {
            log: InMemoryEventLog::new(partitions),
            commit_failures: AtomicUsize::new(commit_failures),
        }
    }
}

#[async_trait]
impl EventSource for UnreliableCommitLog {
    fn partition_count(&self) -> usize {
        self.log.partition_count()
    }

    async fn poll(&self, partition: i32, timeout: Duration) -> Result<Option<Delivery>, SourceError> {
        self.log.poll(partition, timeout).await
    }

    async fn commit(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        let failing = self
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Transport("broker not available".into()));
        }
        self.log.commit(partition, offset).await
    }

    async fn rewind(&self, partition: i32, offset: i64) -> Result<(), SourceError> {
        self.log.rewind(partition, offset).await
    }
}

/// Processor and the doubles behind it
pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub evaluator: Arc<CountingEvaluator>,
    pub transport: Arc<RecordingTransport>,
    pub processor: Arc<EventProcessor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_transport(RecordingTransport::default())
    }

    pub fn with_transport(transport: RecordingTransport) -> Self {
        let store = Arc::new(FlakyStore::default());
        let evaluator = Arc::new(CountingEvaluator::default());
        let transport = Arc::new(transport);

        let processor = Arc::new(
            EventProcessor::new(
                DedupGuard::with_defaults(store.clone()),
                evaluator.clone(),
                AlertDispatcher::new(transport.clone()),
            )
            .with_consumer_group("fraud-detector-test"),
        );

        Self {
            store,
            evaluator,
            transport,
            processor,
        }
    }

    pub async fn is_marked(&self, event_id: &str) -> bool {
        self.store
            .inner
            .get(&format!("dedup:{}", event_id))
            .await
            .is_some()
    }
}

pub fn pool_config(workers: usize) -> PoolConfig {
    PoolConfig {
        worker_count: workers,
        expected_partitions: None,
        poll_timeout: POLL_TIMEOUT,
        retry_policy: RetryPolicy {
            backoff_ms: 5,
            max_backoff_ms: 50,
            jitter: false,
        },
    }
}

/// Poll `condition` until it holds or five seconds pass
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
