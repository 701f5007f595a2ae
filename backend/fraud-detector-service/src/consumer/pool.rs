//! Fixed pool of partition-owning workers.
//!
//! Every partition is owned by exactly one worker for the pool's lifetime, so
//! committing a partition's read position is a single-writer operation. A
//! worker handles its partitions' deliveries one at a time, in offset order.
//! It drains buffered deliveries from every owned partition without waiting
//! and only blocks when all of them are idle, on all of them at once.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::consumer::backoff::RetryPolicy;
use crate::consumer::processor::{EventOutcome, EventProcessor};
use crate::consumer::source::{Delivery, EventSource};
use crate::error::{AppError, SourceError};
use crate::metrics;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_count: usize,
    /// When set, the source must report exactly this many partitions
    pub expected_partitions: Option<usize>,
    pub poll_timeout: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 6,
            expected_partitions: None,
            poll_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&Config> for PoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            expected_partitions: config.expected_partitions,
            poll_timeout: config.poll_timeout(),
            retry_policy: RetryPolicy::new(config.retry_backoff_ms, config.max_retry_backoff_ms),
        }
    }
}

/// Split `partitions` across `workers`, partition `p` going to worker `p % workers`
///
/// Fails unless the worker count evenly divides the partition count.
pub fn assign_partitions(workers: usize, partitions: usize) -> Result<Vec<Vec<i32>>, AppError> {
    if workers == 0 || partitions == 0 || partitions % workers != 0 {
        return Err(AppError::ConfigurationMismatch { workers, partitions });
    }

    let mut assignments = vec![Vec::with_capacity(partitions / workers); workers];
    for partition in 0..partitions {
        assignments[partition % workers].push(partition as i32);
    }
    Ok(assignments)
}

/// Outcome counters shared by all workers
#[derive(Debug, Default)]
pub struct PoolStats {
    committed: AtomicU64,
    skipped_duplicates: AtomicU64,
    rejected: AtomicU64,
    guard_unavailable: AtomicU64,
    failed: AtomicU64,
    advance_failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub committed: u64,
    pub skipped_duplicates: u64,
    pub rejected: u64,
    pub guard_unavailable: u64,
    pub failed: u64,
    pub advance_failed: u64,
}

impl StatsSnapshot {
    /// Deliveries whose read position advanced
    pub fn advanced(&self) -> u64 {
        self.committed + self.skipped_duplicates + self.rejected
    }
}

impl PoolStats {
    pub fn record(&self, outcome: &EventOutcome) {
        let counter = match outcome {
            EventOutcome::Committed { .. } => &self.committed,
            EventOutcome::SkippedDuplicate => &self.skipped_duplicates,
            EventOutcome::Rejected { .. } => &self.rejected,
            EventOutcome::GuardUnavailable { .. } => &self.guard_unavailable,
            EventOutcome::Failed { .. } => &self.failed,
            EventOutcome::AdvanceFailed { .. } => &self.advance_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_outcome(outcome.label());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            committed: self.committed.load(Ordering::Relaxed),
            skipped_duplicates: self.skipped_duplicates.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            guard_unavailable: self.guard_unavailable.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            advance_failed: self.advance_failed.load(Ordering::Relaxed),
        }
    }
}

/// Worker pool bound to one event source
pub struct EventWorkerPool {
    config: PoolConfig,
    source: Arc<dyn EventSource>,
    processor: Arc<EventProcessor>,
    assignments: Vec<Vec<i32>>,
}

impl EventWorkerPool {
    /// Validate the worker/partition layout and build the pool
    pub fn new(
        config: PoolConfig,
        source: Arc<dyn EventSource>,
        processor: Arc<EventProcessor>,
    ) -> Result<Self, AppError> {
        let partitions = source.partition_count();

        if let Some(expected) = config.expected_partitions {
            if expected != partitions {
                return Err(AppError::PartitionCountMismatch {
                    expected,
                    actual: partitions,
                });
            }
        }

        let assignments = assign_partitions(config.worker_count, partitions)?;

        Ok(Self {
            config,
            source,
            processor,
            assignments,
        })
    }

    /// Partitions owned by each worker, indexed by worker id
    pub fn assignments(&self) -> &[Vec<i32>] {
        &self.assignments
    }

    /// Spawn one task per worker
    pub fn start(self) -> PoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(PoolStats::default());

        info!(
            workers = self.assignments.len(),
            partitions = self.source.partition_count(),
            "Starting event worker pool"
        );

        let handles = self
            .assignments
            .into_iter()
            .enumerate()
            .map(|(id, partitions)| {
                let worker = Worker {
                    id,
                    partitions: partitions
                        .into_iter()
                        .map(PartitionState::new)
                        .collect(),
                    source: self.source.clone(),
                    processor: self.processor.clone(),
                    stats: stats.clone(),
                    poll_timeout: self.config.poll_timeout,
                    retry_policy: self.config.retry_policy.clone(),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        PoolHandle {
            shutdown_tx,
            handles,
            stats,
        }
    }
}

/// Running pool; stop it with [`PoolHandle::shutdown`]
pub struct PoolHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    stats: Arc<PoolStats>,
}

impl PoolHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask every worker to stop after its current event, then wait for them
    pub async fn shutdown(self) -> StatsSnapshot {
        let _ = self.shutdown_tx.send(true);

        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }

        let stats = self.stats.snapshot();
        info!(?stats, "Event worker pool stopped");
        stats
    }
}

#[derive(Debug)]
struct PartitionState {
    partition: i32,
    consecutive_failures: u32,
    retry_at: Option<Instant>,
}

impl PartitionState {
    fn new(partition: i32) -> Self {
        Self {
            partition,
            consecutive_failures: 0,
            retry_at: None,
        }
    }

    fn ready(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| at <= now)
    }
}

struct Worker {
    id: usize,
    partitions: Vec<PartitionState>,
    source: Arc<dyn EventSource>,
    processor: Arc<EventProcessor>,
    stats: Arc<PoolStats>,
    poll_timeout: Duration,
    retry_policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let owned: Vec<i32> = self.partitions.iter().map(|p| p.partition).collect();
        info!(worker = self.id, partitions = ?owned, "Worker started");

        let count = self.partitions.len();
        let mut next = 0;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let now = Instant::now();
            let ready: Vec<usize> = (0..count)
                .map(|i| (next + i) % count)
                .filter(|&idx| self.partitions[idx].ready(now))
                .collect();

            if ready.is_empty() {
                // Every owned partition is backing off
                let wake = self.next_retry().unwrap_or(now);
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = self.shutdown.changed() => break,
                }
                continue;
            }

            // Take whatever is already buffered, starting after the last partition served
            let mut found = None;
            for &idx in &ready {
                let partition = self.partitions[idx].partition;
                match self.source.poll(partition, Duration::ZERO).await {
                    Ok(None) => {}
                    polled => {
                        found = Some((idx, polled));
                        break;
                    }
                }
            }

            let (idx, polled) = match found {
                Some(found) => found,
                None => {
                    // All ready partitions idle: one wait covering all of them
                    let waits = ready
                        .iter()
                        .map(|&idx| {
                            let source = self.source.clone();
                            let partition = self.partitions[idx].partition;
                            let timeout = self.poll_timeout;
                            Box::pin(async move { (idx, source.poll(partition, timeout).await) })
                        })
                        .collect::<Vec<_>>();
                    let retry_at = self.next_retry();

                    tokio::select! {
                        biased;
                        _ = self.shutdown.changed() => break,
                        ((idx, polled), _, _) = futures::future::select_all(waits) => (idx, polled),
                        _ = tokio::time::sleep_until(retry_at.unwrap_or(now)), if retry_at.is_some() => continue,
                    }
                }
            };

            next = (idx + 1) % count;
            self.handle_polled(idx, polled).await;
        }

        info!(worker = self.id, "Worker stopped");
    }

    async fn handle_polled(&mut self, idx: usize, polled: Result<Option<Delivery>, SourceError>) {
        let partition = self.partitions[idx].partition;

        let (offset, outcome) = match polled {
            Ok(None) => return,
            Ok(Some(delivery)) => {
                let offset = delivery.offset;
                (offset, self.processor.handle(self.source.as_ref(), delivery).await)
            }
            Err(SourceError::Decode {
                partition,
                offset,
                reason,
            }) => (
                offset,
                self.processor
                    .reject_undecodable(self.source.as_ref(), partition, offset, reason)
                    .await,
            ),
            Err(e) => {
                warn!(worker = self.id, partition, error = %e, "Event source poll failed");
                self.back_off(idx);
                return;
            }
        };

        self.stats.record(&outcome);

        if outcome.advanced() {
            let state = &mut self.partitions[idx];
            state.consecutive_failures = 0;
            state.retry_at = None;
        } else {
            self.back_off(idx);
            // Same event must be the partition's next delivery
            if let Err(e) = self.source.rewind(partition, offset).await {
                warn!(worker = self.id, partition, offset, error = %e, "Failed to rewind partition");
            }
        }
    }

    /// Earliest moment a backing-off partition becomes ready again
    fn next_retry(&self) -> Option<Instant> {
        self.partitions.iter().filter_map(|p| p.retry_at).min()
    }

    fn back_off(&mut self, idx: usize) {
        let state = &mut self.partitions[idx];
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let delay = self.retry_policy.get_backoff(state.consecutive_failures);
        state.retry_at = Some(Instant::now() + delay);
    }
}
