//! Non-idempotent baseline listener.
//!
//! Evaluates and alerts on every delivery with no dedup check, and commits
//! each offset whatever the outcome, like an auto-commit consumer. Redelivered
//! events fire their alerts again and failed events are never retried. Kept to
//! demonstrate the hazards the idempotent pool removes; it must run on its own
//! consumer group.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::consumer::source::{Delivery, EventSource};
use crate::error::{ProcessingError, SourceError};
use crate::models::RiskLevel;
use crate::services::{AlertDispatcher, RiskEvaluator};

pub struct UnsafeListener {
    source: Arc<dyn EventSource>,
    evaluator: Arc<dyn RiskEvaluator>,
    dispatcher: AlertDispatcher,
    poll_timeout: Duration,
}

impl UnsafeListener {
    pub fn new(
        source: Arc<dyn EventSource>,
        evaluator: Arc<dyn RiskEvaluator>,
        dispatcher: AlertDispatcher,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            source,
            evaluator,
            dispatcher,
            poll_timeout,
        }
    }

    /// Process a delivery and advance past it regardless of the result
    pub async fn handle(&self, delivery: Delivery) -> Result<RiskLevel, ProcessingError> {
        let Delivery {
            partition,
            offset,
            mut event,
        } = delivery;

        warn!(
            event_id = %event.event_id,
            "Processing with UNSAFE listener (race condition risk)"
        );

        let result = match self.evaluator.evaluate(&mut event) {
            Ok(level) => self.dispatcher.fire(&event).await.map(|_| level),
            Err(e) => Err(e),
        };

        if let Err(e) = self.source.commit(partition, offset).await {
            warn!(partition, offset, error = %e, "Auto-commit failed");
        }

        result
    }

    /// Consume every partition on a single task until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let partitions = self.source.partition_count() as i32;
        if partitions == 0 {
            warn!("Unsafe listener has no partitions to consume");
            return;
        }
        info!(partitions, "Starting unsafe listener");

        let mut partition = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                polled = self.source.poll(partition, self.poll_timeout) => polled,
            };

            match polled {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.handle(delivery).await {
                        error!(error = %e, "Unsafe listener failed to process event");
                    }
                }
                Ok(None) => {}
                Err(SourceError::Decode { partition, offset, reason }) => {
                    error!(partition, offset, reason = %reason, "Unsafe listener dropping undecodable event");
                    let _ = self.source.commit(partition, offset).await;
                }
                Err(e) => warn!(partition, error = %e, "Unsafe listener poll failed"),
            }

            partition = (partition + 1) % partitions;
        }

        info!("Unsafe listener stopped");
    }
}
