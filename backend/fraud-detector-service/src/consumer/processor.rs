//! Idempotent handling of a single delivery.
//!
//! ```text
//! Fetched ─► DedupChecked ─┬─ processed ──► advance ─────────────► SkippedDuplicate
//!                          ├─ store error ─────────────────────────► GuardUnavailable
//!                          └─ new ─► evaluate ─► fire ─┬─ error ───► Failed
//!                                                      ├─ bad input ─► advance ─► Rejected
//!                                                      └─ ok ─► mark ─► advance ─► Committed
//! ```
//!
//! The marker is written before the read position moves. A crash between the
//! two leaves a marked, unadvanced event: its redelivery is skipped as a
//! duplicate. A crash before the mark leaves nothing recorded: its redelivery
//! runs in full. Advancing first would lose the "processed" fact for good.

use idempotent_consumer::{DedupGuard, IdempotencyError, ProcessedMarker};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::consumer::source::{Delivery, EventSource};
use crate::error::ProcessingError;
use crate::metrics;
use crate::models::{FraudEvent, RiskLevel};
use crate::services::{AlertDispatcher, RiskEvaluator};

/// Terminal state of one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Effects ran, marker written, position advanced
    Committed { risk_level: RiskLevel },

    /// Marker already present; position advanced without side effects
    SkippedDuplicate,

    /// Delivery can never be processed (bad id, payload or amount); advanced past it
    Rejected { reason: String },

    /// Dedup store could not answer or could not record completion
    GuardUnavailable { reason: String },

    /// Evaluator or dispatcher failed; nothing marked
    Failed { reason: String },

    /// Marker written but the source refused the commit
    AdvanceFailed { reason: String },
}

impl EventOutcome {
    /// Whether the read position moved past this delivery
    pub fn advanced(&self) -> bool {
        matches!(
            self,
            EventOutcome::Committed { .. }
                | EventOutcome::SkippedDuplicate
                | EventOutcome::Rejected { .. }
        )
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            EventOutcome::Committed { .. } => "committed",
            EventOutcome::SkippedDuplicate => "skipped_duplicate",
            EventOutcome::Rejected { .. } => "rejected",
            EventOutcome::GuardUnavailable { .. } => "guard_unavailable",
            EventOutcome::Failed { .. } => "failed",
            EventOutcome::AdvanceFailed { .. } => "advance_failed",
        }
    }
}

/// Applies the dedup / effects / mark / advance sequence to deliveries
pub struct EventProcessor {
    guard: DedupGuard,
    evaluator: Arc<dyn RiskEvaluator>,
    dispatcher: AlertDispatcher,
    consumer_group: Option<String>,
}

impl EventProcessor {
    pub fn new(guard: DedupGuard, evaluator: Arc<dyn RiskEvaluator>, dispatcher: AlertDispatcher) -> Self {
        Self {
            guard,
            evaluator,
            dispatcher,
            consumer_group: None,
        }
    }

    /// Record the consumer group in completion markers
    pub fn with_consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    pub fn guard(&self) -> &DedupGuard {
        &self.guard
    }

    /// Run one delivery through the protocol
    ///
    /// Dedup check, effects, marker write and commit are issued strictly in
    /// sequence; each step completes before the next starts.
    pub async fn handle(&self, source: &dyn EventSource, delivery: Delivery) -> EventOutcome {
        let Delivery {
            partition,
            offset,
            mut event,
        } = delivery;
        let event_id = event.event_id.clone();

        match self.guard.is_processed(&event_id).await {
            Ok(true) => {
                info!(event_id = %event_id, partition, offset, "Duplicate event detected, skipping");
                return self
                    .advance(source, partition, offset, EventOutcome::SkippedDuplicate)
                    .await;
            }
            Ok(false) => {}
            Err(IdempotencyError::InvalidEventId(reason)) => {
                error!(
                    event_id = %event_id,
                    partition,
                    offset,
                    reason = %reason,
                    "Rejecting event with invalid id"
                );
                return self
                    .advance(source, partition, offset, EventOutcome::Rejected { reason })
                    .await;
            }
            Err(e) => {
                warn!(
                    event_id = %event_id,
                    partition,
                    offset,
                    error = %e,
                    "Dedup guard unavailable, leaving event for redelivery"
                );
                return EventOutcome::GuardUnavailable {
                    reason: e.to_string(),
                };
            }
        }

        info!(event_id = %event_id, partition, offset, "Processing fraud event");

        let risk_level = match self.apply_effects(&mut event).await {
            Ok(level) => level,
            Err(e) if e.is_permanent() => {
                error!(
                    event_id = %event_id,
                    partition,
                    offset,
                    error = %e,
                    "Rejecting fraud event that can never be processed"
                );
                return self
                    .advance(
                        source,
                        partition,
                        offset,
                        EventOutcome::Rejected {
                            reason: e.to_string(),
                        },
                    )
                    .await;
            }
            Err(e) => {
                error!(
                    event_id = %event_id,
                    partition,
                    offset,
                    error = %e,
                    "Error processing fraud event"
                );
                return EventOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let mut marker = ProcessedMarker::at(partition, offset);
        marker.consumer_group = self.consumer_group.clone();

        if let Err(e) = self.guard.mark_processed(&event_id, Some(marker)).await {
            // Effects already ran; redelivery will run them again
            error!(
                event_id = %event_id,
                partition,
                offset,
                error = %e,
                "Failed to record completion marker, offset not committed"
            );
            return EventOutcome::GuardUnavailable {
                reason: e.to_string(),
            };
        }

        let outcome = self
            .advance(source, partition, offset, EventOutcome::Committed { risk_level })
            .await;

        if outcome.advanced() {
            info!(event_id = %event_id, partition, offset, risk_level = %risk_level, "Event processed and offset committed");
        }

        outcome
    }

    /// Skip a delivery whose payload could not be decoded
    pub async fn reject_undecodable(
        &self,
        source: &dyn EventSource,
        partition: i32,
        offset: i64,
        reason: String,
    ) -> EventOutcome {
        error!(partition, offset, reason = %reason, "Skipping undecodable fraud event");
        self.advance(source, partition, offset, EventOutcome::Rejected { reason })
            .await
    }

    async fn apply_effects(&self, event: &mut FraudEvent) -> Result<RiskLevel, ProcessingError> {
        let level = self.evaluator.evaluate(event)?;

        if let Some(severity) = self.dispatcher.fire(event).await? {
            metrics::record_alert(&severity.to_string());
        }

        Ok(level)
    }

    async fn advance(
        &self,
        source: &dyn EventSource,
        partition: i32,
        offset: i64,
        outcome: EventOutcome,
    ) -> EventOutcome {
        match source.commit(partition, offset).await {
            Ok(()) => outcome,
            Err(e) => {
                warn!(
                    partition,
                    offset,
                    error = %e,
                    "Failed to commit offset, event will be redelivered"
                );
                EventOutcome::AdvanceFailed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
