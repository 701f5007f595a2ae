use tracing::{info, warn};

use crate::error::ProcessingError;
use crate::models::{FraudEvent, RiskLevel};

pub const DEFAULT_HIGH_RISK_THRESHOLD: f64 = 10_000.0;
pub const DEFAULT_MEDIUM_RISK_THRESHOLD: f64 = 5_000.0;

/// Maps an event to a risk tier and records it on the event
///
/// Implementations must be deterministic and free of shared mutable state so
/// workers can call them concurrently on distinct events.
pub trait RiskEvaluator: Send + Sync {
    fn evaluate(&self, event: &mut FraudEvent) -> Result<RiskLevel, ProcessingError>;
}

/// Amount-threshold evaluator
///
/// `amount > high` is HIGH, `medium < amount <= high` is MEDIUM, anything else
/// is LOW. Both comparisons are strict, so an amount equal to a threshold falls
/// into the lower tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRiskEvaluator {
    high: f64,
    medium: f64,
}

impl Default for ThresholdRiskEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_RISK_THRESHOLD, DEFAULT_MEDIUM_RISK_THRESHOLD)
    }
}

impl ThresholdRiskEvaluator {
    pub fn new(high: f64, medium: f64) -> Self {
        Self { high, medium }
    }

    /// Tier for a raw amount
    pub fn classify(&self, amount: f64) -> RiskLevel {
        if amount > self.high {
            RiskLevel::High
        } else if amount > self.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl RiskEvaluator for ThresholdRiskEvaluator {
    fn evaluate(&self, event: &mut FraudEvent) -> Result<RiskLevel, ProcessingError> {
        info!(event_id = %event.event_id, "Evaluating fraud risk");

        if !event.amount.is_finite() || event.amount < 0.0 {
            return Err(ProcessingError::InvalidAmount {
                event_id: event.event_id.clone(),
                amount: event.amount,
            });
        }

        let level = self.classify(event.amount);
        event.risk_level = Some(level);

        if level == RiskLevel::High {
            warn!(event_id = %event.event_id, amount = event.amount, "High risk event detected");
        }

        info!(event_id = %event.event_id, risk_level = %level, "Risk evaluation completed");
        Ok(level)
    }
}
