use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::{AlertError, ProcessingError};
use crate::models::{FraudEvent, RiskLevel};

/// Alert path chosen for a risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Critical,
    Warning,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Critical => write!(f, "critical"),
            AlertSeverity::Warning => write!(f, "warning"),
        }
    }
}

/// Notification handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub event_id: String,
    pub claim_id: String,
    pub amount: f64,
    pub risk_level: RiskLevel,
}

/// Outbound notification sink (email, SMS, chat, pager)
///
/// Best effort: the only contract is success or failure of the call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Transport that writes alerts to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertTransport;

#[async_trait]
impl AlertTransport for LogAlertTransport {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                event_id = %alert.event_id,
                claim_id = %alert.claim_id,
                amount = alert.amount,
                risk_level = %alert.risk_level,
                "CRITICAL ALERT: Potential fraud detected"
            ),
            AlertSeverity::Warning => warn!(
                event_id = %alert.event_id,
                claim_id = %alert.claim_id,
                amount = alert.amount,
                risk_level = %alert.risk_level,
                "WARNING: Suspicious transaction"
            ),
        }
        Ok(())
    }
}

/// Routes an evaluated event to the matching alert path
///
/// Does not deduplicate. Callers must never fire twice for one event id.
#[derive(Clone)]
pub struct AlertDispatcher {
    transport: Arc<dyn AlertTransport>,
}

impl AlertDispatcher {
    pub fn new(transport: Arc<dyn AlertTransport>) -> Self {
        Self { transport }
    }

    /// Severity for a tier; LOW takes no external action
    pub fn severity_for(level: RiskLevel) -> Option<AlertSeverity> {
        match level {
            RiskLevel::High => Some(AlertSeverity::Critical),
            RiskLevel::Medium => Some(AlertSeverity::Warning),
            RiskLevel::Low => None,
        }
    }

    /// Fire the alert for an evaluated event
    ///
    /// Returns the severity sent, or `None` for low-risk events.
    pub async fn fire(&self, event: &FraudEvent) -> Result<Option<AlertSeverity>, ProcessingError> {
        let level = event
            .risk_level
            .ok_or_else(|| ProcessingError::NotEvaluated(event.event_id.clone()))?;

        info!(event_id = %event.event_id, risk_level = %level, "Firing alert");

        let Some(severity) = Self::severity_for(level) else {
            debug!(event_id = %event.event_id, "Low risk event - no alert needed");
            return Ok(None);
        };

        let alert = Alert {
            severity,
            event_id: event.event_id.clone(),
            claim_id: event.claim_id.clone(),
            amount: event.amount,
            risk_level: level,
        };

        self.transport.send(&alert).await?;
        Ok(Some(severity))
    }
}
