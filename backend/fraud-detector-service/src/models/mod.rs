use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Risk tier assigned by the evaluator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Suspicious-claim event as published on the fraud topic
///
/// Wire format is camelCase JSON. `risk_level` is absent on the wire and only
/// set once, by the risk evaluator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FraudEvent {
    /// Producer-assigned unique id; the dedup key
    pub event_id: String,
    pub claim_id: String,
    pub amount: f64,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<RiskLevel>,
}

impl FraudEvent {
    pub fn new(
        event_id: impl Into<String>,
        claim_id: impl Into<String>,
        amount: f64,
        event_type: impl Into<String>,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            claim_id: claim_id.into(),
            amount,
            event_type: event_type.into(),
            timestamp: Utc::now(),
            risk_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_producer_payload() {
        let payload = r#"{
            "eventId": "E1",
            "claimId": "CLAIM-12345",
            "amount": 15000.0,
            "eventType": "SUSPICIOUS_TRANSACTION",
            "timestamp": "2024-05-01T10:00:00Z"
        }"#;

        let event: FraudEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.event_id, "E1");
        assert_eq!(event.claim_id, "CLAIM-12345");
        assert_eq!(event.amount, 15000.0);
        assert_eq!(event.risk_level, None);
    }

    #[test]
    fn test_risk_level_wire_names() {
        assert_eq!(serde_json::to_string(&RiskLevel::High).unwrap(), "\"HIGH\"");
        assert_eq!(
            serde_json::from_str::<RiskLevel>("\"MEDIUM\"").unwrap(),
            RiskLevel::Medium
        );
        assert_eq!(RiskLevel::Low.to_string(), "LOW");
    }
}
