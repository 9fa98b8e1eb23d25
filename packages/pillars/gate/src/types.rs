//! Shared gate types.

use crate::responder::AdaptiveAction;
use crate::risk::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of agents that request operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Orchestrates other agents.
    Coordinator,
    /// Executes delegated work.
    Worker,
    /// Observes and reports.
    Monitor,
    /// Bridges to external systems.
    Gateway,
    /// Outside the platform's control.
    External,
}

/// Resource sensitivity, ordered from most open to most restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Public,
    Internal,
    Confidential,
    Restricted,
}

/// The verdict for one inter-agent operation. Immutable once composed;
/// a copy lands in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    /// Short human-readable reason plus a stable machine code.
    pub reason: String,
    pub reason_code: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    pub monitoring: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    /// Trust snapshot used for the decision (context-adjusted).
    pub trust_score: f64,
    pub risk_level: RiskLevel,
    pub policy_matches: Vec<String>,
    pub adaptive_actions: Vec<AdaptiveAction>,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AccessDecision {
    /// The deny-everything decision used when evaluation itself fails.
    pub fn fail_secure(request_id: impl Into<String>, reason_code: &str) -> Self {
        Self {
            allowed: false,
            reason: "evaluation error — failing secure".to_string(),
            reason_code: reason_code.to_string(),
            conditions: Vec::new(),
            restrictions: Vec::new(),
            monitoring: true,
            time_limit_ms: None,
            trust_score: 0.0,
            risk_level: RiskLevel::Critical,
            policy_matches: Vec::new(),
            adaptive_actions: Vec::new(),
            request_id: request_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_ordering() {
        assert!(Sensitivity::Restricted > Sensitivity::Confidential);
        assert!(Sensitivity::Confidential > Sensitivity::Internal);
        assert!(Sensitivity::Internal > Sensitivity::Public);
    }

    #[test]
    fn test_fail_secure_shape() {
        let decision = AccessDecision::fail_secure("req-1", "evaluation_error");
        assert!(!decision.allowed);
        assert_eq!(decision.risk_level, RiskLevel::Critical);
        assert_eq!(decision.trust_score, 0.0);
        assert!(decision.policy_matches.is_empty());
    }

    #[test]
    fn test_agent_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&AgentType::Coordinator).unwrap(),
            "\"coordinator\""
        );
    }
}
