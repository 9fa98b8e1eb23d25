//! Adaptive response: a deterministic map from risk level to side effects.

use crate::risk::RiskLevel;
use serde::{Deserialize, Serialize};

/// Side effects the gate can order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptiveAction {
    Quarantine,
    AlertAdmin,
    EnhanceMonitoring,
    RequireReauthentication,
    RestrictCapabilities,
}

impl AdaptiveAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdaptiveAction::Quarantine => "quarantine",
            AdaptiveAction::AlertAdmin => "alert_admin",
            AdaptiveAction::EnhanceMonitoring => "enhance_monitoring",
            AdaptiveAction::RequireReauthentication => "require_reauthentication",
            AdaptiveAction::RestrictCapabilities => "restrict_capabilities",
        }
    }
}

/// An ordered action list plus how long the response stays in force.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePlan {
    pub actions: Vec<AdaptiveAction>,
    pub duration_ms: u64,
}

/// Stateless responder.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveResponder;

impl AdaptiveResponder {
    /// The response table. Order within a plan is execution order.
    pub fn plan_for(&self, level: RiskLevel) -> ResponsePlan {
        match level {
            RiskLevel::Critical => ResponsePlan {
                actions: vec![
                    AdaptiveAction::Quarantine,
                    AdaptiveAction::AlertAdmin,
                    AdaptiveAction::EnhanceMonitoring,
                ],
                duration_ms: 60 * 60 * 1000,
            },
            RiskLevel::VeryHigh => ResponsePlan {
                actions: vec![
                    AdaptiveAction::RequireReauthentication,
                    AdaptiveAction::RestrictCapabilities,
                    AdaptiveAction::AlertAdmin,
                ],
                duration_ms: 30 * 60 * 1000,
            },
            RiskLevel::High => ResponsePlan {
                actions: vec![
                    AdaptiveAction::EnhanceMonitoring,
                    AdaptiveAction::RequireReauthentication,
                ],
                duration_ms: 15 * 60 * 1000,
            },
            RiskLevel::Medium => ResponsePlan {
                actions: vec![AdaptiveAction::EnhanceMonitoring],
                duration_ms: 5 * 60 * 1000,
            },
            RiskLevel::Low | RiskLevel::VeryLow => ResponsePlan {
                actions: Vec::new(),
                duration_ms: 60 * 1000,
            },
        }
    }
}
