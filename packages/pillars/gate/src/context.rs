//! Security context: the immutable per-request view of who is asking,
//! how they authenticated, how they have been behaving, and what they
//! want to touch.

use crate::types::{AgentType, Sensitivity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustmesh_codec::Value;
use uuid::Uuid;

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDescriptor {
    pub agent_id: String,
    pub agent_type: AgentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_segment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

/// How they proved who they are.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityBlock {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub certificates: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_level: Option<f64>,
}

/// How they have been behaving lately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehaviorBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Anomaly score in [0,1]; 0 is fully normal.
    pub anomaly_score: f64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
}

/// What they want to touch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceBlock {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub sensitivity: Sensitivity,
}

/// Immutable per-request context. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: ActorDescriptor,
    pub identity: IdentityBlock,
    pub behavior: BehaviorBlock,
    pub resource: ResourceBlock,
    #[serde(default)]
    pub metadata: Value,
}

/// The caller-supplied slice of a context. Everything is optional; the
/// builder fills safe defaults for whatever is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialContext {
    pub agent_type: Option<AgentType>,
    pub network_segment: Option<String>,
    pub source_ip: Option<String>,
    pub location: Option<String>,
    pub device_id: Option<String>,
    pub identity_verified: Option<bool>,
    pub identity_method: Option<String>,
    pub certificates: Option<Vec<String>>,
    pub behavior_pattern: Option<String>,
    pub anomaly_score: Option<f64>,
    pub risk_factors: Option<Vec<String>>,
    pub resource_classification: Option<String>,
    pub resource_owner: Option<String>,
    pub sensitivity: Option<Sensitivity>,
    pub metadata: Option<Value>,
}

impl SecurityContext {
    /// Build a complete context from a partial one.
    ///
    /// Safe defaults: unverified identity, zero anomaly score, worker agent
    /// type, internal sensitivity, fresh request id.
    pub fn complete(
        agent_id: impl Into<String>,
        resource_type: impl Into<String>,
        partial: PartialContext,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            actor: ActorDescriptor {
                agent_id: agent_id.into(),
                agent_type: partial.agent_type.unwrap_or(AgentType::Worker),
                network_segment: partial.network_segment,
                source_ip: partial.source_ip,
                location: partial.location,
                device_id: partial.device_id,
            },
            identity: IdentityBlock {
                verified: partial.identity_verified.unwrap_or(false),
                method: partial.identity_method,
                certificates: partial.certificates.unwrap_or_default(),
                trust_level: None,
            },
            behavior: BehaviorBlock {
                pattern: partial.behavior_pattern,
                anomaly_score: partial.anomaly_score.unwrap_or(0.0).clamp(0.0, 1.0),
                risk_factors: partial.risk_factors.unwrap_or_default(),
            },
            resource: ResourceBlock {
                resource_type: resource_type.into(),
                classification: partial.resource_classification,
                owner: partial.resource_owner,
                sensitivity: partial.sensitivity.unwrap_or(Sensitivity::Internal),
            },
            metadata: partial.metadata.unwrap_or(Value::Null),
        }
    }
}
