//! Policy store and evaluation engine.
//!
//! Policies are priority-ordered predicate-plus-action rules over the
//! security context, the trust snapshot, and the risk assessment. The
//! store keeps copy-on-write snapshots so evaluation never blocks on an
//! update, and a default-deny policy is always present.
//!
//! Catalogs load from YAML:
//!
//! ```yaml
//! - id: trusted-coordinators
//!   name: Trusted Coordinators
//!   version: "1.0"
//!   priority: 80
//!   enabled: true
//!   conditions:
//!     agent_types: [coordinator]
//!     risk_levels: [very_low, low]
//!   action:
//!     allow: true
//!     monitoring: true
//!     time_limit_ms: 28800000
//! ```

use crate::context::SecurityContext;
use crate::risk::{RiskAssessment, RiskLevel};
use crate::trust::TrustScore;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use trustmesh_codec::Value;

use crate::types::AgentType;

/// Marker restriction that contradicts an allow verdict.
const HARD_BLOCK: &str = "hard-block";

/// Policy validation errors.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy validation error: {0}")]
    Validation(String),
    #[error("unknown policy: {0}")]
    Unknown(String),
    #[error("policy catalog parse error: {0}")]
    Catalog(String),
}

/// Hour-of-day window; wraps midnight when start > end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl TimeWindow {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour() as u8;
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Condition predicate. Empty lists don't constrain; a populated list
/// that references a field missing from the context does NOT match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyConditions {
    #[serde(default)]
    pub agent_types: Vec<AgentType>,
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<TimeWindow>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub network_segments: Vec<String>,
    #[serde(default)]
    pub risk_levels: Vec<RiskLevel>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub resource_patterns: Vec<String>,
    /// Minimum context-adjusted trust score.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_trust: Option<f64>,
}

/// What a matching policy decrees.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyAction {
    pub allow: bool,
    #[serde(default)]
    pub required_conditions: Vec<String>,
    #[serde(default)]
    pub restrictions: Vec<String>,
    #[serde(default)]
    pub monitoring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
}

/// A complete policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub conditions: PolicyConditions,
    pub action: PolicyAction,
    /// Priority in [0,100]; higher evaluates first.
    #[serde(default)]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_version() -> String {
    "1.0".to_string()
}
fn default_enabled() -> bool {
    true
}

impl Policy {
    /// The hard default-deny backstop. Matches everything, allows nothing.
    pub fn default_deny() -> Self {
        Self {
            id: "default-deny".to_string(),
            name: "Default Deny".to_string(),
            version: default_version(),
            description: "Deny anything no other policy explicitly allows".to_string(),
            conditions: PolicyConditions::default(),
            action: PolicyAction {
                allow: false,
                monitoring: true,
                ..Default::default()
            },
            priority: 0,
            enabled: true,
            created_at: Utc::now(),
            created_by: "system".to_string(),
            tags: vec!["builtin".to_string()],
        }
    }

    /// Preset: coordinators at low risk get an eight-hour allowance.
    pub fn trusted_coordinators() -> Self {
        Self {
            id: "trusted-coordinators".to_string(),
            name: "Trusted Coordinators".to_string(),
            version: default_version(),
            description: "Low-risk coordinator agents may operate with monitoring".to_string(),
            conditions: PolicyConditions {
                agent_types: vec![AgentType::Coordinator],
                risk_levels: vec![RiskLevel::VeryLow, RiskLevel::Low],
                min_trust: Some(0.6),
                ..Default::default()
            },
            action: PolicyAction {
                allow: true,
                monitoring: true,
                time_limit_ms: Some(8 * 60 * 60 * 1000),
                ..Default::default()
            },
            priority: 80,
            enabled: true,
            created_at: Utc::now(),
            created_by: "system".to_string(),
            tags: vec!["builtin".to_string()],
        }
    }

    /// Structural validation on add.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.id.trim().is_empty() {
            return Err(PolicyError::Validation("policy id must be set".into()));
        }
        if self.name.trim().is_empty() {
            return Err(PolicyError::Validation("policy name must be set".into()));
        }
        if self.priority > 100 {
            return Err(PolicyError::Validation(format!(
                "priority {} outside [0,100]",
                self.priority
            )));
        }
        if self.action.allow
            && self
                .action
                .restrictions
                .iter()
                .any(|restriction| restriction == HARD_BLOCK)
        {
            return Err(PolicyError::Validation(
                "action cannot both allow and hard-block".into(),
            ));
        }
        Ok(())
    }

    /// Evaluate the condition predicate. Conditions run in declaration
    /// order and short-circuit on the first failure.
    pub fn matches(
        &self,
        context: &SecurityContext,
        trust: &TrustScore,
        risk: &RiskAssessment,
    ) -> bool {
        let conditions = &self.conditions;

        if !conditions.risk_levels.is_empty() && !conditions.risk_levels.contains(&risk.level) {
            return false;
        }
        if !conditions.agent_types.is_empty()
            && !conditions.agent_types.contains(&context.actor.agent_type)
        {
            return false;
        }
        if !conditions.agent_ids.is_empty()
            && !conditions.agent_ids.contains(&context.actor.agent_id)
        {
            return false;
        }
        if !conditions.network_segments.is_empty() {
            // Missing segment on the context: not matched.
            match &context.actor.network_segment {
                Some(segment) if conditions.network_segments.contains(segment) => {}
                _ => return false,
            }
        }
        if !conditions.locations.is_empty() {
            match &context.actor.location {
                Some(location) if conditions.locations.contains(location) => {}
                _ => return false,
            }
        }
        if let Some(window) = &conditions.time_window {
            if !window.contains(context.timestamp) {
                return false;
            }
        }
        if !conditions.required_capabilities.is_empty() {
            let capabilities = context
                .metadata
                .get("capabilities")
                .and_then(Value::as_array);
            match capabilities {
                Some(capabilities) => {
                    let held: Vec<&str> =
                        capabilities.iter().filter_map(Value::as_str).collect();
                    if !conditions
                        .required_capabilities
                        .iter()
                        .all(|required| held.contains(&required.as_str()))
                    {
                        return false;
                    }
                }
                // Capabilities absent from the context: not matched.
                None => return false,
            }
        }
        if !conditions.resource_patterns.is_empty() {
            let resource = &context.resource.resource_type;
            if !conditions
                .resource_patterns
                .iter()
                .any(|pattern| pattern_matches(pattern, resource))
            {
                return false;
            }
        }
        if let Some(min_trust) = conditions.min_trust {
            if trust.overall < min_trust {
                return false;
            }
        }
        true
    }
}

fn pattern_matches(pattern: &str, subject: &str) -> bool {
    if pattern == "*" || pattern == subject {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return subject.starts_with(prefix);
    }
    false
}

/// Outcome of policy evaluation for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub allowed: bool,
    /// The winning policy (empty when nothing matched at all).
    pub matched: Vec<String>,
    pub required_conditions: Vec<String>,
    pub restrictions: Vec<String>,
    pub monitoring: bool,
    pub time_limit_ms: Option<u64>,
    pub reason: String,
}

/// Copy-on-write policy store. Readers grab an `Arc` snapshot and never
/// block behind writers.
pub struct PolicyStore {
    policies: RwLock<Arc<Vec<Policy>>>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyStore {
    /// A new store always contains the default-deny backstop.
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Arc::new(vec![Policy::default_deny()])),
        }
    }

    /// Add a policy after validation. Ids are unique.
    pub fn add(&self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        let mut guard = self.policies.write();
        if guard.iter().any(|existing| existing.id == policy.id) {
            return Err(PolicyError::Validation(format!(
                "duplicate policy id '{}'",
                policy.id
            )));
        }
        let mut next = guard.as_ref().clone();
        next.push(policy);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a policy by id. The default-deny backstop cannot go.
    pub fn remove(&self, id: &str) -> Result<Policy, PolicyError> {
        if id == "default-deny" {
            return Err(PolicyError::Validation(
                "a default-deny policy must always exist".into(),
            ));
        }
        let mut guard = self.policies.write();
        let index = guard
            .iter()
            .position(|policy| policy.id == id)
            .ok_or_else(|| PolicyError::Unknown(id.to_string()))?;
        let mut next = guard.as_ref().clone();
        let removed = next.remove(index);
        *guard = Arc::new(next);
        Ok(removed)
    }

    /// Cheap read snapshot.
    pub fn snapshot(&self) -> Arc<Vec<Policy>> {
        self.policies.read().clone()
    }

    pub fn list(&self) -> Vec<Policy> {
        self.snapshot().as_ref().clone()
    }

    /// Load a YAML catalog of policies.
    pub fn load_yaml_catalog(&self, yaml: &str) -> Result<usize, PolicyError> {
        let policies: Vec<Policy> =
            serde_yaml::from_str(yaml).map_err(|e| PolicyError::Catalog(e.to_string()))?;
        let count = policies.len();
        for policy in policies {
            self.add(policy)?;
        }
        Ok(count)
    }

    /// Dump the catalog as YAML.
    pub fn to_yaml_catalog(&self) -> Result<String, PolicyError> {
        serde_yaml::to_string(self.snapshot().as_ref())
            .map_err(|e| PolicyError::Catalog(e.to_string()))
    }
}

/// Evaluate a snapshot against one request.
///
/// All enabled policies are tested; the match with the highest priority
/// wins, ties broken by lexicographic id. No match at all is a hard deny.
pub fn evaluate(
    snapshot: &[Policy],
    context: &SecurityContext,
    trust: &TrustScore,
    risk: &RiskAssessment,
) -> PolicyVerdict {
    let mut winner: Option<&Policy> = None;
    for policy in snapshot {
        if !policy.enabled || !policy.matches(context, trust, risk) {
            continue;
        }
        winner = match winner {
            None => Some(policy),
            Some(current) => {
                let better = policy.priority > current.priority
                    || (policy.priority == current.priority && policy.id < current.id);
                if better {
                    Some(policy)
                } else {
                    Some(current)
                }
            }
        };
    }

    match winner {
        Some(policy) => PolicyVerdict {
            allowed: policy.action.allow,
            matched: vec![policy.id.clone()],
            required_conditions: policy.action.required_conditions.clone(),
            restrictions: policy.action.restrictions.clone(),
            monitoring: policy.action.monitoring,
            time_limit_ms: policy.action.time_limit_ms,
            reason: if policy.action.allow {
                format!("allowed by policy '{}'", policy.id)
            } else {
                format!("denied by policy '{}'", policy.id)
            },
        },
        None => PolicyVerdict {
            allowed: false,
            matched: Vec::new(),
            required_conditions: Vec::new(),
            restrictions: Vec::new(),
            monitoring: true,
            time_limit_ms: None,
            reason: "no policy matched; default deny".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PartialContext;
    use crate::risk::RiskAssessor;
    use crate::trust::{TrustCalculator, TrustConfig};

    fn fixtures(
        partial: PartialContext,
        trust_score: f64,
    ) -> (SecurityContext, TrustScore, RiskAssessment) {
        let context = SecurityContext::complete("agent-1", "dataset", partial);
        let calc = TrustCalculator::new(TrustConfig {
            initial_score: trust_score,
            ..Default::default()
        });
        let trust = calc.get_or_init("agent-1");
        let risk = RiskAssessor::default().assess(&context, &trust);
        (context, trust, risk)
    }

    #[test]
    fn test_store_always_has_default_deny() {
        let store = PolicyStore::new();
        assert!(store.list().iter().any(|p| p.id == "default-deny"));
        assert!(store.remove("default-deny").is_err());
    }

    #[test]
    fn test_default_deny_wins_when_alone() {
        let store = PolicyStore::new();
        let (context, trust, risk) = fixtures(PartialContext::default(), 0.5);
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert!(!verdict.allowed);
        assert_eq!(verdict.matched, vec!["default-deny".to_string()]);
    }

    #[test]
    fn test_higher_priority_policy_wins() {
        let store = PolicyStore::new();
        store.add(Policy::trusted_coordinators()).unwrap();

        let (context, trust, risk) = fixtures(
            PartialContext {
                agent_type: Some(crate::types::AgentType::Coordinator),
                identity_verified: Some(true),
                ..Default::default()
            },
            0.8,
        );
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert!(verdict.allowed);
        assert_eq!(verdict.matched, vec!["trusted-coordinators".to_string()]);
        assert_eq!(verdict.time_limit_ms, Some(28_800_000));
    }

    #[test]
    fn test_priority_tie_breaks_by_id() {
        let store = PolicyStore::new();
        let mut a = Policy::default_deny();
        a.id = "aaa-allow".into();
        a.name = "A".into();
        a.priority = 50;
        a.action.allow = true;
        let mut b = Policy::default_deny();
        b.id = "bbb-deny".into();
        b.name = "B".into();
        b.priority = 50;
        store.add(a).unwrap();
        store.add(b).unwrap();

        let (context, trust, risk) = fixtures(PartialContext::default(), 0.5);
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert_eq!(verdict.matched, vec!["aaa-allow".to_string()]);
        assert!(verdict.allowed);
    }

    #[test]
    fn test_disabled_policy_ignored() {
        let store = PolicyStore::new();
        let mut policy = Policy::trusted_coordinators();
        policy.enabled = false;
        store.add(policy).unwrap();

        let (context, trust, risk) = fixtures(
            PartialContext {
                agent_type: Some(crate::types::AgentType::Coordinator),
                identity_verified: Some(true),
                ..Default::default()
            },
            0.8,
        );
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert!(!verdict.allowed);
    }

    #[test]
    fn test_missing_field_means_no_match() {
        let store = PolicyStore::new();
        let mut policy = Policy::default_deny();
        policy.id = "segment-gated".into();
        policy.name = "Segment gated".into();
        policy.priority = 90;
        policy.action.allow = true;
        policy.conditions.network_segments = vec!["production".into()];
        store.add(policy).unwrap();

        // Context carries no segment: the policy must not match.
        let (context, trust, risk) = fixtures(PartialContext::default(), 0.5);
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert_eq!(verdict.matched, vec!["default-deny".to_string()]);
    }

    #[test]
    fn test_capability_conditions() {
        let store = PolicyStore::new();
        let mut policy = Policy::default_deny();
        policy.id = "cap-gated".into();
        policy.name = "Capability gated".into();
        policy.priority = 90;
        policy.action.allow = true;
        policy.conditions.required_capabilities = vec!["deploy".into()];
        store.add(policy).unwrap();

        let mut metadata = Value::object();
        metadata.set("capabilities", Value::from(vec!["deploy", "read"]));
        let (context, trust, risk) = fixtures(
            PartialContext {
                metadata: Some(metadata),
                ..Default::default()
            },
            0.5,
        );
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert_eq!(verdict.matched, vec!["cap-gated".to_string()]);

        // Without the capability list: no match.
        let (context, trust, risk) = fixtures(PartialContext::default(), 0.5);
        let verdict = evaluate(&store.snapshot(), &context, &trust, &risk);
        assert_eq!(verdict.matched, vec!["default-deny".to_string()]);
    }

    #[test]
    fn test_validation_rules() {
        let mut policy = Policy::default_deny();
        policy.id = String::new();
        assert!(policy.validate().is_err());

        let mut policy = Policy::default_deny();
        policy.id = "x".into();
        policy.action.allow = true;
        policy.action.restrictions = vec![HARD_BLOCK.to_string()];
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_yaml_catalog_roundtrip() {
        let store = PolicyStore::new();
        store.add(Policy::trusted_coordinators()).unwrap();
        let yaml = store.to_yaml_catalog().unwrap();

        let restored = PolicyStore::new();
        // The dump includes default-deny, which the new store already has;
        // load everything else.
        let policies: Vec<Policy> = serde_yaml::from_str(&yaml).unwrap();
        for policy in policies.into_iter().filter(|p| p.id != "default-deny") {
            restored.add(policy).unwrap();
        }
        assert_eq!(restored.list().len(), 2);
    }

    #[test]
    fn test_time_window_wrapping() {
        let window = TimeWindow {
            start_hour: 22,
            end_hour: 6,
        };
        let at = |hour: u32| {
            Utc::now()
                .date_naive()
                .and_hms_opt(hour, 0, 0)
                .map(|naive| naive.and_utc())
                .expect("valid hour")
        };
        assert!(window.contains(at(23)));
        assert!(window.contains(at(3)));
        assert!(!window.contains(at(12)));
    }
}
