//! Conflict resolver: classification, rule selection, strategy dispatch.
//!
//! Rules bind key patterns to strategies; the highest-priority enabled rule
//! whose conditions hold wins, ties broken by lexicographic rule id, and an
//! implicit last-writer-wins default backs everything. A strategy that
//! reports itself inapplicable degrades to last-writer-wins at confidence
//! 0.5 with the manual-review flag raised.

use crate::clock::ClockOrdering;
use crate::strategies;
use crate::transform::{self, Transform};
use crate::value::ConflictValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use trustmesh_codec::Value;
use uuid::Uuid;

/// Rule registration errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid resolution rule: {0}")]
    InvalidRule(String),
}

/// How the two revisions disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictClass {
    /// Vector clocks are concurrent.
    ConcurrentWrite,
    /// Object shapes differ significantly.
    Structural,
    /// Critical identifier fields differ.
    Semantic,
    /// Ordered but divergent (stale read then write).
    ReadWrite,
}

/// Available resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Lww,
    Mvr,
    Priority,
    Union,
    Intersection,
    Semantic,
    Operational,
}

/// Per-field override for the semantic strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticHint {
    PreferLocal,
    PreferRemote,
    Sum,
    Max,
    Min,
}

/// Conditions a rule may impose on the conflicting pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    /// Both sides carry this content type.
    ContentTypeIs(String),
    /// At least one side carries a priority at or above this.
    MinPriority(i64),
    /// A common ancestor is available.
    RequiresAncestor,
}

impl RuleCondition {
    fn holds(
        &self,
        local: &ConflictValue,
        remote: &ConflictValue,
        has_ancestor: bool,
    ) -> bool {
        match self {
            RuleCondition::ContentTypeIs(expected) => {
                let matches = |value: &ConflictValue| {
                    value
                        .metadata
                        .as_ref()
                        .and_then(|m| m.content_type.as_deref())
                        == Some(expected.as_str())
                };
                matches(local) && matches(remote)
            }
            RuleCondition::MinPriority(min) => {
                local.priority() >= *min || remote.priority() >= *min
            }
            RuleCondition::RequiresAncestor => has_ancestor,
        }
    }
}

/// A key-pattern-scoped strategy binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRule {
    pub id: String,
    /// Key pattern: exact, `prefix*`, `*suffix`, or `*`.
    pub key_pattern: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Field-path hints consumed by the semantic strategy.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub semantic_hints: BTreeMap<String, SemanticHint>,
}

fn default_enabled() -> bool {
    true
}

impl ResolutionRule {
    pub fn new(id: impl Into<String>, key_pattern: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            id: id.into(),
            key_pattern: key_pattern.into(),
            strategy,
            conditions: Vec::new(),
            priority: 0,
            enabled: true,
            semantic_hints: BTreeMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_hint(mut self, path: impl Into<String>, hint: SemanticHint) -> Self {
        self.semantic_hints.insert(path.into(), hint);
        self
    }

    fn matches(
        &self,
        key: &str,
        local: &ConflictValue,
        remote: &ConflictValue,
        has_ancestor: bool,
    ) -> bool {
        self.enabled
            && pattern_matches(&self.key_pattern, key)
            && self
                .conditions
                .iter()
                .all(|condition| condition.holds(local, remote, has_ancestor))
    }
}

fn pattern_matches(pattern: &str, key: &str) -> bool {
    if pattern == "*" || pattern == key {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return key.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return key.ends_with(suffix);
    }
    false
}

/// The outcome of running one strategy.
#[derive(Debug, Clone)]
pub enum StrategyResult {
    Resolved(Resolution),
    /// Strategy is inapplicable; the resolver substitutes last-writer-wins.
    Fallback(String),
}

/// A completed conflict resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    pub id: Uuid,
    pub strategy: Strategy,
    pub value: Value,
    /// Confidence in [0,1].
    pub confidence: f64,
    pub reasoning: String,
    /// Edits applied, when the operational strategy ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<Transform>,
    /// Losing or candidate values kept for review.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Value>,
    #[serde(default)]
    pub requires_manual_review: bool,
}

impl Resolution {
    pub fn new(strategy: Strategy, value: Value, confidence: f64, reasoning: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy,
            value,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning,
            transforms: Vec::new(),
            alternatives: Vec::new(),
            requires_manual_review: false,
        }
    }

    pub fn with_alternative(mut self, value: Value) -> Self {
        self.alternatives.push(value);
        self
    }
}

/// Rule-driven conflict resolver.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    rules: Vec<ResolutionRule>,
}

impl ConflictResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule.
    pub fn add_rule(&mut self, rule: ResolutionRule) -> Result<(), ResolveError> {
        if rule.id.trim().is_empty() {
            return Err(ResolveError::InvalidRule("rule id must be set".into()));
        }
        if rule.key_pattern.trim().is_empty() {
            return Err(ResolveError::InvalidRule(
                "rule key pattern must be set".into(),
            ));
        }
        if self.rules.iter().any(|existing| existing.id == rule.id) {
            return Err(ResolveError::InvalidRule(format!(
                "duplicate rule id '{}'",
                rule.id
            )));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[ResolutionRule] {
        &self.rules
    }

    /// Classify how two revisions disagree.
    pub fn classify(&self, local: &ConflictValue, remote: &ConflictValue) -> ConflictClass {
        if local.clock.compare(&remote.clock) == ClockOrdering::Concurrent {
            return ConflictClass::ConcurrentWrite;
        }
        if shapes_differ(&local.data, &remote.data) {
            return ConflictClass::Structural;
        }
        if identifiers_differ(&local.data, &remote.data) {
            return ConflictClass::Semantic;
        }
        ConflictClass::ReadWrite
    }

    /// Resolve a conflicting pair for `key` using the registered rules.
    pub fn resolve(
        &self,
        key: &str,
        local: &ConflictValue,
        remote: &ConflictValue,
        ancestor: Option<&ConflictValue>,
    ) -> Resolution {
        let rule = self.select_rule(key, local, remote, ancestor.is_some());
        let (strategy, hints) = match rule {
            Some(rule) => (rule.strategy, rule.semantic_hints.clone()),
            None => (Strategy::Lww, BTreeMap::new()),
        };
        self.run(strategy, &hints, key, local, remote, ancestor)
    }

    /// Resolve with an explicit strategy, bypassing rule selection. Used for
    /// keys that pin their own strategy.
    pub fn resolve_with_strategy(
        &self,
        strategy: Strategy,
        key: &str,
        local: &ConflictValue,
        remote: &ConflictValue,
        ancestor: Option<&ConflictValue>,
    ) -> Resolution {
        self.run(strategy, &BTreeMap::new(), key, local, remote, ancestor)
    }

    fn run(
        &self,
        strategy: Strategy,
        hints: &BTreeMap<String, SemanticHint>,
        key: &str,
        local: &ConflictValue,
        remote: &ConflictValue,
        ancestor: Option<&ConflictValue>,
    ) -> Resolution {
        let class = self.classify(local, remote);

        // Identical payloads resolve to themselves with full confidence,
        // whatever the selected strategy.
        if local.data == remote.data {
            let mut resolution = Resolution::new(
                strategy,
                local.data.clone(),
                1.0,
                "replicas carry identical data".to_string(),
            );
            resolution.requires_manual_review = false;
            return resolution;
        }

        let result = match strategy {
            Strategy::Lww => StrategyResult::Resolved(strategies::lww(local, remote)),
            Strategy::Mvr => StrategyResult::Resolved(strategies::mvr(local, remote)),
            Strategy::Priority => StrategyResult::Resolved(strategies::priority(local, remote)),
            Strategy::Union => StrategyResult::Resolved(strategies::union(local, remote)),
            Strategy::Intersection => {
                StrategyResult::Resolved(strategies::intersection(local, remote))
            }
            Strategy::Semantic => strategies::semantic(local, remote, hints),
            Strategy::Operational => transform::operational(local, remote, ancestor),
        };

        let resolution = match result {
            StrategyResult::Resolved(resolution) => resolution,
            StrategyResult::Fallback(reason) => {
                let mut fallback = strategies::lww(local, remote);
                fallback.confidence = 0.5;
                fallback.requires_manual_review = true;
                fallback.reasoning = format!("{reason}; fell back to last-writer-wins");
                fallback
            }
        };

        tracing::debug!(
            key = key,
            class = ?class,
            strategy = ?resolution.strategy,
            confidence = resolution.confidence,
            manual_review = resolution.requires_manual_review,
            "conflict resolved"
        );
        resolution
    }

    fn select_rule(
        &self,
        key: &str,
        local: &ConflictValue,
        remote: &ConflictValue,
        has_ancestor: bool,
    ) -> Option<&ResolutionRule> {
        let mut candidates: Vec<&ResolutionRule> = self
            .rules
            .iter()
            .filter(|rule| rule.matches(key, local, remote, has_ancestor))
            .collect();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        candidates.into_iter().next()
    }
}

/// Shapes differ significantly: different variant kinds, or objects whose
/// key sets overlap on less than half of the union.
fn shapes_differ(local: &Value, remote: &Value) -> bool {
    match (local, remote) {
        (Value::Object(local_map), Value::Object(remote_map)) => {
            let union: std::collections::BTreeSet<&String> =
                local_map.keys().chain(remote_map.keys()).collect();
            if union.is_empty() {
                return false;
            }
            let shared = local_map
                .keys()
                .filter(|key| remote_map.contains_key(*key))
                .count();
            shared * 2 < union.len()
        }
        (Value::Array(_), Value::Array(_)) => false,
        (l, r) => std::mem::discriminant(l) != std::mem::discriminant(r),
    }
}

/// Critical identifier fields carried by both sides but with different values.
fn identifiers_differ(local: &Value, remote: &Value) -> bool {
    const IDENTIFIER_FIELDS: [&str; 3] = ["id", "key", "identifier"];
    if let (Value::Object(local_map), Value::Object(remote_map)) = (local, remote) {
        for field in IDENTIFIER_FIELDS {
            if let (Some(l), Some(r)) = (local_map.get(field), remote_map.get(field)) {
                if l != r {
                    return true;
                }
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VectorClock;
    use chrono::{DateTime, Utc};

    fn concurrent(local_data: Value, remote_data: Value) -> (ConflictValue, ConflictValue) {
        let mut local_clock = VectorClock::new("a1");
        local_clock.increment();
        let mut remote_clock = VectorClock::new("a2");
        remote_clock.increment();
        let local = ConflictValue::new(local_data, local_clock, "a1")
            .with_timestamp(DateTime::<Utc>::from_timestamp_millis(1_000).unwrap());
        let remote = ConflictValue::new(remote_data, remote_clock, "a2")
            .with_timestamp(DateTime::<Utc>::from_timestamp_millis(2_000).unwrap());
        (local, remote)
    }

    #[test]
    fn test_classify_concurrent_write() {
        let (local, remote) = concurrent(Value::from("a"), Value::from("b"));
        let resolver = ConflictResolver::new();
        assert_eq!(
            resolver.classify(&local, &remote),
            ConflictClass::ConcurrentWrite
        );
    }

    #[test]
    fn test_classify_structural_and_semantic() {
        let resolver = ConflictResolver::new();

        let mut clock = VectorClock::new("a1");
        clock.increment();
        let mut newer = clock.clone();
        newer.increment();

        let local = ConflictValue::new(Value::from("text"), newer.clone(), "a1");
        let remote = ConflictValue::new(Value::Int(1), clock.clone(), "a1");
        assert_eq!(resolver.classify(&local, &remote), ConflictClass::Structural);

        let mut local_obj = Value::object();
        local_obj.set("id", "order-1");
        local_obj.set("total", 10i64);
        let mut remote_obj = Value::object();
        remote_obj.set("id", "order-2");
        remote_obj.set("total", 10i64);
        let local = ConflictValue::new(local_obj, newer, "a1");
        let remote = ConflictValue::new(remote_obj, clock, "a1");
        assert_eq!(resolver.classify(&local, &remote), ConflictClass::Semantic);
    }

    #[test]
    fn test_default_rule_is_lww() {
        let resolver = ConflictResolver::new();
        let (local, remote) = concurrent(Value::from("a"), Value::from("b"));
        let resolution = resolver.resolve("any-key", &local, &remote, None);
        assert_eq!(resolution.strategy, Strategy::Lww);
        assert_eq!(resolution.value.as_str(), Some("b"));
        assert!((resolution.confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rule_pattern_and_priority_selection() {
        let mut resolver = ConflictResolver::new();
        resolver
            .add_rule(ResolutionRule::new("wide", "*", Strategy::Mvr).with_priority(1))
            .unwrap();
        resolver
            .add_rule(ResolutionRule::new("sets", "set:*", Strategy::Union).with_priority(10))
            .unwrap();

        let (local, remote) = concurrent(Value::from(vec!["a", "b"]), Value::from(vec!["b", "c"]));
        let resolution = resolver.resolve("set:tags", &local, &remote, None);
        assert_eq!(resolution.strategy, Strategy::Union);
        assert_eq!(resolution.value, Value::from(vec!["a", "b", "c"]));
        assert!(!resolution.requires_manual_review);
    }

    #[test]
    fn test_rule_tie_breaks_by_id() {
        let mut resolver = ConflictResolver::new();
        resolver
            .add_rule(ResolutionRule::new("b-rule", "*", Strategy::Mvr).with_priority(5))
            .unwrap();
        resolver
            .add_rule(ResolutionRule::new("a-rule", "*", Strategy::Priority).with_priority(5))
            .unwrap();

        let (local, remote) = concurrent(Value::from("x"), Value::from("y"));
        let resolution = resolver.resolve("k", &local, &remote, None);
        // Lexicographically smaller id wins the tie.
        assert_eq!(resolution.strategy, Strategy::Priority);
    }

    #[test]
    fn test_identical_data_full_confidence() {
        let mut resolver = ConflictResolver::new();
        resolver
            .add_rule(ResolutionRule::new("sets", "*", Strategy::Union))
            .unwrap();

        let (local, remote) = concurrent(Value::from(vec!["a"]), Value::from(vec!["a"]));
        let resolution = resolver.resolve("k", &local, &remote, None);
        assert!((resolution.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(resolution.value, Value::from(vec!["a"]));
    }

    #[test]
    fn test_strategy_fallback_degrades_to_lww() {
        let mut resolver = ConflictResolver::new();
        resolver
            .add_rule(ResolutionRule::new("ot", "*", Strategy::Operational))
            .unwrap();

        // No ancestor: operational is inapplicable.
        let (local, remote) = concurrent(Value::from("a"), Value::from("b"));
        let resolution = resolver.resolve("doc", &local, &remote, None);
        assert_eq!(resolution.strategy, Strategy::Lww);
        assert!((resolution.confidence - 0.5).abs() < f64::EPSILON);
        assert!(resolution.requires_manual_review);
    }

    #[test]
    fn test_resolution_is_pure() {
        let resolver = ConflictResolver::new();
        let (local, remote) = concurrent(Value::from("a"), Value::from("b"));
        let first = resolver.resolve("k", &local, &remote, None);
        let second = resolver.resolve("k", &local, &remote, None);
        assert_eq!(first.value, second.value);
        assert_eq!(first.strategy, second.strategy);
        assert!((first.confidence - second.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn test_add_rule_validation() {
        let mut resolver = ConflictResolver::new();
        assert!(resolver
            .add_rule(ResolutionRule::new("", "*", Strategy::Lww))
            .is_err());
        assert!(resolver
            .add_rule(ResolutionRule::new("ok", "", Strategy::Lww))
            .is_err());
        resolver
            .add_rule(ResolutionRule::new("ok", "*", Strategy::Lww))
            .unwrap();
        assert!(resolver
            .add_rule(ResolutionRule::new("ok", "*", Strategy::Mvr))
            .is_err());
    }
}
