//! Per-agent trust scoring.
//!
//! Each agent carries an overall score in [0,1] computed from seven
//! component scores, a bounded history, and a lifecycle state machine
//! (new → observed → trusted ↔ watchlist → quarantined → released).
//! Scores are updated by events and *copy-adjusted* per request by
//! context; the adjustment is never persisted.
//!
//! Storage is striped over an agent-id hash so updates for different
//! agents never contend, while updates for one agent serialize.

use crate::context::SecurityContext;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use trustmesh_codec::Value;

/// History entries kept per agent.
const HISTORY_CAP: usize = 100;
/// Entries dropped from the front when the cap is hit.
const HISTORY_DROP: usize = 50;
/// Lock stripes.
const STRIPE_COUNT: usize = 16;

/// What kind of event moved the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventType {
    Authentication,
    Behavior,
    Compliance,
    SecurityIncident,
}

/// How the event went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustOutcome {
    Positive,
    Negative,
    Neutral,
}

/// A trust-moving event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustEvent {
    pub event_type: TrustEventType,
    pub outcome: TrustOutcome,
    #[serde(default)]
    pub details: Value,
}

impl TrustEvent {
    pub fn new(event_type: TrustEventType, outcome: TrustOutcome) -> Self {
        Self {
            event_type,
            outcome,
            details: Value::Null,
        }
    }
}

/// The seven component scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustComponents {
    pub identity: f64,
    pub behavior: f64,
    pub location: f64,
    pub device: f64,
    pub network: f64,
    pub compliance: f64,
    pub reputation: f64,
}

impl TrustComponents {
    fn uniform(score: f64) -> Self {
        Self {
            identity: score,
            behavior: score,
            location: score,
            device: score,
            network: score,
            compliance: score,
            reputation: score,
        }
    }

    fn mean(&self) -> f64 {
        (self.identity
            + self.behavior
            + self.location
            + self.device
            + self.network
            + self.compliance
            + self.reputation)
            / 7.0
    }
}

/// One history record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub factors: Vec<String>,
}

/// Agent lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTrustState {
    New,
    Observed,
    Trusted,
    Watchlist,
    Quarantined,
    Released,
}

/// Per-agent trust aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub agent_id: String,
    /// Overall score in [0,1]. Seeded from the component mean, then moved
    /// by each event's delta so event magnitudes land at full strength.
    pub overall: f64,
    pub components: TrustComponents,
    pub positive_factors: Vec<String>,
    pub negative_factors: Vec<String>,
    pub unknown_factors: Vec<String>,
    pub state: AgentTrustState,
    history: VecDeque<TrustHistoryEntry>,
    pub updated_at: DateTime<Utc>,
}

impl TrustScore {
    fn initial(agent_id: String, score: f64) -> Self {
        let components = TrustComponents::uniform(score);
        Self {
            agent_id,
            overall: components.mean(),
            components,
            positive_factors: Vec::new(),
            negative_factors: vec!["new_agent".to_string()],
            unknown_factors: vec![
                "behavior_pattern".to_string(),
                "location_history".to_string(),
            ],
            state: AgentTrustState::New,
            history: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn history(&self) -> &VecDeque<TrustHistoryEntry> {
        &self.history
    }

    fn record(&mut self, reason: String, factors: Vec<String>) {
        self.history.push_back(TrustHistoryEntry {
            timestamp: Utc::now(),
            score: self.overall,
            reason,
            factors,
        });
        // Amortized truncation: drop a block, not one entry per update.
        if self.history.len() > HISTORY_CAP {
            self.history.drain(..HISTORY_DROP);
        }
    }
}

/// Trust configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    pub initial_score: f64,
    /// Locations granted the contextual bonus. Empty means none trusted.
    pub trusted_locations: BTreeSet<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            initial_score: 0.5,
            trusted_locations: BTreeSet::new(),
        }
    }
}

/// Computes and stores trust scores.
pub struct TrustCalculator {
    config: TrustConfig,
    stripes: Vec<Mutex<HashMap<String, TrustScore>>>,
}

impl Default for TrustCalculator {
    fn default() -> Self {
        Self::new(TrustConfig::default())
    }
}

impl TrustCalculator {
    pub fn new(config: TrustConfig) -> Self {
        let stripes = (0..STRIPE_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { config, stripes }
    }

    fn stripe(&self, agent_id: &str) -> &Mutex<HashMap<String, TrustScore>> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        agent_id.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPE_COUNT]
    }

    /// Current score, initializing an unknown agent at the configured
    /// starting point.
    pub fn get_or_init(&self, agent_id: &str) -> TrustScore {
        let mut stripe = self.stripe(agent_id).lock();
        stripe
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                TrustScore::initial(agent_id.to_string(), self.config.initial_score)
            })
            .clone()
    }

    /// Apply one trust event; returns the updated score.
    pub fn update(&self, agent_id: &str, event: &TrustEvent) -> TrustScore {
        let mut stripe = self.stripe(agent_id).lock();
        let score = stripe.entry(agent_id.to_string()).or_insert_with(|| {
            TrustScore::initial(agent_id.to_string(), self.config.initial_score)
        });

        let delta = delta_for(event.event_type, event.outcome);
        let component = affected_component(&mut score.components, event.event_type);
        *component = (*component + delta).clamp(0.0, 1.0);
        score.overall = (score.overall + delta).clamp(0.0, 1.0);
        score.updated_at = Utc::now();

        let reason = format!(
            "{}/{}",
            serde_variant_name(event.event_type),
            match event.outcome {
                TrustOutcome::Positive => "positive",
                TrustOutcome::Negative => "negative",
                TrustOutcome::Neutral => "neutral",
            }
        );
        let factor = serde_variant_name(event.event_type).to_string();
        match event.outcome {
            TrustOutcome::Positive => {
                if !score.positive_factors.contains(&factor) {
                    score.positive_factors.push(factor.clone());
                }
            }
            TrustOutcome::Negative => {
                if !score.negative_factors.contains(&factor) {
                    score.negative_factors.push(factor.clone());
                }
            }
            TrustOutcome::Neutral => {}
        }
        score.record(reason, vec![factor]);
        advance_state(score);

        tracing::debug!(
            agent_id = agent_id,
            overall = score.overall,
            state = ?score.state,
            "trust updated"
        );
        score.clone()
    }

    /// Force an agent into or out of quarantine state.
    pub fn set_state(&self, agent_id: &str, state: AgentTrustState) {
        let mut stripe = self.stripe(agent_id).lock();
        let score = stripe.entry(agent_id.to_string()).or_insert_with(|| {
            TrustScore::initial(agent_id.to_string(), self.config.initial_score)
        });
        score.state = state;
        score.updated_at = Utc::now();
    }

    /// Context-adjusted copy for one evaluation. Never persisted.
    ///
    /// +0.05 when the location is present and trusted (the trusted set is
    /// empty unless configured), +0.02 during business hours.
    pub fn adjusted_for_context(&self, agent_id: &str, context: &SecurityContext) -> TrustScore {
        let mut score = self.get_or_init(agent_id);

        if let Some(location) = &context.actor.location {
            if self.config.trusted_locations.contains(location) {
                score.overall = (score.overall + 0.05).clamp(0.0, 1.0);
            }
        }
        let hour = context.timestamp.hour();
        if (9..18).contains(&hour) {
            score.overall = (score.overall + 0.02).clamp(0.0, 1.0);
        }
        score
    }
}

/// Signed delta per event type and outcome.
fn delta_for(event_type: TrustEventType, outcome: TrustOutcome) -> f64 {
    let (positive, negative) = match event_type {
        TrustEventType::Authentication => (0.1, -0.2),
        TrustEventType::Behavior => (0.05, -0.1),
        TrustEventType::Compliance => (0.05, -0.15),
        TrustEventType::SecurityIncident => (0.1, -0.3),
    };
    match outcome {
        TrustOutcome::Positive => positive,
        TrustOutcome::Negative => negative,
        TrustOutcome::Neutral => 0.0,
    }
}

fn affected_component(
    components: &mut TrustComponents,
    event_type: TrustEventType,
) -> &mut f64 {
    match event_type {
        TrustEventType::Authentication => &mut components.identity,
        TrustEventType::Behavior => &mut components.behavior,
        TrustEventType::Compliance => &mut components.compliance,
        TrustEventType::SecurityIncident => &mut components.reputation,
    }
}

fn serde_variant_name(event_type: TrustEventType) -> &'static str {
    match event_type {
        TrustEventType::Authentication => "authentication",
        TrustEventType::Behavior => "behavior",
        TrustEventType::Compliance => "compliance",
        TrustEventType::SecurityIncident => "security_incident",
    }
}

/// Score-driven lifecycle transitions. Quarantine moves are explicit and
/// handled elsewhere.
fn advance_state(score: &mut TrustScore) {
    score.state = match score.state {
        AgentTrustState::New => AgentTrustState::Observed,
        AgentTrustState::Observed | AgentTrustState::Released => {
            if score.overall >= 0.7 {
                AgentTrustState::Trusted
            } else {
                AgentTrustState::Observed
            }
        }
        AgentTrustState::Trusted => {
            if score.overall < 0.4 {
                AgentTrustState::Watchlist
            } else {
                AgentTrustState::Trusted
            }
        }
        AgentTrustState::Watchlist => {
            if score.overall >= 0.7 {
                AgentTrustState::Trusted
            } else {
                AgentTrustState::Watchlist
            }
        }
        AgentTrustState::Quarantined => AgentTrustState::Quarantined,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PartialContext;

    fn calculator() -> TrustCalculator {
        TrustCalculator::default()
    }

    #[test]
    fn test_unknown_agent_starts_at_initial_score() {
        let calc = calculator();
        let score = calc.get_or_init("fresh-agent");
        assert!((score.overall - 0.5).abs() < 1e-9);
        assert!(score.negative_factors.contains(&"new_agent".to_string()));
        assert!(score
            .unknown_factors
            .contains(&"behavior_pattern".to_string()));
        assert_eq!(score.state, AgentTrustState::New);
    }

    #[test]
    fn test_delta_signs_and_magnitudes() {
        assert!((delta_for(TrustEventType::Authentication, TrustOutcome::Positive) - 0.1).abs() < 1e-9);
        assert!((delta_for(TrustEventType::Authentication, TrustOutcome::Negative) + 0.2).abs() < 1e-9);
        assert!((delta_for(TrustEventType::SecurityIncident, TrustOutcome::Negative) + 0.3).abs() < 1e-9);
        assert_eq!(delta_for(TrustEventType::Behavior, TrustOutcome::Neutral), 0.0);
    }

    #[test]
    fn test_update_moves_component_and_overall() {
        let calc = calculator();
        let before = calc.get_or_init("a1");
        let after = calc.update(
            "a1",
            &TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
        );
        assert!(after.components.identity > before.components.identity);
        assert!(after.overall > before.overall);
        assert_eq!(after.history().len(), 1);
    }

    #[test]
    fn test_score_clamps_at_bounds() {
        let calc = calculator();
        for _ in 0..30 {
            calc.update(
                "a1",
                &TrustEvent::new(TrustEventType::SecurityIncident, TrustOutcome::Negative),
            );
        }
        let score = calc.get_or_init("a1");
        assert!(score.overall >= 0.0);
        assert!(score.components.reputation >= 0.0);
    }

    #[test]
    fn test_history_truncates_amortized() {
        let calc = calculator();
        for _ in 0..(HISTORY_CAP + 1) {
            calc.update(
                "a1",
                &TrustEvent::new(TrustEventType::Behavior, TrustOutcome::Neutral),
            );
        }
        let score = calc.get_or_init("a1");
        assert_eq!(score.history().len(), HISTORY_CAP + 1 - HISTORY_DROP);
    }

    #[test]
    fn test_state_machine_progression() {
        let calc = calculator();
        calc.update(
            "a1",
            &TrustEvent::new(TrustEventType::Behavior, TrustOutcome::Neutral),
        );
        assert_eq!(calc.get_or_init("a1").state, AgentTrustState::Observed);

        for _ in 0..40 {
            calc.update(
                "a1",
                &TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
            );
        }
        assert_eq!(calc.get_or_init("a1").state, AgentTrustState::Trusted);

        for _ in 0..40 {
            calc.update(
                "a1",
                &TrustEvent::new(TrustEventType::SecurityIncident, TrustOutcome::Negative),
            );
        }
        assert_eq!(calc.get_or_init("a1").state, AgentTrustState::Watchlist);
    }

    #[test]
    fn test_context_adjustment_is_copy_only() {
        let mut config = TrustConfig::default();
        config.trusted_locations.insert("eu-west".to_string());
        let calc = TrustCalculator::new(config);

        let partial = PartialContext {
            location: Some("eu-west".into()),
            ..Default::default()
        };
        let ctx = SecurityContext::complete("a1", "r", partial);

        let adjusted = calc.adjusted_for_context("a1", &ctx);
        assert!(adjusted.overall > 0.5);
        // The stored score is untouched.
        assert!((calc.get_or_init("a1").overall - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_untrusted_location_gets_no_bonus() {
        let calc = calculator(); // empty trusted set: none trusted
        let partial = PartialContext {
            location: Some("somewhere".into()),
            ..Default::default()
        };
        let mut ctx = SecurityContext::complete("a1", "r", partial);
        // Pin the timestamp outside business hours so only the location
        // bonus could apply.
        ctx.timestamp = ctx
            .timestamp
            .date_naive()
            .and_hms_opt(3, 0, 0)
            .map(|naive| naive.and_utc())
            .unwrap_or(ctx.timestamp);

        let adjusted = calc.adjusted_for_context("a1", &ctx);
        assert!((adjusted.overall - 0.5).abs() < 1e-9);
    }
}
