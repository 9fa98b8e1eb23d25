//! Zero-trust decision service.
//!
//! `evaluate_access` orchestrates context completion, trust, risk, policy
//! evaluation, and the adaptive response, writing one audit entry per
//! logical step. Any internal error fails secure: deny, zero trust,
//! critical risk, and a security event on the ledger. Critical risk and
//! active quarantine each veto an allow unconditionally.

use crate::context::{PartialContext, SecurityContext};
use crate::metrics::MetricsRegistry;
use crate::policy::{self, PolicyError, PolicyStore};
use crate::quarantine::QuarantineList;
use crate::responder::{AdaptiveAction, AdaptiveResponder};
use crate::risk::{RiskAssessor, RiskLevel};
use crate::segment::{SegmentError, SegmentStore};
use crate::trust::{TrustCalculator, TrustEvent, TrustEventType, TrustOutcome, TrustScore};
use crate::types::AccessDecision;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use trustmesh_codec::{EventBroker, EventKind, Value};
use trustmesh_ledger::{
    AuditEvent, AuditEventType, AuditLogWriter, LedgerError, SecurityMonitor,
};

/// Gate error taxonomy.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Segment(#[from] SegmentError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("evaluation error: {0}")]
    Evaluation(String),
    #[error("decision timed out")]
    Timeout,
    #[error("operation canceled")]
    Canceled,
}

/// Engine timeouts.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub decision_timeout_ms: u64,
    /// Per-adaptive-action hook timeout; a slow hook never blocks the
    /// decision.
    pub action_timeout_ms: u64,
    /// Retry cap for pending adaptive actions.
    pub max_action_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decision_timeout_ms: 30_000,
            action_timeout_ms: 5_000,
            max_action_attempts: 5,
        }
    }
}

/// An adaptive action that didn't complete; retried by the
/// reconciliation sweep.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub agent_id: String,
    pub request_id: String,
    pub action: AdaptiveAction,
    pub duration_ms: u64,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

/// The zero-trust decision engine.
pub struct ZeroTrustEngine {
    trust: Arc<TrustCalculator>,
    risk: RiskAssessor,
    policies: Arc<PolicyStore>,
    segments: Arc<SegmentStore>,
    responder: AdaptiveResponder,
    quarantine: Arc<QuarantineList>,
    audit: Arc<AuditLogWriter>,
    monitor: Option<Arc<SecurityMonitor>>,
    events: EventBroker,
    metrics: Arc<MetricsRegistry>,
    pending: Mutex<Vec<PendingAction>>,
    config: EngineConfig,
}

impl ZeroTrustEngine {
    pub fn new(
        trust: Arc<TrustCalculator>,
        policies: Arc<PolicyStore>,
        segments: Arc<SegmentStore>,
        quarantine: Arc<QuarantineList>,
        audit: Arc<AuditLogWriter>,
        events: EventBroker,
    ) -> Self {
        Self {
            trust,
            risk: RiskAssessor::default(),
            policies,
            segments,
            responder: AdaptiveResponder,
            quarantine,
            audit,
            monitor: None,
            events,
            metrics: Arc::new(MetricsRegistry::new()),
            pending: Mutex::new(Vec::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SecurityMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn segments(&self) -> &Arc<SegmentStore> {
        &self.segments
    }

    pub fn trust(&self) -> &Arc<TrustCalculator> {
        &self.trust
    }

    pub fn quarantine_list(&self) -> &Arc<QuarantineList> {
        &self.quarantine
    }

    /// The decision entry point.
    pub async fn evaluate_access(
        &self,
        agent_id: &str,
        resource: &str,
        action: &str,
        partial: PartialContext,
    ) -> AccessDecision {
        // Step 1: complete the context with safe defaults and a fresh id.
        let context = SecurityContext::complete(agent_id, resource, partial);
        let started = Instant::now();

        let evaluation = tokio::time::timeout(
            Duration::from_millis(self.config.decision_timeout_ms),
            self.try_evaluate(&context, action),
        )
        .await;

        match evaluation {
            Ok(Ok(decision)) => {
                self.metrics.record_decision(
                    &context.request_id,
                    decision.allowed,
                    started.elapsed().as_micros() as u64,
                );
                decision
            }
            Ok(Err(error)) => {
                tracing::error!(
                    request_id = %context.request_id,
                    %error,
                    "evaluation failed, failing secure"
                );
                self.fail_secure(&context, action, &error.to_string(), "evaluation_error")
                    .await
            }
            Err(_) => {
                tracing::error!(
                    request_id = %context.request_id,
                    "evaluation timed out, failing secure"
                );
                // A cancelled evaluation leaves a canceled marker entry.
                let _ = self
                    .audit
                    .log(
                        AuditEvent::new(
                            AuditEventType::SecurityEvent,
                            &context.actor.agent_id,
                            &context.resource.resource_type,
                            action,
                            "canceled",
                        )
                        .with_request_id(context.request_id.clone()),
                    )
                    .await;
                self.fail_secure(&context, action, "decision timeout", "timeout")
                    .await
            }
        }
    }

    async fn try_evaluate(
        &self,
        context: &SecurityContext,
        action: &str,
    ) -> Result<AccessDecision, GateError> {
        let agent_id = context.actor.agent_id.clone();
        let resource = context.resource.resource_type.clone();

        self.log_step(
            context,
            action,
            "evaluation_requested",
            Value::Null,
        )
        .await?;

        // Step 2: trust snapshot, context-adjusted copy for this request.
        let trust = self.trust.adjusted_for_context(&agent_id, context);
        let mut trust_details = Value::object();
        trust_details.set("overall", trust.overall);
        trust_details.set("state", format!("{:?}", trust.state).to_lowercase());
        self.log_step(context, action, "trust_snapshot", trust_details)
            .await?;

        // Step 3: risk.
        let risk = self.risk.assess(context, &trust);
        let mut risk_details = Value::object();
        risk_details.set("level", risk.level.as_str());
        risk_details.set("score", risk.score);
        risk_details.set("factors", risk.factors.len() as i64);
        self.log_step(context, action, "risk_assessed", risk_details)
            .await?;

        // Step 4: policies.
        let snapshot = self.policies.snapshot();
        let verdict = policy::evaluate(&snapshot, context, &trust, &risk);
        let mut policy_details = Value::object();
        policy_details.set(
            "matched",
            Value::Array(
                verdict
                    .matched
                    .iter()
                    .map(|id| Value::from(id.as_str()))
                    .collect(),
            ),
        );
        policy_details.set("allowed", verdict.allowed);
        self.log_step(context, action, "policy_matched", policy_details)
            .await?;

        // Step 5: adaptive response plan.
        let plan = self.responder.plan_for(risk.level);

        // Step 6: compose. Critical risk and quarantine each veto.
        let quarantined = self.quarantine.is_quarantined(&agent_id);
        let allowed = verdict.allowed && risk.level != RiskLevel::Critical && !quarantined;
        let (reason, reason_code) = if quarantined {
            ("agent is quarantined".to_string(), "quarantine_veto")
        } else if verdict.allowed && risk.level == RiskLevel::Critical {
            (
                "critical risk vetoes policy allow".to_string(),
                "critical_risk_veto",
            )
        } else if allowed {
            (verdict.reason.clone(), "policy_allow")
        } else {
            (verdict.reason.clone(), "policy_deny")
        };

        let decision = AccessDecision {
            allowed,
            reason,
            reason_code: reason_code.to_string(),
            conditions: verdict.required_conditions.clone(),
            restrictions: verdict.restrictions.clone(),
            monitoring: verdict.monitoring || !plan.actions.is_empty(),
            time_limit_ms: verdict.time_limit_ms,
            trust_score: trust.overall,
            risk_level: risk.level,
            policy_matches: verdict.matched.clone(),
            adaptive_actions: plan.actions.clone(),
            request_id: context.request_id.clone(),
            timestamp: Utc::now(),
        };

        // Step 7: adaptive actions, fire-and-forget but each one logged.
        for adaptive_action in &plan.actions {
            self.run_action(&agent_id, &context.request_id, *adaptive_action, plan.duration_ms)
                .await;
        }

        // Step 8: the decision entry itself.
        let mut decision_details = Value::object();
        decision_details.set("reason", decision.reason.clone());
        decision_details.set("reason_code", decision.reason_code.clone());
        decision_details.set("trust_score", decision.trust_score);
        let entry = self
            .audit
            .log_entry(
                AuditEvent::new(
                    AuditEventType::Authorization,
                    &agent_id,
                    &resource,
                    action,
                    if decision.allowed { "allowed" } else { "denied" },
                )
                .with_details(decision_details)
                .with_risk_level(risk.level.as_str())
                .with_request_id(context.request_id.clone()),
            )
            .await?;
        self.feed_monitor(&entry).await;

        // Step 9: emit the event and return.
        let mut payload = Value::object();
        payload.set("request_id", decision.request_id.clone());
        payload.set("agent_id", agent_id.clone());
        payload.set("allowed", decision.allowed);
        payload.set("risk_level", decision.risk_level.as_str());
        self.events.publish(EventKind::AccessDecision, payload);

        tracing::info!(
            request_id = %decision.request_id,
            agent_id = %agent_id,
            action = action,
            allowed = decision.allowed,
            risk_level = decision.risk_level.as_str(),
            trust = decision.trust_score,
            "access decision"
        );
        Ok(decision)
    }

    /// Deny, record a security event, and return the fail-secure shape.
    async fn fail_secure(
        &self,
        context: &SecurityContext,
        action: &str,
        error: &str,
        reason_code: &str,
    ) -> AccessDecision {
        self.metrics.record_failure(&context.request_id);

        let mut details = Value::object();
        details.set("error", error);
        let logged = self
            .audit
            .log(
                AuditEvent::new(
                    AuditEventType::SecurityEvent,
                    &context.actor.agent_id,
                    &context.resource.resource_type,
                    action,
                    "failure",
                )
                .with_details(details)
                .with_request_id(context.request_id.clone()),
            )
            .await;
        if let Err(audit_error) = logged {
            tracing::error!(%audit_error, "failed to audit a fail-secure decision");
        }

        let decision = AccessDecision::fail_secure(context.request_id.clone(), reason_code);
        let mut payload = Value::object();
        payload.set("request_id", decision.request_id.clone());
        payload.set("agent_id", context.actor.agent_id.clone());
        payload.set("allowed", false);
        self.events.publish(EventKind::AccessDecision, payload);
        decision
    }

    /// Execute one adaptive action under its own timeout. Failures park
    /// the action for the reconciliation sweep; at-least-once overall.
    async fn run_action(
        &self,
        agent_id: &str,
        request_id: &str,
        action: AdaptiveAction,
        duration_ms: u64,
    ) {
        let outcome = tokio::time::timeout(
            Duration::from_millis(self.config.action_timeout_ms),
            self.execute_action(agent_id, request_id, action, duration_ms),
        )
        .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(agent_id, action = action.as_str(), %error, "adaptive action failed, parking for retry");
                self.park_action(agent_id, request_id, action, duration_ms).await;
            }
            Err(_) => {
                tracing::warn!(agent_id, action = action.as_str(), "adaptive action timed out, parking for retry");
                self.park_action(agent_id, request_id, action, duration_ms).await;
            }
        }
    }

    async fn park_action(
        &self,
        agent_id: &str,
        request_id: &str,
        action: AdaptiveAction,
        duration_ms: u64,
    ) {
        self.pending.lock().await.push(PendingAction {
            agent_id: agent_id.to_string(),
            request_id: request_id.to_string(),
            action,
            duration_ms,
            attempts: 1,
            created_at: Utc::now(),
        });
        // Pending markers are audit-visible.
        let _ = self
            .audit
            .log(
                AuditEvent::new(
                    AuditEventType::SystemEvent,
                    agent_id,
                    "adaptive-response",
                    action.as_str(),
                    "pending",
                )
                .with_request_id(request_id.to_string()),
            )
            .await;
    }

    async fn execute_action(
        &self,
        agent_id: &str,
        request_id: &str,
        action: AdaptiveAction,
        duration_ms: u64,
    ) -> Result<(), GateError> {
        match action {
            AdaptiveAction::Quarantine => {
                self.quarantine_agent(
                    agent_id,
                    "adaptive response to critical risk",
                    Some(duration_ms),
                )
                .await?;
            }
            AdaptiveAction::AlertAdmin => {
                let mut payload = Value::object();
                payload.set("agent_id", agent_id);
                payload.set("request_id", request_id);
                self.events.publish(EventKind::NotifyAdmin, payload);
            }
            AdaptiveAction::EnhanceMonitoring
            | AdaptiveAction::RequireReauthentication
            | AdaptiveAction::RestrictCapabilities => {
                // Marker side effects live in the audit trail; enforcement
                // happens on the next evaluation.
            }
        }

        let entry = self
            .audit
            .log_entry(
                AuditEvent::new(
                    AuditEventType::SystemEvent,
                    agent_id,
                    "adaptive-response",
                    action.as_str(),
                    "executed",
                )
                .with_request_id(request_id.to_string()),
            )
            .await?;
        self.feed_monitor(&entry).await;
        Ok(())
    }

    /// Retry parked adaptive actions. Idempotent; safe to run on a timer.
    pub async fn reconcile_pending_actions(&self) -> usize {
        let parked: Vec<PendingAction> = {
            let mut pending = self.pending.lock().await;
            pending.drain(..).collect()
        };
        let mut retried = 0usize;

        for mut item in parked {
            let outcome = self
                .execute_action(&item.agent_id, &item.request_id, item.action, item.duration_ms)
                .await;
            match outcome {
                Ok(()) => retried += 1,
                Err(error) => {
                    item.attempts += 1;
                    if item.attempts >= self.config.max_action_attempts {
                        tracing::error!(
                            agent_id = %item.agent_id,
                            action = item.action.as_str(),
                            attempts = item.attempts,
                            %error,
                            "adaptive action abandoned after retries"
                        );
                    } else {
                        self.pending.lock().await.push(item);
                    }
                }
            }
        }
        retried
    }

    pub async fn pending_action_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    // =========================================================================
    // Trust and quarantine surface
    // =========================================================================

    /// Apply a trust event and audit it.
    pub async fn update_trust(
        &self,
        agent_id: &str,
        event: TrustEvent,
    ) -> Result<TrustScore, GateError> {
        let score = self.trust.update(agent_id, &event);

        let entry = self
            .audit
            .log_entry(
                AuditEvent::new(
                    trust_audit_type(event.event_type),
                    agent_id,
                    "trust-score",
                    "update_trust",
                    match event.outcome {
                        TrustOutcome::Positive => "success",
                        TrustOutcome::Negative => "failure",
                        TrustOutcome::Neutral => "neutral",
                    },
                )
                .with_details(event.details.clone()),
            )
            .await?;
        self.feed_monitor(&entry).await;

        let mut payload = Value::object();
        payload.set("agent_id", agent_id);
        payload.set("overall", score.overall);
        self.events.publish(EventKind::TrustScoreUpdated, payload);
        Ok(score)
    }

    /// Quarantine an agent: marker, negative trust update, audit entry.
    pub async fn quarantine_agent(
        &self,
        agent_id: &str,
        reason: &str,
        ttl_ms: Option<u64>,
    ) -> Result<(), GateError> {
        self.quarantine.quarantine(agent_id, reason, ttl_ms);
        self.trust.update(
            agent_id,
            &TrustEvent::new(TrustEventType::SecurityIncident, TrustOutcome::Negative),
        );
        self.trust
            .set_state(agent_id, crate::trust::AgentTrustState::Quarantined);

        let mut details = Value::object();
        details.set("reason", reason);
        if let Some(ttl) = ttl_ms {
            details.set("ttl_ms", ttl);
        }
        let entry = self
            .audit
            .log_entry(
                AuditEvent::new(
                    AuditEventType::SecurityEvent,
                    agent_id,
                    "quarantine",
                    "quarantine",
                    "success",
                )
                .with_details(details),
            )
            .await?;
        self.feed_monitor(&entry).await;

        let mut payload = Value::object();
        payload.set("agent_id", agent_id);
        payload.set("reason", reason);
        self.events.publish(EventKind::AgentQuarantined, payload);
        Ok(())
    }

    /// Release an agent with a small positive compliance update.
    pub async fn release_agent(&self, agent_id: &str) -> Result<(), GateError> {
        self.quarantine.release(agent_id);
        self.trust
            .set_state(agent_id, crate::trust::AgentTrustState::Released);
        self.trust.update(
            agent_id,
            &TrustEvent::new(TrustEventType::Compliance, TrustOutcome::Positive),
        );

        let entry = self
            .audit
            .log_entry(AuditEvent::new(
                AuditEventType::SecurityEvent,
                agent_id,
                "quarantine",
                "release",
                "success",
            ))
            .await?;
        self.feed_monitor(&entry).await;

        let mut payload = Value::object();
        payload.set("agent_id", agent_id);
        self.events.publish(EventKind::AgentReleased, payload);
        Ok(())
    }

    pub fn is_quarantined(&self, agent_id: &str) -> bool {
        self.quarantine.is_quarantined(agent_id)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn log_step(
        &self,
        context: &SecurityContext,
        action: &str,
        step: &str,
        details: Value,
    ) -> Result<(), GateError> {
        let entry = self
            .audit
            .log_entry(
                AuditEvent::new(
                    AuditEventType::SystemEvent,
                    &context.actor.agent_id,
                    &context.resource.resource_type,
                    format!("{action}:{step}"),
                    "success",
                )
                .with_details(details)
                .with_request_id(context.request_id.clone()),
            )
            .await?;
        self.feed_monitor(&entry).await;
        Ok(())
    }

    async fn feed_monitor(&self, entry: &trustmesh_ledger::AuditLogEntry) {
        if let Some(monitor) = &self.monitor {
            monitor.observe(entry).await;
        }
    }
}

fn trust_audit_type(event_type: TrustEventType) -> AuditEventType {
    match event_type {
        TrustEventType::Authentication => AuditEventType::Authentication,
        TrustEventType::Compliance => AuditEventType::Compliance,
        TrustEventType::Behavior => AuditEventType::SystemEvent,
        TrustEventType::SecurityIncident => AuditEventType::SecurityEvent,
    }
}
