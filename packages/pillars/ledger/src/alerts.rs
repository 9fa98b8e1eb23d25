//! Security alerts and automated response.
//!
//! Alerts move through open → investigating → {mitigated → resolved |
//! false_positive}. High and critical alerts trigger an automated response
//! plan; everything else is log-only.

use crate::entry::AuditLogEntry;
use crate::LedgerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use trustmesh_codec::{EventBroker, EventKind, Value};
use uuid::Uuid;

/// Alert severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Alert lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Investigating,
    Mitigated,
    Resolved,
    FalsePositive,
}

/// Where the alert came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Audit entries that evidence the alert.
    #[serde(default)]
    pub evidence: Vec<AuditLogEntry>,
}

/// Planned or executed response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponsePlan {
    pub automated: bool,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

/// A raised security alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub alert_id: String,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub source: AlertSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    pub response: ResponsePlan,
    pub status: AlertStatus,
    pub detected_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SecurityAlert {
    pub fn new(
        alert_type: impl Into<String>,
        severity: AlertSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4().to_string(),
            alert_type: alert_type.into(),
            severity,
            title: title.into(),
            description: description.into(),
            source: AlertSource::default(),
            impact: None,
            response: ResponsePlan::default(),
            status: AlertStatus::Open,
            detected_at: Utc::now(),
            responded_at: None,
            resolved_at: None,
        }
    }

    pub fn with_source(mut self, source: AlertSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = Some(impact.into());
        self
    }
}

/// Stores alerts, runs automated responses, enforces the lifecycle.
pub struct AlertCenter {
    alerts: RwLock<HashMap<String, SecurityAlert>>,
    events: EventBroker,
}

impl AlertCenter {
    pub fn new(events: EventBroker) -> Self {
        Self {
            alerts: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Raise an alert: store it, publish it, auto-respond when warranted.
    pub async fn raise(&self, mut alert: SecurityAlert) -> String {
        let response_actions = auto_response_actions(alert.severity);
        if !response_actions.is_empty() {
            alert.response = ResponsePlan {
                automated: true,
                actions: response_actions.iter().map(|s| s.to_string()).collect(),
                assignee: None,
            };
            alert.responded_at = Some(Utc::now());
        }

        tracing::warn!(
            alert_id = %alert.alert_id,
            alert_type = %alert.alert_type,
            severity = ?alert.severity,
            "security alert raised"
        );

        let mut payload = Value::object();
        payload.set("alert_id", alert.alert_id.clone());
        payload.set("alert_type", alert.alert_type.clone());
        payload.set("title", alert.title.clone());
        self.events.publish(EventKind::SecurityAlert, payload);

        for action in &response_actions {
            let mut payload = Value::object();
            payload.set("alert_id", alert.alert_id.clone());
            if let Some(agent_id) = &alert.source.agent_id {
                payload.set("agent_id", agent_id.clone());
            }
            self.events.publish(action_event(action), payload);
        }

        let alert_id = alert.alert_id.clone();
        self.alerts.write().await.insert(alert_id.clone(), alert);
        alert_id
    }

    pub async fn get(&self, alert_id: &str) -> Option<SecurityAlert> {
        self.alerts.read().await.get(alert_id).cloned()
    }

    pub async fn open_alerts(&self) -> Vec<SecurityAlert> {
        self.alerts
            .read()
            .await
            .values()
            .filter(|alert| {
                matches!(alert.status, AlertStatus::Open | AlertStatus::Investigating)
            })
            .cloned()
            .collect()
    }

    /// Advance an alert through its lifecycle.
    pub async fn transition(
        &self,
        alert_id: &str,
        next: AlertStatus,
    ) -> Result<(), LedgerError> {
        let mut alerts = self.alerts.write().await;
        let alert = alerts
            .get_mut(alert_id)
            .ok_or_else(|| LedgerError::InvalidInput(format!("unknown alert {alert_id}")))?;

        let allowed = matches!(
            (alert.status, next),
            (AlertStatus::Open, AlertStatus::Investigating)
                | (AlertStatus::Investigating, AlertStatus::Mitigated)
                | (AlertStatus::Investigating, AlertStatus::FalsePositive)
                | (AlertStatus::Mitigated, AlertStatus::Resolved)
        );
        if !allowed {
            return Err(LedgerError::InvalidInput(format!(
                "illegal alert transition {:?} -> {next:?}",
                alert.status
            )));
        }

        alert.status = next;
        if matches!(next, AlertStatus::Resolved | AlertStatus::FalsePositive) {
            alert.resolved_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Automated response per severity: critical blocks and escalates, high
/// rate-limits, everything lower is log-only.
fn auto_response_actions(severity: AlertSeverity) -> Vec<&'static str> {
    match severity {
        AlertSeverity::Critical => vec!["block_agent", "notify_admin", "escalate"],
        AlertSeverity::High => vec!["rate_limit", "notify_admin"],
        _ => Vec::new(),
    }
}

fn action_event(action: &str) -> EventKind {
    match action {
        "block_agent" => EventKind::BlockAgent,
        "rate_limit" => EventKind::RateLimit,
        "escalate" => EventKind::Escalate,
        _ => EventKind::NotifyAdmin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_critical_alert_auto_responds() {
        let broker = EventBroker::new(64);
        let mut rx = broker.subscribe();
        let center = AlertCenter::new(broker);

        let alert = SecurityAlert::new(
            "intrusion_attempt",
            AlertSeverity::Critical,
            "Burst of failures",
            "many failures from one source",
        )
        .with_source(AlertSource {
            agent_id: Some("agent-x".into()),
            ..Default::default()
        });
        let alert_id = center.raise(alert).await;

        let stored = center.get(&alert_id).await.unwrap();
        assert!(stored.response.automated);
        assert_eq!(
            stored.response.actions,
            vec!["block_agent", "notify_admin", "escalate"]
        );
        assert!(stored.responded_at.is_some());

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&EventKind::SecurityAlert));
        assert!(kinds.contains(&EventKind::BlockAgent));
        assert!(kinds.contains(&EventKind::Escalate));
    }

    #[tokio::test]
    async fn test_medium_alert_is_log_only() {
        let center = AlertCenter::new(EventBroker::new(8));
        let alert_id = center
            .raise(SecurityAlert::new(
                "authentication_failure",
                AlertSeverity::Medium,
                "Repeated login failures",
                "",
            ))
            .await;
        let stored = center.get(&alert_id).await.unwrap();
        assert!(!stored.response.automated);
        assert!(stored.response.actions.is_empty());
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let center = AlertCenter::new(EventBroker::new(8));
        let alert_id = center
            .raise(SecurityAlert::new(
                "test",
                AlertSeverity::Low,
                "t",
                "d",
            ))
            .await;

        center
            .transition(&alert_id, AlertStatus::Investigating)
            .await
            .unwrap();
        center
            .transition(&alert_id, AlertStatus::Mitigated)
            .await
            .unwrap();
        center
            .transition(&alert_id, AlertStatus::Resolved)
            .await
            .unwrap();

        let stored = center.get(&alert_id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Resolved);
        assert!(stored.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let center = AlertCenter::new(EventBroker::new(8));
        let alert_id = center
            .raise(SecurityAlert::new("test", AlertSeverity::Low, "t", "d"))
            .await;

        assert!(center
            .transition(&alert_id, AlertStatus::Resolved)
            .await
            .is_err());
        let stored = center.get(&alert_id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Open);
    }

    #[tokio::test]
    async fn test_false_positive_path() {
        let center = AlertCenter::new(EventBroker::new(8));
        let alert_id = center
            .raise(SecurityAlert::new("test", AlertSeverity::Low, "t", "d"))
            .await;
        center
            .transition(&alert_id, AlertStatus::Investigating)
            .await
            .unwrap();
        center
            .transition(&alert_id, AlertStatus::FalsePositive)
            .await
            .unwrap();
        assert!(center.open_alerts().await.is_empty());
    }
}
