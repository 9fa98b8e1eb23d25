//! Real-time security monitoring over newly written entries.
//!
//! One entry point, [`SecurityMonitor::observe`], runs the anomaly
//! detector, the correlation engine, and the threat-indicator check, and
//! raises a [`SecurityAlert`](crate::alerts::SecurityAlert) per finding.

use crate::alerts::{AlertCenter, AlertSeverity, AlertSource, SecurityAlert};
use crate::anomaly::{AnomalyConfig, AnomalyDetector};
use crate::correlation::{CorrelationConfig, CorrelationEngine};
use crate::entry::AuditLogEntry;
use crate::threat::ThreatIntel;
use std::sync::Arc;
use trustmesh_codec::Value;

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Master switch; off means entries pass unobserved.
    pub real_time_alerts: bool,
    pub anomaly: AnomalyConfig,
    pub correlation: CorrelationConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            real_time_alerts: true,
            anomaly: AnomalyConfig::default(),
            correlation: CorrelationConfig::default(),
        }
    }
}

/// Streams entries through the detectors.
pub struct SecurityMonitor {
    enabled: bool,
    anomaly: AnomalyDetector,
    correlation: CorrelationEngine,
    threat: Arc<ThreatIntel>,
    alerts: Arc<AlertCenter>,
}

impl SecurityMonitor {
    pub fn new(config: MonitorConfig, threat: Arc<ThreatIntel>, alerts: Arc<AlertCenter>) -> Self {
        Self {
            enabled: config.real_time_alerts,
            anomaly: AnomalyDetector::new(config.anomaly),
            correlation: CorrelationEngine::new(config.correlation),
            threat,
            alerts,
        }
    }

    pub fn alerts(&self) -> &Arc<AlertCenter> {
        &self.alerts
    }

    /// Run all detectors over one entry; returns raised alert ids.
    pub async fn observe(&self, entry: &AuditLogEntry) -> Vec<String> {
        if !self.enabled {
            return Vec::new();
        }
        let mut raised = Vec::new();

        if let Some(finding) = self.anomaly.observe(entry) {
            let alert = SecurityAlert::new(
                finding.kind.clone(),
                finding.severity,
                format!("Repeated authentication failures by {}", finding.agent_id),
                format!(
                    "{} authentication failures within {} ms",
                    finding.count, finding.window_ms
                ),
            )
            .with_source(AlertSource {
                agent_id: Some(finding.agent_id.clone()),
                ip: source_ip(entry),
                evidence: vec![entry.clone()],
            });
            raised.push(self.alerts.raise(alert).await);
        }

        if let Some(finding) = self.correlation.observe(entry) {
            let alert = SecurityAlert::new(
                finding.kind.clone(),
                finding.severity,
                format!("Correlated failure burst from {}", finding.source),
                format!(
                    "{} failures across {:?} within the correlation window",
                    finding.count, finding.event_types
                ),
            )
            .with_source(AlertSource {
                agent_id: Some(entry.actor.clone()),
                ip: source_ip(entry),
                evidence: vec![entry.clone()],
            })
            .with_impact("possible intrusion attempt");
            raised.push(self.alerts.raise(alert).await);
        }

        let indicators = self.threat.check(entry);
        if !indicators.is_empty() {
            // Several independent indicators on one entry escalate it.
            let severity = if indicators.len() > 1 {
                AlertSeverity::Critical
            } else {
                AlertSeverity::High
            };
            let kinds: Vec<String> = indicators.iter().map(|i| i.kind.clone()).collect();
            let alert = SecurityAlert::new(
                "threat_indicator",
                severity,
                format!("Threat indicators on entry {}", entry.log_id),
                format!("matched indicators: {}", kinds.join(", ")),
            )
            .with_source(AlertSource {
                agent_id: Some(entry.actor.clone()),
                ip: source_ip(entry),
                evidence: vec![entry.clone()],
            });
            raised.push(self.alerts.raise(alert).await);
        }

        raised
    }
}

fn source_ip(entry: &AuditLogEntry) -> Option<String> {
    entry
        .details
        .get("source_ip")
        .and_then(Value::as_str)
        .map(str::to_string)
}
