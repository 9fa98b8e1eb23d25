//! Cross-entry correlation.
//!
//! Failure events are grouped by common source (actor id, and source ip
//! when the entry carries one). A source accumulating failures across
//! multiple event types inside the window is treated as an intrusion
//! attempt rather than a string of unrelated mishaps.

use crate::alerts::AlertSeverity;
use crate::entry::{AuditEventType, AuditLogEntry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use trustmesh_codec::Value;

/// Correlation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub window_ms: i64,
    /// Failure events from one source that trip the correlator.
    pub failure_threshold: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ms: 300_000,
            failure_threshold: 10,
        }
    }
}

/// A correlated burst of failures from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationFinding {
    pub kind: String,
    pub source: String,
    pub severity: AlertSeverity,
    pub count: usize,
    pub event_types: Vec<String>,
}

#[derive(Debug, Clone)]
struct WindowedFailure {
    at: DateTime<Utc>,
    event_type: AuditEventType,
}

/// Groups failure events by source inside a rolling window.
pub struct CorrelationEngine {
    config: CorrelationConfig,
    by_source: Mutex<HashMap<String, VecDeque<WindowedFailure>>>,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig) -> Self {
        Self {
            config,
            by_source: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one entry; returns a finding when a source crosses the threshold.
    pub fn observe(&self, entry: &AuditLogEntry) -> Option<CorrelationFinding> {
        if !matches!(entry.outcome.as_str(), "failure" | "error" | "denied") {
            return None;
        }

        let mut finding = None;
        for source in sources_of(entry) {
            let cutoff = entry.timestamp - chrono::Duration::milliseconds(self.config.window_ms);
            let mut by_source = self.by_source.lock();
            let window = by_source.entry(source.clone()).or_default();
            while window.front().map(|f| f.at < cutoff).unwrap_or(false) {
                window.pop_front();
            }
            window.push_back(WindowedFailure {
                at: entry.timestamp,
                event_type: entry.event_type,
            });

            if window.len() >= self.config.failure_threshold {
                let event_types: BTreeSet<String> = window
                    .iter()
                    .map(|f| format!("{:?}", f.event_type))
                    .collect();
                let count = window.len();
                window.clear();
                tracing::warn!(source = %source, count, "correlated failure burst");
                finding = Some(CorrelationFinding {
                    kind: "intrusion_attempt".to_string(),
                    source,
                    severity: AlertSeverity::High,
                    count,
                    event_types: event_types.into_iter().collect(),
                });
            }
        }
        finding
    }
}

/// Grouping keys for an entry: the actor, plus its source ip if present.
fn sources_of(entry: &AuditLogEntry) -> Vec<String> {
    let mut sources = vec![format!("actor:{}", entry.actor)];
    if let Some(ip) = entry
        .details
        .get("source_ip")
        .and_then(Value::as_str)
    {
        sources.push(format!("ip:{ip}"));
    }
    sources
}
