//! Sliding-window anomaly detection over the audit stream.

use crate::alerts::AlertSeverity;
use crate::entry::{AuditEventType, AuditLogEntry};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Detector thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Authentication failures inside the window that trip the detector.
    pub auth_failure_threshold: usize,
    pub window_ms: i64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            auth_failure_threshold: 5,
            window_ms: 300_000,
        }
    }
}

/// A detected per-agent anomaly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub kind: String,
    pub agent_id: String,
    pub severity: AlertSeverity,
    pub count: usize,
    pub window_ms: i64,
}

/// Per-agent sliding windows over recent failures.
pub struct AnomalyDetector {
    config: AnomalyConfig,
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Feed one entry; returns a finding when a window trips.
    pub fn observe(&self, entry: &AuditLogEntry) -> Option<AnomalyFinding> {
        if entry.event_type != AuditEventType::Authentication {
            return None;
        }
        if !matches!(entry.outcome.as_str(), "failure" | "error" | "denied") {
            return None;
        }

        let cutoff = entry.timestamp - chrono::Duration::milliseconds(self.config.window_ms);
        let mut windows = self.windows.lock();
        let window = windows.entry(entry.actor.clone()).or_default();
        while window.front().map(|at| *at < cutoff).unwrap_or(false) {
            window.pop_front();
        }
        window.push_back(entry.timestamp);

        if window.len() >= self.config.auth_failure_threshold {
            let count = window.len();
            // Reset so one burst raises one finding.
            window.clear();
            tracing::warn!(
                agent_id = %entry.actor,
                count,
                "authentication failure anomaly"
            );
            return Some(AnomalyFinding {
                kind: "authentication_failure".to_string(),
                agent_id: entry.actor.clone(),
                severity: AlertSeverity::Medium,
                count,
                window_ms: self.config.window_ms,
            });
        }
        None
    }

    /// Drop windows with no activity since `cutoff`.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, window| window.back().map(|at| *at >= cutoff).unwrap_or(false));
        before - windows.len()
    }
}
