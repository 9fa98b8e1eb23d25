//! Quarantine markers with TTLs.
//!
//! Quarantined agents are vetoed on every evaluation; lookup is O(1).
//! Markers may expire on their own or be lifted explicitly; history is
//! kept for audit.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// An active quarantine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineMarker {
    pub agent_id: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl QuarantineMarker {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// A historical quarantine action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub id: Uuid,
    pub agent_id: String,
    pub reason: String,
    pub quarantined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
}

/// The active marker set plus history.
#[derive(Default)]
pub struct QuarantineList {
    markers: RwLock<HashMap<String, QuarantineMarker>>,
    history: RwLock<Vec<QuarantineRecord>>,
}

impl QuarantineList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an agent in quarantine.
    pub fn quarantine(
        &self,
        agent_id: impl Into<String>,
        reason: impl Into<String>,
        ttl_ms: Option<u64>,
    ) -> QuarantineMarker {
        let agent_id = agent_id.into();
        let reason = reason.into();
        let now = Utc::now();
        let marker = QuarantineMarker {
            agent_id: agent_id.clone(),
            reason: reason.clone(),
            quarantined_at: now,
            expires_at: ttl_ms.map(|ms| now + chrono::Duration::milliseconds(ms as i64)),
        };

        self.markers.write().insert(agent_id.clone(), marker.clone());
        self.history.write().push(QuarantineRecord {
            id: Uuid::new_v4(),
            agent_id: agent_id.clone(),
            reason,
            quarantined_at: now,
            released_at: None,
        });

        tracing::warn!(agent_id = %agent_id, "agent quarantined");
        marker
    }

    /// O(1) lookup, honoring expiry.
    pub fn is_quarantined(&self, agent_id: &str) -> bool {
        self.markers
            .read()
            .get(agent_id)
            .map(|marker| !marker.expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Lift a quarantine; returns the marker if one was active.
    pub fn release(&self, agent_id: &str) -> Option<QuarantineMarker> {
        let marker = self.markers.write().remove(agent_id);
        if marker.is_some() {
            let mut history = self.history.write();
            if let Some(record) = history
                .iter_mut()
                .rev()
                .find(|record| record.agent_id == agent_id && record.released_at.is_none())
            {
                record.released_at = Some(Utc::now());
            }
            tracing::info!(agent_id = agent_id, "agent released from quarantine");
        }
        marker
    }

    /// Remove expired markers; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut markers = self.markers.write();
        let before = markers.len();
        markers.retain(|_, marker| !marker.expired(now));
        before - markers.len()
    }

    pub fn active(&self) -> Vec<QuarantineMarker> {
        let now = Utc::now();
        self.markers
            .read()
            .values()
            .filter(|marker| !marker.expired(now))
            .cloned()
            .collect()
    }

    pub fn history(&self) -> Vec<QuarantineRecord> {
        self.history.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarantine_and_release() {
        let list = QuarantineList::new();
        assert!(!list.is_quarantined("a1"));

        list.quarantine("a1", "incident", None);
        assert!(list.is_quarantined("a1"));

        let marker = list.release("a1").unwrap();
        assert_eq!(marker.agent_id, "a1");
        assert!(!list.is_quarantined("a1"));

        let history = list.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].released_at.is_some());
    }

    #[test]
    fn test_ttl_expiry() {
        let list = QuarantineList::new();
        list.quarantine("a1", "short hold", Some(0));
        assert!(!list.is_quarantined("a1"));
        assert_eq!(list.sweep_expired(), 1);
    }

    #[test]
    fn test_unexpired_ttl_holds() {
        let list = QuarantineList::new();
        list.quarantine("a1", "hold", Some(60_000));
        assert!(list.is_quarantined("a1"));
        assert_eq!(list.sweep_expired(), 0);
    }

    #[test]
    fn test_release_unknown_agent_is_none() {
        let list = QuarantineList::new();
        assert!(list.release("ghost").is_none());
    }
}
