//! Network segments: logical zones with isolation rules.
//!
//! Two invariants hold everywhere: a quarantine segment never sends
//! outbound to a non-quarantine segment, and production never accepts
//! inbound from development or staging.

use crate::types::AgentType;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Segment validation errors.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("segment validation error: {0}")]
    Validation(String),
    #[error("unknown segment: {0}")]
    Unknown(String),
}

/// Zone classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Production,
    Staging,
    Development,
    Isolated,
    Quarantine,
}

/// A logical network zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSegment {
    pub id: String,
    pub name: String,
    pub segment_type: SegmentType,
    #[serde(default)]
    pub allowed_agent_types: Vec<AgentType>,
    /// 0 (open) to 10 (locked down).
    #[serde(default)]
    pub security_level: u8,
    #[serde(default)]
    pub isolation_rules: Vec<String>,
    #[serde(default)]
    pub traffic_policies: Vec<String>,
    #[serde(default)]
    pub monitoring_enabled: bool,
}

impl NetworkSegment {
    pub fn new(id: impl Into<String>, name: impl Into<String>, segment_type: SegmentType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            segment_type,
            allowed_agent_types: Vec::new(),
            security_level: 5,
            isolation_rules: Vec::new(),
            traffic_policies: Vec::new(),
            monitoring_enabled: true,
        }
    }

    pub fn validate(&self) -> Result<(), SegmentError> {
        if self.id.trim().is_empty() {
            return Err(SegmentError::Validation("segment id must be set".into()));
        }
        if self.name.trim().is_empty() {
            return Err(SegmentError::Validation("segment name must be set".into()));
        }
        if self.security_level > 10 {
            return Err(SegmentError::Validation(format!(
                "security level {} outside [0,10]",
                self.security_level
            )));
        }
        Ok(())
    }

    pub fn admits(&self, agent_type: AgentType) -> bool {
        self.allowed_agent_types.is_empty() || self.allowed_agent_types.contains(&agent_type)
    }
}

/// Is traffic from one segment to another permitted?
pub fn traffic_allowed(from: &NetworkSegment, to: &NetworkSegment) -> bool {
    if from.segment_type == SegmentType::Quarantine && to.segment_type != SegmentType::Quarantine
    {
        return false;
    }
    if to.segment_type == SegmentType::Production
        && matches!(
            from.segment_type,
            SegmentType::Development | SegmentType::Staging
        )
    {
        return false;
    }
    true
}

/// Copy-on-write segment catalog.
pub struct SegmentStore {
    segments: RwLock<Arc<HashMap<String, NetworkSegment>>>,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        Self {
            segments: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn add(&self, segment: NetworkSegment) -> Result<(), SegmentError> {
        segment.validate()?;
        let mut guard = self.segments.write();
        if guard.contains_key(&segment.id) {
            return Err(SegmentError::Validation(format!(
                "duplicate segment id '{}'",
                segment.id
            )));
        }
        let mut next = guard.as_ref().clone();
        next.insert(segment.id.clone(), segment);
        *guard = Arc::new(next);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<NetworkSegment> {
        self.segments.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<NetworkSegment> {
        let mut segments: Vec<NetworkSegment> =
            self.segments.read().values().cloned().collect();
        segments.sort_by(|a, b| a.id.cmp(&b.id));
        segments
    }

    /// Check a named route against the isolation invariants.
    pub fn check_route(&self, from_id: &str, to_id: &str) -> Result<bool, SegmentError> {
        let snapshot = self.segments.read().clone();
        let from = snapshot
            .get(from_id)
            .ok_or_else(|| SegmentError::Unknown(from_id.to_string()))?;
        let to = snapshot
            .get(to_id)
            .ok_or_else(|| SegmentError::Unknown(to_id.to_string()))?;
        Ok(traffic_allowed(from, to))
    }

    /// Periodic validation sweep: re-validate every segment and report
    /// violations instead of failing.
    pub fn validate_topology(&self) -> Vec<String> {
        let snapshot = self.segments.read().clone();
        let mut issues = Vec::new();
        for segment in snapshot.values() {
            if let Err(error) = segment.validate() {
                issues.push(format!("segment '{}': {error}", segment.id));
            }
            if segment.segment_type == SegmentType::Quarantine
                && segment.allowed_agent_types.contains(&AgentType::External)
            {
                issues.push(format!(
                    "segment '{}': quarantine must not admit external agents",
                    segment.id
                ));
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quarantine_denies_outbound() {
        let quarantine = NetworkSegment::new("q", "Quarantine", SegmentType::Quarantine);
        let production = NetworkSegment::new("p", "Production", SegmentType::Production);
        let other_quarantine = NetworkSegment::new("q2", "Q2", SegmentType::Quarantine);

        assert!(!traffic_allowed(&quarantine, &production));
        assert!(traffic_allowed(&quarantine, &other_quarantine));
    }

    #[test]
    fn test_production_denies_inbound_from_dev_staging() {
        let production = NetworkSegment::new("p", "Production", SegmentType::Production);
        let development = NetworkSegment::new("d", "Dev", SegmentType::Development);
        let staging = NetworkSegment::new("s", "Staging", SegmentType::Staging);
        let isolated = NetworkSegment::new("i", "Isolated", SegmentType::Isolated);

        assert!(!traffic_allowed(&development, &production));
        assert!(!traffic_allowed(&staging, &production));
        assert!(traffic_allowed(&isolated, &production));
        assert!(traffic_allowed(&production, &development));
    }

    #[test]
    fn test_store_routes_and_validation() {
        let store = SegmentStore::new();
        store
            .add(NetworkSegment::new("prod", "Production", SegmentType::Production))
            .unwrap();
        store
            .add(NetworkSegment::new("dev", "Development", SegmentType::Development))
            .unwrap();

        assert_eq!(store.check_route("dev", "prod").unwrap(), false);
        assert_eq!(store.check_route("prod", "dev").unwrap(), true);
        assert!(store.check_route("prod", "missing").is_err());
    }

    #[test]
    fn test_duplicate_and_invalid_segments_rejected() {
        let store = SegmentStore::new();
        store
            .add(NetworkSegment::new("a", "A", SegmentType::Isolated))
            .unwrap();
        assert!(store
            .add(NetworkSegment::new("a", "A again", SegmentType::Isolated))
            .is_err());
        assert!(store
            .add(NetworkSegment::new("", "Nameless", SegmentType::Isolated))
            .is_err());
    }

    #[test]
    fn test_topology_sweep_flags_external_in_quarantine() {
        let store = SegmentStore::new();
        let mut segment = NetworkSegment::new("q", "Quarantine", SegmentType::Quarantine);
        segment.allowed_agent_types = vec![AgentType::External];
        store.add(segment).unwrap();

        let issues = store.validate_topology();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("external"));
    }

    #[test]
    fn test_agent_admission() {
        let mut segment = NetworkSegment::new("p", "Prod", SegmentType::Production);
        assert!(segment.admits(AgentType::Worker));
        segment.allowed_agent_types = vec![AgentType::Coordinator];
        assert!(!segment.admits(AgentType::Worker));
        assert!(segment.admits(AgentType::Coordinator));
    }
}
