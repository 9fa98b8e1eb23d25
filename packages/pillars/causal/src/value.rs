//! Replicated values with causal provenance.

use crate::clock::VectorClock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustmesh_codec::{canonical, Value};

/// Priority assumed when replicas don't say otherwise.
pub const DEFAULT_PRIORITY: i64 = 5;

/// Optional provenance metadata attached to a replicated value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueMetadata {
    /// Resolution priority; higher wins under the priority strategy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Operation that produced the value (put, delete, merge, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_operation: Option<String>,
    /// Keys this value depends on.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

/// A piece of replicated state plus everything needed to merge it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictValue {
    pub data: Value,
    pub clock: VectorClock,
    /// Agent that produced this revision.
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    /// Revision counter on the producing replica.
    pub version: u64,
    /// SHA-256 over the canonical serialization of `data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ValueMetadata>,
}

impl ConflictValue {
    pub fn new(data: Value, clock: VectorClock, agent_id: impl Into<String>) -> Self {
        let version = clock.version();
        Self {
            data,
            clock,
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            version,
            checksum: None,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ValueMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Effective resolution priority.
    pub fn priority(&self) -> i64 {
        self.metadata
            .as_ref()
            .and_then(|m| m.priority)
            .unwrap_or(DEFAULT_PRIORITY)
    }

    /// Stamp the checksum over the current data.
    pub fn seal(mut self) -> Self {
        self.checksum = canonical::to_canonical_json(&self.data)
            .ok()
            .map(|text| canonical::sha256_hex(text.as_bytes()));
        self
    }

    /// Verify the checksum, if one is present. Absent checksum passes.
    pub fn checksum_intact(&self) -> bool {
        match &self.checksum {
            None => true,
            Some(expected) => canonical::to_canonical_json(&self.data)
                .map(|text| canonical::sha256_hex(text.as_bytes()) == *expected)
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_and_verify() {
        let mut data = Value::object();
        data.set("field", "payload");
        let value = ConflictValue::new(data, VectorClock::new("a1"), "a1").seal();
        assert!(value.checksum.is_some());
        assert!(value.checksum_intact());
    }

    #[test]
    fn test_tampered_checksum_detected() {
        let value =
            ConflictValue::new(Value::from("original"), VectorClock::new("a1"), "a1").seal();
        let mut tampered = value.clone();
        tampered.data = Value::from("changed");
        assert!(!tampered.checksum_intact());
    }

    #[test]
    fn test_default_priority() {
        let value = ConflictValue::new(Value::Null, VectorClock::new("a1"), "a1");
        assert_eq!(value.priority(), DEFAULT_PRIORITY);

        let boosted = value.with_metadata(ValueMetadata {
            priority: Some(9),
            ..Default::default()
        });
        assert_eq!(boosted.priority(), 9);
    }
}
