//! Vector clocks for causal ordering.
//!
//! Each agent keeps a counter per known peer. Merging takes the
//! componentwise maximum and then increments the owner's entry, so a merge
//! is itself an observable local event. Comparison yields the standard
//! partial order: before, after, equal, or concurrent.
//!
//! Two codecs are provided: sorted JSON (via serde) and a compact binary
//! form of `<count u32>` followed by `<agent-hash u32, counter u32>` pairs.
//! The binary form discards agent ids on purpose; it is only for wire
//! economy where ids are derivable from context, and decode rejects 32-bit
//! hash collisions rather than guessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Clock codec and mutation errors.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("bad clock format: {0}")]
    BadFormat(String),
}

/// Outcome of comparing two clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockOrdering {
    /// Every component ≤ the other, at least one strictly less.
    Before,
    /// Every component ≥ the other, at least one strictly greater.
    After,
    /// Incomparable: some components ahead, some behind.
    Concurrent,
    /// Identical component maps.
    Equal,
}

/// Pruning policy for clock entries of departed agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Entries for other agents not seen for this long are dropped.
    pub max_age_ms: i64,
    /// Hard cap on entry count after age-based pruning.
    pub max_size: usize,
    /// The most recently seen N entries always survive the size cap.
    pub keep_recent: usize,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 24 * 60 * 60 * 1000,
            max_size: 64,
            keep_recent: 8,
        }
    }
}

/// A per-agent vector clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    /// Agent that owns (and may increment) this replica.
    owner: String,
    /// Counter per known agent.
    entries: BTreeMap<String, u64>,
    /// Last time each entry advanced; drives pruning.
    #[serde(default)]
    last_seen: BTreeMap<String, DateTime<Utc>>,
    /// Local version, bumped on every mutation.
    version: u64,
}

impl VectorClock {
    pub fn new(owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let mut entries = BTreeMap::new();
        entries.insert(owner.clone(), 0);
        let mut last_seen = BTreeMap::new();
        last_seen.insert(owner.clone(), Utc::now());
        Self {
            owner,
            entries,
            last_seen,
            version: 0,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Counter for an agent (0 when unknown).
    pub fn get(&self, agent: &str) -> u64 {
        self.entries.get(agent).copied().unwrap_or(0)
    }

    pub fn entries(&self) -> &BTreeMap<String, u64> {
        &self.entries
    }

    /// Advance the owner's counter.
    pub fn increment(&mut self) -> u64 {
        let counter = self.entries.entry(self.owner.clone()).or_insert(0);
        *counter += 1;
        let now = Utc::now();
        self.last_seen.insert(self.owner.clone(), now);
        self.version += 1;
        *counter
    }

    /// Record knowledge of another agent's counter. No-op unless `n` is
    /// strictly greater than the current value.
    pub fn update(&mut self, agent: impl Into<String>, n: u64) {
        let agent = agent.into();
        let current = self.entries.get(&agent).copied().unwrap_or(0);
        if n <= current {
            return;
        }
        self.entries.insert(agent.clone(), n);
        self.last_seen.insert(agent, Utc::now());
        self.version += 1;
    }

    /// Merge: componentwise maximum, then a local increment.
    pub fn merge(&mut self, other: &VectorClock) {
        for (agent, &counter) in &other.entries {
            let current = self.entries.entry(agent.clone()).or_insert(0);
            if counter > *current {
                *current = counter;
                self.last_seen.insert(agent.clone(), Utc::now());
            }
        }
        self.increment();
    }

    /// Compare under the causal partial order.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let agents: BTreeSet<&String> =
            self.entries.keys().chain(other.entries.keys()).collect();

        let mut behind = false;
        let mut ahead = false;
        for agent in agents {
            let mine = self.get(agent);
            let theirs = other.get(agent);
            if mine < theirs {
                behind = true;
            } else if mine > theirs {
                ahead = true;
            }
        }

        match (behind, ahead) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Entries where this clock is strictly ahead of `other`.
    pub fn delta(&self, other: &VectorClock) -> BTreeMap<String, u64> {
        self.entries
            .iter()
            .filter(|(agent, &counter)| counter > other.get(agent))
            .map(|(agent, &counter)| (agent.clone(), counter))
            .collect()
    }

    /// Apply a delta set produced by [`VectorClock::delta`].
    pub fn apply_deltas<I>(&mut self, deltas: I)
    where
        I: IntoIterator<Item = (String, u64)>,
    {
        for (agent, counter) in deltas {
            self.update(agent, counter);
        }
    }

    /// Drop stale entries for departed agents. The owner's entry is never
    /// pruned; the `keep_recent` most recently seen entries always survive.
    pub fn prune(&mut self, config: &PruneConfig, now: DateTime<Utc>) {
        let cutoff = now - chrono::Duration::milliseconds(config.max_age_ms);

        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|agent| {
                **agent != self.owner
                    && self
                        .last_seen
                        .get(*agent)
                        .map(|seen| *seen < cutoff)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        for agent in stale {
            self.entries.remove(&agent);
            self.last_seen.remove(&agent);
        }

        if self.entries.len() <= config.max_size {
            return;
        }

        // Oldest-first candidates, excluding the owner and the recent set.
        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .entries
            .keys()
            .filter(|agent| **agent != self.owner)
            .map(|agent| {
                let seen = self.last_seen.get(agent).copied().unwrap_or(now);
                (agent.clone(), seen)
            })
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1));

        let keep_recent: BTreeSet<String> = by_age
            .iter()
            .rev()
            .take(config.keep_recent)
            .map(|(agent, _)| agent.clone())
            .collect();

        for (agent, _) in by_age {
            if self.entries.len() <= config.max_size {
                break;
            }
            if keep_recent.contains(&agent) {
                continue;
            }
            self.entries.remove(&agent);
            self.last_seen.remove(&agent);
        }
    }

    // =========================================================================
    // Codecs
    // =========================================================================

    /// Sorted-key JSON text of the component map.
    pub fn to_json(&self) -> Result<String, ClockError> {
        serde_json::to_string(self).map_err(|e| ClockError::BadFormat(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ClockError> {
        serde_json::from_str(json).map_err(|e| ClockError::BadFormat(e.to_string()))
    }

    /// Compact binary form: `<count u32>` then `<agent-hash u32, counter u32>`
    /// pairs, all big-endian. Fails when a counter overflows `u32` or two
    /// agent ids collide under the 32-bit hash.
    pub fn encode_binary(&self) -> Result<Vec<u8>, ClockError> {
        let mut seen = BTreeMap::new();
        let mut buf = Vec::with_capacity(4 + self.entries.len() * 8);
        buf.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for (agent, &counter) in &self.entries {
            let hash = fnv1a_32(agent);
            if let Some(existing) = seen.insert(hash, agent.clone()) {
                return Err(ClockError::BadFormat(format!(
                    "agent-id hash collision between '{existing}' and '{agent}'"
                )));
            }
            let counter: u32 = counter.try_into().map_err(|_| {
                ClockError::BadFormat(format!("counter for '{agent}' exceeds u32"))
            })?;
            buf.extend_from_slice(&hash.to_be_bytes());
            buf.extend_from_slice(&counter.to_be_bytes());
        }
        Ok(buf)
    }

    /// Decode the binary form against a set of agent ids known from context.
    ///
    /// Every hash in the buffer must resolve to exactly one known agent;
    /// anything else (truncation, duplicate hashes, unknown hashes,
    /// colliding known ids) is a [`ClockError::BadFormat`].
    pub fn decode_binary(
        buf: &[u8],
        known_agents: &[String],
    ) -> Result<BTreeMap<String, u64>, ClockError> {
        let mut by_hash: BTreeMap<u32, &String> = BTreeMap::new();
        for agent in known_agents {
            if let Some(existing) = by_hash.insert(fnv1a_32(agent), agent) {
                return Err(ClockError::BadFormat(format!(
                    "known agent ids '{existing}' and '{agent}' collide"
                )));
            }
        }

        if buf.len() < 4 {
            return Err(ClockError::BadFormat("missing entry count".into()));
        }
        let count = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let expected = 4 + count * 8;
        if buf.len() != expected {
            return Err(ClockError::BadFormat(format!(
                "expected {expected} bytes for {count} entries, got {}",
                buf.len()
            )));
        }

        let mut entries = BTreeMap::new();
        let mut seen_hashes = BTreeSet::new();
        for i in 0..count {
            let at = 4 + i * 8;
            let hash = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            let counter =
                u32::from_be_bytes([buf[at + 4], buf[at + 5], buf[at + 6], buf[at + 7]]);
            if !seen_hashes.insert(hash) {
                return Err(ClockError::BadFormat(format!(
                    "duplicate agent hash {hash:#010x}"
                )));
            }
            let agent = by_hash.get(&hash).ok_or_else(|| {
                ClockError::BadFormat(format!("unknown agent hash {hash:#010x}"))
            })?;
            entries.insert((*agent).clone(), counter as u64);
        }
        Ok(entries)
    }
}

/// 32-bit FNV-1a over an agent id.
pub(crate) fn fnv1a_32(input: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in input.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
