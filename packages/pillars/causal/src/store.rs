//! Replicated key/value store.
//!
//! Namespaced keys hold [`ConflictValue`]s stamped by the node's vector
//! clock. Local writes advance the clock and enqueue a sync record; peer
//! updates are admitted by causal comparison and, when concurrent, routed
//! through the conflict resolver. Deletes are tombstones that linger until
//! every known peer has acknowledged them and a grace period has passed.

use crate::clock::{ClockOrdering, PruneConfig, VectorClock};
use crate::resolver::{ConflictResolver, Resolution, Strategy};
use crate::value::{ConflictValue, ValueMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use trustmesh_codec::{Envelope, EnvelopeKind, SyncQueue, Value};

/// Store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Historical revisions kept per key.
    pub history_limit: usize,
    /// How long an acknowledged tombstone lingers before reaping.
    pub tombstone_grace_ms: i64,
    /// Clock pruning policy.
    pub prune: PruneConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            tombstone_grace_ms: 24 * 60 * 60 * 1000,
            prune: PruneConfig::default(),
        }
    }
}

/// Store API errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// What happened when a peer update was observed.
#[derive(Debug, Clone)]
pub enum ObserveOutcome {
    /// Peer value was causally older; dropped.
    Discarded,
    /// Peer value was causally newer (or the key was unknown); stored.
    Replaced,
    /// Identical clocks; idempotent no-op.
    Unchanged,
    /// Concurrent revisions; the resolver produced this resolution.
    Resolved(Resolution),
}

/// An update received from a peer replica.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerUpdate {
    pub namespace: String,
    pub key: String,
    pub value: ConflictValue,
}

/// One replicated key.
#[derive(Debug, Clone)]
struct KvEntry {
    current: ConflictValue,
    history: VecDeque<ConflictValue>,
    /// Strategy pinned for this key, overriding resolver rules.
    strategy: Option<Strategy>,
    tombstone: bool,
    deleted_at: Option<DateTime<Utc>>,
    /// Peers that have acknowledged the tombstone.
    acked_by: BTreeSet<String>,
}

impl KvEntry {
    fn new(current: ConflictValue) -> Self {
        Self {
            current,
            history: VecDeque::new(),
            strategy: None,
            tombstone: false,
            deleted_at: None,
            acked_by: BTreeSet::new(),
        }
    }

    fn supersede(&mut self, next: ConflictValue, history_limit: usize) {
        let previous = std::mem::replace(&mut self.current, next);
        self.history.push_back(previous);
        while self.history.len() > history_limit {
            self.history.pop_front();
        }
    }

    /// Most recent historical revision causally before both sides.
    fn common_ancestor(&self, remote: &ConflictValue) -> Option<&ConflictValue> {
        self.history.iter().rev().find(|revision| {
            revision.clock.compare(&self.current.clock) == ClockOrdering::Before
                && revision.clock.compare(&remote.clock) == ClockOrdering::Before
        })
    }
}

/// The replicated KV store for one node.
pub struct ReplicatedKvStore {
    node_id: String,
    clock: Arc<RwLock<VectorClock>>,
    namespaces: Arc<RwLock<HashMap<String, HashMap<String, KvEntry>>>>,
    resolver: Arc<ConflictResolver>,
    config: StoreConfig,
    sync: Option<Arc<SyncQueue>>,
    sequence: AtomicU64,
}

impl ReplicatedKvStore {
    pub fn new(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        Self {
            clock: Arc::new(RwLock::new(VectorClock::new(node_id.clone()))),
            node_id,
            namespaces: Arc::new(RwLock::new(HashMap::new())),
            resolver: Arc::new(ConflictResolver::new()),
            config: StoreConfig::default(),
            sync: None,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach the peer-sync queue; writes start emitting update records.
    pub fn with_sync_queue(mut self, queue: Arc<SyncQueue>) -> Self {
        self.sync = Some(queue);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    // =========================================================================
    // Local operations
    // =========================================================================

    /// Write a value. Advances the local clock and returns its snapshot.
    pub async fn put(
        &self,
        namespace: &str,
        key: &str,
        data: Value,
    ) -> Result<VectorClock, StoreError> {
        self.write(namespace, key, data, "put", false).await
    }

    /// Delete a key. Modeled as a tombstone carrying its own clock.
    pub async fn delete(&self, namespace: &str, key: &str) -> Result<VectorClock, StoreError> {
        self.write(namespace, key, Value::Null, "delete", true).await
    }

    async fn write(
        &self,
        namespace: &str,
        key: &str,
        data: Value,
        operation: &str,
        tombstone: bool,
    ) -> Result<VectorClock, StoreError> {
        validate_path(namespace, key)?;

        let snapshot = {
            let mut clock = self.clock.write().await;
            clock.increment();
            clock.clone()
        };

        let value = ConflictValue::new(data, snapshot.clone(), self.node_id.clone())
            .with_metadata(ValueMetadata {
                source_operation: Some(operation.to_string()),
                ..Default::default()
            })
            .seal();

        {
            let mut namespaces = self.namespaces.write().await;
            let space = namespaces.entry(namespace.to_string()).or_default();
            match space.get_mut(key) {
                Some(entry) => {
                    entry.supersede(value.clone(), self.config.history_limit);
                    entry.tombstone = tombstone;
                    entry.deleted_at = tombstone.then(Utc::now);
                    entry.acked_by.clear();
                }
                None => {
                    let mut entry = KvEntry::new(value.clone());
                    entry.tombstone = tombstone;
                    entry.deleted_at = tombstone.then(Utc::now);
                    space.insert(key.to_string(), entry);
                }
            }
        }

        self.emit_update(namespace, key, &value);
        tracing::debug!(
            namespace = namespace,
            key = key,
            operation = operation,
            version = value.version,
            "kv write"
        );
        Ok(snapshot)
    }

    /// Read the live value for a key.
    pub async fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|space| space.get(key))
            .filter(|entry| !entry.tombstone)
            .map(|entry| entry.current.data.clone())
    }

    /// Read the full replicated value (including tombstones), for sync.
    pub async fn get_replica(&self, namespace: &str, key: &str) -> Option<ConflictValue> {
        let namespaces = self.namespaces.read().await;
        namespaces
            .get(namespace)
            .and_then(|space| space.get(key))
            .map(|entry| entry.current.clone())
    }

    /// List live keys in a namespace under a prefix.
    pub async fn list(&self, namespace: &str, prefix: &str) -> Vec<String> {
        let namespaces = self.namespaces.read().await;
        let mut keys: Vec<String> = namespaces
            .get(namespace)
            .map(|space| {
                space
                    .iter()
                    .filter(|(key, entry)| !entry.tombstone && key.starts_with(prefix))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Pin a resolution strategy for one key.
    pub async fn set_key_strategy(
        &self,
        namespace: &str,
        key: &str,
        strategy: Strategy,
    ) -> Result<(), StoreError> {
        let mut namespaces = self.namespaces.write().await;
        let entry = namespaces
            .get_mut(namespace)
            .and_then(|space| space.get_mut(key))
            .ok_or_else(|| {
                StoreError::InvalidInput(format!("unknown key {namespace}/{key}"))
            })?;
        entry.strategy = Some(strategy);
        Ok(())
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Observe a peer's value for a key and reconcile.
    pub async fn observe(&self, update: PeerUpdate) -> Result<ObserveOutcome, StoreError> {
        validate_path(&update.namespace, &update.key)?;
        if !update.value.checksum_intact() {
            return Err(StoreError::InvalidInput(format!(
                "peer value for {}/{} fails its checksum",
                update.namespace, update.key
            )));
        }

        let mut namespaces = self.namespaces.write().await;
        let space = namespaces.entry(update.namespace.clone()).or_default();

        let Some(entry) = space.get_mut(&update.key) else {
            let tombstone = is_tombstone(&update.value);
            let mut entry = KvEntry::new(update.value.clone());
            entry.tombstone = tombstone;
            entry.deleted_at = tombstone.then(Utc::now);
            space.insert(update.key.clone(), entry);
            drop(namespaces);
            self.absorb_clock(&update.value.clock).await;
            return Ok(ObserveOutcome::Replaced);
        };

        match entry.current.clock.compare(&update.value.clock) {
            ClockOrdering::After => Ok(ObserveOutcome::Discarded),
            ClockOrdering::Equal => Ok(ObserveOutcome::Unchanged),
            ClockOrdering::Before => {
                let tombstone = is_tombstone(&update.value);
                entry.supersede(update.value.clone(), self.config.history_limit);
                entry.tombstone = tombstone;
                entry.deleted_at = tombstone.then(Utc::now);
                drop(namespaces);
                self.absorb_clock(&update.value.clock).await;
                Ok(ObserveOutcome::Replaced)
            }
            ClockOrdering::Concurrent => {
                let local = entry.current.clone();
                let ancestor = entry.common_ancestor(&update.value).cloned();
                let resolution = match entry.strategy {
                    Some(strategy) => self.resolver.resolve_with_strategy(
                        strategy,
                        &update.key,
                        &local,
                        &update.value,
                        ancestor.as_ref(),
                    ),
                    None => self.resolver.resolve(
                        &update.key,
                        &local,
                        &update.value,
                        ancestor.as_ref(),
                    ),
                };

                // Resolved revision dominates both parents.
                let merged_clock = {
                    let mut clock = self.clock.write().await;
                    clock.merge(&local.clock);
                    clock.merge(&update.value.clock);
                    clock.clone()
                };
                let resolved = ConflictValue::new(
                    resolution.value.clone(),
                    merged_clock,
                    self.node_id.clone(),
                )
                .with_metadata(ValueMetadata {
                    source_operation: Some("merge".to_string()),
                    ..Default::default()
                })
                .seal();

                entry.supersede(resolved.clone(), self.config.history_limit);
                entry.tombstone = resolved.data.is_null() && is_tombstone(&update.value);
                drop(namespaces);

                self.emit_update(&update.namespace, &update.key, &resolved);
                tracing::info!(
                    namespace = %update.namespace,
                    key = %update.key,
                    strategy = ?resolution.strategy,
                    confidence = resolution.confidence,
                    "concurrent update reconciled"
                );
                Ok(ObserveOutcome::Resolved(resolution))
            }
        }
    }

    /// Record a peer's tombstone acknowledgment.
    pub async fn acknowledge_tombstone(
        &self,
        namespace: &str,
        key: &str,
        peer_id: impl Into<String>,
    ) {
        let mut namespaces = self.namespaces.write().await;
        if let Some(entry) = namespaces.get_mut(namespace).and_then(|s| s.get_mut(key)) {
            if entry.tombstone {
                entry.acked_by.insert(peer_id.into());
            }
        }
    }

    /// Reap tombstones acknowledged by every known peer whose grace period
    /// has elapsed. Returns the number reaped. The deleted keys' clock
    /// entries live on in the store clock and prune by age like any other.
    pub async fn sweep_tombstones(&self, known_peers: &[String]) -> usize {
        let grace = chrono::Duration::milliseconds(self.config.tombstone_grace_ms);
        let now = Utc::now();
        let mut removed = 0usize;

        let mut namespaces = self.namespaces.write().await;
        for space in namespaces.values_mut() {
            space.retain(|_, entry| {
                let reap = entry.tombstone
                    && entry
                        .deleted_at
                        .map(|at| at + grace <= now)
                        .unwrap_or(false)
                    && known_peers.iter().all(|peer| entry.acked_by.contains(peer));
                if reap {
                    removed += 1;
                }
                !reap
            });
        }
        if removed > 0 {
            tracing::debug!(removed, "tombstones reaped");
        }
        removed
    }

    /// Apply the clock pruning policy.
    pub async fn prune_clock(&self) {
        let mut clock = self.clock.write().await;
        clock.prune(&self.config.prune, Utc::now());
    }

    /// Snapshot of the store clock.
    pub async fn clock_snapshot(&self) -> VectorClock {
        self.clock.read().await.clone()
    }

    async fn absorb_clock(&self, observed: &VectorClock) {
        let mut clock = self.clock.write().await;
        clock.merge(observed);
    }

    fn emit_update(&self, namespace: &str, key: &str, value: &ConflictValue) {
        let Some(queue) = &self.sync else {
            return;
        };
        let payload = match serde_json::to_value(PeerUpdate {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: value.clone(),
        }) {
            Ok(json) => Value::from_json(&json),
            Err(error) => {
                tracing::warn!(%error, "kv update not serializable, skipping sync record");
                return;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let envelope = Envelope::new(self.node_id.clone(), sequence, EnvelopeKind::Kv, payload);
        queue.enqueue(envelope, false);
    }
}

fn is_tombstone(value: &ConflictValue) -> bool {
    value
        .metadata
        .as_ref()
        .and_then(|m| m.source_operation.as_deref())
        == Some("delete")
}

fn validate_path(namespace: &str, key: &str) -> Result<(), StoreError> {
    if namespace.trim().is_empty() {
        return Err(StoreError::InvalidInput("namespace must be set".into()));
    }
    if key.trim().is_empty() {
        return Err(StoreError::InvalidInput("key must be set".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let store = ReplicatedKvStore::new("node-1");
        let clock = store.put("agents", "a1:task", Value::from("plan")).await.unwrap();
        assert_eq!(clock.get("node-1"), 1);

        let value = store.get("agents", "a1:task").await;
        assert_eq!(value, Some(Value::from("plan")));
    }

    #[tokio::test]
    async fn test_put_rejects_empty_key() {
        let store = ReplicatedKvStore::new("node-1");
        assert!(store.put("agents", " ", Value::Null).await.is_err());
        assert!(store.put("", "k", Value::Null).await.is_err());
    }

    #[tokio::test]
    async fn test_clock_advances_per_put() {
        let store = ReplicatedKvStore::new("node-1");
        let first = store.put("ns", "a", Value::Int(1)).await.unwrap();
        let second = store.put("ns", "b", Value::Int(2)).await.unwrap();
        assert!(second.get("node-1") > first.get("node-1"));
    }

    #[tokio::test]
    async fn test_observe_newer_replaces() {
        let local = ReplicatedKvStore::new("node-1");
        local.put("ns", "k", Value::from("old")).await.unwrap();

        // Peer saw our write and built on top of it.
        let ours = local.get_replica("ns", "k").await.unwrap();
        let mut peer_clock = VectorClock::new("node-2");
        peer_clock.merge(&ours.clock);

        let newer = ConflictValue::new(Value::from("new"), peer_clock, "node-2").seal();
        let outcome = local
            .observe(PeerUpdate {
                namespace: "ns".into(),
                key: "k".into(),
                value: newer,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, ObserveOutcome::Replaced));
        assert_eq!(local.get("ns", "k").await, Some(Value::from("new")));
    }

    #[tokio::test]
    async fn test_observe_older_discards() {
        let local = ReplicatedKvStore::new("node-1");
        local.put("ns", "k", Value::from("v1")).await.unwrap();
        let old_replica = local.get_replica("ns", "k").await.unwrap();
        local.put("ns", "k", Value::from("v2")).await.unwrap();

        let outcome = local
            .observe(PeerUpdate {
                namespace: "ns".into(),
                key: "k".into(),
                value: old_replica,
            })
            .await
            .unwrap();

        assert!(matches!(outcome, ObserveOutcome::Discarded));
        assert_eq!(local.get("ns", "k").await, Some(Value::from("v2")));
    }

    #[tokio::test]
    async fn test_observe_equal_is_idempotent() {
        let local = ReplicatedKvStore::new("node-1");
        local.put("ns", "k", Value::from("v")).await.unwrap();
        let replica = local.get_replica("ns", "k").await.unwrap();

        let outcome = local
            .observe(PeerUpdate {
                namespace: "ns".into(),
                key: "k".into(),
                value: replica,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, ObserveOutcome::Unchanged));
    }

    #[tokio::test]
    async fn test_observe_concurrent_resolves() {
        let local = ReplicatedKvStore::new("node-1");
        local.put("ns", "k", Value::from("mine")).await.unwrap();

        // A peer write that never saw ours.
        let mut peer_clock = VectorClock::new("node-2");
        peer_clock.increment();
        let peer_value = ConflictValue::new(Value::from("theirs"), peer_clock, "node-2")
            .with_timestamp(Utc::now() + chrono::Duration::seconds(5))
            .seal();

        let outcome = local
            .observe(PeerUpdate {
                namespace: "ns".into(),
                key: "k".into(),
                value: peer_value,
            })
            .await
            .unwrap();

        match outcome {
            ObserveOutcome::Resolved(resolution) => {
                assert_eq!(resolution.strategy, Strategy::Lww);
                assert_eq!(resolution.value.as_str(), Some("theirs"));
            }
            other => panic!("expected resolution, got {other:?}"),
        }

        // The merged revision now dominates both parents.
        let merged = local.get_replica("ns", "k").await.unwrap();
        assert!(merged.clock.get("node-1") >= 1);
        assert!(merged.clock.get("node-2") >= 1);
    }

    #[tokio::test]
    async fn test_delete_creates_tombstone() {
        let store = ReplicatedKvStore::new("node-1");
        store.put("ns", "k", Value::from("v")).await.unwrap();
        store.delete("ns", "k").await.unwrap();

        assert_eq!(store.get("ns", "k").await, None);
        assert!(store.list("ns", "").await.is_empty());
        // Still replicable as a tombstone.
        assert!(store.get_replica("ns", "k").await.is_some());
    }

    #[tokio::test]
    async fn test_tombstone_sweep_requires_acks_and_grace() {
        let store = ReplicatedKvStore::new("node-1").with_config(StoreConfig {
            tombstone_grace_ms: 0,
            ..Default::default()
        });
        store.put("ns", "k", Value::from("v")).await.unwrap();
        store.delete("ns", "k").await.unwrap();

        let peers = vec!["node-2".to_string()];
        assert_eq!(store.sweep_tombstones(&peers).await, 0);

        store.acknowledge_tombstone("ns", "k", "node-2").await;
        assert_eq!(store.sweep_tombstones(&peers).await, 1);
        assert!(store.get_replica("ns", "k").await.is_none());
    }

    #[tokio::test]
    async fn test_list_prefix_filtering() {
        let store = ReplicatedKvStore::new("node-1");
        store.put("ns", "set:tags", Value::Null).await.unwrap();
        store.put("ns", "set:labels", Value::Null).await.unwrap();
        store.put("ns", "doc:readme", Value::Null).await.unwrap();

        let keys = store.list("ns", "set:").await;
        assert_eq!(keys, vec!["set:labels".to_string(), "set:tags".to_string()]);
    }

    #[tokio::test]
    async fn test_sync_queue_receives_updates() {
        let queue = Arc::new(SyncQueue::new(16));
        let store = ReplicatedKvStore::new("node-1").with_sync_queue(queue.clone());
        store.put("ns", "k", Value::from("v")).await.unwrap();

        let drained = queue.drain(10);
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].envelope.kind, EnvelopeKind::Kv);
        assert_eq!(drained[0].envelope.node_id, "node-1");
    }

    #[tokio::test]
    async fn test_pinned_key_strategy_applies() {
        let store = ReplicatedKvStore::new("node-1");
        store
            .put("ns", "set:tags", Value::from(vec!["a", "b"]))
            .await
            .unwrap();
        store
            .set_key_strategy("ns", "set:tags", Strategy::Union)
            .await
            .unwrap();

        let mut peer_clock = VectorClock::new("node-2");
        peer_clock.increment();
        let peer_value =
            ConflictValue::new(Value::from(vec!["b", "c"]), peer_clock, "node-2").seal();

        let outcome = store
            .observe(PeerUpdate {
                namespace: "ns".into(),
                key: "set:tags".into(),
                value: peer_value,
            })
            .await
            .unwrap();

        match outcome {
            ObserveOutcome::Resolved(resolution) => {
                assert_eq!(resolution.strategy, Strategy::Union);
                assert_eq!(resolution.value, Value::from(vec!["a", "b", "c"]));
            }
            other => panic!("expected union resolution, got {other:?}"),
        }
    }
}
