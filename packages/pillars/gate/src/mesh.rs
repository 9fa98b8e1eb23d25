//! The mesh facade: one handle over all three pillars.
//!
//! `TrustMesh` wires the zero-trust engine, the audit ledger, the
//! security monitor, and the replicated KV store together and exposes
//! the platform-facing API. Background maintenance (flush timer,
//! retention cleanup, reconciliation sweep, metrics, quarantine and
//! tombstone sweeps, segment validation) runs on idempotent tickers that
//! stop on shutdown.

use crate::config::MeshConfig;
use crate::context::PartialContext;
use crate::engine::{GateError, ZeroTrustEngine};
use crate::metrics::MetricsSnapshot;
use crate::policy::{Policy, PolicyStore};
use crate::quarantine::QuarantineList;
use crate::segment::{NetworkSegment, SegmentStore};
use crate::trust::{TrustCalculator, TrustEvent, TrustScore};
use crate::types::AccessDecision;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use trustmesh_causal::{PeerUpdate, ReplicatedKvStore, Resolution, VectorClock};
use trustmesh_codec::{EventBroker, EventKind, MeshEvent, SyncQueue, Value};
use trustmesh_ledger::{
    AlertCenter, AuditEvent, AuditEventOptions, AuditEventType, AuditLogEntry, AuditLogWriter,
    AuditQuery, LedgerError, LedgerStatistics, SecurityMonitor, ThreatIntel,
    VerificationReport,
};

/// Capacity of the peer-sync queue.
const SYNC_QUEUE_CAPACITY: usize = 4096;

/// The trust-and-coordination core.
pub struct TrustMesh {
    config: MeshConfig,
    events: EventBroker,
    audit: Arc<AuditLogWriter>,
    threat: Arc<ThreatIntel>,
    alerts: Arc<AlertCenter>,
    engine: Arc<ZeroTrustEngine>,
    kv: Arc<ReplicatedKvStore>,
    sync_queue: Arc<SyncQueue>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TrustMesh {
    pub fn new(config: MeshConfig) -> Self {
        let events = EventBroker::default();
        let sync_queue = Arc::new(SyncQueue::new(SYNC_QUEUE_CAPACITY));

        let audit = Arc::new(
            AuditLogWriter::new(config.ledger_config())
                .with_events(events.clone())
                .with_sync_queue(sync_queue.clone()),
        );
        let threat = Arc::new(ThreatIntel::new());
        let alerts = Arc::new(AlertCenter::new(events.clone()));
        let monitor = Arc::new(SecurityMonitor::new(
            config.monitor_config(),
            threat.clone(),
            alerts.clone(),
        ));

        let trust = Arc::new(TrustCalculator::new(config.trust.clone()));
        let engine = Arc::new(
            ZeroTrustEngine::new(
                trust,
                Arc::new(PolicyStore::new()),
                Arc::new(SegmentStore::new()),
                Arc::new(QuarantineList::new()),
                audit.clone(),
                events.clone(),
            )
            .with_monitor(monitor),
        );

        let mut kv = ReplicatedKvStore::new(config.node_id()).with_config(config.store_config());
        if config.distribution.enabled {
            kv = kv.with_sync_queue(sync_queue.clone());
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            events,
            audit,
            threat,
            alerts,
            engine,
            kv: Arc::new(kv),
            sync_queue,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Access decisions
    // =========================================================================

    pub async fn evaluate_access(
        &self,
        agent_id: &str,
        resource: &str,
        action: &str,
        partial: PartialContext,
    ) -> AccessDecision {
        self.engine
            .evaluate_access(agent_id, resource, action, partial)
            .await
    }

    pub async fn update_trust(
        &self,
        agent_id: &str,
        event: TrustEvent,
    ) -> Result<TrustScore, GateError> {
        self.engine.update_trust(agent_id, event).await
    }

    pub fn trust_snapshot(&self, agent_id: &str) -> TrustScore {
        self.engine.trust().get_or_init(agent_id)
    }

    // =========================================================================
    // Policies and segments
    // =========================================================================

    pub fn add_policy(&self, policy: Policy) -> Result<(), GateError> {
        self.engine.policies().add(policy.clone())?;
        let mut payload = Value::object();
        payload.set("policy_id", policy.id);
        self.events.publish(EventKind::PolicyAdded, payload);
        Ok(())
    }

    pub fn remove_policy(&self, id: &str) -> Result<Policy, GateError> {
        let removed = self.engine.policies().remove(id)?;
        let mut payload = Value::object();
        payload.set("policy_id", id);
        self.events.publish(EventKind::PolicyRemoved, payload);
        Ok(removed)
    }

    pub fn list_policies(&self) -> Vec<Policy> {
        self.engine.policies().list()
    }

    pub fn create_segment(&self, segment: NetworkSegment) -> Result<(), GateError> {
        self.engine.segments().add(segment.clone())?;
        let mut payload = Value::object();
        payload.set("segment_id", segment.id);
        self.events.publish(EventKind::SegmentCreated, payload);
        Ok(())
    }

    pub fn list_segments(&self) -> Vec<NetworkSegment> {
        self.engine.segments().list()
    }

    // =========================================================================
    // Quarantine
    // =========================================================================

    pub async fn quarantine(
        &self,
        agent_id: &str,
        reason: &str,
        ttl_ms: Option<u64>,
    ) -> Result<(), GateError> {
        self.engine.quarantine_agent(agent_id, reason, ttl_ms).await
    }

    pub async fn release(&self, agent_id: &str) -> Result<(), GateError> {
        self.engine.release_agent(agent_id).await
    }

    pub fn is_quarantined(&self, agent_id: &str) -> bool {
        self.engine.is_quarantined(agent_id)
    }

    // =========================================================================
    // Audit
    // =========================================================================

    /// Write one audit event; returns the log id.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_event(
        &self,
        event_type: AuditEventType,
        category: Option<&str>,
        actor: &str,
        target: &str,
        action: &str,
        outcome: &str,
        details: Option<Value>,
        options: Option<AuditEventOptions>,
    ) -> Result<String, LedgerError> {
        let mut event = AuditEvent::new(event_type, actor, target, action, outcome);
        if let Some(category) = category {
            event = event.with_category(category);
        }
        if let Some(details) = details {
            event = event.with_details(details);
        }
        if let Some(options) = options {
            event.options = options;
        }
        self.audit.log(event).await
    }

    pub async fn query_audit(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, LedgerError> {
        self.audit.query(query).await
    }

    pub fn verify(&self, entry: &AuditLogEntry) -> VerificationReport {
        self.audit.verify(entry)
    }

    pub async fn audit_statistics(&self) -> Result<LedgerStatistics, LedgerError> {
        self.audit.statistics().await
    }

    pub fn alerts(&self) -> &Arc<AlertCenter> {
        &self.alerts
    }

    pub fn threat_intel(&self) -> &Arc<ThreatIntel> {
        &self.threat
    }

    // =========================================================================
    // Replicated KV
    // =========================================================================

    pub async fn kv_put(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
    ) -> Result<VectorClock, GateError> {
        self.kv
            .put(namespace, key, value)
            .await
            .map_err(|e| GateError::Evaluation(e.to_string()))
    }

    pub async fn kv_get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.kv.get(namespace, key).await
    }

    pub async fn kv_delete(&self, namespace: &str, key: &str) -> Result<VectorClock, GateError> {
        self.kv
            .delete(namespace, key)
            .await
            .map_err(|e| GateError::Evaluation(e.to_string()))
    }

    pub async fn kv_list(&self, namespace: &str, prefix: &str) -> Vec<String> {
        self.kv.list(namespace, prefix).await
    }

    /// Observe a peer update; returns the resolution when there was a
    /// genuine conflict.
    pub async fn kv_observe(&self, update: PeerUpdate) -> Result<Option<Resolution>, GateError> {
        let outcome = self
            .kv
            .observe(update)
            .await
            .map_err(|e| GateError::Evaluation(e.to_string()))?;
        Ok(match outcome {
            trustmesh_causal::ObserveOutcome::Resolved(resolution) => Some(resolution),
            _ => None,
        })
    }

    pub fn kv(&self) -> &Arc<ReplicatedKvStore> {
        &self.kv
    }

    pub fn sync_queue(&self) -> &Arc<SyncQueue> {
        &self.sync_queue
    }

    // =========================================================================
    // Events and metrics
    // =========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.engine.metrics().snapshot()
    }

    // =========================================================================
    // Background maintenance
    // =========================================================================

    /// Spawn the maintenance tickers. Each tick is idempotent; missing a
    /// tick is harmless.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        // Periodic audit flush, with exponential backoff after persist
        // failures (capped; resets on the first success).
        tasks.push(self.spawn_ticker(
            Duration::from_millis(self.config.performance.flush_interval_ms.max(1)),
            {
                let audit = self.audit.clone();
                let failures = Arc::new(std::sync::atomic::AtomicU32::new(0));
                move || {
                    let audit = audit.clone();
                    let failures = failures.clone();
                    async move {
                        use std::sync::atomic::Ordering;
                        match audit.flush().await {
                            Ok(_) => failures.store(0, Ordering::Relaxed),
                            Err(error) => {
                                let attempt = failures.fetch_add(1, Ordering::Relaxed).min(6);
                                let backoff =
                                    Duration::from_millis(500u64.saturating_mul(1 << attempt));
                                tracing::warn!(%error, ?backoff, "audit flush failed, backing off");
                                tokio::time::sleep(backoff).await;
                            }
                        }
                    }
                }
            },
        ));

        // Retention cleanup, daily.
        tasks.push(self.spawn_ticker(Duration::from_secs(24 * 60 * 60), {
            let audit = self.audit.clone();
            move || {
                let audit = audit.clone();
                async move {
                    audit.retention_cleanup().await;
                }
            }
        }));

        // Reconciliation sweep for parked adaptive actions.
        tasks.push(self.spawn_ticker(Duration::from_secs(60), {
            let engine = self.engine.clone();
            move || {
                let engine = engine.clone();
                async move {
                    engine.reconcile_pending_actions().await;
                }
            }
        }));

        // Metrics publication.
        tasks.push(self.spawn_ticker(Duration::from_secs(60), {
            let engine = self.engine.clone();
            let events = self.events.clone();
            move || {
                let engine = engine.clone();
                let events = events.clone();
                async move {
                    let snapshot = engine.metrics().snapshot();
                    let payload = serde_json::to_value(&snapshot)
                        .map(|json| Value::from_json(&json))
                        .unwrap_or(Value::Null);
                    events.publish(EventKind::PerformanceMetrics, payload);
                }
            }
        }));

        // Expired quarantine markers.
        tasks.push(self.spawn_ticker(Duration::from_secs(60), {
            let engine = self.engine.clone();
            let events = self.events.clone();
            move || {
                let engine = engine.clone();
                let events = events.clone();
                async move {
                    let swept = engine.quarantine_list().sweep_expired();
                    if swept > 0 {
                        let mut payload = Value::object();
                        payload.set("expired_quarantines", swept as u64);
                        events.publish(EventKind::ContextsCleaned, payload);
                    }
                }
            }
        }));

        // Segment topology validation.
        tasks.push(self.spawn_ticker(Duration::from_secs(30 * 60), {
            let engine = self.engine.clone();
            let events = self.events.clone();
            move || {
                let engine = engine.clone();
                let events = events.clone();
                async move {
                    let issues = engine.segments().validate_topology();
                    if !issues.is_empty() {
                        tracing::warn!(?issues, "segment validation found violations");
                        let payload = Value::Array(
                            issues.iter().map(|i| Value::from(i.as_str())).collect(),
                        );
                        events.publish(EventKind::PolicyViolations, payload);
                    }
                }
            }
        }));

        // Clock pruning and tombstone reaping.
        tasks.push(self.spawn_ticker(
            Duration::from_millis(self.config.clock_prune.prune_interval_ms.max(1)),
            {
                let kv = self.kv.clone();
                move || {
                    let kv = kv.clone();
                    async move {
                        kv.prune_clock().await;
                        kv.sweep_tombstones(&[]).await;
                    }
                }
            },
        ));
    }

    fn spawn_ticker<F, Fut>(&self, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = interval.tick() => tick().await,
                }
            }
        })
    }

    /// Stop background tasks and flush what's buffered.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Err(error) = self.audit.flush().await {
            tracing::warn!(%error, "final audit flush failed during shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mesh_wires_all_pillars() {
        let mesh = TrustMesh::new(MeshConfig::default());

        // Gate surface.
        let decision = mesh
            .evaluate_access("a1", "r1", "read", PartialContext::default())
            .await;
        assert!(!decision.allowed);

        // Ledger surface.
        let log_id = mesh
            .log_event(
                AuditEventType::SystemEvent,
                None,
                "a1",
                "svc",
                "ping",
                "success",
                None,
                None,
            )
            .await
            .unwrap();
        assert!(!log_id.is_empty());

        // Causal surface.
        mesh.kv_put("ns", "k", Value::from("v")).await.unwrap();
        assert_eq!(mesh.kv_get("ns", "k").await, Some(Value::from("v")));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mesh = TrustMesh::new(MeshConfig::default());
        mesh.start().await;
        mesh.shutdown().await;
    }

    #[tokio::test]
    async fn test_policy_events() {
        let mesh = TrustMesh::new(MeshConfig::default());
        let mut rx = mesh.subscribe();

        mesh.add_policy(Policy::trusted_coordinators()).unwrap();
        mesh.remove_policy("trusted-coordinators").unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert!(kinds.contains(&EventKind::PolicyAdded));
        assert!(kinds.contains(&EventKind::PolicyRemoved));
    }
}
