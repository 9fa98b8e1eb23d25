//! Buffered, signed, sequenced audit writer.
//!
//! Entries are appended to an in-memory buffer and flushed when the buffer
//! reaches capacity, when a critical or security event arrives, or when the
//! periodic flush timer fires. Sequence assignment and signing happen
//! inside the append critical section so the signed sequence number can
//! never drift from append order. Persist failures restore entries to the
//! front of the buffer; nothing is dropped silently.

use crate::entry::{
    derive_regulations, derive_severity, AuditEvent, AuditEventType, AuditLogEntry,
    AuditSeverity, ComplianceBlock, EntryContext, Regulation, SecurityBlock,
};
use crate::signer::{LedgerSigner, VerificationReport};
use crate::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use trustmesh_codec::sync::EnqueueOutcome;
use trustmesh_codec::{Envelope, EnvelopeKind, EventBroker, EventKind, SyncQueue, Value};
use uuid::Uuid;

/// Long-retention default for security and compliance entries (~7 years).
const LONG_RETENTION_DAYS: u32 = 2555;

/// Writer configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub node_id: String,
    pub environment: String,
    pub version: String,
    /// Flush threshold.
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    /// Compute and verify Ed25519 signatures.
    pub digital_signatures: bool,
    /// Compute and verify SHA-256 checksums.
    pub log_integrity: bool,
    pub retention_default_days: u32,
    /// Per-category retention overrides.
    pub retention_by_category: BTreeMap<String, u32>,
    /// Regulations the deployment cares about.
    pub enabled_regulations: BTreeSet<Regulation>,
    /// Mirror flushed entries to the peer-sync queue.
    pub distribution_enabled: bool,
    /// Peer queue acceptance is required for durability acknowledgment.
    pub consensus_required: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            node_id: "node-0".to_string(),
            environment: "production".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            buffer_size: 1000,
            flush_interval_ms: 30_000,
            digital_signatures: true,
            log_integrity: true,
            retention_default_days: 365,
            retention_by_category: BTreeMap::new(),
            enabled_regulations: BTreeSet::from([
                Regulation::Gdpr,
                Regulation::Sox,
                Regulation::Hipaa,
                Regulation::PciDss,
            ]),
            distribution_enabled: false,
            consensus_required: false,
        }
    }
}

/// Query filter over persisted entries.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub event_type: Option<AuditEventType>,
    pub severity: Option<AuditSeverity>,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub outcome: Option<String>,
    pub regulation: Option<Regulation>,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

impl AuditQuery {
    fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(event_type) = self.event_type {
            if entry.event_type != event_type {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity != severity {
                return false;
            }
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(target) = &self.target {
            if &entry.target != target {
                return false;
            }
        }
        if let Some(outcome) = &self.outcome {
            if &entry.outcome != outcome {
                return false;
            }
        }
        if let Some(regulation) = self.regulation {
            if !entry.compliance.regulations.contains(&regulation) {
                return false;
            }
        }
        true
    }
}

/// Persistence backend for flushed entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn persist(&self, entries: Vec<AuditLogEntry>) -> Result<(), LedgerError>;
    /// Read a page of persisted entries in append order.
    async fn read(&self, offset: usize, limit: usize) -> Result<Vec<AuditLogEntry>, LedgerError>;
    async fn count(&self) -> usize;
    /// Remove entries past their retention deadline; returns removed count.
    async fn remove_expired(&self, now: DateTime<Utc>) -> usize;
}

/// In-memory sink; the surrounding product plugs a database-backed one.
#[derive(Default)]
pub struct MemorySink {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditSink for MemorySink {
    async fn persist(&self, entries: Vec<AuditLogEntry>) -> Result<(), LedgerError> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn read(&self, offset: usize, limit: usize) -> Result<Vec<AuditLogEntry>, LedgerError> {
        let entries = self.entries.read().await;
        let end = if limit == 0 {
            entries.len()
        } else {
            (offset + limit).min(entries.len())
        };
        if offset >= entries.len() {
            return Ok(Vec::new());
        }
        Ok(entries[offset..end].to_vec())
    }

    async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|entry| entry.retention_deadline() > now);
        before - entries.len()
    }
}

/// Lazy, restartable reader over persisted entries.
pub struct AuditCursor {
    sink: Arc<dyn AuditSink>,
    position: usize,
}

impl AuditCursor {
    /// Fetch the next batch, advancing the cursor. Empty batch means end.
    pub async fn next_batch(&mut self, max: usize) -> Result<Vec<AuditLogEntry>, LedgerError> {
        let batch = self.sink.read(self.position, max).await?;
        self.position += batch.len();
        Ok(batch)
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Rewind to an earlier position (restartable sequence).
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }
}

/// Aggregate numbers for compliance reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LedgerStatistics {
    pub total_entries: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub denied_count: usize,
    pub integrity_failures: u64,
}

/// The tamper-evident audit writer.
pub struct AuditLogWriter {
    config: LedgerConfig,
    signer: LedgerSigner,
    sink: Arc<dyn AuditSink>,
    buffer: Mutex<VecDeque<AuditLogEntry>>,
    sequence: AtomicU64,
    sync_sequence: AtomicU64,
    integrity_failures: AtomicU64,
    /// Entries that failed verification, held for manual review.
    quarantined: RwLock<Vec<(AuditLogEntry, Vec<String>)>>,
    events: EventBroker,
    sync: Option<Arc<SyncQueue>>,
}

impl AuditLogWriter {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_sink(config, Arc::new(MemorySink::new()))
    }

    pub fn with_sink(config: LedgerConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            config,
            signer: LedgerSigner::generate(),
            sink,
            buffer: Mutex::new(VecDeque::new()),
            sequence: AtomicU64::new(0),
            sync_sequence: AtomicU64::new(0),
            integrity_failures: AtomicU64::new(0),
            quarantined: RwLock::new(Vec::new()),
            events: EventBroker::default(),
            sync: None,
        }
    }

    pub fn with_events(mut self, events: EventBroker) -> Self {
        self.events = events;
        self
    }

    pub fn with_sync_queue(mut self, queue: Arc<SyncQueue>) -> Self {
        self.sync = Some(queue);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn public_key_b64(&self) -> String {
        self.signer.public_key_b64()
    }

    /// Append one event; returns the assigned log id.
    pub async fn log(&self, event: AuditEvent) -> Result<String, LedgerError> {
        Ok(self.log_entry(event).await?.log_id)
    }

    /// Append one event and hand back the full signed entry, for callers
    /// that feed the security monitor.
    pub async fn log_entry(&self, event: AuditEvent) -> Result<AuditLogEntry, LedgerError> {
        if event.actor.trim().is_empty() {
            return Err(LedgerError::MissingRequiredField("actor".into()));
        }
        if event.action.trim().is_empty() {
            return Err(LedgerError::MissingRequiredField("action".into()));
        }

        let severity = event
            .options
            .severity
            .unwrap_or_else(|| derive_severity(event.event_type, &event.outcome));
        let regulations: Vec<Regulation> =
            derive_regulations(event.event_type, event.category.as_deref())
                .into_iter()
                .filter(|regulation| self.config.enabled_regulations.contains(regulation))
                .collect();
        let retention_days = self.retention_days(event.event_type, event.category.as_deref());

        let log_id = Uuid::new_v4().to_string();
        let mut entry = AuditLogEntry {
            log_id: log_id.clone(),
            timestamp: Utc::now(),
            event_type: event.event_type,
            severity,
            actor: event.actor,
            target: event.target,
            action: event.action,
            outcome: event.outcome,
            details: event.details,
            compliance: ComplianceBlock {
                regulations,
                data_classification: event.options.data_classification,
                retention_days,
                tags: event.options.tags,
            },
            security: SecurityBlock {
                risk_level: event.options.risk_level,
                ..Default::default()
            },
            context: EntryContext {
                request_id: event.options.request_id,
                trace_id: event.options.trace_id,
                span_id: event.options.span_id,
                environment: self.config.environment.clone(),
                version: self.config.version.clone(),
                node_id: self.config.node_id.clone(),
                sequence: 0,
            },
        };

        // Sequence assignment and signing stay inside the append critical
        // section: the signed sequence must equal the append order.
        let must_flush = {
            let mut buffer = self.buffer.lock().await;

            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            entry.context.sequence = sequence;
            entry.security.correlation_id =
                format!("{}-{:020}", self.config.node_id, sequence);

            if self.config.digital_signatures {
                self.signer.sign_entry(&mut entry)?;
            } else if self.config.log_integrity {
                LedgerSigner::checksum_entry(&mut entry)?;
            }

            let hard_cap = self.config.buffer_size.saturating_mul(2).max(1);
            if buffer.len() >= hard_cap {
                let victim = buffer
                    .iter()
                    .position(|queued| queued.severity < AuditSeverity::Critical);
                if let Some(dropped) = victim.and_then(|index| buffer.remove(index)) {
                    tracing::error!(
                        log_id = %dropped.log_id,
                        "audit buffer hard cap reached, dropping oldest non-critical entry"
                    );
                    let mut payload = Value::object();
                    payload.set("reason", "audit buffer hard cap reached");
                    payload.set("dropped_log_id", dropped.log_id);
                    self.events.publish(EventKind::SecurityAlert, payload);
                }
            }

            buffer.push_back(entry.clone());
            buffer.len() >= self.config.buffer_size
                || severity == AuditSeverity::Critical
                || event.event_type == AuditEventType::SecurityEvent
        };

        tracing::debug!(
            log_id = %log_id,
            event_type = ?entry.event_type,
            severity = ?entry.severity,
            sequence = entry.context.sequence,
            "audit entry appended"
        );

        let mut payload = Value::object();
        payload.set("log_id", log_id.clone());
        payload.set("actor", entry.actor.clone());
        payload.set("outcome", entry.outcome.clone());
        self.events.publish(EventKind::LogEntryCreated, payload);

        if must_flush {
            self.flush().await?;
        }
        Ok(entry)
    }

    /// Flush buffered entries to the sink. Returns the number persisted.
    pub async fn flush(&self) -> Result<usize, LedgerError> {
        let pending: Vec<AuditLogEntry> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if pending.is_empty() {
            return Ok(0);
        }
        let count = pending.len();

        if let Err(error) = self.sink.persist(pending.clone()).await {
            // Restore to the front so nothing is lost and order holds.
            let mut buffer = self.buffer.lock().await;
            for entry in pending.into_iter().rev() {
                buffer.push_front(entry);
            }
            tracing::warn!(%error, "audit flush failed, entries restored to buffer");
            return Err(LedgerError::PersistFailure(error.to_string()));
        }

        if self.config.distribution_enabled {
            self.mirror_to_peers(&pending)?;
        }

        tracing::debug!(count, "audit entries flushed");
        Ok(count)
    }

    fn retention_days(&self, event_type: AuditEventType, category: Option<&str>) -> u32 {
        if let Some(category) = category {
            if let Some(&days) = self.config.retention_by_category.get(category) {
                return days;
            }
        }
        match event_type {
            AuditEventType::SecurityEvent | AuditEventType::Compliance => LONG_RETENTION_DAYS,
            _ => self.config.retention_default_days,
        }
    }

    /// Verify an entry produced by this writer.
    pub fn verify(&self, entry: &AuditLogEntry) -> VerificationReport {
        self.signer.verify_entry(
            entry,
            self.config.digital_signatures,
            self.config.log_integrity,
        )
    }

    /// Admit an entry received from a peer. Invalid entries are quarantined
    /// for manual review and never become visible history.
    pub async fn ingest_remote(&self, entry: AuditLogEntry) -> Result<(), LedgerError> {
        let report = self.verify(&entry);
        if report.valid {
            self.sink
                .persist(vec![entry])
                .await
                .map_err(|e| LedgerError::PersistFailure(e.to_string()))?;
            return Ok(());
        }

        self.integrity_failures.fetch_add(1, Ordering::Relaxed);
        let issues = report.issues.clone();
        tracing::error!(log_id = %entry.log_id, ?issues, "integrity failure on remote entry");

        let mut payload = Value::object();
        payload.set("log_id", entry.log_id.clone());
        payload.set(
            "issues",
            Value::Array(issues.iter().map(|i| Value::from(i.as_str())).collect()),
        );
        self.events.publish(EventKind::SecurityAlert, payload);

        self.quarantined.write().await.push((entry, issues.clone()));
        Err(LedgerError::SignatureFailure(issues.join("; ")))
    }

    pub fn integrity_failure_count(&self) -> u64 {
        self.integrity_failures.load(Ordering::Relaxed)
    }

    pub async fn quarantined_entries(&self) -> Vec<(AuditLogEntry, Vec<String>)> {
        self.quarantined.read().await.clone()
    }

    /// Query entries with pagination. Covers persisted history plus the
    /// not-yet-flushed buffer tail, so writers read their own writes.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, LedgerError> {
        let mut all = self.sink.read(0, 0).await?;
        {
            let buffer = self.buffer.lock().await;
            all.extend(buffer.iter().cloned());
        }
        let matched = all.into_iter().filter(|entry| query.matches(entry));
        let matched = matched.skip(query.offset);
        Ok(if query.limit == 0 {
            matched.collect()
        } else {
            matched.take(query.limit).collect()
        })
    }

    /// Restartable cursor over persisted entries.
    pub fn cursor(&self) -> AuditCursor {
        AuditCursor {
            sink: self.sink.clone(),
            position: 0,
        }
    }

    /// Aggregate statistics for compliance reporting.
    pub async fn statistics(&self) -> Result<LedgerStatistics, LedgerError> {
        let all = self.sink.read(0, 0).await?;
        let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
        let mut denied = 0usize;
        for entry in &all {
            let key = format!("{:?}", entry.severity).to_lowercase();
            *by_severity.entry(key).or_insert(0) += 1;
            if entry.outcome == "denied" {
                denied += 1;
            }
        }
        Ok(LedgerStatistics {
            total_entries: all.len(),
            by_severity,
            denied_count: denied,
            integrity_failures: self.integrity_failure_count(),
        })
    }

    /// Export persisted entries as pretty JSON for auditors.
    pub async fn export_json(&self) -> Result<String, LedgerError> {
        let all = self.sink.read(0, 0).await?;
        serde_json::to_string_pretty(&all)
            .map_err(|e| LedgerError::PersistFailure(e.to_string()))
    }

    /// Purge entries beyond their retention deadline; returns purge count.
    pub async fn retention_cleanup(&self) -> usize {
        let removed = self.sink.remove_expired(Utc::now()).await;
        if removed > 0 {
            tracing::info!(removed, "retention cleanup purged expired entries");
        }
        removed
    }

    /// Enqueue flushed entries for peer delivery. With consensus required,
    /// a rejected enqueue fails the durability acknowledgment.
    fn mirror_to_peers(&self, entries: &[AuditLogEntry]) -> Result<(), LedgerError> {
        let Some(queue) = &self.sync else {
            return Ok(());
        };
        for entry in entries {
            let payload = serde_json::to_value(entry)
                .map(|json| Value::from_json(&json))
                .map_err(|e| LedgerError::PersistFailure(e.to_string()))?;
            let sequence = self.sync_sequence.fetch_add(1, Ordering::Relaxed);
            let envelope = Envelope::new(
                self.config.node_id.clone(),
                sequence,
                EnvelopeKind::Audit,
                payload,
            );
            let critical = entry.severity == AuditSeverity::Critical;
            match queue.enqueue(envelope, critical) {
                EnqueueOutcome::Accepted => {}
                EnqueueOutcome::Evicted(dropped) => {
                    // Overflow evictions surface as a persistence alert.
                    let mut payload = Value::object();
                    payload.set("reason", "peer sync queue overflow");
                    payload.set("dropped", dropped as u64);
                    self.events.publish(EventKind::SecurityAlert, payload);
                }
                EnqueueOutcome::Rejected if self.config.consensus_required => {
                    return Err(LedgerError::PersistFailure(
                        "peer sync queue rejected an entry required for consensus".into(),
                    ));
                }
                EnqueueOutcome::Rejected => {
                    tracing::warn!(log_id = %entry.log_id, "peer sync queue rejected entry");
                }
            }
        }
        Ok(())
    }
}
