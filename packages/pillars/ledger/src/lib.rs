//! TrustMesh-Ledger: Tamper-Evident Audit Pillar
//!
//! Every security-relevant event becomes a signed, checksummed, causally
//! ordered log entry; alerts and compliance reports derive from the stream.
//!
//! Features:
//! - Ed25519 signatures + SHA-256 checksums over canonical JSON
//! - Buffered writer with per-node monotonic sequencing and
//!   restore-on-persist-failure
//! - Filterable query API, cursor reader, retention cleanup
//! - Anomaly detection, failure correlation, threat-indicator matching
//! - Security alert lifecycle with automated responses

pub mod alerts;
pub mod anomaly;
pub mod correlation;
pub mod entry;
pub mod monitor;
pub mod signer;
pub mod threat;
pub mod writer;

pub use alerts::{
    AlertCenter, AlertSeverity, AlertSource, AlertStatus, ResponsePlan, SecurityAlert,
};
pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalyFinding};
pub use correlation::{CorrelationConfig, CorrelationEngine, CorrelationFinding};
pub use entry::{
    derive_regulations, derive_severity, AuditEvent, AuditEventOptions, AuditEventType,
    AuditLogEntry, AuditSeverity, ComplianceBlock, EntryContext, Regulation, SecurityBlock,
};
pub use monitor::{MonitorConfig, SecurityMonitor};
pub use signer::{LedgerSigner, VerificationReport};
pub use threat::{ThreatIndicator, ThreatIntel};
pub use writer::{
    AuditCursor, AuditLogWriter, AuditQuery, AuditSink, LedgerConfig, LedgerStatistics,
    MemorySink,
};

use thiserror::Error;

/// Ledger error taxonomy.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("signature failure: {0}")]
    SignatureFailure(String),
    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),
    #[error("entry timestamp is in the future")]
    FutureTimestamp,
    #[error("missing required field: {0}")]
    MissingRequiredField(String),
    #[error("persist failure: {0}")]
    PersistFailure(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
