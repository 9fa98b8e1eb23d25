//! Audit entry model.
//!
//! Every security-relevant event becomes one signed, checksummed entry.
//! The correlation id embeds the node id and a per-node monotonic sequence
//! number, which gives entries from one node a total order and lets peers
//! recover causal order across nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trustmesh_codec::Value;

/// Event taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Authentication,
    Authorization,
    DataAccess,
    SystemEvent,
    SecurityEvent,
    Compliance,
}

/// Entry severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Regulations an entry may fall under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Regulation {
    #[serde(rename = "GDPR")]
    Gdpr,
    #[serde(rename = "SOX")]
    Sox,
    #[serde(rename = "HIPAA")]
    Hipaa,
    #[serde(rename = "PCI-DSS")]
    PciDss,
}

/// Compliance metadata attached to each entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComplianceBlock {
    #[serde(default)]
    pub regulations: Vec<Regulation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_classification: Option<String>,
    /// Days this entry must be retained.
    pub retention_days: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Security metadata, including the integrity fields.
///
/// `signature` covers the whole entry with both integrity fields emptied;
/// `checksum` covers the signed entry with only the checksum emptied, so
/// the checksum also protects the signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub threat_indicators: Vec<String>,
    /// `<node_id>-<zero-padded sequence>`: sortable per-node total order.
    pub correlation_id: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub checksum: String,
}

/// Request-scoped context carried on each entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub environment: String,
    pub version: String,
    pub node_id: String,
    /// Per-node monotonic append sequence.
    pub sequence: u64,
}

/// A single tamper-evident audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub log_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub actor: String,
    pub target: String,
    pub action: String,
    pub outcome: String,
    #[serde(default)]
    pub details: Value,
    pub compliance: ComplianceBlock,
    pub security: SecurityBlock,
    pub context: EntryContext,
}

impl AuditLogEntry {
    /// Moment after which this entry may be purged.
    pub fn retention_deadline(&self) -> DateTime<Utc> {
        self.timestamp + chrono::Duration::days(self.compliance.retention_days as i64)
    }
}

/// An event submitted to the writer.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    /// Free-form category ("data", "financial", "health", "payment", ...).
    pub category: Option<String>,
    pub actor: String,
    pub target: String,
    pub action: String,
    pub outcome: String,
    pub details: Value,
    pub options: AuditEventOptions,
}

/// Optional knobs on a submitted event.
#[derive(Debug, Clone, Default)]
pub struct AuditEventOptions {
    /// Override the derived severity.
    pub severity: Option<AuditSeverity>,
    pub risk_level: Option<String>,
    pub data_classification: Option<String>,
    pub tags: Vec<String>,
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        actor: impl Into<String>,
        target: impl Into<String>,
        action: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            category: None,
            actor: actor.into(),
            target: target.into(),
            action: action.into(),
            outcome: outcome.into(),
            details: Value::Null,
            options: AuditEventOptions::default(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.options.severity = Some(severity);
        self
    }

    pub fn with_risk_level(mut self, risk_level: impl Into<String>) -> Self {
        self.options.risk_level = Some(risk_level.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.options.request_id = Some(request_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.options.tags.push(tag.into());
        self
    }
}

/// Derive severity when the submitter didn't pick one.
pub fn derive_severity(event_type: AuditEventType, outcome: &str) -> AuditSeverity {
    let failed = matches!(outcome, "failure" | "error");
    match event_type {
        AuditEventType::SecurityEvent if failed => AuditSeverity::Critical,
        AuditEventType::Authentication if failed => AuditSeverity::Error,
        _ if outcome == "denied" => AuditSeverity::Warning,
        _ => AuditSeverity::Info,
    }
}

/// Regulations applicable to an event, before config filtering.
pub fn derive_regulations(
    event_type: AuditEventType,
    category: Option<&str>,
) -> Vec<Regulation> {
    let mut regulations = Vec::new();
    let category = category.unwrap_or("");

    if event_type == AuditEventType::DataAccess || category.contains("data") {
        regulations.push(Regulation::Gdpr);
    }
    if category.contains("financial") {
        regulations.push(Regulation::Sox);
    }
    if category.contains("health") {
        regulations.push(Regulation::Hipaa);
    }
    if category.contains("payment") {
        regulations.push(Regulation::PciDss);
    }
    regulations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_derivation() {
        assert_eq!(
            derive_severity(AuditEventType::SecurityEvent, "failure"),
            AuditSeverity::Critical
        );
        assert_eq!(
            derive_severity(AuditEventType::Authentication, "error"),
            AuditSeverity::Error
        );
        assert_eq!(
            derive_severity(AuditEventType::Authorization, "denied"),
            AuditSeverity::Warning
        );
        assert_eq!(
            derive_severity(AuditEventType::DataAccess, "success"),
            AuditSeverity::Info
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(AuditSeverity::Critical > AuditSeverity::Error);
        assert!(AuditSeverity::Error > AuditSeverity::Warning);
        assert!(AuditSeverity::Warning > AuditSeverity::Info);
    }

    #[test]
    fn test_regulation_derivation() {
        assert_eq!(
            derive_regulations(AuditEventType::DataAccess, None),
            vec![Regulation::Gdpr]
        );
        assert_eq!(
            derive_regulations(AuditEventType::SystemEvent, Some("financial")),
            vec![Regulation::Sox]
        );
        assert_eq!(
            derive_regulations(AuditEventType::DataAccess, Some("health-data")),
            vec![Regulation::Gdpr, Regulation::Hipaa]
        );
        assert!(derive_regulations(AuditEventType::SystemEvent, None).is_empty());
    }

    #[test]
    fn test_regulation_wire_names() {
        assert_eq!(
            serde_json::to_string(&Regulation::PciDss).unwrap(),
            "\"PCI-DSS\""
        );
        assert_eq!(serde_json::to_string(&Regulation::Gdpr).unwrap(), "\"GDPR\"");
    }

    #[test]
    fn test_retention_deadline() {
        let entry = AuditLogEntry {
            log_id: "x".into(),
            timestamp: Utc::now(),
            event_type: AuditEventType::SystemEvent,
            severity: AuditSeverity::Info,
            actor: "a".into(),
            target: "t".into(),
            action: "act".into(),
            outcome: "success".into(),
            details: Value::Null,
            compliance: ComplianceBlock {
                retention_days: 30,
                ..Default::default()
            },
            security: SecurityBlock::default(),
            context: EntryContext::default(),
        };
        assert!(entry.retention_deadline() > Utc::now() + chrono::Duration::days(29));
    }
}
