//! End-to-end tamper detection: sign an entry, flip a byte, verify.

use std::sync::Arc;
use trustmesh_codec::{EventBroker, EventKind, Value};
use trustmesh_ledger::{
    AlertCenter, AlertSeverity, AuditEvent, AuditEventType, AuditLogWriter, AuditQuery,
    LedgerConfig, SecurityAlert,
};

#[tokio::test]
async fn tampered_detail_fails_verification_and_alerts() {
    let broker = EventBroker::new(64);
    let mut rx = broker.subscribe();
    let writer = AuditLogWriter::new(LedgerConfig::default()).with_events(broker.clone());

    let mut details = Value::object();
    details.set("description", "payout approved for vendor 42");
    writer
        .log(
            AuditEvent::new(
                AuditEventType::DataAccess,
                "agent-payments",
                "ledger-db",
                "update",
                "success",
            )
            .with_category("financial-data")
            .with_details(details),
        )
        .await
        .unwrap();
    writer.flush().await.unwrap();

    let entry = writer
        .query(&AuditQuery::default())
        .await
        .unwrap()
        .remove(0);

    // Untouched entry verifies clean.
    let report = writer.verify(&entry);
    assert!(report.valid, "issues: {:?}", report.issues);

    // Flip one byte inside details.description.
    let mut tampered = entry.clone();
    tampered
        .details
        .set("description", "payout approved for vendor 43");

    let report = writer.verify(&tampered);
    assert!(!report.valid);
    assert!(
        report
            .issues
            .iter()
            .any(|i| i.contains("Checksum mismatch") || i.contains("Invalid digital signature")),
        "unexpected issues: {:?}",
        report.issues
    );

    // Admitting the tampered copy is refused, quarantined, and alerted.
    assert!(writer.ingest_remote(tampered).await.is_err());
    assert_eq!(writer.integrity_failure_count(), 1);

    let mut saw_security_alert = false;
    while let Ok(event) = rx.try_recv() {
        if event.kind == EventKind::SecurityAlert {
            saw_security_alert = true;
        }
    }
    assert!(saw_security_alert, "integrity failure must raise an alert");
}

#[tokio::test]
async fn signature_survives_roundtrip_through_wire_json() {
    let writer = AuditLogWriter::new(LedgerConfig::default());
    writer
        .log(AuditEvent::new(
            AuditEventType::Authorization,
            "agent-1",
            "resource-1",
            "read",
            "denied",
        ))
        .await
        .unwrap();
    writer.flush().await.unwrap();

    let entry = writer
        .query(&AuditQuery::default())
        .await
        .unwrap()
        .remove(0);

    // Serialize and reparse, as the peer envelope would.
    let wire = serde_json::to_string(&entry).unwrap();
    let parsed: trustmesh_ledger::AuditLogEntry = serde_json::from_str(&wire).unwrap();

    let report = writer.verify(&parsed);
    assert!(report.valid, "issues: {:?}", report.issues);
}

#[tokio::test]
async fn alert_center_auto_blocks_on_critical() {
    let broker = EventBroker::new(64);
    let mut rx = broker.subscribe();
    let center = Arc::new(AlertCenter::new(broker));

    center
        .raise(SecurityAlert::new(
            "intrusion_attempt",
            AlertSeverity::Critical,
            "coordinated failures",
            "",
        ))
        .await;

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(event.kind);
    }
    assert!(kinds.contains(&EventKind::BlockAgent));
    assert!(kinds.contains(&EventKind::NotifyAdmin));
    assert!(kinds.contains(&EventKind::Escalate));
}
