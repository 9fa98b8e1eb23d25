//! End-to-end decision scenarios against the full mesh facade.

use trustmesh_gate::{
    AdaptiveAction, AgentType, MeshConfig, PartialContext, Policy, RiskLevel, TrustEvent,
    TrustEventType, TrustMesh, TrustOutcome,
};
use trustmesh_ledger::{AuditEventType, AuditQuery};

fn coordinator_context() -> PartialContext {
    PartialContext {
        agent_type: Some(AgentType::Coordinator),
        identity_verified: Some(true),
        ..Default::default()
    }
}

#[tokio::test]
async fn default_deny_with_empty_policy_set() {
    let mesh = TrustMesh::new(MeshConfig::default());

    let decision = mesh
        .evaluate_access("a1", "r1", "read", PartialContext::default())
        .await;

    assert!(!decision.allowed);
    assert_eq!(decision.policy_matches, vec!["default-deny".to_string()]);

    // Exactly one authorization entry, outcome denied.
    let authorization = mesh
        .query_audit(&AuditQuery {
            event_type: Some(AuditEventType::Authorization),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(authorization.len(), 1);
    assert_eq!(authorization[0].outcome, "denied");
}

#[tokio::test]
async fn trusted_coordinator_happy_path() {
    let mesh = TrustMesh::new(MeshConfig::default());
    mesh.add_policy(Policy::trusted_coordinators()).unwrap();

    // Lift trust to 0.8 with positive authentication events.
    for _ in 0..3 {
        mesh.update_trust(
            "coord-1",
            TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
        )
        .await
        .unwrap();
    }
    assert!((mesh.trust_snapshot("coord-1").overall - 0.8).abs() < 1e-9);

    let decision = mesh
        .evaluate_access("coord-1", "pipeline", "orchestrate", coordinator_context())
        .await;

    assert!(decision.allowed, "reason: {}", decision.reason);
    assert_eq!(
        decision.policy_matches,
        vec!["trusted-coordinators".to_string()]
    );
    assert_eq!(decision.time_limit_ms, Some(28_800_000));
    assert!(decision.risk_level <= RiskLevel::Low);
}

#[tokio::test]
async fn critical_risk_vetoes_policy_allow() {
    let mesh = TrustMesh::new(MeshConfig::default());

    // A policy that would allow this agent unconditionally.
    let mut open_policy = Policy::default_deny();
    open_policy.id = "open-door".into();
    open_policy.name = "Open Door".into();
    open_policy.priority = 99;
    open_policy.action.allow = true;
    mesh.add_policy(open_policy).unwrap();

    let decision = mesh
        .evaluate_access(
            "rogue-1",
            "dataset",
            "exfiltrate",
            PartialContext {
                identity_verified: Some(false),
                anomaly_score: Some(0.95),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(decision.risk_level, RiskLevel::Critical);
    assert!(!decision.allowed);
    assert_eq!(decision.reason_code, "critical_risk_veto");
    for expected in [
        AdaptiveAction::Quarantine,
        AdaptiveAction::AlertAdmin,
        AdaptiveAction::EnhanceMonitoring,
    ] {
        assert!(
            decision.adaptive_actions.contains(&expected),
            "missing {expected:?}"
        );
    }

    // The quarantine action actually landed.
    assert!(mesh.is_quarantined("rogue-1"));
}

#[tokio::test]
async fn quarantined_agent_is_always_denied() {
    let mesh = TrustMesh::new(MeshConfig::default());
    mesh.add_policy(Policy::trusted_coordinators()).unwrap();
    for _ in 0..3 {
        mesh.update_trust(
            "coord-1",
            TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
        )
        .await
        .unwrap();
    }

    mesh.quarantine("coord-1", "manual hold", None).await.unwrap();

    let decision = mesh
        .evaluate_access("coord-1", "pipeline", "orchestrate", coordinator_context())
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason_code, "quarantine_veto");

    // Release lifts the veto; the incident still dented the trust score,
    // so the agent re-earns the policy's floor before being allowed again.
    mesh.release("coord-1").await.unwrap();
    mesh.update_trust(
        "coord-1",
        TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
    )
    .await
    .unwrap();

    let decision = mesh
        .evaluate_access("coord-1", "pipeline", "orchestrate", coordinator_context())
        .await;
    assert!(decision.allowed, "reason: {}", decision.reason);
}

#[tokio::test]
async fn decision_is_deterministic_modulo_ids() {
    let mesh = TrustMesh::new(MeshConfig::default());
    mesh.add_policy(Policy::trusted_coordinators()).unwrap();
    for _ in 0..3 {
        mesh.update_trust(
            "coord-1",
            TrustEvent::new(TrustEventType::Authentication, TrustOutcome::Positive),
        )
        .await
        .unwrap();
    }

    let first = mesh
        .evaluate_access("coord-1", "pipeline", "orchestrate", coordinator_context())
        .await;
    let second = mesh
        .evaluate_access("coord-1", "pipeline", "orchestrate", coordinator_context())
        .await;

    assert_eq!(first.allowed, second.allowed);
    assert_eq!(first.reason, second.reason);
    assert_eq!(first.policy_matches, second.policy_matches);
    assert_eq!(first.risk_level, second.risk_level);
    assert_eq!(first.time_limit_ms, second.time_limit_ms);
    assert_ne!(first.request_id, second.request_id);
}

#[tokio::test]
async fn every_decision_leaves_an_audit_trail() {
    let mesh = TrustMesh::new(MeshConfig::default());
    mesh.evaluate_access("a1", "r1", "read", PartialContext::default())
        .await;

    let entries = mesh.query_audit(&AuditQuery::default()).await.unwrap();
    // Evaluation steps plus the decision entry.
    assert!(entries.len() >= 5, "got {} entries", entries.len());

    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.iter().any(|a| a.contains("evaluation_requested")));
    assert!(actions.iter().any(|a| a.contains("trust_snapshot")));
    assert!(actions.iter().any(|a| a.contains("risk_assessed")));
    assert!(actions.iter().any(|a| a.contains("policy_matched")));
    assert!(actions.iter().any(|a| *a == "read"));

    // Every entry verifies.
    for entry in &entries {
        let report = mesh.verify(entry);
        assert!(report.valid, "entry {} issues {:?}", entry.log_id, report.issues);
    }
}

#[tokio::test]
async fn concurrent_evaluations_for_distinct_agents() {
    let mesh = std::sync::Arc::new(TrustMesh::new(MeshConfig::default()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let mesh = mesh.clone();
        handles.push(tokio::spawn(async move {
            mesh.evaluate_access(
                &format!("agent-{i}"),
                "resource",
                "read",
                PartialContext::default(),
            )
            .await
        }));
    }
    for handle in handles {
        let decision = handle.await.unwrap();
        assert!(!decision.allowed);
    }

    assert_eq!(mesh.metrics().total_decisions, 8);
}
