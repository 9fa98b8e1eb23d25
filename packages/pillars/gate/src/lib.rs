//! TrustMesh-Gate: Zero-Trust Decision Pillar
//!
//! Decides, for every inter-agent operation, whether it is allowed and
//! under what constraints.
//!
//! Features:
//! - Per-agent trust scores with event deltas and contextual adjustment
//! - Deterministic risk assessment with discrete levels
//! - Priority-ordered policy engine over copy-on-write snapshots,
//!   default-deny backstop, YAML catalogs
//! - Network segments with isolation invariants
//! - Adaptive responses (quarantine, re-auth, monitoring uplift) with
//!   at-least-once execution and a reconciliation sweep
//! - Fail-secure evaluation: any internal error denies and audits
//! - The `TrustMesh` facade tying gate, ledger, and causal together

pub mod config;
pub mod context;
pub mod engine;
pub mod mesh;
pub mod metrics;
pub mod policy;
pub mod quarantine;
pub mod responder;
pub mod risk;
pub mod segment;
pub mod trust;
pub mod types;

pub use config::{ConfigError, MeshConfig};
pub use context::{
    ActorDescriptor, BehaviorBlock, IdentityBlock, PartialContext, ResourceBlock,
    SecurityContext,
};
pub use engine::{EngineConfig, GateError, PendingAction, ZeroTrustEngine};
pub use mesh::TrustMesh;
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use policy::{
    evaluate as evaluate_policies, Policy, PolicyAction, PolicyConditions, PolicyError,
    PolicyStore, PolicyVerdict, TimeWindow,
};
pub use quarantine::{QuarantineList, QuarantineMarker, QuarantineRecord};
pub use responder::{AdaptiveAction, AdaptiveResponder, ResponsePlan};
pub use risk::{FactorSeverity, RiskAssessment, RiskAssessor, RiskFactor, RiskLevel};
pub use segment::{NetworkSegment, SegmentError, SegmentStore, SegmentType};
pub use trust::{
    AgentTrustState, TrustCalculator, TrustComponents, TrustConfig, TrustEvent, TrustEventType,
    TrustOutcome, TrustScore,
};
pub use types::{AccessDecision, AgentType, Sensitivity};
