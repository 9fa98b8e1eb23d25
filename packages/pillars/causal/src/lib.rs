//! TrustMesh-Causal: Replicated State Pillar
//!
//! Causally ordered shared state for cooperating agents.
//!
//! Features:
//! - Vector clocks with JSON and compact binary codecs, pruning for
//!   departed agents
//! - Pluggable conflict resolution: last-writer-wins, multi-value,
//!   priority, union/intersection, semantic merge, operational transforms
//! - Namespaced replicated KV store with tombstoned deletes and
//!   peer-acknowledged reaping

pub mod clock;
pub mod resolver;
pub mod store;
pub mod strategies;
pub mod transform;
pub mod value;

pub use clock::{ClockError, ClockOrdering, PruneConfig, VectorClock};
pub use resolver::{
    ConflictClass, ConflictResolver, Resolution, ResolutionRule, ResolveError, RuleCondition,
    SemanticHint, Strategy, StrategyResult,
};
pub use store::{ObserveOutcome, PeerUpdate, ReplicatedKvStore, StoreConfig, StoreError};
pub use transform::{Transform, TransformKind};
pub use value::{ConflictValue, ValueMetadata, DEFAULT_PRIORITY};
