//! TrustMesh-Codec: Shared Data Plumbing
//!
//! Foundation crate for the TrustMesh pillars.
//!
//! Features:
//! - Tagged value tree for dynamic payloads (audit details, replicated state)
//! - Canonical JSON serialization shared by signer, hasher, and wire codec
//! - Length-prefixed peer envelope for audit/KV/clock-delta sync
//! - Bounded broadcast broker for outbound platform events
//! - Bounded peer-sync queue with non-critical overflow eviction

pub mod canonical;
pub mod envelope;
pub mod events;
pub mod sync;
pub mod value;

pub use canonical::{canonicalize, sha256_hex, to_canonical_json, CANONICAL_FORMAT_VERSION};
pub use envelope::{Envelope, EnvelopeKind};
pub use events::{EventBroker, EventKind, MeshEvent};
pub use sync::{QueuedEnvelope, SyncQueue};
pub use value::Value;

use thiserror::Error;

/// Errors raised by the codec foundation.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("value is not canonicalizable: {0}")]
    NonCanonical(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("frame length {0} exceeds maximum")]
    FrameTooLarge(usize),
}
