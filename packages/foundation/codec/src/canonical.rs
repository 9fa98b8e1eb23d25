//! Canonical JSON serialization.
//!
//! One serializer feeds the audit signer, the checksum hasher, and the wire
//! codec. Object keys are emitted in sorted order (the value tree stores
//! objects in a `BTreeMap`, and serde_json's default map is ordered), floats
//! go through serde_json's shortest-roundtrip formatting, and byte payloads
//! are tagged base64 strings. Persisted blobs embed
//! [`CANONICAL_FORMAT_VERSION`] so readers can detect a format change.

use crate::value::Value;
use crate::CodecError;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Version of the canonicalization format embedded in persisted blobs.
pub const CANONICAL_FORMAT_VERSION: u32 = 1;

/// Serialize a value tree to its canonical JSON text.
pub fn to_canonical_json(value: &Value) -> Result<String, CodecError> {
    if let Some(f) = non_finite(value) {
        return Err(CodecError::NonCanonical(format!(
            "non-finite float {f} has no canonical form"
        )));
    }
    Ok(serde_json::to_string(&value.to_json())?)
}

/// Canonicalize any serde-serializable type.
///
/// The type is lowered to the serde_json model first, which sorts object
/// keys, then rendered without whitespace.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&json)?)
}

/// Hex-encoded SHA-256 digest of a byte string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

fn non_finite(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) if !f.is_finite() => Some(*f),
        Value::Array(items) => items.iter().find_map(non_finite),
        Value::Object(map) => map.values().find_map(non_finite),
        _ => None,
    }
}
