//! Peer wire envelope.
//!
//! Nodes exchange audit entries, KV updates, and clock deltas as
//! length-prefixed canonical-JSON frames. The prefix is a big-endian `u32`
//! byte count; the body is the canonical serialization of [`Envelope`].

use crate::canonical::canonicalize;
use crate::value::Value;
use crate::CodecError;
use serde::{Deserialize, Serialize};

/// Hard cap on a single frame; a peer advertising more is misbehaving.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Kind of payload carried by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Full audit entry, including signature and checksum.
    Audit,
    /// Replicated KV update.
    Kv,
    /// Vector-clock delta.
    ClockDelta,
}

/// A single sync frame between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Originating node.
    pub node_id: String,
    /// Per-node monotonic sequence number.
    pub sequence: u64,
    /// Payload kind.
    pub kind: EnvelopeKind,
    /// Payload body.
    pub payload: Value,
}

impl Envelope {
    pub fn new(
        node_id: impl Into<String>,
        sequence: u64,
        kind: EnvelopeKind,
        payload: Value,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            sequence,
            kind,
            payload,
        }
    }

    /// Encode as a length-prefixed frame.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = canonicalize(self)?;
        let body = body.into_bytes();
        if body.len() > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(body.len()));
        }
        let mut frame = Vec::with_capacity(4 + body.len());
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode one frame from the front of a buffer.
    ///
    /// Returns the envelope and the number of bytes consumed so callers can
    /// walk a stream of concatenated frames.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::Truncated {
                needed: 4,
                have: buf.len(),
            });
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(len));
        }
        let total = 4 + len;
        if buf.len() < total {
            return Err(CodecError::Truncated {
                needed: total,
                have: buf.len(),
            });
        }
        let envelope: Envelope = serde_json::from_slice(&buf[4..total])?;
        Ok((envelope, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut payload = Value::object();
        payload.set("key", "state:tags");
        payload.set("version", 3i64);

        let envelope = Envelope::new("node-a", 17, EnvelopeKind::Kv, payload);
        let frame = envelope.encode().unwrap();
        let (decoded, consumed) = Envelope::decode(&frame).unwrap();

        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_walks_concatenated_frames() {
        let a = Envelope::new("n", 1, EnvelopeKind::Audit, Value::Null);
        let b = Envelope::new("n", 2, EnvelopeKind::ClockDelta, Value::Null);

        let mut stream = a.encode().unwrap();
        stream.extend(b.encode().unwrap());

        let (first, used) = Envelope::decode(&stream).unwrap();
        let (second, _) = Envelope::decode(&stream[used..]).unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
    }

    #[test]
    fn test_truncated_frame() {
        let envelope = Envelope::new("n", 1, EnvelopeKind::Audit, Value::Null);
        let frame = envelope.encode().unwrap();
        let err = Envelope::decode(&frame[..frame.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
    }
}
