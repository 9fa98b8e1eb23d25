//! Entry signing and verification.
//!
//! Ed25519 over the canonical JSON serialization of the entry with both
//! integrity fields emptied, then SHA-256 over the signed entry with only
//! the checksum emptied. Verification is the inverse; both checks must
//! pass before an entry counts as intact history.

use crate::entry::AuditLogEntry;
use crate::LedgerError;
use base64::Engine;
use chrono::Utc;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use trustmesh_codec::canonical;
use uuid::Uuid;

/// Tolerated clock skew before a timestamp counts as "in the future".
const MAX_FUTURE_SKEW_SECS: i64 = 60;

/// Outcome of verifying one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl VerificationReport {
    fn clean() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    fn flag(&mut self, issue: impl Into<String>) {
        self.valid = false;
        self.issues.push(issue.into());
    }
}

/// Signs and verifies audit entries with one Ed25519 key.
pub struct LedgerSigner {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    key_id: String,
}

impl LedgerSigner {
    /// Generate a fresh signing key.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        Self::from_secret_bytes(&secret)
    }

    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            key_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Base64 public key, for peers verifying our entries.
    pub fn public_key_b64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.verifying_key.as_bytes())
    }

    /// Sign an entry in place, then stamp its checksum.
    pub fn sign_entry(&self, entry: &mut AuditLogEntry) -> Result<(), LedgerError> {
        entry.security.signature = String::new();
        entry.security.checksum = String::new();

        let message = canonical::canonicalize(entry)
            .map_err(|e| LedgerError::SignatureFailure(e.to_string()))?;
        let signature = self.signing_key.sign(message.as_bytes());
        entry.security.signature =
            base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());

        let signed = canonical::canonicalize(entry)
            .map_err(|e| LedgerError::SignatureFailure(e.to_string()))?;
        entry.security.checksum = canonical::sha256_hex(signed.as_bytes());
        Ok(())
    }

    /// Stamp only the checksum (signatures disabled).
    pub fn checksum_entry(entry: &mut AuditLogEntry) -> Result<(), LedgerError> {
        entry.security.checksum = String::new();
        let text = canonical::canonicalize(entry)
            .map_err(|e| LedgerError::ChecksumMismatch(e.to_string()))?;
        entry.security.checksum = canonical::sha256_hex(text.as_bytes());
        Ok(())
    }

    /// Verify an entry against this signer's key.
    ///
    /// `check_signature` / `check_checksum` mirror the security config; a
    /// disabled check is skipped rather than failed.
    pub fn verify_entry(
        &self,
        entry: &AuditLogEntry,
        check_signature: bool,
        check_checksum: bool,
    ) -> VerificationReport {
        let mut report = VerificationReport::clean();

        for (field, value) in [
            ("log_id", &entry.log_id),
            ("actor", &entry.actor),
            ("action", &entry.action),
        ] {
            if value.trim().is_empty() {
                report.flag(format!("Missing required field: {field}"));
            }
        }

        if entry.timestamp > Utc::now() + chrono::Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            report.flag("Timestamp is in the future");
        }

        if check_checksum {
            let mut unchecksummed = entry.clone();
            unchecksummed.security.checksum = String::new();
            match canonical::canonicalize(&unchecksummed) {
                Ok(text) => {
                    if canonical::sha256_hex(text.as_bytes()) != entry.security.checksum {
                        report.flag("Checksum mismatch");
                    }
                }
                Err(e) => report.flag(format!("Checksum mismatch: {e}")),
            }
        }

        if check_signature {
            let mut unsigned = entry.clone();
            unsigned.security.signature = String::new();
            unsigned.security.checksum = String::new();
            match self.signature_valid(&unsigned, &entry.security.signature) {
                Ok(true) => {}
                _ => report.flag("Invalid digital signature"),
            }
        }

        report
    }

    fn signature_valid(
        &self,
        unsigned: &AuditLogEntry,
        signature_b64: &str,
    ) -> Result<bool, LedgerError> {
        let message = canonical::canonicalize(unsigned)
            .map_err(|e| LedgerError::SignatureFailure(e.to_string()))?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(signature_b64)
            .map_err(|e| LedgerError::SignatureFailure(e.to_string()))?;
        let signature = ed25519_dalek::Signature::try_from(bytes.as_slice())
            .map_err(|e| LedgerError::SignatureFailure(e.to_string()))?;
        Ok(self
            .verifying_key
            .verify(message.as_bytes(), &signature)
            .is_ok())
    }
}
