//! Fingerprint and idempotency-key computation.
//!
//! Fingerprints correlate observations of the same logical alert across
//! time; idempotency keys make stage execution replay-safe.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Derive a fingerprint for an alert that did not carry one from its source.
///
/// The fingerprint is a hex-encoded SHA-256 over the source, the alert name,
/// and the labels in sorted key order, so the same logical alert always maps
/// to the same fingerprint regardless of label insertion order.
#[must_use]
pub fn derive_fingerprint(source: &str, name: &str, labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }
    hex::encode(hasher.finalize())
}

/// Compute the idempotency key for one attempt of one stage (or node) within
/// a pipeline run.
///
/// The key is unique per `(run_id, stage, attempt)` and is protected by a
/// unique constraint in storage, so replaying the same attempt can never
/// produce a second execution row.
#[must_use]
pub fn idempotency_key(run_id: &str, stage: &str, attempt: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(b"|");
    hasher.update(stage.as_bytes());
    hasher.update(b"|");
    hasher.update(attempt.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
