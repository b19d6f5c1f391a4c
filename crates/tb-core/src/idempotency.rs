//! Idempotent mutation support
//!
//! Every mutating operation carries a caller-supplied idempotency key.
//! The first execution stores a fingerprint of the request payload and
//! the serialized result; a retry with the same key and payload replays
//! the stored result without re-executing, and a retry with the same
//! key but a different payload is a programming error surfaced as
//! [`Error::KeyReuse`]. Records expire after a bounded TTL, after which
//! the key is treated as brand new.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Stored outcome of a processed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    /// Serialized result of the first execution
    pub response_body: String,
    pub created_at: DateTime<Utc>,
}

/// What the engine should do with a request under a given key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// No live record; execute and store the result
    Fresh,
    /// Same key, same payload; serve the stored response
    Replay(String),
}

/// Fingerprint of the canonicalized request payload
pub fn request_fingerprint<T: Serialize>(payload: &T) -> Result<String> {
    let canonical = serde_json::to_vec(payload)?;
    let digest = Sha256::digest(&canonical);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    Ok(hex)
}

/// Decide between fresh execution, replay and key misuse
pub fn check_record(
    record: Option<IdempotencyRecord>,
    key: &str,
    request_hash: &str,
) -> Result<IdempotencyCheck> {
    match record {
        None => Ok(IdempotencyCheck::Fresh),
        Some(record) if record.request_hash == request_hash => {
            Ok(IdempotencyCheck::Replay(record.response_body))
        }
        Some(_) => Err(Error::KeyReuse(key.to_string())),
    }
}
