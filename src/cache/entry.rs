//! Cache entries and their on-disk record format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};

/// Longest sanitized key used verbatim as a file stem
pub const MAX_PLAIN_STEM: usize = 120;

/// Sanitized characters kept in front of the digest of a hashed stem
const HASHED_STEM_PREFIX: usize = 48;

/// A single cached value
///
/// The same struct is the persisted record: one compact JSON file per key of the form
/// `{"key", "data", "createdAt", "expiresAt", "etag", "size"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Logical key (resource plus parameters)
    pub key: String,
    /// Serialized payload, kept verbatim
    #[serde(rename = "data")]
    pub payload: Box<RawValue>,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// `created_at + ttl`; `None` when there is no ttl or the sum is past the
    /// representable range
    pub expires_at: Option<DateTime<Utc>>,
    /// Validator returned by the server, if any
    pub etag: Option<String>,
    /// Length of the serialized payload in bytes
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

impl CacheEntry {
    /// Builds an entry from an already-serialized payload
    ///
    /// A ttl that would push `expires_at` past `DateTime<Utc>`'s range means the entry
    /// never expires.
    pub fn new(
        key: String,
        payload: Box<RawValue>,
        created_at: DateTime<Utc>,
        ttl: Option<chrono::Duration>,
        etag: Option<String>,
    ) -> Self {
        let size_bytes = payload.get().len() as u64;
        Self {
            key,
            payload,
            created_at,
            expires_at: ttl.and_then(|ttl| created_at.checked_add_signed(ttl)),
            etag,
            size_bytes,
        }
    }

    /// Whether the entry has passed its expiry timestamp at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the recorded size still matches the payload
    pub fn is_consistent(&self) -> bool {
        self.size_bytes == self.payload.get().len() as u64
    }
}

/// Maps a cache key to a filesystem-safe file stem
///
/// Anything outside `[A-Za-z0-9_.-]` becomes `_`. Distinct keys that sanitize to the
/// same stem share one file; the later write wins.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// File stem of the record holding `key`
///
/// The sanitized key when it is non-empty and at most [`MAX_PLAIN_STEM`] bytes.
/// Otherwise a prefix of it followed by `~` and the SHA-256 of the raw key, so empty
/// and overlong keys still get a short, unique name. `~` never appears in a sanitized
/// key, so the two forms cannot collide.
pub fn record_stem(key: &str) -> String {
    let sanitized = sanitize_key(key);
    if !sanitized.is_empty() && sanitized.len() <= MAX_PLAIN_STEM {
        return sanitized;
    }

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hex::encode(hasher.finalize());
    let prefix: String = sanitized.chars().take(HASHED_STEM_PREFIX).collect();
    format!("{}~{}", prefix, digest)
}
