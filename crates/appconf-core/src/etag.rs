//! Etag and identity generation
//!
//! - setting etags: 16 random bytes, base64url without padding
//! - page etags: digest over the etags of a result page
//! - ids: digests over the natural key, stable across restarts

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Fresh opaque version token for a setting revision
pub fn generate_etag() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Fresh version token for a snapshot record or content blob
pub fn generate_snapshot_etag() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Consistency marker for one page of results
///
/// Two fetches returning the same items in the same order with the same
/// continuation token produce the same page etag.
pub fn page_etag<'a>(etags: impl IntoIterator<Item = &'a str>, continuation: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"kvset\n");
    let mut empty = true;
    for etag in etags {
        empty = false;
        hasher.update(etag.as_bytes());
        hasher.update(b"\n");
    }
    if empty {
        hasher.update(b"\n");
    }
    if let Some(token) = continuation {
        hasher.update(token.as_bytes());
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Stable id of the `(key, label)` entry
pub fn key_value_id(key: &str, label: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b"\n");
    if let Some(label) = label {
        hasher.update(label.as_bytes());
    }
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Stable id of a named snapshot inside a store resource
pub fn snapshot_id(resource_id: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(b"kv-snapshot");
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Encode a raw SHA-256 digest the way media descriptors carry it
pub fn encode_digest(digest: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(digest)
}
