//! TTL memo from frame content hash to a resolved identity.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Compute the cache key for a raw frame: hex sha256 of the bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

struct CacheEntry {
    identity_id: String,
    expires_at: Instant,
}

/// Exact-bytes memo used to short-circuit recomputation for repeated
/// input, e.g. a static camera frame.
///
/// This is not a similarity cache: a frame differing by one bit is a
/// full miss. Entries expire passively; a lookup past `expires_at` is
/// a miss whether or not the entry has been physically purged.
#[derive(Default)]
pub struct FrameCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolved identity for a content hash, or `None` on miss or
    /// expiry.
    pub fn lookup(&self, hash: &str) -> Option<String> {
        let entries = self.entries.lock();
        let entry = entries.get(hash)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(entry.identity_id.clone())
    }

    /// Record a resolved match. Expired entries are purged
    /// opportunistically here so the map does not grow unbounded.
    pub fn record(&self, hash: &str, identity_id: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            hash.to_string(),
            CacheEntry {
                identity_id: identity_id.to_string(),
                expires_at: now + ttl,
            },
        );
    }

}

#[cfg(test)]
impl FrameCache {
    /// Number of live (possibly expired, not yet purged) entries.
    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
