//! Gallery store over a key-value backend.

use facegate_kv::KvStore;
use tracing::debug;

use crate::error::GalleryError;
use crate::types::{IDENTITY_PREFIX, Identity, IdentityRecord, id_from_key, identity_key};
use crate::vecmath;

/// Write mode for [`GalleryStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with [`GalleryError::AlreadyExists`] when the id is present.
    Create,
    /// Overwrite the existing record (re-enrollment update).
    Merge,
}

/// Persistent map from identity id to its descriptor.
///
/// Descriptors are normalized on the way in, so everything read back
/// out is a unit vector. Writes are durable before `put` returns;
/// that is the backend's contract.
pub struct GalleryStore {
    kv: Box<dyn KvStore>,
}

impl GalleryStore {
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Look up one identity.
    pub fn get(&self, id: &str) -> Result<Identity, GalleryError> {
        let bytes = self
            .kv
            .get(&identity_key(id))?
            .ok_or_else(|| GalleryError::NotFound(id.to_string()))?;
        let rec = IdentityRecord::decode(id, &bytes)?;
        Ok(Identity {
            id: id.to_string(),
            descriptor: rec.descriptor,
            sample_count: rec.sample_count,
        })
    }

    /// Whether an identity is enrolled.
    pub fn exists(&self, id: &str) -> Result<bool, GalleryError> {
        Ok(self.kv.exists(&identity_key(id))?)
    }

    /// Store an identity descriptor.
    ///
    /// The descriptor is L2-normalized before being written.
    pub fn put(
        &self,
        id: &str,
        descriptor: &[f32],
        sample_count: u32,
        mode: PutMode,
    ) -> Result<(), GalleryError> {
        if mode == PutMode::Create && self.exists(id)? {
            return Err(GalleryError::AlreadyExists(id.to_string()));
        }

        let rec = IdentityRecord {
            descriptor: vecmath::normalize(descriptor),
            sample_count,
        };
        self.kv.set(&identity_key(id), &rec.encode()?)?;
        debug!(id, sample_count, "stored identity");
        Ok(())
    }

    /// All `(id, descriptor)` pairs currently enrolled.
    ///
    /// Iteration order is the backend's key order and carries no
    /// meaning; writes concurrent with a scan may or may not be
    /// observed. Records that fail to decode are skipped rather than
    /// failing the whole scan.
    pub fn scan(&self) -> Result<Vec<(String, Vec<f32>)>, GalleryError> {
        let mut out = Vec::new();
        for (key, bytes) in self.kv.scan(IDENTITY_PREFIX)? {
            let id = id_from_key(&key);
            match IdentityRecord::decode(id, &bytes) {
                Ok(rec) => out.push((id.to_string(), rec.descriptor)),
                Err(e) => debug!(id, error = %e, "skipping undecodable identity record"),
            }
        }
        Ok(out)
    }
}
