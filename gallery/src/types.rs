//! Identity records and their persisted encoding.

use serde::{Deserialize, Serialize};

use crate::GalleryError;

/// Key prefix for identity records in the backing KV store.
pub const IDENTITY_PREFIX: &str = "identity:";

/// Build the storage key for an identity id.
pub fn identity_key(id: &str) -> String {
    format!("{IDENTITY_PREFIX}{id}")
}

/// Strip the identity prefix from a storage key, if present.
pub fn id_from_key(key: &str) -> &str {
    key.strip_prefix(IDENTITY_PREFIX).unwrap_or(key)
}

/// An enrolled identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    /// Unique identity id within the gallery.
    pub id: String,

    /// L2-normalized face descriptor.
    pub descriptor: Vec<f32>,

    /// Number of enrollment images that have contributed so far.
    pub sample_count: u32,
}

/// Persisted form of an identity, MessagePack-encoded.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct IdentityRecord {
    pub descriptor: Vec<f32>,
    pub sample_count: u32,
}

impl IdentityRecord {
    pub fn encode(&self) -> Result<Vec<u8>, GalleryError> {
        rmp_serde::to_vec(self).map_err(|e| GalleryError::BadRecord {
            id: String::new(),
            reason: e.to_string(),
        })
    }

    pub fn decode(id: &str, bytes: &[u8]) -> Result<Self, GalleryError> {
        rmp_serde::from_slice(bytes).map_err(|e| GalleryError::BadRecord {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        let key = identity_key("E1");
        assert_eq!(key, "identity:E1");
        assert_eq!(id_from_key(&key), "E1");
    }

    #[test]
    fn record_encode_decode() {
        let rec = IdentityRecord {
            descriptor: vec![0.1, 0.2, 0.3],
            sample_count: 5,
        };
        let bytes = rec.encode().unwrap();
        let back = IdentityRecord::decode("E1", &bytes).unwrap();
        assert_eq!(back.descriptor, rec.descriptor);
        assert_eq!(back.sample_count, 5);
    }

    #[test]
    fn decode_garbage_fails() {
        assert!(IdentityRecord::decode("E1", b"not msgpack").is_err());
    }
}
