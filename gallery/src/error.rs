use thiserror::Error;

/// Errors returned by gallery operations.
#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery: identity not found: {0}")]
    NotFound(String),

    #[error("gallery: identity already exists: {0}")]
    AlreadyExists(String),

    #[error("gallery: bad record for {id}: {reason}")]
    BadRecord { id: String, reason: String },

    #[error("gallery: store error: {0}")]
    Store(#[from] facegate_kv::KvError),
}
