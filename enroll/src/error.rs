use facegate_gallery::GalleryError;
use thiserror::Error;

/// Terminal enrollment failures exposed to callers.
///
/// Per-image problems (decode failure, no face) are not errors at
/// this level; they are recorded as skip notes on the outcome.
#[derive(Error, Debug)]
pub enum EnrollError {
    /// No image in the batch yielded a descriptor.
    #[error("enroll: no usable images in batch")]
    NoUsableImages,

    /// The batch does not look like a single person.
    #[error("enroll: inconsistent set: {worst_label} scored {min_score} against the centroid")]
    InconsistentSet { worst_label: String, min_score: f32 },

    /// The centroid matches a different, already enrolled identity.
    #[error("enroll: duplicate face: matches {existing_id} with score {score}")]
    DuplicateFace { existing_id: String, score: f32 },

    /// Creation-only mode was requested and the id is already present.
    #[error("enroll: identity already exists: {0}")]
    AlreadyExists(String),

    /// The backing store cannot be reached. Fatal, not retried.
    #[error("enroll: store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<GalleryError> for EnrollError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::AlreadyExists(id) => EnrollError::AlreadyExists(id),
            other => EnrollError::StoreUnavailable(other.to_string()),
        }
    }
}
