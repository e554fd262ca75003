//! Enrollment: turn a batch of labeled face images into one committed
//! (or rejected) gallery identity.
//!
//! The [`EnrollmentCoordinator`] embeds each image, builds the batch
//! centroid, runs the optional consistency and duplicate checks, and
//! commits under a per-identity lock so concurrent re-enrollments of
//! the same id cannot lose updates.

pub mod coordinator;
pub mod embedder;
pub mod error;
pub mod http;

pub use coordinator::{EnrollOptions, Enrollment, EnrollmentCoordinator, SkippedImage};
pub use embedder::{EmbedError, Embedder};
pub use error::EnrollError;
pub use http::HttpEmbedder;
