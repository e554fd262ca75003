//! Face gallery: descriptor math, identity storage, and matching.
//!
//! A gallery is a set of enrolled identities, each carrying one
//! L2-normalized descriptor. [`GalleryStore`] persists identities
//! through a [`facegate_kv::KvStore`]; [`Matcher`] runs a linear
//! cosine-similarity scan over it.

pub mod error;
pub mod matcher;
pub mod store;
pub mod types;
pub mod vecmath;

pub use error::GalleryError;
pub use matcher::Matcher;
pub use store::{GalleryStore, PutMode};
pub use types::Identity;
