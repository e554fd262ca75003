//! Streaming attendance pipeline.
//!
//! Kiosk clients hold a persistent connection, grouped into rooms by
//! device id. Incoming frames are throttled per device, memoized by
//! content hash, matched against the gallery, and the result is
//! fanned out to every connection in the device's room.

pub mod cache;
pub mod error;
pub mod message;
pub mod pipeline;
pub mod registry;

pub use cache::FrameCache;
pub use error::StreamError;
pub use message::{Inbound, Outbound};
pub use pipeline::{FramePipeline, PipelineConfig};
pub use registry::{ConnectionRegistry, RegistryHandle};
