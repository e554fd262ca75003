use thiserror::Error;

/// Errors from descriptor extraction.
///
/// `NoFaceDetected` and `Decode` describe the input image and cause
/// the item to be skipped during enrollment; `Backend` and
/// `DimensionMismatch` are infrastructure faults.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embed: no face detected")]
    NoFaceDetected,

    #[error("embed: decode error: {0}")]
    Decode(String),

    #[error("embed: dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("embed: backend error: {0}")]
    Backend(String),
}

/// Embedder maps image bytes to a fixed-length face descriptor.
///
/// Implementations must be safe for concurrent use (Send + Sync).
/// Returned vectors need not be pre-normalized; callers normalize
/// before storing or comparing.
#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    /// Return the descriptor for the representative face in the image.
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError>;

    /// Return the dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}
