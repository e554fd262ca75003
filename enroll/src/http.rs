//! HTTP client for a descriptor-extraction sidecar.

use reqwest::Client;
use serde::Deserialize;

use crate::embedder::{EmbedError, Embedder};

/// Error codes the sidecar uses for per-image failures.
const ERR_NO_FACE: &str = "no_face";
const ERR_DECODE: &str = "decode";

/// Embedder backed by an inference service over HTTP.
///
/// Sends raw image bytes to `POST {base_url}/embed` and expects a
/// JSON body of either `{"vector": [..]}` or `{"error": "no_face"}` /
/// `{"error": "decode", "message": "..."}`.
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    dim: usize,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    vector: Option<Vec<f32>>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpEmbedder {
    /// Create an embedder client. `dim` is the agreed descriptor
    /// dimensionality (512 for the ArcFace-style models this system
    /// is deployed with).
    pub fn new(base_url: &str, dim: usize) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dim,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
        let url = format!("{}/embed", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| EmbedError::Backend(e.to_string()))?;

        let status = resp.status();
        let body: EmbedResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Backend(format!("bad response ({status}): {e}")))?;

        if let Some(code) = body.error {
            return Err(match code.as_str() {
                ERR_NO_FACE => EmbedError::NoFaceDetected,
                ERR_DECODE => EmbedError::Decode(body.message.unwrap_or_default()),
                other => EmbedError::Backend(format!("embedder error: {other}")),
            });
        }

        let vector = body
            .vector
            .ok_or_else(|| EmbedError::Backend("response carried no vector".to_string()))?;
        if vector.len() != self.dim {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dim,
                got: vector.len(),
            });
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
