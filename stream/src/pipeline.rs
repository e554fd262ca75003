//! Frame-processing pipeline for streaming connections.
//!
//! Per accepted frame: decode, hash, cache lookup, embed, match,
//! broadcast. Throttled and malformed frames are answered only on the
//! connection that sent them; results fan out to the whole room.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, info};

use facegate_enroll::{EmbedError, Embedder};
use facegate_gallery::{Matcher, vecmath};

use crate::cache::{FrameCache, content_hash};
use crate::error::StreamError;
use crate::message::{Inbound, Outbound, strip_data_url};
use crate::registry::{ConnectionRegistry, RegistryHandle};

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum cosine similarity for a stream match.
    pub match_threshold: f32,
    /// Lifetime of a cached frame resolution.
    pub cache_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            cache_ttl: Duration::from_secs(86_400),
        }
    }
}

/// Shared frame-processing pipeline.
///
/// One instance serves all connections; every call site is a
/// per-connection task, so a disconnect simply drops the task and any
/// in-flight frame before its final broadcast step.
pub struct FramePipeline {
    matcher: Arc<Matcher>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<FrameCache>,
    registry: Arc<ConnectionRegistry>,
    cfg: PipelineConfig,
}

impl FramePipeline {
    pub fn new(
        matcher: Arc<Matcher>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<FrameCache>,
        registry: Arc<ConnectionRegistry>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            matcher,
            embedder,
            cache,
            registry,
            cfg,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle one inbound text message from a connection.
    ///
    /// Malformed messages are answered inline and never close the
    /// connection.
    pub async fn handle_message(&self, handle: &RegistryHandle, text: &str) {
        let msg: Inbound = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                handle
                    .reply(Outbound::Error {
                        message: StreamError::BadMessage(e.to_string()).to_string(),
                    })
                    .await;
                return;
            }
        };

        match msg {
            Inbound::Ping => handle.reply(Outbound::Pong).await,
            Inbound::Frame { device_id, image } => {
                // Frames may carry their own device id; fall back to
                // the room joined at handshake.
                let device_id = device_id
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| handle.device_id().to_string());
                self.process_frame(handle, &device_id, &image).await;
            }
        }
    }

    /// Run one frame through throttle → cache → embed → match.
    ///
    /// `device_id` is the broadcast target; the throttle clock is keyed
    /// on the room the connection joined at handshake, so a frame
    /// naming some other device id cannot mint itself a fresh window
    /// or leave a clock entry behind with no room to clean it up.
    pub async fn process_frame(&self, handle: &RegistryHandle, device_id: &str, image_b64: &str) {
        if !self.registry.try_begin_frame(handle.device_id()) {
            handle
                .reply(Outbound::Throttle {
                    device_id: handle.device_id().to_string(),
                })
                .await;
            return;
        }

        let bytes = match BASE64.decode(strip_data_url(image_b64)) {
            Ok(bytes) => bytes,
            Err(e) => {
                handle
                    .reply(Outbound::Error {
                        message: StreamError::BadEncoding(e.to_string()).to_string(),
                    })
                    .await;
                return;
            }
        };

        // Bit-identical repeats short-circuit the whole pipeline.
        let hash = content_hash(&bytes);
        if let Some(identity_id) = self.cache.lookup(&hash) {
            debug!(device_id, identity_id, "frame served from cache");
            self.registry
                .broadcast(
                    device_id,
                    Outbound::Result {
                        device_id: device_id.to_string(),
                        success: true,
                        identity_id: Some(identity_id),
                        score: None,
                        cached: true,
                        message: None,
                    },
                )
                .await;
            return;
        }

        let descriptor = match self.embedder.embed(&bytes).await {
            Ok(raw) => vecmath::normalize(&raw),
            Err(EmbedError::NoFaceDetected) | Err(EmbedError::Decode(_)) => {
                // An unusable frame is an ordinary negative result.
                self.registry
                    .broadcast(
                        device_id,
                        Outbound::Result {
                            device_id: device_id.to_string(),
                            success: false,
                            identity_id: None,
                            score: None,
                            cached: false,
                            message: Some("No face detected".to_string()),
                        },
                    )
                    .await;
                return;
            }
            Err(e) => {
                handle
                    .reply(Outbound::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let (best_id, best_score) = match self.matcher.find_best_match(&descriptor, None) {
            Ok(result) => result,
            Err(e) => {
                handle
                    .reply(Outbound::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        match best_id {
            Some(identity_id) if Matcher::accept(best_score, self.cfg.match_threshold) => {
                self.cache.record(&hash, &identity_id, self.cfg.cache_ttl);
                info!(device_id, identity_id, score = best_score, "stream match");
                self.registry
                    .broadcast(
                        device_id,
                        Outbound::Result {
                            device_id: device_id.to_string(),
                            success: true,
                            identity_id: Some(identity_id),
                            score: Some(best_score),
                            cached: false,
                            message: None,
                        },
                    )
                    .await;
            }
            best => {
                self.registry
                    .broadcast(
                        device_id,
                        Outbound::Result {
                            device_id: device_id.to_string(),
                            success: false,
                            identity_id: None,
                            score: best.map(|_| best_score),
                            cached: false,
                            message: Some("Unknown face".to_string()),
                        },
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use facegate_gallery::store::PutMode;
    use facegate_gallery::GalleryStore;
    use facegate_kv::{KvResult, KvStore, MemoryStore};

    /// Test embedder: frame bytes are a comma-separated float vector,
    /// `noface` simulates an empty detection.
    struct FakeEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
            match image {
                b"noface" => Err(EmbedError::NoFaceDetected),
                bytes => {
                    let text = std::str::from_utf8(bytes)
                        .map_err(|e| EmbedError::Decode(e.to_string()))?;
                    text.split(',')
                        .map(|s| {
                            s.trim()
                                .parse::<f32>()
                                .map_err(|e| EmbedError::Decode(e.to_string()))
                        })
                        .collect()
                }
            }
        }

        fn dimension(&self) -> usize {
            3
        }
    }

    /// KV wrapper that counts gallery scans.
    struct CountingStore {
        inner: MemoryStore,
        scans: Arc<AtomicUsize>,
    }

    impl KvStore for CountingStore {
        fn get(&self, key: &str) -> KvResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> KvResult<()> {
            self.inner.set(key, value)
        }
        fn exists(&self, key: &str) -> KvResult<bool> {
            self.inner.exists(key)
        }
        fn delete(&self, key: &str) -> KvResult<()> {
            self.inner.delete(key)
        }
        fn scan(&self, prefix: &str) -> KvResult<Vec<(String, Vec<u8>)>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.inner.scan(prefix)
        }
    }

    struct Fixture {
        pipeline: FramePipeline,
        scans: Arc<AtomicUsize>,
    }

    fn fixture(frame_interval: Duration) -> Fixture {
        let scans = Arc::new(AtomicUsize::new(0));
        let kv = CountingStore {
            inner: MemoryStore::new(),
            scans: scans.clone(),
        };
        let store = Arc::new(GalleryStore::new(Box::new(kv)));
        store.put("E1", &[1.0, 0.0, 0.0], 1, PutMode::Create).unwrap();

        let pipeline = FramePipeline::new(
            Arc::new(Matcher::new(store)),
            Arc::new(FakeEmbedder),
            Arc::new(FrameCache::new()),
            Arc::new(ConnectionRegistry::new(frame_interval)),
            PipelineConfig::default(),
        );
        Fixture { pipeline, scans }
    }

    fn frame_json(payload: &str) -> String {
        format!(
            r#"{{"type":"frame","deviceId":"kiosk-1","image":"{}"}}"#,
            BASE64.encode(payload.as_bytes())
        )
    }

    async fn connect(pipeline: &FramePipeline) -> (RegistryHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let handle = pipeline.registry().join("kiosk-1", tx);
        (handle, rx)
    }

    #[tokio::test]
    async fn match_broadcast_then_cached_repeat() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx) = connect(&f.pipeline).await;

        f.pipeline.handle_message(&handle, &frame_json("1,0,0")).await;
        let Some(Outbound::Result {
            success,
            identity_id,
            cached,
            score,
            ..
        }) = rx.recv().await
        else {
            panic!("expected result");
        };
        assert!(success);
        assert_eq!(identity_id.as_deref(), Some("E1"));
        assert!(!cached);
        assert!(score.unwrap() > 0.99);
        assert_eq!(f.scans.load(Ordering::SeqCst), 1);

        // Identical bytes within the TTL: cache hit, no new scan.
        f.pipeline.handle_message(&handle, &frame_json("1,0,0")).await;
        let Some(Outbound::Result { cached, success, .. }) = rx.recv().await else {
            panic!("expected result");
        };
        assert!(success);
        assert!(cached);
        assert_eq!(f.scans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_frame_within_interval_is_throttled() {
        let f = fixture(Duration::from_secs(10));
        let (handle, mut rx) = connect(&f.pipeline).await;

        f.pipeline.handle_message(&handle, &frame_json("1,0,0")).await;
        assert!(matches!(rx.recv().await, Some(Outbound::Result { .. })));

        f.pipeline.handle_message(&handle, &frame_json("1,0,0")).await;
        assert!(matches!(rx.recv().await, Some(Outbound::Throttle { .. })));
    }

    #[tokio::test]
    async fn rotating_device_ids_share_the_room_frame_budget() {
        let f = fixture(Duration::from_secs(10));
        let (handle, mut rx) = connect(&f.pipeline).await;

        let frame_for = |device: &str| {
            format!(
                r#"{{"type":"frame","deviceId":"{}","image":"{}"}}"#,
                device,
                BASE64.encode(b"1,0,0")
            )
        };

        // First frame claims the room's window; naming a different
        // device id afterwards must not mint a fresh one.
        f.pipeline.handle_message(&handle, &frame_for("kiosk-1")).await;
        assert!(matches!(rx.recv().await, Some(Outbound::Result { .. })));

        f.pipeline.handle_message(&handle, &frame_for("kiosk-99")).await;
        let Some(Outbound::Throttle { device_id }) = rx.recv().await else {
            panic!("expected throttle");
        };
        assert_eq!(device_id, "kiosk-1");

        // No clock entry accumulated for the rotated id.
        assert!(f.pipeline.registry().try_begin_frame("kiosk-99"));
    }

    #[tokio::test]
    async fn no_face_is_negative_result_not_error() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx) = connect(&f.pipeline).await;

        f.pipeline.handle_message(&handle, &frame_json("noface")).await;
        let Some(Outbound::Result { success, message, .. }) = rx.recv().await else {
            panic!("expected result");
        };
        assert!(!success);
        assert_eq!(message.as_deref(), Some("No face detected"));
    }

    #[tokio::test]
    async fn below_threshold_is_unknown_face() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx) = connect(&f.pipeline).await;

        // Orthogonal to the only enrolled descriptor.
        f.pipeline.handle_message(&handle, &frame_json("0,1,0")).await;
        let Some(Outbound::Result { success, message, score, .. }) = rx.recv().await else {
            panic!("expected result");
        };
        assert!(!success);
        assert_eq!(message.as_deref(), Some("Unknown face"));
        assert!(score.unwrap() < 0.7);
    }

    #[tokio::test]
    async fn malformed_json_answered_inline() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx) = connect(&f.pipeline).await;

        f.pipeline.handle_message(&handle, "{not json").await;
        assert!(matches!(rx.recv().await, Some(Outbound::Error { .. })));
        // Connection is still usable.
        f.pipeline.handle_message(&handle, r#"{"type":"ping"}"#).await;
        assert_eq!(rx.recv().await, Some(Outbound::Pong));
    }

    #[tokio::test]
    async fn bad_base64_answered_inline() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx) = connect(&f.pipeline).await;

        f.pipeline
            .handle_message(
                &handle,
                r#"{"type":"frame","deviceId":"kiosk-1","image":"!!!"}"#,
            )
            .await;
        assert!(matches!(rx.recv().await, Some(Outbound::Error { .. })));
    }

    #[tokio::test]
    async fn result_reaches_every_room_member() {
        let f = fixture(Duration::ZERO);
        let (handle, mut rx1) = connect(&f.pipeline).await;
        let (_other, mut rx2) = connect(&f.pipeline).await;

        f.pipeline.handle_message(&handle, &frame_json("1,0,0")).await;
        assert!(matches!(rx1.recv().await, Some(Outbound::Result { .. })));
        assert!(matches!(rx2.recv().await, Some(Outbound::Result { .. })));
    }
}
