//! Batch enrollment with consistency and duplicate guarding.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use facegate_gallery::store::PutMode;
use facegate_gallery::{GalleryStore, Matcher, vecmath};

use crate::embedder::Embedder;
use crate::error::EnrollError;

/// Caller-supplied enrollment policy.
#[derive(Debug, Clone)]
pub struct EnrollOptions {
    /// Permit blending into an existing identity instead of failing
    /// with `AlreadyExists`.
    pub allow_update: bool,

    /// Reject the batch when its centroid matches a different
    /// enrolled identity.
    pub prevent_duplicate: bool,

    /// Minimum similarity for the duplicate check to fire.
    pub duplicate_threshold: f32,

    /// Reject the batch when one image disagrees with the rest.
    pub enforce_consistency: bool,

    /// Minimum per-image similarity against the batch centroid.
    pub intra_threshold: f32,
}

impl Default for EnrollOptions {
    fn default() -> Self {
        Self {
            allow_update: false,
            prevent_duplicate: true,
            duplicate_threshold: 0.7,
            enforce_consistency: true,
            intra_threshold: 0.55,
        }
    }
}

/// A per-image failure recorded during a batch. Skips never abort the
/// batch; they are reported back so the caller can see which photos
/// contributed nothing.
#[derive(Debug, Clone)]
pub struct SkippedImage {
    pub label: String,
    pub reason: String,
}

/// Outcome of a committed enrollment.
#[derive(Debug)]
pub struct Enrollment {
    pub id: String,

    /// True when the identity was created, false when an existing
    /// descriptor was blended.
    pub created: bool,

    /// Total samples recorded for the identity after this batch.
    pub sample_count: u32,

    /// Images that yielded no descriptor.
    pub skipped: Vec<SkippedImage>,
}

/// Turns a batch of `(label, image_bytes)` items into one committed or
/// rejected identity.
///
/// Commits run under a per-identity lock: two concurrent enrollments
/// for the same id serialize around the read-blend-write sequence,
/// while different ids proceed fully in parallel.
pub struct EnrollmentCoordinator {
    store: Arc<GalleryStore>,
    matcher: Arc<Matcher>,
    embedder: Arc<dyn Embedder>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EnrollmentCoordinator {
    pub fn new(
        store: Arc<GalleryStore>,
        matcher: Arc<Matcher>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            matcher,
            embedder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Lazily create the commit lock for an identity id.
    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(id.to_string()).or_default().clone()
    }

    /// Enroll `id` from a batch of labeled images.
    pub async fn enroll(
        &self,
        id: &str,
        items: &[(String, Vec<u8>)],
        opts: &EnrollOptions,
    ) -> Result<Enrollment, EnrollError> {
        // Embed every item; per-image failures are notes, not errors.
        let mut descriptors: Vec<(String, Vec<f32>)> = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();
        for (label, bytes) in items {
            match self.embedder.embed(bytes).await {
                Ok(raw) => descriptors.push((label.clone(), vecmath::normalize(&raw))),
                Err(e) => {
                    warn!(id, label, error = %e, "skipping enrollment image");
                    skipped.push(SkippedImage {
                        label: label.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if descriptors.is_empty() {
            return Err(EnrollError::NoUsableImages);
        }

        let vectors: Vec<Vec<f32>> = descriptors.iter().map(|(_, v)| v.clone()).collect();
        // Non-empty by the check above.
        let centroid = vecmath::centroid(&vectors).ok_or(EnrollError::NoUsableImages)?;

        // Consistency: every image must agree with the batch centroid.
        // Trivially passes with a single usable image.
        if opts.enforce_consistency && descriptors.len() > 1 {
            let mut min_score = f32::MAX;
            let mut worst_label = String::new();
            for (label, desc) in &descriptors {
                let score = vecmath::similarity(desc, &centroid);
                if score < min_score {
                    min_score = score;
                    worst_label = label.clone();
                }
            }
            if min_score < opts.intra_threshold {
                debug!(id, worst_label, min_score, "enrollment batch inconsistent");
                return Err(EnrollError::InconsistentSet {
                    worst_label,
                    min_score: vecmath::round4(min_score),
                });
            }
        }

        // Duplicate: the centroid must not match someone else.
        if opts.prevent_duplicate {
            let (best_id, best_score) = self.matcher.find_best_match(&centroid, Some(id))?;
            if let Some(existing_id) = best_id {
                if best_score >= opts.duplicate_threshold {
                    debug!(id, existing_id, best_score, "duplicate face rejected");
                    return Err(EnrollError::DuplicateFace {
                        existing_id,
                        score: vecmath::round4(best_score),
                    });
                }
            }
        }

        let batch_count = descriptors.len() as u32;

        // Commit under the per-identity lock so concurrent enrollments
        // of the same id serialize around read-blend-write.
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        if self.store.exists(id)? {
            if !opts.allow_update {
                return Err(EnrollError::AlreadyExists(id.to_string()));
            }
            let existing = self.store.get(id)?;
            let blended = blend(&existing.descriptor, &centroid);
            let sample_count = existing.sample_count + batch_count;
            self.store.put(id, &blended, sample_count, PutMode::Merge)?;
            info!(id, sample_count, "updated identity");
            Ok(Enrollment {
                id: id.to_string(),
                created: false,
                sample_count,
                skipped,
            })
        } else {
            self.store.put(id, &centroid, batch_count, PutMode::Create)?;
            info!(id, sample_count = batch_count, "enrolled identity");
            Ok(Enrollment {
                id: id.to_string(),
                created: true,
                sample_count: batch_count,
                skipped,
            })
        }
    }
}

/// Unweighted 50/50 blend of the existing descriptor and the new
/// batch centroid, renormalized. Biases toward the latest batch
/// regardless of historical sample count.
fn blend(existing: &[f32], centroid: &[f32]) -> Vec<f32> {
    let mixed: Vec<f32> = existing
        .iter()
        .zip(centroid.iter())
        .map(|(&o, &n)| 0.5 * o + 0.5 * n)
        .collect();
    vecmath::normalize(&mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{EmbedError, Embedder};
    use facegate_kv::MemoryStore;

    /// Test embedder: image bytes are a comma-separated float vector.
    /// `noface` and `garbage` payloads simulate per-image failures.
    struct FakeEmbedder;

    #[async_trait::async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, image: &[u8]) -> Result<Vec<f32>, EmbedError> {
            match image {
                b"noface" => Err(EmbedError::NoFaceDetected),
                b"garbage" => Err(EmbedError::Decode("not an image".to_string())),
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

    fn setup() -> (Arc<GalleryStore>, EnrollmentCoordinator) {
        let store = Arc::new(GalleryStore::new(Box::new(MemoryStore::new())));
        let matcher = Arc::new(Matcher::new(store.clone()));
        let coord = EnrollmentCoordinator::new(store.clone(), matcher, Arc::new(FakeEmbedder));
        (store, coord)
    }

    fn item(label: &str, payload: &str) -> (String, Vec<u8>) {
        (label.to_string(), payload.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn no_usable_images_leaves_gallery_unchanged() {
        let (store, coord) = setup();
        let items = vec![
            ("a.jpg".to_string(), b"noface".to_vec()),
            ("b.jpg".to_string(), b"garbage".to_vec()),
        ];

        let err = coord
            .enroll("E1", &items, &EnrollOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::NoUsableImages));
        assert!(!store.exists("E1").unwrap());
    }

    #[tokio::test]
    async fn stores_batch_centroid() {
        let (store, coord) = setup();
        let items = vec![
            item("1.jpg", "1,0,0"),
            item("2.jpg", "0.9,0.1,0"),
            item("3.jpg", "0.95,0.05,0"),
        ];

        let outcome = coord
            .enroll("E1", &items, &EnrollOptions::default())
            .await
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.sample_count, 3);
        assert!(outcome.skipped.is_empty());

        let expected = vecmath::centroid(&[
            vecmath::normalize(&[1.0, 0.0, 0.0]),
            vecmath::normalize(&[0.9, 0.1, 0.0]),
            vecmath::normalize(&[0.95, 0.05, 0.0]),
        ])
        .unwrap();
        let stored = store.get("E1").unwrap().descriptor;
        assert!((vecmath::similarity(&stored, &expected) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn reenroll_blends_fifty_fifty() {
        let (store, coord) = setup();
        coord
            .enroll("E1", &[item("a.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap();

        let opts = EnrollOptions {
            allow_update: true,
            ..EnrollOptions::default()
        };
        let outcome = coord
            .enroll("E1", &[item("b.jpg", "0,1,0")], &opts)
            .await
            .unwrap();
        assert!(!outcome.created);
        assert_eq!(outcome.sample_count, 2);

        let old = vec![1.0, 0.0, 0.0];
        let new = vec![0.0, 1.0, 0.0];
        let expected = blend(&old, &new);
        let stored = store.get("E1").unwrap().descriptor;
        assert!((vecmath::similarity(&stored, &expected) - 1.0).abs() < 1e-5);
        // Differs from both the old descriptor and the new centroid.
        assert!(vecmath::similarity(&stored, &old) < 0.99);
        assert!(vecmath::similarity(&stored, &new) < 0.99);
    }

    #[tokio::test]
    async fn outlier_rejected_as_inconsistent() {
        let (store, coord) = setup();
        let items = vec![
            item("1.jpg", "1,0,0"),
            item("2.jpg", "1,0,0"),
            item("outlier.jpg", "-0.6,0.8,0"),
        ];

        let err = coord
            .enroll("E1", &items, &EnrollOptions::default())
            .await
            .unwrap_err();
        let EnrollError::InconsistentSet { worst_label, min_score } = err else {
            panic!("expected InconsistentSet, got {err:?}");
        };
        assert_eq!(worst_label, "outlier.jpg");

        let centroid = vecmath::centroid(&[
            vec![1.0, 0.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vecmath::normalize(&[-0.6, 0.8, 0.0]),
        ])
        .unwrap();
        let expected = vecmath::similarity(&vecmath::normalize(&[-0.6, 0.8, 0.0]), &centroid);
        assert!((min_score - expected).abs() < 1e-3);
        assert!(!store.exists("E1").unwrap());
    }

    #[tokio::test]
    async fn duplicate_face_names_existing_identity() {
        let (_store, coord) = setup();
        coord
            .enroll("E2", &[item("a.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap();

        let err = coord
            .enroll("E1", &[item("b.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap_err();
        let EnrollError::DuplicateFace { existing_id, score } = err else {
            panic!("expected DuplicateFace, got {err:?}");
        };
        assert_eq!(existing_id, "E2");
        assert!((score - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn duplicate_check_excludes_own_identity() {
        let (_store, coord) = setup();
        coord
            .enroll("E1", &[item("a.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap();
        coord
            .enroll("E2", &[item("b.jpg", "0,1,0")], &EnrollOptions::default())
            .await
            .unwrap();

        // Re-enrolling E1 with the same face must not trip on E1 itself.
        let opts = EnrollOptions {
            allow_update: true,
            ..EnrollOptions::default()
        };
        let outcome = coord.enroll("E1", &[item("c.jpg", "1,0,0")], &opts).await.unwrap();
        assert!(!outcome.created);
    }

    #[tokio::test]
    async fn existing_identity_without_allow_update_fails() {
        let (_store, coord) = setup();
        coord
            .enroll("E1", &[item("a.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap();

        let opts = EnrollOptions {
            // Keep the duplicate check out of the way; this is about id reuse.
            prevent_duplicate: false,
            ..EnrollOptions::default()
        };
        let err = coord
            .enroll("E1", &[item("b.jpg", "1,0,0")], &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, EnrollError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn skipped_images_are_reported() {
        let (_store, coord) = setup();
        let items = vec![
            item("good.jpg", "1,0,0"),
            ("bad.jpg".to_string(), b"noface".to_vec()),
        ];

        let outcome = coord
            .enroll("E1", &items, &EnrollOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.sample_count, 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].label, "bad.jpg");
    }

    #[tokio::test]
    async fn single_usable_image_passes_consistency() {
        let (_store, coord) = setup();
        let outcome = coord
            .enroll("E1", &[item("only.jpg", "1,0,0")], &EnrollOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.sample_count, 1);
    }
}
