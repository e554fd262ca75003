//! Linear nearest-neighbor matcher.

use std::sync::Arc;

use tracing::trace;

use crate::error::GalleryError;
use crate::store::GalleryStore;
use crate::vecmath;

/// Nearest-neighbor matcher over the full gallery.
///
/// This is a deliberate O(n) scan: the gallery targets a few hundred
/// to a few thousand identities, where a full pass is simpler than an
/// approximate index. Callers depend only on `find_best_match`, so a
/// sub-linear index can replace the scan without touching them.
pub struct Matcher {
    store: Arc<GalleryStore>,
}

impl Matcher {
    pub fn new(store: Arc<GalleryStore>) -> Self {
        Self { store }
    }

    /// Best-scoring identity for `query`, skipping `exclude_id`.
    ///
    /// Returns `(None, -1.0)` when the gallery (after exclusion) is
    /// empty. On exact score ties the first-encountered entry wins;
    /// scan order is unspecified, so ties are effectively
    /// nondeterministic. Real descriptors make exact ties vanishingly
    /// rare.
    pub fn find_best_match(
        &self,
        query: &[f32],
        exclude_id: Option<&str>,
    ) -> Result<(Option<String>, f32), GalleryError> {
        let mut best_id: Option<String> = None;
        let mut best_score = -1.0f32;

        for (id, descriptor) in self.store.scan()? {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            let score = vecmath::similarity(query, &descriptor);
            trace!(id, score, "candidate");
            if score > best_score || best_id.is_none() {
                best_score = score;
                best_id = Some(id);
            }
        }

        if best_id.is_none() {
            return Ok((None, -1.0));
        }
        Ok((best_id, best_score))
    }

    /// Whether a match score clears the caller's threshold.
    pub fn accept(score: f32, threshold: f32) -> bool {
        score >= threshold
    }
}
