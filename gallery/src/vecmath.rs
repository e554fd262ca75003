//! Descriptor math: L2 normalization and cosine similarity.
//!
//! Descriptors are stored and compared as unit vectors, so cosine
//! similarity reduces to a dot product. Accumulation happens in f64
//! to keep 512-dimension sums stable.

/// Return `v / ||v||`, or `v` unchanged when `||v|| == 0`.
///
/// The zero-vector case is a degenerate no-op, not an error: a zero
/// descriptor cannot be normalized and passes through as-is.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|&x| ((x as f64) / norm) as f32).collect()
}

/// Cosine similarity of two unit vectors: their dot product, clamped
/// to `[-1, 1]` against floating-point drift.
///
/// Both inputs are expected to be pre-normalized; callers go through
/// [`normalize`] before storing or comparing.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot: f64 = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += (x as f64) * (y as f64);
    }
    dot.clamp(-1.0, 1.0) as f32
}

/// Normalized mean of a non-empty set of descriptors.
///
/// Returns `None` for an empty input. Dimension is taken from the
/// first vector; shorter vectors contribute only their own length.
pub fn centroid(vs: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vs.first()?;
    let dim = first.len();

    let mut mean = vec![0.0f32; dim];
    for v in vs {
        for (slot, &x) in mean.iter_mut().zip(v.iter()) {
            *slot += x;
        }
    }
    let n = vs.len() as f32;
    for slot in mean.iter_mut() {
        *slot /= n;
    }
    Some(normalize(&mean))
}

/// Round a score to 4 decimal places for reporting. Scores cross the
/// wire and land in error payloads; rounding in one place keeps the
/// two from drifting apart.
pub fn round4(x: f32) -> f32 {
    (x * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-5;

    #[test]
    fn normalize_unit_length() {
        let v = normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < EPS);
        assert!((v[1] - 0.8).abs() < EPS);
    }

    #[test]
    fn normalize_zero_vector_passthrough() {
        let v = normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn self_similarity_is_one() {
        let a = normalize(&[0.3, -1.2, 0.8, 2.1]);
        assert!((similarity(&a, &a) - 1.0).abs() < EPS);
    }

    #[test]
    fn similarity_symmetric_and_bounded() {
        let a = normalize(&[1.0, 2.0, 3.0]);
        let b = normalize(&[-2.0, 0.5, 1.0]);
        let ab = similarity(&a, &b);
        let ba = similarity(&b, &a);
        assert_eq!(ab, ba);
        assert!((-1.0..=1.0).contains(&ab));
    }

    #[test]
    fn opposite_vectors_score_negative_one() {
        let a = normalize(&[1.0, 0.0]);
        let b = normalize(&[-1.0, 0.0]);
        assert!((similarity(&a, &b) + 1.0).abs() < EPS);
    }

    #[test]
    fn centroid_of_empty_is_none() {
        assert!(centroid(&[]).is_none());
    }

    #[test]
    fn centroid_matches_normalized_mean() {
        let vs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = centroid(&vs).unwrap();
        // Mean is (0.5, 0.5), normalized to (1/sqrt(2), 1/sqrt(2)).
        let expected = 1.0 / 2.0f32.sqrt();
        assert!((c[0] - expected).abs() < EPS);
        assert!((c[1] - expected).abs() < EPS);
    }

    #[test]
    fn round4_truncates_to_four_decimals() {
        assert!((round4(0.123_456) - 0.1235).abs() < 1e-6);
        assert!((round4(0.7) - 0.7).abs() < 1e-6);
        assert!((round4(-0.987_654) + 0.9877).abs() < 1e-6);
    }

    #[test]
    fn centroid_of_single_vector_is_itself_normalized() {
        let c = centroid(&[vec![2.0, 0.0]]).unwrap();
        assert!((c[0] - 1.0).abs() < EPS);
        assert!(c[1].abs() < EPS);
    }
}
