//! Math utilities for vector operations

/// Cosine distance (1 - cosine similarity) between two vectors.
///
/// Uses SIMD acceleration when available, with a scalar f64 fallback for
/// unsupported architectures. Embedding providers do not guarantee
/// normalized vectors, so the norms are computed rather than assumed.
///
/// Returns `None` for mismatched lengths, empty vectors, or non-finite
/// results so callers can skip corrupt rows instead of panicking.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    use simsimd::SpatialSimilarity;
    let dot = f32::dot(a, b).unwrap_or_else(|| scalar_dot(a, b));
    let norm_a = f32::dot(a, a).unwrap_or_else(|| scalar_dot(a, a));
    let norm_b = f32::dot(b, b).unwrap_or_else(|| scalar_dot(b, b));

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return None;
    }
    let distance = 1.0 - dot / denom;
    if distance.is_finite() {
        Some(distance as f32)
    } else {
        None
    }
}

/// Scalar fallback, accumulated in f64 for precision
fn scalar_dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x as f64) * (y as f64))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(idx: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[idx] = 1.0;
        v
    }

    #[test]
    fn test_identical_vectors_distance_zero() {
        let a = vec![0.3f32; 64];
        let d = cosine_distance(&a, &a).expect("valid vectors");
        assert!(d.abs() < 1e-5, "expected ~0, got {d}");
    }

    #[test]
    fn test_orthogonal_vectors_distance_one() {
        let d = cosine_distance(&unit(0, 8), &unit(1, 8)).expect("valid vectors");
        assert!((d - 1.0).abs() < 1e-5, "expected ~1, got {d}");
    }

    #[test]
    fn test_opposite_vectors_distance_two() {
        let a = vec![1.0f32; 8];
        let b = vec![-1.0f32; 8];
        let d = cosine_distance(&a, &b).expect("valid vectors");
        assert!((d - 2.0).abs() < 1e-5, "expected ~2, got {d}");
    }

    #[test]
    fn test_mismatched_lengths() {
        assert!(cosine_distance(&[1.0, 2.0], &[1.0]).is_none());
        assert!(cosine_distance(&[], &[]).is_none());
    }

    #[test]
    fn test_zero_vector() {
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
    }

    #[test]
    fn test_symmetry() {
        let a: Vec<f32> = (0..32).map(|i| (i as f32) / 32.0 + 0.1).collect();
        let b: Vec<f32> = (0..32).map(|i| 1.0 - (i as f32) / 64.0).collect();
        let ab = cosine_distance(&a, &b).unwrap();
        let ba = cosine_distance(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-6);
    }
}
