//! Cosine distance on L2-normalized vectors.
//!
//! Vectors are normalized once on ingest so every distance evaluation is a
//! plain dot product. Distance is `1 - dot`, giving the usual [0, 2] range.

use neurograph_core::{NeuroGraphError, Result, Vector};
use rayon::prelude::*;

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns a unit-length copy. The zero vector normalizes to itself rather
/// than NaN so a degenerate embedding stays searchable (at maximal distance).
pub fn normalize(v: &[f32]) -> Vector {
    let norm = l2_norm(v);
    if norm <= f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Cosine distance between two normalized vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - dot(a, b)
}

/// Cosine similarity in [-1, 1] for arbitrary (not necessarily normalized)
/// vectors; used where callers hand in raw embeddings.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let na = l2_norm(a);
    let nb = l2_norm(b);
    if na <= f32::EPSILON || nb <= f32::EPSILON {
        return 0.0;
    }
    (dot(a, b) / (na * nb)).clamp(-1.0, 1.0)
}

pub fn check_dimension(v: &[f32], expected: usize) -> Result<()> {
    if v.len() != expected {
        return Err(NeuroGraphError::InvalidArgument(format!(
            "vector dimension {} does not match store dimension {}",
            v.len(),
            expected
        )));
    }
    Ok(())
}

/// Normalizes a batch in parallel; rebuild paths push hundreds of thousands
/// of vectors through this.
pub fn normalize_batch(vectors: Vec<Vector>) -> Vec<Vector> {
    vectors.into_par_iter().map(|v| normalize(&v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_vectors_have_unit_norm() {
        let v = normalize(&[3.0, 4.0]);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        assert_eq!(normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
        assert_eq!(cosine_similarity(&[0.0], &[1.0]), 0.0);
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = normalize(&[0.2, 0.4, 0.4]);
        assert!(cosine_distance(&v, &v).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn dimension_mismatch_is_invalid_argument() {
        assert!(matches!(
            check_dimension(&[1.0, 2.0], 3),
            Err(NeuroGraphError::InvalidArgument(_))
        ));
    }
}
