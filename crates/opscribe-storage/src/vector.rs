//! Embedding blob codec and cosine distance.
//!
//! Embeddings are stored as packed little-endian `f32` values. Ranking is
//! brute force over the tenant's rows, which is fine for the per-tenant
//! item counts this store is sized for.

use opscribe_core::error::OpscribeError;

/// Pack an embedding into a little-endian `f32` blob.
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Unpack a little-endian `f32` blob.
pub fn decode_embedding(bytes: &[u8]) -> Result<Vec<f32>, OpscribeError> {
    if bytes.len() % 4 != 0 {
        return Err(OpscribeError::Storage(format!(
            "Corrupt embedding blob: {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Whether every component is a finite number (no NaN or infinity).
pub fn is_finite_vector(embedding: &[f32]) -> bool {
    embedding.iter().all(|v| v.is_finite())
}

/// Cosine distance, `1 - cosine_similarity`, in `[0.0, 2.0]`.
///
/// Returns 1.0 if either vector has zero magnitude or the lengths differ.
/// Vectors are not renormalized.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 1.0;
    }

    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 1.0;
    }

    let distance = 1.0 - dot / (mag_a.sqrt() * mag_b.sqrt());
    if distance.is_nan() {
        return 1.0;
    }
    distance
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_preserves_values() {
        let embedding = vec![0.5f32, -1.25, 3.0e-7, f32::MAX];
        let blob = encode_embedding(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(decode_embedding(&blob).unwrap(), embedding);
    }

    #[test]
    fn test_blob_is_little_endian() {
        let blob = encode_embedding(&[1.0]);
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f]);
    }

    #[test]
    fn test_non_finite_vectors() {
        assert!(is_finite_vector(&[0.0, -1.5, f32::MAX]));
        assert!(!is_finite_vector(&[1.0, f32::INFINITY]));
        assert!(!is_finite_vector(&[f32::NAN]));
        assert_eq!(cosine_distance(&[f32::INFINITY, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_decode_rejects_truncated_blob() {
        let err = decode_embedding(&[0x00, 0x00, 0x80]).unwrap_err();
        assert!(matches!(err, OpscribeError::Storage(_)));
    }

    #[test]
    fn test_identical_vectors_have_zero_distance() {
        let v = vec![0.3f32, 0.4, 0.5];
        assert!(cosine_distance(&v, &v).abs() < 1e-9);
    }

    #[test]
    fn test_orthogonal_and_opposite_vectors() {
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-9);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_distance_ignores_magnitude() {
        let d = cosine_distance(&[1.0, 1.0], &[10.0, 10.0]);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 0.0]), 1.0);
    }
}
