//! Embedding provider contract and vector utilities.
//!
//! The embedding provider is an external capability: the engine must work
//! with it absent. Everything embedding-dependent branches on availability;
//! only search fails hard without one.

// dimension headers are u32 by layout; vectors never exceed that
#![allow(clippy::cast_possible_truncation)]

mod hash;

pub use hash::HashEmbedder;

use crate::{Error, Result};

/// Trait for text-embedding providers.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the embedding dimensions.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderUnavailable`] if the provider cannot
    /// produce a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Releases held resources (model process, network client). Default is
    /// a no-op for providers with nothing to release.
    fn close(&self) {}
}

/// Computes cosine similarity `dot(a, b) / (|a| * |b|)`.
///
/// Returns 0.0 for mismatched dimensions or zero-magnitude vectors rather
/// than erroring; callers thresholding in [0, 1] treat that as "no match".
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Version byte of the vector blob encoding.
const BLOB_VERSION: u8 = 1;

/// Encodes a vector as a versioned binary blob.
///
/// Layout: `[version: u8][dimensions: u32 LE][dimensions * f32 LE]`.
/// The dimension header lets readers reject truncated or foreign blobs
/// without guessing from the byte length.
#[must_use]
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(5 + vector.len() * 4);
    blob.push(BLOB_VERSION);
    blob.extend_from_slice(&(vector.len() as u32).to_le_bytes());
    for value in vector {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decodes a versioned vector blob.
///
/// # Errors
///
/// Returns [`Error::Validation`] for unknown versions, truncated payloads,
/// or a dimension header that disagrees with the payload length. Search
/// treats decode failures as skip conditions, not fatal errors.
pub fn decode_vector(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() < 5 {
        return Err(Error::Validation(format!(
            "vector blob too short ({} bytes)",
            blob.len()
        )));
    }
    if blob[0] != BLOB_VERSION {
        return Err(Error::Validation(format!(
            "unknown vector blob version {}",
            blob[0]
        )));
    }

    let mut dim_bytes = [0u8; 4];
    dim_bytes.copy_from_slice(&blob[1..5]);
    let dimensions = u32::from_le_bytes(dim_bytes) as usize;

    let payload = &blob[5..];
    if payload.len() != dimensions * 4 {
        return Err(Error::Validation(format!(
            "vector blob payload {} bytes, expected {} for {dimensions} dimensions",
            payload.len(),
            dimensions * 4
        )));
    }

    let mut vector = Vec::with_capacity(dimensions);
    for chunk in payload.chunks_exact(4) {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(chunk);
        vector.push(f32::from_le_bytes(bytes));
    }
    Ok(vector)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let v = vec![0.6, 0.8, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < f32::EPSILON);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < f32::EPSILON);
    }

    #[test]
    fn test_blob_roundtrip() {
        let vector = vec![0.25f32, -1.5, 3.75, 0.0];
        let blob = encode_vector(&vector);
        assert_eq!(blob[0], BLOB_VERSION);
        assert_eq!(decode_vector(&blob).unwrap(), vector);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let mut blob = encode_vector(&[1.0, 2.0]);
        blob[0] = 99;
        assert!(matches!(decode_vector(&blob), Err(Error::Validation(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut blob = encode_vector(&[1.0, 2.0, 3.0]);
        blob.truncate(blob.len() - 2);
        assert!(matches!(decode_vector(&blob), Err(Error::Validation(_))));
    }

    #[test]
    fn test_decode_rejects_short_blob() {
        assert!(matches!(decode_vector(&[1, 0]), Err(Error::Validation(_))));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Encoding then decoding recovers the exact vector.
            #[test]
            fn prop_blob_roundtrip(v in prop::collection::vec(-100.0f32..100.0f32, 0..64)) {
                let decoded = decode_vector(&encode_vector(&v)).unwrap();
                prop_assert_eq!(decoded, v);
            }

            /// Cosine similarity is symmetric.
            #[test]
            fn prop_similarity_symmetric(
                a in prop::collection::vec(-1.0f32..1.0f32, 8),
                b in prop::collection::vec(-1.0f32..1.0f32, 8)
            ) {
                let ab = cosine_similarity(&a, &b);
                let ba = cosine_similarity(&b, &a);
                prop_assert!((ab - ba).abs() < 0.001);
            }

            /// Cosine similarity stays within [-1, 1] (with float slack).
            #[test]
            fn prop_similarity_bounded(
                a in prop::collection::vec(-1.0f32..1.0f32, 8),
                b in prop::collection::vec(-1.0f32..1.0f32, 8)
            ) {
                let sim = cosine_similarity(&a, &b);
                prop_assert!((-1.001..=1.001).contains(&sim));
            }
        }
    }
}
