//! Hash-based pseudo-embedding provider.

use super::EmbeddingProvider;
use crate::{Error, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Default dimensions for the hash provider.
const DEFAULT_DIMENSIONS: usize = 64;

/// Deterministic hash-based embedding provider.
///
/// Generates normalized pseudo-embeddings from word hashes. Identical text
/// always produces an identical vector, so it is useful in tests and in
/// setups without a real model, but it does NOT capture semantic
/// similarity: "database storage" and "PostgreSQL database" will not be
/// close.
pub struct HashEmbedder {
    /// Embedding dimensions.
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates a provider with the default dimensions.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
        }
    }

    /// Creates a provider with custom dimensions.
    #[must_use]
    pub const fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Generates a deterministic pseudo-embedding from text.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn pseudo_embed(&self, text: &str) -> Vec<f32> {
        // Bound word iteration on very long inputs
        const MAX_WORDS: usize = 1000;
        let mut embedding = vec![0.0f32; self.dimensions];

        for (i, word) in text.split_whitespace().take(MAX_WORDS).enumerate() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            let hash = hasher.finish();
            Self::distribute_hash(&mut embedding, hash, i, self.dimensions);
        }

        Self::normalize(&mut embedding);
        embedding
    }

    /// Distributes a word hash across embedding dimensions.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn distribute_hash(embedding: &mut [f32], hash: u64, word_idx: usize, dimensions: usize) {
        for j in 0..8 {
            let idx = ((hash >> (j * 8)) as usize + word_idx) % dimensions;
            let value = ((hash >> (j * 4)) & 0xFF) as f32 / 255.0 - 0.5;
            embedding[idx] += value;
        }
    }

    /// Normalizes a vector in-place to unit length.
    fn normalize(embedding: &mut [f32]) {
        let norm_sq: f32 = embedding.iter().map(|x| x * x).sum();
        if norm_sq <= 0.0 {
            return;
        }
        let inv_norm = norm_sq.sqrt().recip();
        for v in embedding.iter_mut() {
            *v *= inv_norm;
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(Error::ProviderUnavailable(
                "cannot embed empty text".to_string(),
            ));
        }
        Ok(self.pseudo_embed(text))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let provider = HashEmbedder::new();
        let a = provider.embed("User prefers dark mode").unwrap();
        let b = provider.embed("User prefers dark mode").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_dimensions_respected() {
        let provider = HashEmbedder::with_dimensions(32);
        let v = provider.embed("some text here").unwrap();
        assert_eq!(v.len(), 32);
        assert_eq!(provider.dimensions(), 32);
    }

    #[test]
    fn test_normalized() {
        let provider = HashEmbedder::new();
        let v = provider.embed("a longer sentence with several distinct words").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_identical_text_has_full_similarity() {
        let provider = HashEmbedder::new();
        let a = provider.embed("prefers tabs over spaces").unwrap();
        let b = provider.embed("prefers tabs over spaces").unwrap();
        assert!(cosine_similarity(&a, &b) > 0.999);
    }

    #[test]
    fn test_different_text_differs() {
        let provider = HashEmbedder::new();
        let a = provider.embed("completely unrelated gardening advice").unwrap();
        let b = provider.embed("kernel scheduler latency tuning notes").unwrap();
        assert!(cosine_similarity(&a, &b) < 0.999);
    }

    #[test]
    fn test_empty_text_rejected() {
        let provider = HashEmbedder::new();
        assert!(provider.embed("   ").is_err());
    }
}
