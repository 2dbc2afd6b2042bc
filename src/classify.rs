//! Category classification capability.
//!
//! Classification is an external capability (typically a small auxiliary
//! model) consumed through this narrow trait. The formation pipeline uses
//! it only when a task carries no category hint, and treats it as
//! optionally absent the same way it treats the embedding provider.

use crate::Result;
use crate::models::MemoryCategory;

/// Trait for candidate-content classifiers.
pub trait Classifier: Send + Sync {
    /// Classifies candidate content into a memory category.
    ///
    /// # Errors
    ///
    /// Returns an error if the classifier backend cannot produce a
    /// category; the formation pipeline turns that into a failed
    /// formation event.
    fn classify(&self, text: &str) -> Result<MemoryCategory>;
}

/// Keyword-heuristic classifier.
///
/// A lightweight built-in fallback for setups without a model-backed
/// classifier. Looks for preference and correction markers; defaults to
/// [`MemoryCategory::Fact`].
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Creates a new keyword classifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Result<MemoryCategory> {
        let lower = text.to_lowercase();
        let category = if lower.contains("prefer")
            || lower.contains("likes ")
            || lower.contains("favorite")
        {
            MemoryCategory::Preference
        } else if lower.contains("actually")
            || lower.contains("correction")
            || lower.contains("instead of")
        {
            MemoryCategory::Correction
        } else if lower.contains("always") || lower.contains("usually") || lower.contains("tends to")
        {
            MemoryCategory::Pattern
        } else {
            MemoryCategory::Fact
        };
        Ok(category)
    }
}
