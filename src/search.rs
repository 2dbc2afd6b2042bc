//! Semantic retrieval over stored memories.
//!
//! Search embeds the query text, linearly scans the embedded candidates
//! visible from the query's scope, and ranks by cosine similarity. The
//! corpus is expected to stay small enough (thousands of rows) that a
//! scan beats maintaining an index.

use crate::embedding::cosine_similarity;
use crate::models::Memory;
use crate::store::MemoryStore;
use crate::{Error, Result};
use std::sync::Arc;
use tracing::instrument;

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Natural-language query text.
    pub text: String,
    /// Agent scope; `None` searches across all agents.
    pub agent: Option<String>,
    /// Path scope; `None` searches across all paths.
    pub path: Option<String>,
    /// Minimum similarity for a hit; `None` uses the serving default.
    pub threshold: Option<f32>,
    /// Maximum number of hits; `None` uses the serving default.
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Creates a query with default scope, threshold, and limit.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            agent: None,
            path: None,
            threshold: None,
            limit: None,
        }
    }

    /// Restricts the query to an agent scope.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    /// Restricts the query to a path scope.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Overrides the similarity threshold.
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Overrides the result limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A ranked search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matching memory.
    pub memory: Memory,
    /// Cosine similarity between query and memory vectors.
    pub similarity: f32,
}

/// Ranks stored memories against query text.
pub struct SearchService {
    store: Arc<MemoryStore>,
    /// Threshold applied when a query does not supply one.
    default_threshold: f32,
    /// Limit applied when a query does not supply one.
    default_limit: usize,
}

impl SearchService {
    /// Creates a search service over the given store.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>, default_threshold: f32, default_limit: usize) -> Self {
        Self {
            store,
            default_threshold,
            default_limit,
        }
    }

    /// Creates a search service using the serving defaults from config.
    #[must_use]
    pub const fn from_config(store: Arc<MemoryStore>, config: &crate::EngineConfig) -> Self {
        Self::new(store, config.default_search_threshold, config.max_results)
    }

    /// Runs a semantic search.
    ///
    /// Hits are sorted by descending similarity, ties broken by recency.
    /// Candidates whose stored vector has a different dimensionality than
    /// the query vector are skipped, not errors (they typically predate a
    /// provider change). Returned memories get an access bump; searching
    /// is otherwise read-only, so repeating a query with no intervening
    /// writes returns the same ranking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderUnavailable`] when no embedding provider
    /// is configured or the query cannot be embedded, [`Error::Storage`]
    /// on candidate-load failure.
    #[instrument(skip(self, query), fields(operation = "search"))]
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        let start = std::time::Instant::now();
        let provider = self.store.provider().ok_or_else(|| {
            Error::ProviderUnavailable("no embedding provider configured".to_string())
        })?;
        let query_vector = provider.embed(&query.text)?;

        let candidates = self
            .store
            .search_candidates(query.agent.as_deref(), query.path.as_deref())?;
        let scanned = candidates.len();

        let threshold = query.threshold.unwrap_or(self.default_threshold);
        let limit = query.limit.unwrap_or(self.default_limit);

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter_map(|memory| {
                let embedding = memory.embedding.as_deref()?;
                if embedding.len() != query_vector.len() {
                    tracing::debug!(
                        id = %memory.id,
                        stored = embedding.len(),
                        query = query_vector.len(),
                        "skipping memory with mismatched embedding dimensions"
                    );
                    return None;
                }
                let similarity = cosine_similarity(&query_vector, embedding);
                (similarity >= threshold).then_some(SearchHit { memory, similarity })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        });
        hits.truncate(limit);

        let accessed: Vec<_> = hits.iter().map(|h| h.memory.id.clone()).collect();
        self.store.record_access(&accessed)?;

        metrics::counter!("engram_searches_total").increment(1);
        metrics::histogram!("engram_search_duration_seconds")
            .record(start.elapsed().as_secs_f64());
        tracing::debug!(scanned, hits = hits.len(), threshold, "search complete");
        Ok(hits)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::models::MemoryDraft;

    fn service() -> (SearchService, Arc<MemoryStore>) {
        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(HashEmbedder::new()))).unwrap(),
        );
        (SearchService::new(Arc::clone(&store), 0.5, 10), store)
    }

    #[test]
    fn test_exact_text_is_top_hit() {
        let (service, store) = service();
        store
            .create(MemoryDraft::new("user prefers dark mode"))
            .unwrap();
        store
            .create(MemoryDraft::new("the build uses cargo workspaces"))
            .unwrap();

        let hits = service
            .search(&SearchQuery::new("user prefers dark mode"))
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].memory.content, "user prefers dark mode");
        assert!(hits[0].similarity > 0.99);
    }

    #[test]
    fn test_no_provider_fails_fast() {
        let store = Arc::new(MemoryStore::open_in_memory(None).unwrap());
        let service = SearchService::new(store, 0.5, 10);
        let result = service.search(&SearchQuery::new("anything"));
        assert!(matches!(result, Err(Error::ProviderUnavailable(_))));
    }

    #[test]
    fn test_threshold_monotonicity() {
        let (service, store) = service();
        for content in [
            "user prefers dark mode",
            "user likes dark themes",
            "rust build caching notes",
        ] {
            store.create(MemoryDraft::new(content)).unwrap();
        }

        let loose = service
            .search(&SearchQuery::new("dark mode preference").with_threshold(0.0))
            .unwrap();
        let strict = service
            .search(&SearchQuery::new("dark mode preference").with_threshold(0.9))
            .unwrap();

        // every strict hit appears in the loose results
        assert!(strict.len() <= loose.len());
        for hit in &strict {
            assert!(loose.iter().any(|l| l.memory.id == hit.memory.id));
        }
    }

    #[test]
    fn test_limit_truncates_after_ranking() {
        // similarity to the digit-free query decreases as the trailing
        // digit grows, giving a deterministic ranking
        struct RampProvider;
        impl crate::embedding::EmbeddingProvider for RampProvider {
            fn dimensions(&self) -> usize {
                2
            }

            #[allow(clippy::cast_precision_loss)]
            fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
                let tilt = text
                    .chars()
                    .last()
                    .and_then(|c| c.to_digit(10))
                    .unwrap_or(0);
                Ok(vec![1.0, tilt as f32])
            }
        }

        let store = Arc::new(MemoryStore::open_in_memory(Some(Arc::new(RampProvider))).unwrap());
        let service = SearchService::new(Arc::clone(&store), 0.5, 10);
        for i in 0..5 {
            store
                .create(MemoryDraft::new(format!("note about dark mode {i}")))
                .unwrap();
        }

        let hits = service
            .search(&SearchQuery::new("dark mode").with_threshold(0.0).with_limit(2))
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].similarity > hits[1].similarity);
        assert_eq!(hits[0].memory.content, "note about dark mode 0");
        assert_eq!(hits[1].memory.content, "note about dark mode 1");
    }

    #[test]
    fn test_agent_scope_sees_globals() {
        let (service, store) = service();
        store
            .create(MemoryDraft::new("global dark mode fact"))
            .unwrap();
        store
            .create(MemoryDraft::new("coder dark mode fact").with_agent("coder"))
            .unwrap();
        store
            .create(MemoryDraft::new("writer dark mode fact").with_agent("writer"))
            .unwrap();

        let hits = service
            .search(
                &SearchQuery::new("dark mode fact")
                    .with_agent("coder")
                    .with_threshold(0.0),
            )
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(
            hits.iter()
                .all(|h| h.memory.agent_handle.as_deref() != Some("writer"))
        );
    }

    #[test]
    fn test_mismatched_dimensions_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("memories.db");

        // rows written under a 32-dim provider
        {
            let store =
                MemoryStore::open(&db_path, Some(Arc::new(HashEmbedder::with_dimensions(32))))
                    .unwrap();
            store.create(MemoryDraft::new("narrow vector")).unwrap();
        }

        // reopened under a 64-dim provider; stale rows are skipped, new
        // ones match
        let store = Arc::new(
            MemoryStore::open(&db_path, Some(Arc::new(HashEmbedder::with_dimensions(64))))
                .unwrap(),
        );
        store.create(MemoryDraft::new("wide vector")).unwrap();

        let service = SearchService::new(Arc::clone(&store), 0.0, 10);
        let hits = service.search(&SearchQuery::new("vector")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.content, "wide vector");
    }

    #[test]
    fn test_repeat_search_is_stable() {
        let (service, store) = service();
        store
            .create(MemoryDraft::new("user prefers tabs over spaces"))
            .unwrap();
        store
            .create(MemoryDraft::new("user prefers vim keybindings"))
            .unwrap();

        let query = SearchQuery::new("user preference").with_threshold(0.0);
        let first = service.search(&query).unwrap();
        let second = service.search(&query).unwrap();

        let first_ids: Vec<_> = first.iter().map(|h| h.memory.id.clone()).collect();
        let second_ids: Vec<_> = second.iter().map(|h| h.memory.id.clone()).collect();
        assert_eq!(first_ids, second_ids);
    }
}
