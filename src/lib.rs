//! # Engram
//!
//! A semantic memory engine for CLI assistants.
//!
//! Engram stores natural-language facts and preferences about a user or
//! project, retrieves them by vector similarity, and keeps them current
//! through a background formation pipeline that creates, skips, or
//! supersedes candidate memories extracted from conversation turns.
//!
//! ## Architecture
//!
//! - [`MemoryStore`] — durable CRUD and lifecycle transitions over memory
//!   records (`SQLite`); the single source of truth
//! - [`EmbeddingProvider`] — optional external text-to-vector capability
//! - [`SearchService`] — cosine-similarity retrieval over active memories
//! - [`FormationPipeline`] — create / skip / supersede reconciliation
//! - [`FormationQueue`] — bounded queue with one background consumer that
//!   keeps formation latency off the interactive path
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::{MemoryDraft, MemoryStore};
//!
//! let store = MemoryStore::open(&config.db_path, Some(provider))?;
//! let memory = store.create(MemoryDraft {
//!     content: "User prefers dark mode".to_string(),
//!     ..MemoryDraft::default()
//! })?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod classify;
pub mod config;
pub mod embedding;
pub mod formation;
pub mod models;
pub mod observability;
pub mod search;
pub mod store;

// Re-exports for convenience
pub use classify::{Classifier, KeywordClassifier};
pub use config::EngineConfig;
pub use embedding::{EmbeddingProvider, HashEmbedder, cosine_similarity};
pub use formation::{FormationObserver, FormationPipeline, FormationQueue, StatusSink};
pub use models::{
    FormationEvent, FormationTask, Memory, MemoryCategory, MemoryDraft, MemoryId, MemoryStatus,
    TaskStatus,
};
pub use search::{SearchHit, SearchQuery, SearchService};
pub use store::MemoryStore;

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `NotFound` | No memory matches an id or prefix |
/// | `AmbiguousId` | A prefix matches more than one memory |
/// | `ProviderUnavailable` | Search invoked with no embedding provider, or the provider refused |
/// | `Validation` | Empty content, out-of-range confidence, unknown category string |
/// | `Storage` | `SQLite` I/O or transaction failure |
#[derive(Debug, ThisError)]
pub enum Error {
    /// No memory matched the given id or prefix.
    #[error("memory not found: {0}")]
    NotFound(String),

    /// A prefix lookup matched more than one memory.
    #[error("ambiguous id prefix '{prefix}' ({matches} matches)")]
    AmbiguousId {
        /// The prefix that was looked up.
        prefix: String,
        /// How many memories matched it.
        matches: usize,
    },

    /// The embedding provider is not configured or failed to respond.
    ///
    /// Search has no degraded mode: it fails fast with this variant when no
    /// provider is configured. Create degrades instead (embedding-less
    /// record) and never raises it.
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Invalid input was provided.
    ///
    /// Raised when content is empty, a confidence is outside [0, 1], or a
    /// category string cannot be parsed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A storage operation failed.
    #[error("storage operation '{operation}' failed: {cause}")]
    Storage {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized so every component stamps records the same way. Falls back
/// to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
