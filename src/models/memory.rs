//! Memory types and identifiers.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a memory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(String);

impl MemoryId {
    /// Creates a new memory ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MemoryId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemoryId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// A stated preference ("prefers dark mode").
    Preference,
    /// A factual statement about the user or project.
    #[default]
    Fact,
    /// A correction of something previously believed.
    Correction,
    /// A recurring behavior or convention.
    Pattern,
}

impl MemoryCategory {
    /// Returns all category variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Preference, Self::Fact, Self::Correction, Self::Pattern]
    }

    /// Returns the category as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Fact => "fact",
            Self::Correction => "correction",
            Self::Pattern => "pattern",
        }
    }

    /// Parses a category string (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for unknown category names.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "preference" => Ok(Self::Preference),
            "fact" => Ok(Self::Fact),
            "correction" => Ok(Self::Correction),
            "pattern" => Ok(Self::Pattern),
            other => Err(Error::Validation(format!("unknown category '{other}'"))),
        }
    }
}

impl fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Live and eligible for listing and search.
    #[default]
    Active,
    /// Replaced by a newer memory; retained for the version chain.
    Superseded,
    /// Retired from serving but not deleted. No operation transitions a
    /// memory here automatically; `MemoryStore::archive` is the hook.
    Archived,
    /// Soft-deleted. Terminal: rows are retained, never purged.
    Forgotten,
}

impl MemoryStatus {
    /// Returns the status as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
            Self::Archived => "archived",
            Self::Forgotten => "forgotten",
        }
    }

    /// Parses a status string (case-insensitive), defaulting to `Active`
    /// for unknown values.
    #[must_use]
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "superseded" => Self::Superseded,
            "archived" => Self::Archived,
            "forgotten" => Self::Forgotten,
            _ => Self::Active,
        }
    }
}

impl fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored memory record.
#[derive(Debug, Clone)]
pub struct Memory {
    /// Unique identifier, stable for the record's lifetime.
    pub id: MemoryId,
    /// Optional agent scope. `None` means global (applies to all agents).
    pub agent_handle: Option<String>,
    /// Optional project-path scope. `None` means unscoped.
    pub path_scope: Option<String>,
    /// The memory content (non-empty natural language).
    pub content: String,
    /// Memory category.
    pub category: MemoryCategory,
    /// Optional embedding vector. `None` when no provider was configured
    /// (or the provider failed) at creation time.
    pub embedding: Option<Vec<f32>>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Number of times the record was returned by search or explicit get.
    pub access_count: u64,
    /// Timestamp of the last access (Unix epoch seconds).
    pub last_accessed_at: Option<u64>,
    /// ID of the memory this record superseded.
    pub supersedes_id: Option<MemoryId>,
    /// ID of the memory that superseded this record.
    pub superseded_by_id: Option<MemoryId>,
    /// Human-readable reason for the supersession.
    pub supersession_reason: Option<String>,
    /// Current lifecycle status.
    pub status: MemoryStatus,
    /// Provenance: the session the candidate content came from.
    pub source_session_id: Option<String>,
    /// Provenance: the message the candidate content came from.
    pub source_message_id: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: u64,
    /// Timestamp (UTC) when the memory was forgotten.
    pub forgotten_at: Option<DateTime<Utc>>,
}

impl Memory {
    /// Returns true if the record is eligible for similarity search:
    /// active with a stored embedding.
    #[must_use]
    pub const fn is_searchable(&self) -> bool {
        matches!(self.status, MemoryStatus::Active) && self.embedding.is_some()
    }
}

/// Input for creating a memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryDraft {
    /// The memory content (required, non-empty).
    pub content: String,
    /// Memory category.
    pub category: MemoryCategory,
    /// Optional agent scope.
    pub agent_handle: Option<String>,
    /// Optional project-path scope.
    pub path_scope: Option<String>,
    /// Confidence in [0, 1]. Defaults to 1.0 when `None`.
    pub confidence: Option<f64>,
    /// Provenance: source session id.
    pub source_session_id: Option<String>,
    /// Provenance: source message id.
    pub source_message_id: Option<String>,
}

impl MemoryDraft {
    /// Creates a draft with the given content and defaults elsewhere.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the category.
    #[must_use]
    pub const fn with_category(mut self, category: MemoryCategory) -> Self {
        self.category = category;
        self
    }

    /// Sets the agent scope.
    #[must_use]
    pub fn with_agent(mut self, handle: impl Into<String>) -> Self {
        self.agent_handle = Some(handle.into());
        self
    }

    /// Sets the path scope.
    #[must_use]
    pub fn with_path_scope(mut self, path: impl Into<String>) -> Self {
        self.path_scope = Some(path.into());
        self
    }

    /// Validates the draft.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if content is empty or confidence is
    /// outside [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(Error::Validation("content cannot be empty".to_string()));
        }
        if let Some(c) = self.confidence
            && !(0.0..=1.0).contains(&c)
        {
            return Err(Error::Validation(format!(
                "confidence {c} outside [0, 1]"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("preference", MemoryCategory::Preference)]
    #[test_case("FACT", MemoryCategory::Fact)]
    #[test_case("Correction", MemoryCategory::Correction)]
    #[test_case("pattern", MemoryCategory::Pattern)]
    fn test_category_parse(input: &str, expected: MemoryCategory) {
        assert_eq!(MemoryCategory::parse(input).unwrap(), expected);
    }

    #[test]
    fn test_category_parse_unknown() {
        let result = MemoryCategory::parse("opinion");
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[test]
    fn test_category_roundtrip_as_str() {
        for category in MemoryCategory::all() {
            assert_eq!(MemoryCategory::parse(category.as_str()).unwrap(), *category);
        }
    }

    #[test_case("active", MemoryStatus::Active)]
    #[test_case("SUPERSEDED", MemoryStatus::Superseded)]
    #[test_case("archived", MemoryStatus::Archived)]
    #[test_case("forgotten", MemoryStatus::Forgotten)]
    #[test_case("garbage", MemoryStatus::Active; "unknown defaults to active")]
    fn test_status_parse_lenient(input: &str, expected: MemoryStatus) {
        assert_eq!(MemoryStatus::parse_lenient(input), expected);
    }

    #[test]
    fn test_draft_validate_empty_content() {
        let draft = MemoryDraft::new("   ");
        assert!(matches!(draft.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_draft_validate_confidence_range() {
        let mut draft = MemoryDraft::new("valid content");
        draft.confidence = Some(1.5);
        assert!(matches!(draft.validate(), Err(Error::Validation(_))));

        draft.confidence = Some(0.7);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_memory_id_generate_unique() {
        let a = MemoryId::generate();
        let b = MemoryId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_default_category_is_fact() {
        assert_eq!(MemoryCategory::default(), MemoryCategory::Fact);
        assert_eq!(MemoryDraft::new("x").category, MemoryCategory::Fact);
    }
}
