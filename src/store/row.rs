//! Row conversion utilities for the `SQLite` memory store.

use crate::embedding::decode_vector;
use crate::models::{Memory, MemoryCategory, MemoryId, MemoryStatus};
use chrono::{TimeZone, Utc};
use rusqlite::Row;

/// Internal representation of a memory row from the database.
///
/// Maps directly to the schema with primitive types; use
/// [`build_memory_from_row`] for the typed conversion.
#[derive(Debug)]
pub struct MemoryRow {
    /// Unique identifier.
    pub id: String,
    /// Agent scope, NULL meaning global.
    pub agent_handle: Option<String>,
    /// Project-path scope.
    pub path_scope: Option<String>,
    /// The memory content.
    pub content: String,
    /// Category name ("preference", "fact", ...).
    pub category: String,
    /// Versioned embedding blob.
    pub embedding: Option<Vec<u8>>,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Access counter.
    pub access_count: i64,
    /// Last access timestamp (Unix epoch seconds).
    pub last_accessed_at: Option<i64>,
    /// Version-chain pointer: id of the memory this one superseded.
    pub supersedes_id: Option<String>,
    /// Version-chain pointer: id of the memory that superseded this one.
    pub superseded_by_id: Option<String>,
    /// Reason recorded at supersession time.
    pub supersession_reason: Option<String>,
    /// Status name ("active", "superseded", ...).
    pub status: String,
    /// Provenance session id.
    pub source_session_id: Option<String>,
    /// Provenance message id.
    pub source_message_id: Option<String>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: i64,
    /// Forgotten timestamp (Unix epoch seconds).
    pub forgotten_at: Option<i64>,
}

/// Column list shared by every SELECT against `memories`.
///
/// Order must match [`MemoryRow::from_row`].
pub const MEMORY_COLUMNS: &str = "id, agent_handle, path_scope, content, category, embedding, \
     confidence, access_count, last_accessed_at, supersedes_id, superseded_by_id, \
     supersession_reason, status, source_session_id, source_message_id, \
     created_at, updated_at, forgotten_at";

impl MemoryRow {
    /// Builds a `MemoryRow` from a rusqlite row selected with
    /// [`MEMORY_COLUMNS`].
    ///
    /// # Errors
    ///
    /// Returns a rusqlite error if a column has an unexpected type.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            agent_handle: row.get(1)?,
            path_scope: row.get(2)?,
            content: row.get(3)?,
            category: row.get(4)?,
            embedding: row.get(5)?,
            confidence: row.get(6)?,
            access_count: row.get(7)?,
            last_accessed_at: row.get(8)?,
            supersedes_id: row.get(9)?,
            superseded_by_id: row.get(10)?,
            supersession_reason: row.get(11)?,
            status: row.get(12)?,
            source_session_id: row.get(13)?,
            source_message_id: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
            forgotten_at: row.get(17)?,
        })
    }
}

/// Converts a `MemoryRow` to a [`Memory`] with proper type conversions.
///
/// Parsing is lenient where the value space came from us in the first
/// place: unknown status strings default to active, unknown categories to
/// fact, and an embedding blob that fails to decode becomes `None` (the
/// record stays listable, just search-ineligible).
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn build_memory_from_row(row: MemoryRow) -> Memory {
    let category = MemoryCategory::parse(&row.category).unwrap_or_default();
    let status = MemoryStatus::parse_lenient(&row.status);

    let embedding = row.embedding.and_then(|blob| match decode_vector(&blob) {
        Ok(vector) => Some(vector),
        Err(e) => {
            tracing::warn!(id = %row.id, error = %e, "discarding undecodable embedding blob");
            None
        },
    });

    Memory {
        id: MemoryId::new(row.id),
        agent_handle: row.agent_handle,
        path_scope: row.path_scope,
        content: row.content,
        category,
        embedding,
        confidence: row.confidence,
        access_count: row.access_count.max(0) as u64,
        last_accessed_at: row.last_accessed_at.map(|ts| ts.max(0) as u64),
        supersedes_id: row.supersedes_id.map(MemoryId::new),
        superseded_by_id: row.superseded_by_id.map(MemoryId::new),
        supersession_reason: row.supersession_reason,
        status,
        source_session_id: row.source_session_id,
        source_message_id: row.source_message_id,
        created_at: row.created_at.max(0) as u64,
        updated_at: row.updated_at.max(0) as u64,
        forgotten_at: row
            .forgotten_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
    }
}
