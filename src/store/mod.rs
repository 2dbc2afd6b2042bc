//! Durable memory storage over `SQLite`.
//!
//! The store is the single source of truth for memory records. All
//! mutations are single-row updates except supersession, which is the one
//! multi-row transition and runs in a single transaction.

mod connection;
mod row;

pub use connection::{acquire_lock, configure_connection};
pub use row::{MEMORY_COLUMNS, MemoryRow, build_memory_from_row};

use crate::embedding::{EmbeddingProvider, encode_vector};
use crate::models::{Memory, MemoryDraft, MemoryId, MemoryStatus};
use crate::{Error, Result, current_timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Schema for the memories table.
///
/// Provenance columns reference externally-owned session/message tables,
/// so they are plain nullable text here rather than enforced foreign keys.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id                  TEXT PRIMARY KEY,
    agent_handle        TEXT,
    path_scope          TEXT,
    content             TEXT NOT NULL,
    category            TEXT NOT NULL DEFAULT 'fact',
    embedding           BLOB,
    confidence          REAL NOT NULL DEFAULT 1.0,
    access_count        INTEGER NOT NULL DEFAULT 0,
    last_accessed_at    INTEGER,
    supersedes_id       TEXT,
    superseded_by_id    TEXT,
    supersession_reason TEXT,
    status              TEXT NOT NULL DEFAULT 'active',
    source_session_id   TEXT,
    source_message_id   TEXT,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    forgotten_at        INTEGER
);
CREATE INDEX IF NOT EXISTS idx_memories_status ON memories(status);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_handle);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);
";

/// Durable store of memory records.
///
/// Thread-safe through a `Mutex<Connection>`; WAL mode and a busy timeout
/// keep contention graceful. The embedding provider is optional: without
/// one, created records simply carry no vector (listable but
/// search-ineligible).
pub struct MemoryStore {
    /// Guarded `SQLite` connection.
    conn: Mutex<Connection>,
    /// Optional embedding provider used at creation time.
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

impl MemoryStore {
    /// Opens (or creates) a store at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the database cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path, provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Storage {
            operation: "open_store".to_string(),
            cause: e.to_string(),
        })?;
        Self::with_connection(conn, provider)
    }

    /// Opens an in-memory store (tests, ephemeral sessions).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the schema cannot be applied.
    pub fn open_in_memory(provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Storage {
            operation: "open_store".to_string(),
            cause: e.to_string(),
        })?;
        Self::with_connection(conn, provider)
    }

    fn with_connection(
        conn: Connection,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        configure_connection(&conn);
        conn.execute_batch(SCHEMA).map_err(|e| Error::Storage {
            operation: "apply_schema".to_string(),
            cause: e.to_string(),
        })?;
        Ok(Self {
            conn: Mutex::new(conn),
            provider,
        })
    }

    /// Returns the configured embedding provider, if any.
    #[must_use]
    pub fn provider(&self) -> Option<&Arc<dyn EmbeddingProvider>> {
        self.provider.as_ref()
    }

    /// Creates a memory from a draft and returns the materialized record.
    ///
    /// If a provider is configured, the content is embedded and stored as a
    /// versioned blob. Embedding failure does not fail creation: the record
    /// is stored without a vector and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for empty content or out-of-range
    /// confidence, [`Error::Storage`] on insert failure.
    #[instrument(skip(self, draft), fields(operation = "create_memory"))]
    pub fn create(&self, draft: MemoryDraft) -> Result<Memory> {
        draft.validate()?;

        let embedding = self.provider.as_ref().and_then(|provider| {
            match provider.embed(&draft.content) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed, storing memory without vector");
                    metrics::counter!("engram_embedding_failures_total").increment(1);
                    None
                },
            }
        });
        self.create_with_embedding(draft, embedding)
    }

    /// Creates a memory from a draft using a vector the caller already
    /// computed (or `None` to store it unembedded).
    ///
    /// The formation pipeline embeds once for deduplication and hands
    /// the same vector here.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an invalid draft,
    /// [`Error::Storage`] on insert failure.
    pub fn create_with_embedding(
        &self,
        draft: MemoryDraft,
        embedding: Option<Vec<f32>>,
    ) -> Result<Memory> {
        draft.validate()?;

        let now = current_timestamp();
        let memory = Memory {
            id: MemoryId::generate(),
            agent_handle: draft.agent_handle,
            path_scope: draft.path_scope,
            content: draft.content,
            category: draft.category,
            embedding,
            confidence: draft.confidence.unwrap_or(1.0),
            access_count: 0,
            last_accessed_at: None,
            supersedes_id: None,
            superseded_by_id: None,
            supersession_reason: None,
            status: MemoryStatus::Active,
            source_session_id: draft.source_session_id,
            source_message_id: draft.source_message_id,
            created_at: now,
            updated_at: now,
            forgotten_at: None,
        };

        let blob = memory.embedding.as_deref().map(encode_vector);
        let conn = acquire_lock(&self.conn);
        conn.execute(
            "INSERT INTO memories (id, agent_handle, path_scope, content, category, embedding, \
             confidence, status, source_session_id, source_message_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                memory.id.as_str(),
                memory.agent_handle,
                memory.path_scope,
                memory.content,
                memory.category.as_str(),
                blob,
                memory.confidence,
                memory.status.as_str(),
                memory.source_session_id,
                memory.source_message_id,
                i64::try_from(memory.created_at).unwrap_or(i64::MAX),
                i64::try_from(memory.updated_at).unwrap_or(i64::MAX),
            ],
        )
        .map_err(|e| Error::Storage {
            operation: "create_memory".to_string(),
            cause: e.to_string(),
        })?;
        drop(conn);

        metrics::counter!("engram_memories_created_total").increment(1);
        tracing::debug!(id = %memory.id, category = %memory.category, "memory created");
        Ok(memory)
    }

    /// Fetches a memory by exact id, bumping its access bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no memory has the id.
    pub fn get(&self, id: &MemoryId) -> Result<Memory> {
        // bump first so the returned snapshot reflects this access
        self.record_access(std::slice::from_ref(id))?;
        self.fetch_exact(id.as_str())?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Resolves an id or unique id prefix, bumping access bookkeeping.
    ///
    /// Exact match wins; otherwise the prefix must match exactly one
    /// memory. Forgotten and superseded records resolve too, so callers can
    /// inspect history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for no match, [`Error::AmbiguousId`]
    /// for more than one.
    pub fn get_by_prefix(&self, prefix: &str) -> Result<Memory> {
        if self.fetch_exact(prefix)?.is_some() {
            return self.get(&MemoryId::new(prefix));
        }

        let pattern = format!("{}%", escape_like_wildcards(prefix));
        let conn = acquire_lock(&self.conn);
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE id LIKE ?1 ESCAPE '\\' LIMIT 2"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage {
            operation: "prepare_prefix_lookup".to_string(),
            cause: e.to_string(),
        })?;
        let rows: Vec<MemoryRow> = stmt
            .query_map(params![pattern], MemoryRow::from_row)
            .and_then(Iterator::collect)
            .map_err(|e| Error::Storage {
                operation: "prefix_lookup".to_string(),
                cause: e.to_string(),
            })?;
        drop(stmt);
        drop(conn);

        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (None, _) => Err(Error::NotFound(prefix.to_string())),
            (Some(row), None) => self.get(&build_memory_from_row(row).id),
            (Some(_), Some(_)) => Err(Error::AmbiguousId {
                prefix: prefix.to_string(),
                matches: self.count_prefix_matches(&pattern)?,
            }),
        }
    }

    /// Lists active memories, most recent first.
    ///
    /// `agent` filters to that exact scope; `None` lists every active
    /// record regardless of scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn list(&self, agent: Option<&str>, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        let conn = acquire_lock(&self.conn);
        let (clause, scope_param) = exact_scope_clause(agent, 3);
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE status = 'active'{clause} \
             ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2"
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage {
            operation: "prepare_list".to_string(),
            cause: e.to_string(),
        })?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(0);
        let rows: Vec<MemoryRow> = match scope_param {
            Some(handle) => stmt
                .query_map(params![limit, offset, handle], MemoryRow::from_row)
                .and_then(Iterator::collect),
            None => stmt
                .query_map(params![limit, offset], MemoryRow::from_row)
                .and_then(Iterator::collect),
        }
        .map_err(|e| Error::Storage {
            operation: "list_memories".to_string(),
            cause: e.to_string(),
        })?;

        Ok(rows.into_iter().map(build_memory_from_row).collect())
    }

    /// Counts active memories, optionally for one exact agent scope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn count(&self, agent: Option<&str>) -> Result<u64> {
        let conn = acquire_lock(&self.conn);
        let (clause, scope_param) = exact_scope_clause(agent, 1);
        let sql = format!("SELECT COUNT(*) FROM memories WHERE status = 'active'{clause}");
        let count: i64 = match scope_param {
            Some(handle) => conn.query_row(&sql, params![handle], |r| r.get(0)),
            None => conn.query_row(&sql, [], |r| r.get(0)),
        }
        .map_err(|e| Error::Storage {
            operation: "count_memories".to_string(),
            cause: e.to_string(),
        })?;
        #[allow(clippy::cast_sign_loss)]
        let count = count.max(0) as u64;
        Ok(count)
    }

    /// Soft-deletes a memory.
    ///
    /// Forgetting an already-forgotten record succeeds without touching
    /// it. Rows are retained, never purged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    #[instrument(skip(self), fields(operation = "forget_memory", id = %id))]
    pub fn forget(&self, id: &MemoryId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM memories WHERE id = ?1",
                params![id.as_str()],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage {
                operation: "forget_memory".to_string(),
                cause: e.to_string(),
            })?;

        let Some(status) = status else {
            return Err(Error::NotFound(id.to_string()));
        };
        if MemoryStatus::parse_lenient(&status) == MemoryStatus::Forgotten {
            return Ok(());
        }

        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        conn.execute(
            "UPDATE memories SET status = 'forgotten', updated_at = ?1, forgotten_at = ?1 \
             WHERE id = ?2",
            params![now, id.as_str()],
        )
        .map_err(|e| Error::Storage {
            operation: "forget_memory".to_string(),
            cause: e.to_string(),
        })?;
        drop(conn);

        metrics::counter!("engram_memories_forgotten_total").increment(1);
        tracing::debug!(id = %id, "memory forgotten");
        Ok(())
    }

    /// Bulk-forgets all active memories in scope. Returns how many were
    /// forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on update failure.
    #[instrument(skip(self), fields(operation = "clear_memories"))]
    pub fn clear(&self, agent: Option<&str>) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        let (clause, scope_param) = exact_scope_clause(agent, 2);
        let sql = format!(
            "UPDATE memories SET status = 'forgotten', updated_at = ?1, forgotten_at = ?1 \
             WHERE status = 'active'{clause}"
        );
        let cleared = match scope_param {
            Some(handle) => conn.execute(&sql, params![now, handle]),
            None => conn.execute(&sql, params![now]),
        }
        .map_err(|e| Error::Storage {
            operation: "clear_memories".to_string(),
            cause: e.to_string(),
        })?;
        drop(conn);

        metrics::counter!("engram_memories_forgotten_total")
            .increment(u64::try_from(cleared).unwrap_or(u64::MAX));
        tracing::info!(cleared, agent, "cleared active memories");
        Ok(cleared)
    }

    /// Archives a memory (lifecycle hook; nothing calls this
    /// automatically).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown id.
    pub fn archive(&self, id: &MemoryId) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        let updated = conn
            .execute(
                "UPDATE memories SET status = 'archived', updated_at = ?1 WHERE id = ?2",
                params![now, id.as_str()],
            )
            .map_err(|e| Error::Storage {
                operation: "archive_memory".to_string(),
                cause: e.to_string(),
            })?;
        if updated == 0 {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Supersedes `old_id` with `new_id` in a single transaction.
    ///
    /// Sets `old.status = superseded`, `old.superseded_by_id = new_id`,
    /// `old.supersession_reason = reason`, and `new.supersedes_id =
    /// old_id`. Either every pointer lands or none does, including on
    /// crash mid-operation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if either id is unknown (nothing is
    /// written), [`Error::Storage`] on transaction failure.
    #[instrument(skip(self, reason), fields(operation = "supersede", old = %old_id, new = %new_id))]
    pub fn supersede(&self, old_id: &MemoryId, new_id: &MemoryId, reason: &str) -> Result<()> {
        let mut conn = acquire_lock(&self.conn);
        let tx = conn.transaction().map_err(|e| Error::Storage {
            operation: "supersede_begin".to_string(),
            cause: e.to_string(),
        })?;

        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        let old_updated = tx
            .execute(
                "UPDATE memories SET status = 'superseded', superseded_by_id = ?1, \
                 supersession_reason = ?2, updated_at = ?3 WHERE id = ?4",
                params![new_id.as_str(), reason, now, old_id.as_str()],
            )
            .map_err(|e| Error::Storage {
                operation: "supersede_old".to_string(),
                cause: e.to_string(),
            })?;
        let new_updated = tx
            .execute(
                "UPDATE memories SET supersedes_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![old_id.as_str(), now, new_id.as_str()],
            )
            .map_err(|e| Error::Storage {
                operation: "supersede_new".to_string(),
                cause: e.to_string(),
            })?;

        if old_updated != 1 || new_updated != 1 {
            // dropping the transaction rolls the half-applied side back
            let missing = if old_updated == 0 { old_id } else { new_id };
            return Err(Error::NotFound(missing.to_string()));
        }

        tx.commit().map_err(|e| Error::Storage {
            operation: "supersede_commit".to_string(),
            cause: e.to_string(),
        })?;
        drop(conn);

        metrics::counter!("engram_memories_superseded_total").increment(1);
        tracing::debug!(old = %old_id, new = %new_id, "memory superseded");
        Ok(())
    }

    /// Increments `access_count` and stamps `last_accessed_at` for the
    /// given memories.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on update failure.
    pub fn record_access(&self, ids: &[MemoryId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = acquire_lock(&self.conn);
        let now = i64::try_from(current_timestamp()).unwrap_or(i64::MAX);
        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 \
             WHERE id IN ({})",
            placeholders.join(",")
        );
        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage {
            operation: "prepare_record_access".to_string(),
            cause: e.to_string(),
        })?;
        stmt.raw_bind_parameter(1, now).map_err(|e| Error::Storage {
            operation: "record_access".to_string(),
            cause: e.to_string(),
        })?;
        for (i, id) in ids.iter().enumerate() {
            stmt.raw_bind_parameter(i + 2, id.as_str())
                .map_err(|e| Error::Storage {
                    operation: "record_access".to_string(),
                    cause: e.to_string(),
                })?;
        }
        stmt.raw_execute().map_err(|e| Error::Storage {
            operation: "record_access".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    /// Returns active, embedded memories visible from the given scope.
    ///
    /// Visibility follows applicability: global records (NULL scope) apply
    /// to every agent/path, so a scoped query sees them alongside its own.
    /// Used by search; rows are returned unranked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on query failure.
    pub fn search_candidates(
        &self,
        agent: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let conn = acquire_lock(&self.conn);
        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE status = 'active' AND embedding IS NOT NULL"
        );
        let mut params_vec: Vec<&str> = Vec::new();
        if let Some(handle) = agent {
            params_vec.push(handle);
            sql.push_str(&format!(
                " AND (agent_handle IS NULL OR agent_handle = ?{})",
                params_vec.len()
            ));
        }
        if let Some(path) = path {
            params_vec.push(path);
            sql.push_str(&format!(
                " AND (path_scope IS NULL OR path_scope = ?{})",
                params_vec.len()
            ));
        }

        let mut stmt = conn.prepare(&sql).map_err(|e| Error::Storage {
            operation: "prepare_search_candidates".to_string(),
            cause: e.to_string(),
        })?;
        let rows: Vec<MemoryRow> = stmt
            .query_map(rusqlite::params_from_iter(params_vec), MemoryRow::from_row)
            .and_then(Iterator::collect)
            .map_err(|e| Error::Storage {
                operation: "search_candidates".to_string(),
                cause: e.to_string(),
            })?;

        Ok(rows.into_iter().map(build_memory_from_row).collect())
    }

    fn fetch_exact(&self, id: &str) -> Result<Option<Memory>> {
        let conn = acquire_lock(&self.conn);
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1");
        conn.query_row(&sql, params![id], MemoryRow::from_row)
            .optional()
            .map_err(|e| Error::Storage {
                operation: "get_memory".to_string(),
                cause: e.to_string(),
            })
            .map(|row| row.map(build_memory_from_row))
    }

    fn count_prefix_matches(&self, pattern: &str) -> Result<usize> {
        let conn = acquire_lock(&self.conn);
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories WHERE id LIKE ?1 ESCAPE '\\'",
                params![pattern],
                |r| r.get(0),
            )
            .map_err(|e| Error::Storage {
                operation: "count_prefix_matches".to_string(),
                cause: e.to_string(),
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Escapes SQL LIKE wildcards so prefix lookups treat them literally.
fn escape_like_wildcards(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' | '_' | '\\' => {
                result.push('\\');
                result.push(c);
            },
            _ => result.push(c),
        }
    }
    result
}

/// Builds an exact-scope clause for list/count/clear, with the parameter
/// index following whatever the caller already bound.
fn exact_scope_clause(agent: Option<&str>, index: usize) -> (String, Option<&str>) {
    agent.map_or_else(
        || (String::new(), None),
        |handle| (format!(" AND agent_handle = ?{index}"), Some(handle)),
    )
}
