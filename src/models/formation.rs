//! Formation pipeline and queue types.

use super::{MemoryCategory, MemoryId};

/// Result of one formation pipeline run.
///
/// Every submitted candidate produces exactly one event; failures are
/// reported here rather than propagated, because background formation must
/// never interrupt the conversational path.
#[derive(Debug, Clone)]
pub enum FormationEvent {
    /// A new memory was created.
    Created {
        /// The ID of the new memory.
        memory_id: MemoryId,
    },
    /// An equivalent memory already existed; nothing was written.
    Skipped {
        /// The ID of the existing memory.
        existing_id: MemoryId,
        /// Similarity between candidate and existing content.
        similarity: f32,
    },
    /// The candidate replaced an older memory on the same topic.
    Superseded {
        /// The ID of the new memory.
        new_id: MemoryId,
        /// The ID of the memory it replaced.
        old_id: MemoryId,
        /// Human-readable reason recorded on the old memory.
        reason: String,
    },
    /// The pipeline failed at some step.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}

impl FormationEvent {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Skipped { .. } => "skipped",
            Self::Superseded { .. } => "superseded",
            Self::Failed { .. } => "failed",
        }
    }

    /// Returns the resulting memory id, if the run produced or matched one.
    #[must_use]
    pub const fn memory_id(&self) -> Option<&MemoryId> {
        match self {
            Self::Created { memory_id } => Some(memory_id),
            Self::Skipped { existing_id, .. } => Some(existing_id),
            Self::Superseded { new_id, .. } => Some(new_id),
            Self::Failed { .. } => None,
        }
    }
}

/// A queued unit of formation work: one candidate memory.
#[derive(Debug, Clone, Default)]
pub struct FormationTask {
    /// Candidate content extracted from a conversation turn.
    pub content: String,
    /// Optional category hint; classified when absent.
    pub category_hint: Option<MemoryCategory>,
    /// Optional agent scope for the candidate.
    pub agent_handle: Option<String>,
    /// Optional project-path scope for the candidate.
    pub path_scope: Option<String>,
    /// Provenance: source session id (externally owned).
    pub source_session_id: Option<String>,
    /// Provenance: source message id (externally owned).
    pub source_message_id: Option<String>,
}

impl FormationTask {
    /// Creates a task with the given candidate content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Sets the category hint.
    #[must_use]
    pub const fn with_category_hint(mut self, category: MemoryCategory) -> Self {
        self.category_hint = Some(category);
        self
    }

    /// Sets the agent scope.
    #[must_use]
    pub fn with_agent(mut self, handle: impl Into<String>) -> Self {
        self.agent_handle = Some(handle.into());
        self
    }
}

/// Per-task progress reported by the queue consumer.
///
/// Independent of the [`FormationEvent`] stream; intended for UI feedback
/// ("forming memory...").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// The consumer picked the task up.
    InProgress,
    /// The pipeline run finished (created, skipped, or superseded).
    Completed,
    /// The pipeline run failed, or the task was rejected at submission.
    Failed {
        /// Human-readable reason.
        reason: String,
    },
}
