//! The formation pipeline: candidate text in, reconciled memory out.
//!
//! Formation embeds the candidate, compares it against live memories in
//! the same scope, and takes one of three paths: skip (the knowledge is
//! already held), create-and-supersede (the candidate refines an
//! existing memory), or plain create. The pipeline is infallible at its
//! boundary; anything that goes wrong becomes a `Failed` event rather
//! than an error, so queued work always yields exactly one event per
//! task.

mod queue;

pub use queue::{FormationQueue, StatusSink};

use crate::classify::Classifier;
use crate::models::{FormationEvent, FormationTask, MemoryDraft, MemoryId};
use crate::store::MemoryStore;
use crate::{Error, Result, embedding::cosine_similarity};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tracing::instrument;

/// Receives every formation outcome.
///
/// Observers run synchronously after the decision lands; a panicking
/// observer is isolated and logged, never propagated.
pub trait FormationObserver: Send + Sync {
    /// Called once per formed task, after the outcome is durable.
    fn on_event(&self, event: &FormationEvent);
}

/// Turns candidate text into reconciled memories.
pub struct FormationPipeline {
    store: Arc<MemoryStore>,
    classifier: Option<Arc<dyn Classifier>>,
    /// Similarity at or above which a candidate counts as covering the
    /// same knowledge as an existing memory.
    duplicate_threshold: f32,
    /// Similarity at or above which the candidate adds nothing and is
    /// skipped outright.
    equivalence_threshold: f32,
    observers: Mutex<Vec<Arc<dyn FormationObserver>>>,
}

impl FormationPipeline {
    /// Creates a pipeline with the given reconciliation thresholds.
    ///
    /// `duplicate_threshold` must be at or below
    /// `equivalence_threshold`; candidates land in the supersession band
    /// between the two.
    #[must_use]
    pub fn new(
        store: Arc<MemoryStore>,
        duplicate_threshold: f32,
        equivalence_threshold: f32,
    ) -> Self {
        Self {
            store,
            classifier: None,
            duplicate_threshold,
            equivalence_threshold,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a pipeline using the reconciliation thresholds from config.
    #[must_use]
    pub fn from_config(store: Arc<MemoryStore>, config: &crate::EngineConfig) -> Self {
        Self::new(
            store,
            config.duplicate_threshold,
            config.equivalence_threshold,
        )
    }

    /// Attaches a classifier used when a task carries no category hint.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Registers an observer for formation outcomes.
    pub fn add_observer(&self, observer: Arc<dyn FormationObserver>) {
        let mut observers = crate::store::acquire_lock(&self.observers);
        observers.push(observer);
    }

    /// Forms a memory from a task.
    ///
    /// Never returns an error: failures surface as
    /// [`FormationEvent::Failed`]. Observers are notified after every
    /// outcome, including failures.
    #[instrument(skip(self, task), fields(operation = "form_memory"))]
    pub fn form(&self, task: FormationTask) -> FormationEvent {
        let event = match self.form_inner(task) {
            Ok(event) => event,
            Err(e) => FormationEvent::Failed {
                reason: e.to_string(),
            },
        };
        metrics::counter!("engram_formation_events_total", "outcome" => event.event_type())
            .increment(1);
        self.notify(&event);
        event
    }

    /// Emits a `Failed` event for a task that never reached the pipeline
    /// (queue overflow, shutdown). Keeps the one-event-per-task
    /// accounting intact.
    pub(crate) fn emit_failed(&self, reason: impl Into<String>) -> FormationEvent {
        let event = FormationEvent::Failed {
            reason: reason.into(),
        };
        metrics::counter!("engram_formation_events_total", "outcome" => event.event_type())
            .increment(1);
        self.notify(&event);
        event
    }

    fn form_inner(&self, task: FormationTask) -> Result<FormationEvent> {
        let category = match task.category_hint {
            Some(category) => category,
            None => self.classify(&task.content)?,
        };

        let mut draft = MemoryDraft::new(task.content).with_category(category);
        draft.agent_handle = task.agent_handle;
        draft.path_scope = task.path_scope;
        draft.source_session_id = task.source_session_id;
        draft.source_message_id = task.source_message_id;
        draft.validate()?;

        let provider = self.store.provider().ok_or_else(|| {
            Error::ProviderUnavailable("formation requires an embedding provider".to_string())
        })?;

        // without a vector the candidate cannot be reconciled against
        // existing memories, so formation fails rather than writing a
        // record it could never deduplicate
        let vector = provider.embed(&draft.content).inspect_err(|e| {
            tracing::warn!(error = %e, "embedding failed, formation aborted");
            metrics::counter!("engram_embedding_failures_total").increment(1);
        })?;

        let best = self.best_match(&vector, draft.agent_handle.as_deref(), draft.path_scope.as_deref())?;

        match best {
            Some((existing_id, similarity)) if similarity >= self.equivalence_threshold => {
                // the store already holds this knowledge; reinforce it
                self.store.record_access(std::slice::from_ref(&existing_id))?;
                tracing::debug!(existing = %existing_id, similarity, "skipped equivalent memory");
                Ok(FormationEvent::Skipped {
                    existing_id,
                    similarity,
                })
            },
            Some((existing_id, similarity)) if similarity >= self.duplicate_threshold => {
                let reason = format!("refines earlier memory (similarity {similarity:.3})");
                let memory = self.store.create_with_embedding(draft, Some(vector))?;
                self.store.supersede(&existing_id, &memory.id, &reason)?;
                tracing::debug!(old = %existing_id, new = %memory.id, similarity, "memory superseded");
                Ok(FormationEvent::Superseded {
                    new_id: memory.id,
                    old_id: existing_id,
                    reason,
                })
            },
            _ => {
                let memory = self.store.create_with_embedding(draft, Some(vector))?;
                Ok(FormationEvent::Created {
                    memory_id: memory.id,
                })
            },
        }
    }

    /// Finds the most similar live memory visible from the task's scope.
    fn best_match(
        &self,
        vector: &[f32],
        agent: Option<&str>,
        path: Option<&str>,
    ) -> Result<Option<(MemoryId, f32)>> {
        let candidates = self.store.search_candidates(agent, path)?;
        let mut best: Option<(MemoryId, f32)> = None;
        for candidate in candidates {
            let Some(embedding) = candidate.embedding.as_deref() else {
                continue;
            };
            if embedding.len() != vector.len() {
                continue;
            }
            let similarity = cosine_similarity(vector, embedding);
            if best.as_ref().is_none_or(|(_, s)| similarity > *s) {
                best = Some((candidate.id, similarity));
            }
        }
        Ok(best)
    }

    fn classify(&self, content: &str) -> Result<crate::models::MemoryCategory> {
        let Some(classifier) = self.classifier.as_ref() else {
            // no classifier configured is a valid runtime state
            return Ok(crate::models::MemoryCategory::default());
        };
        classifier.classify(content).inspect_err(|e| {
            tracing::warn!(error = %e, "classification failed, formation aborted");
        })
    }

    fn notify(&self, event: &FormationEvent) {
        // snapshot outside the lock so a slow observer never blocks
        // registration or other notifiers
        let observers: Vec<Arc<dyn FormationObserver>> = {
            let guard = crate::store::acquire_lock(&self.observers);
            guard.clone()
        };
        for observer in &observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(event)));
            if result.is_err() {
                tracing::warn!(event = event.event_type(), "formation observer panicked");
                metrics::counter!("engram_observer_panics_total").increment(1);
            }
        }
    }
}
