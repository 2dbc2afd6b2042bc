//! Bounded background queue feeding the formation pipeline.
//!
//! A single consumer thread drains a bounded channel so formation never
//! blocks the caller's hot path. Submission is non-blocking: when the
//! queue is full the task is rejected immediately and reported as
//! failed, it is never silently dropped.

use super::FormationPipeline;
use crate::models::{FormationTask, TaskStatus};
use crate::store::acquire_lock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Interval at which the worker re-checks shutdown flags while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Receives per-task lifecycle updates.
///
/// The sink is called from the worker thread, once when a task starts
/// and once when it finishes (or immediately on rejection).
pub trait StatusSink: Send + Sync {
    /// Reports a status transition for a task.
    fn on_status(&self, task: &FormationTask, status: TaskStatus);
}

struct QueueShared {
    pipeline: Arc<FormationPipeline>,
    sink: Option<Arc<dyn StatusSink>>,
    /// Tasks accepted but not yet finished (queued + in flight).
    pending: Mutex<usize>,
    drained: Condvar,
    stop_requested: AtomicBool,
    /// Set when a stop deadline passes: remaining tasks are reported as
    /// failed instead of executed.
    abandon: AtomicBool,
}

impl QueueShared {
    fn task_done(&self) {
        let mut pending = acquire_lock(&self.pending);
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    fn report(&self, task: &FormationTask, status: TaskStatus) {
        if let Some(sink) = self.sink.as_ref() {
            sink.on_status(task, status);
        }
    }
}

/// Bounded queue with one background formation worker.
///
/// Construction only sets up the buffer; [`start`] launches the consumer.
/// Tasks submitted before `start` simply wait in the buffer, in FIFO
/// order.
///
/// [`start`]: FormationQueue::start
pub struct FormationQueue {
    sender: SyncSender<FormationTask>,
    receiver: Mutex<Option<Receiver<FormationTask>>>,
    shared: Arc<QueueShared>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl FormationQueue {
    /// Creates a queue with the given capacity.
    #[must_use]
    pub fn new(pipeline: Arc<FormationPipeline>, capacity: usize) -> Self {
        Self::with_sink_opt(pipeline, capacity, None)
    }

    /// Creates a queue that reports task lifecycle to a sink.
    #[must_use]
    pub fn with_sink(
        pipeline: Arc<FormationPipeline>,
        capacity: usize,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self::with_sink_opt(pipeline, capacity, Some(sink))
    }

    fn with_sink_opt(
        pipeline: Arc<FormationPipeline>,
        capacity: usize,
        sink: Option<Arc<dyn StatusSink>>,
    ) -> Self {
        let (sender, receiver) = sync_channel(capacity.max(1));
        let shared = Arc::new(QueueShared {
            pipeline,
            sink,
            pending: Mutex::new(0),
            drained: Condvar::new(),
            stop_requested: AtomicBool::new(false),
            abandon: AtomicBool::new(false),
        });
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            shared,
            worker: Mutex::new(None),
        }
    }

    /// Launches the consumer thread. Further calls are no-ops.
    pub fn start(&self) {
        let Some(receiver) = acquire_lock(&self.receiver).take() else {
            return;
        };
        let worker_shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("engram-formation".to_string())
            .spawn(move || run_worker(&receiver, &worker_shared));
        match handle {
            Ok(handle) => {
                let mut worker = acquire_lock(&self.worker);
                *worker = Some(handle);
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to spawn formation worker; queue is inert");
            },
        }
    }

    /// Submits a task for background formation.
    ///
    /// Returns `false` when the queue is full or stopping; the task is
    /// then reported to the sink as failed and a failure event is
    /// emitted, so accounting stays one event per submission.
    pub fn submit(&self, task: FormationTask) -> bool {
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            self.reject(&task, "queue is stopping");
            return false;
        }

        {
            let mut pending = acquire_lock(&self.shared.pending);
            *pending += 1;
        }
        if let Err(e) = self.sender.try_send(task) {
            self.shared.task_done();
            let (task, reason) = match e {
                std::sync::mpsc::TrySendError::Full(task) => (task, "queue is full"),
                std::sync::mpsc::TrySendError::Disconnected(task) => (task, "worker is gone"),
            };
            self.reject(&task, reason);
            return false;
        }
        metrics::counter!("engram_queue_submitted_total").increment(1);
        true
    }

    /// Blocks until every accepted task has finished or the timeout
    /// passes. Returns `true` if the queue drained.
    pub fn wait_for_formations(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = acquire_lock(&self.shared.pending);
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .shared
                .drained
                .wait_timeout(pending, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            pending = guard;
        }
        true
    }

    /// Stops the queue: rejects new submissions, waits up to `timeout`
    /// for in-flight work to drain, then abandons the rest.
    ///
    /// Returns `true` if all accepted tasks finished before the
    /// deadline. Abandoned tasks are reported to the sink as failed, not
    /// executed. Idempotent.
    pub fn stop(&self, timeout: Duration) -> bool {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        if !self.wait_for_formations(timeout) {
            tracing::warn!("formation queue did not drain in time, abandoning remaining tasks");
            self.shared.abandon.store(true, Ordering::SeqCst);
            // the worker may be pinned on an in-flight formation; leave
            // the handle for Drop so stop returns at the deadline
            return false;
        }

        let handle = {
            let mut worker = acquire_lock(&self.worker);
            worker.take()
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::error!("formation worker panicked during shutdown");
        }
        true
    }

    /// Number of accepted tasks not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        *acquire_lock(&self.shared.pending)
    }

    fn reject(&self, task: &FormationTask, reason: &str) {
        metrics::counter!("engram_queue_rejected_total").increment(1);
        self.shared.report(
            task,
            TaskStatus::Failed {
                reason: reason.to_string(),
            },
        );
        self.shared.pipeline.emit_failed(reason);
    }
}

impl Drop for FormationQueue {
    fn drop(&mut self) {
        self.shared.stop_requested.store(true, Ordering::SeqCst);
        self.shared.abandon.store(true, Ordering::SeqCst);
        let handle = {
            let mut worker = acquire_lock(&self.worker);
            worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_worker(receiver: &Receiver<FormationTask>, shared: &Arc<QueueShared>) {
    loop {
        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(task) => {
                if shared.abandon.load(Ordering::SeqCst) {
                    shared.report(
                        &task,
                        TaskStatus::Failed {
                            reason: "abandoned at shutdown".to_string(),
                        },
                    );
                    shared.pipeline.emit_failed("abandoned at shutdown");
                    shared.task_done();
                    continue;
                }
                shared.report(&task, TaskStatus::InProgress);
                let event = shared.pipeline.form(task.clone());
                let status = match event {
                    crate::models::FormationEvent::Failed { reason } => {
                        TaskStatus::Failed { reason }
                    },
                    _ => TaskStatus::Completed,
                };
                shared.report(&task, status);
                shared.task_done();
            },
            Err(RecvTimeoutError::Timeout) => {
                // channel empty; exit once a stop was requested
                if shared.stop_requested.load(Ordering::SeqCst) {
                    break;
                }
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingProvider, HashEmbedder};
    use crate::store::MemoryStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Assigns each distinct content its own one-hot vector, so unrelated
    /// tasks never fall inside the supersession band.
    #[derive(Default)]
    struct OneHotProvider {
        assigned: Mutex<HashMap<String, usize>>,
    }

    impl EmbeddingProvider for OneHotProvider {
        fn dimensions(&self) -> usize {
            32
        }

        fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
            let mut assigned = self.assigned.lock().unwrap();
            let next = assigned.len();
            let index = *assigned.entry(text.to_string()).or_insert(next);
            let mut vector = vec![0.0; 32];
            vector[index % 32] = 1.0;
            Ok(vector)
        }
    }

    fn queue(capacity: usize) -> (FormationQueue, Arc<MemoryStore>) {
        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(HashEmbedder::new()))).unwrap(),
        );
        let pipeline = Arc::new(FormationPipeline::new(Arc::clone(&store), 0.85, 0.95));
        let queue = FormationQueue::new(pipeline, capacity);
        queue.start();
        (queue, store)
    }

    #[test]
    fn test_tasks_buffered_before_start() {
        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(HashEmbedder::new()))).unwrap(),
        );
        let pipeline = Arc::new(FormationPipeline::new(Arc::clone(&store), 0.85, 0.95));
        let queue = FormationQueue::new(pipeline, 8);

        assert!(queue.submit(FormationTask::new("waits for the consumer")));
        assert_eq!(queue.pending(), 1);

        queue.start();
        assert!(queue.wait_for_formations(Duration::from_secs(10)));
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_start_is_idempotent() {
        let (queue, store) = queue(8);
        queue.start();
        assert!(queue.submit(FormationTask::new("formed once")));
        assert!(queue.wait_for_formations(Duration::from_secs(10)));
        assert_eq!(store.count(None).unwrap(), 1);
    }

    #[test]
    fn test_submitted_tasks_all_form() {
        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(OneHotProvider::default()))).unwrap(),
        );
        let pipeline = Arc::new(FormationPipeline::new(Arc::clone(&store), 0.85, 0.95));
        let queue = FormationQueue::new(pipeline, 16);
        queue.start();

        for i in 0..8 {
            assert!(queue.submit(FormationTask::new(format!("distinct memory number {i}"))));
        }
        assert!(queue.wait_for_formations(Duration::from_secs(10)));
        assert_eq!(store.count(None).unwrap(), 8);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_stop_drains_then_rejects() {
        let (queue, store) = queue(16);
        assert!(queue.submit(FormationTask::new("formed before stop")));
        assert!(queue.stop(Duration::from_secs(10)));
        assert_eq!(store.count(None).unwrap(), 1);

        // post-stop submissions are rejected
        assert!(!queue.submit(FormationTask::new("too late")));
    }

    #[test]
    fn test_stop_returns_at_deadline_with_task_in_flight() {
        use std::sync::mpsc;

        // blocks every formation until released, pinning the worker
        struct Gate {
            entered: mpsc::SyncSender<()>,
            release: Mutex<mpsc::Receiver<()>>,
        }
        impl crate::formation::FormationObserver for Gate {
            fn on_event(&self, _event: &crate::models::FormationEvent) {
                let _ = self.entered.send(());
                let release = self.release.lock().unwrap();
                let _ = release.recv_timeout(Duration::from_secs(10));
            }
        }

        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(HashEmbedder::new()))).unwrap(),
        );
        let pipeline = Arc::new(FormationPipeline::new(Arc::clone(&store), 0.85, 0.95));
        let (entered_tx, entered_rx) = mpsc::sync_channel(1);
        let (release_tx, release_rx) = mpsc::channel();
        pipeline.add_observer(Arc::new(Gate {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        }));

        let queue = FormationQueue::new(pipeline, 4);
        queue.start();
        assert!(queue.submit(FormationTask::new("slow observer pins the worker")));
        entered_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let started = Instant::now();
        assert!(!queue.stop(Duration::from_millis(100)));
        // stop honors its deadline instead of waiting out the formation
        assert!(started.elapsed() < Duration::from_secs(5));

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (queue, _store) = queue(4);
        assert!(queue.stop(Duration::from_secs(5)));
        assert!(queue.stop(Duration::from_secs(5)));
    }

    #[test]
    fn test_sink_sees_lifecycle() {
        #[derive(Default)]
        struct Recording {
            in_progress: AtomicUsize,
            completed: AtomicUsize,
            failed: AtomicUsize,
        }
        impl StatusSink for Recording {
            fn on_status(&self, _task: &FormationTask, status: TaskStatus) {
                match status {
                    TaskStatus::InProgress => &self.in_progress,
                    TaskStatus::Completed => &self.completed,
                    TaskStatus::Failed { .. } => &self.failed,
                }
                .fetch_add(1, Ordering::SeqCst);
            }
        }

        let store = Arc::new(
            MemoryStore::open_in_memory(Some(Arc::new(HashEmbedder::new()))).unwrap(),
        );
        let pipeline = Arc::new(FormationPipeline::new(Arc::clone(&store), 0.85, 0.95));
        let sink = Arc::new(Recording::default());
        let queue = FormationQueue::with_sink(pipeline, 16, Arc::clone(&sink) as Arc<dyn StatusSink>);
        queue.start();

        assert!(queue.submit(FormationTask::new("good task")));
        assert!(queue.submit(FormationTask::new("   "))); // forms as Failed
        assert!(queue.wait_for_formations(Duration::from_secs(10)));

        assert_eq!(sink.in_progress.load(Ordering::SeqCst), 2);
        assert_eq!(sink.completed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.failed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_with_zero_pending_returns_immediately() {
        let (queue, _store) = queue(4);
        assert!(queue.wait_for_formations(Duration::from_millis(10)));
    }
}
