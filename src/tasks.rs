//! Task coordinator: priority scheduling of queries over background
//! indexing
//!
//! Three priorities, one worker. User queries preempt file changes,
//! which preempt periodic-scan work, with a starvation valve: after
//! eight consecutive high-priority draws the next lower-priority item is
//! promoted once. Each priority has a bounded queue with its own
//! overflow policy: file changes coalesce duplicates by path, periodic
//! scans drop the new entry, and user queries fail synchronously.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::indexer::IndexCoordinator;

/// Consecutive high-priority draws before one lower item is promoted
const STARVATION_LIMIT: u32 = 8;

/// Per-priority queue bounds
const MAX_USER_QUERY: usize = 64;
const MAX_FILE_CHANGE: usize = 4096;
const MAX_PERIODIC_SCAN: usize = 1024;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("User query queue is full")]
    QueueFull,
    #[error("Task queue is closed")]
    Closed,
}

/// Cooperative cancellation handle for a submitted task.
///
/// Cancelling does not preempt a running job; a not-yet-started job is
/// skipped at dequeue time.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type QueryJob = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

pub(crate) enum TaskPayload {
    /// Index (or re-index) one file
    ProcessFile(PathBuf),
    /// Remove one file from the store
    RemoveFile(PathBuf),
    /// A user query; the job owns its reply channel
    Query { job: QueryJob, token: CancelToken },
}

impl TaskPayload {
    fn path(&self) -> Option<&PathBuf> {
        match self {
            TaskPayload::ProcessFile(p) | TaskPayload::RemoveFile(p) => Some(p),
            TaskPayload::Query { .. } => None,
        }
    }

    fn is_remove(&self) -> bool {
        matches!(self, TaskPayload::RemoveFile(_))
    }
}

#[derive(Default)]
struct QueueState {
    user: VecDeque<TaskPayload>,
    file: VecDeque<TaskPayload>,
    scan: VecDeque<TaskPayload>,
    /// Consecutive user-query draws while lower-priority work waited
    high_streak: u32,
    closed: bool,
}

/// Snapshot of queue depths for stats/health reporting
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStatus {
    pub user_query: usize,
    pub file_change: usize,
    pub periodic_scan: usize,
}

/// The shared priority queue. A single [`run_worker`] task drains it.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: tokio::sync::Notify,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: tokio::sync::Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Submit a user query job. Fails synchronously when the queue is
    /// full or closed; returns a cancel token otherwise.
    pub fn submit_query(
        &self,
        job: impl FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static,
    ) -> Result<CancelToken, TaskError> {
        let token = CancelToken::new();
        {
            let mut state = self.lock();
            if state.closed {
                return Err(TaskError::Closed);
            }
            if state.user.len() >= MAX_USER_QUERY {
                return Err(TaskError::QueueFull);
            }
            state.user.push_back(TaskPayload::Query {
                job: Box::new(job),
                token: token.clone(),
            });
        }
        self.notify.notify_one();
        Ok(token)
    }

    /// Enqueue a file change. Duplicate paths with the same operation
    /// coalesce, both normally and on overflow.
    pub fn submit_file_change(&self, path: PathBuf, remove: bool) {
        self.submit_indexing(path, remove, false);
    }

    /// Enqueue reconciliation work from the periodic scanner. Overflow
    /// drops the new entry.
    pub fn submit_scan(&self, path: PathBuf, remove: bool) {
        self.submit_indexing(path, remove, true);
    }

    fn submit_indexing(&self, path: PathBuf, remove: bool, from_scan: bool) {
        let payload = if remove {
            TaskPayload::RemoveFile(path)
        } else {
            TaskPayload::ProcessFile(path)
        };
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let (queue, cap) = if from_scan {
                (&mut state.scan, MAX_PERIODIC_SCAN)
            } else {
                (&mut state.file, MAX_FILE_CHANGE)
            };

            let duplicate = queue.iter().any(|existing| {
                existing.path() == payload.path() && existing.is_remove() == payload.is_remove()
            });
            if duplicate {
                return;
            }
            if queue.len() >= cap {
                if from_scan {
                    tracing::debug!("Periodic-scan queue full; dropping entry");
                    return;
                }
                tracing::warn!("File-change queue full; dropping oldest entry");
                queue.pop_front();
            }
            queue.push_back(payload);
        }
        self.notify.notify_one();
    }

    /// Current queue depths.
    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        QueueStatus {
            user_query: state.user.len(),
            file_change: state.file.len(),
            periodic_scan: state.scan.len(),
        }
    }

    /// Close the queue; the worker drains what is left and stops.
    pub fn close(&self) {
        self.lock().closed = true;
        // notify_waiters wakes registered waiters; the stored permit from
        // notify_one covers a worker that has not polled yet
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Dequeue the next task by priority, with starvation promotion.
    /// Returns None once the queue is closed and empty.
    pub(crate) async fn next(&self) -> Option<TaskPayload> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.lock();

                let lower_waiting = !state.file.is_empty() || !state.scan.is_empty();
                if state.high_streak >= STARVATION_LIMIT && lower_waiting {
                    state.high_streak = 0;
                    if let Some(task) = state.file.pop_front() {
                        return Some(task);
                    }
                    if let Some(task) = state.scan.pop_front() {
                        return Some(task);
                    }
                }

                if let Some(task) = state.user.pop_front() {
                    if lower_waiting {
                        state.high_streak += 1;
                    } else {
                        state.high_streak = 0;
                    }
                    return Some(task);
                }
                state.high_streak = 0;
                if let Some(task) = state.file.pop_front() {
                    return Some(task);
                }
                if let Some(task) = state.scan.pop_front() {
                    return Some(task);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }
}

/// Single worker draining the queue.
///
/// Indexing failures are logged and do not stop the worker; a worker
/// that silently dies would strand the whole pipeline.
pub async fn run_worker(queue: Arc<TaskQueue>, coordinator: Arc<IndexCoordinator>) {
    while let Some(task) = queue.next().await {
        match task {
            TaskPayload::ProcessFile(path) => match coordinator.process_file(&path).await {
                Ok(summary) => {
                    tracing::debug!(path = %path.display(), status = ?summary.status, "Processed file");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "process_file failed");
                }
            },
            TaskPayload::RemoveFile(path) => {
                if let Err(e) = coordinator.remove_file(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "remove_file failed");
                }
            }
            TaskPayload::Query { job, token } => {
                if token.is_cancelled() {
                    tracing::debug!("Skipping cancelled query task");
                    continue;
                }
                job().await;
            }
        }
    }
    tracing::debug!("Task worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_kind(task: Option<TaskPayload>) -> &'static str {
        match task {
            Some(TaskPayload::Query { .. }) => "query",
            Some(TaskPayload::ProcessFile(_)) => "process",
            Some(TaskPayload::RemoveFile(_)) => "remove",
            None => "none",
        }
    }

    fn noop_query() -> impl FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static {
        || Box::pin(async {})
    }

    #[tokio::test]
    async fn test_user_queries_run_first() {
        let queue = TaskQueue::new();
        queue.submit_file_change(PathBuf::from("a.rs"), false);
        queue.submit_query(noop_query()).unwrap();

        assert_eq!(drain_kind(queue.next().await), "query");
        assert_eq!(drain_kind(queue.next().await), "process");
    }

    #[tokio::test]
    async fn test_starvation_promotion() {
        let queue = TaskQueue::new();
        queue.submit_file_change(PathBuf::from("waiting.rs"), false);
        for _ in 0..STARVATION_LIMIT + 1 {
            queue.submit_query(noop_query()).unwrap();
        }

        let mut kinds = Vec::new();
        for _ in 0..STARVATION_LIMIT + 2 {
            kinds.push(drain_kind(queue.next().await));
        }
        // The file change must have been promoted before the last query
        let promoted_at = kinds.iter().position(|k| *k == "process");
        assert_eq!(promoted_at, Some(STARVATION_LIMIT as usize));
    }

    #[tokio::test]
    async fn test_file_change_coalesces_by_path() {
        let queue = TaskQueue::new();
        queue.submit_file_change(PathBuf::from("a.rs"), false);
        queue.submit_file_change(PathBuf::from("a.rs"), false);
        queue.submit_file_change(PathBuf::from("b.rs"), false);

        assert_eq!(queue.status().file_change, 2);
    }

    #[tokio::test]
    async fn test_remove_and_process_do_not_coalesce() {
        let queue = TaskQueue::new();
        queue.submit_file_change(PathBuf::from("a.rs"), false);
        queue.submit_file_change(PathBuf::from("a.rs"), true);
        assert_eq!(queue.status().file_change, 2);
    }

    #[tokio::test]
    async fn test_user_query_overflow_errors() {
        let queue = TaskQueue::new();
        for _ in 0..MAX_USER_QUERY {
            queue.submit_query(noop_query()).unwrap();
        }
        let err = queue.submit_query(noop_query()).unwrap_err();
        assert!(matches!(err, TaskError::QueueFull));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = TaskQueue::new();
        queue.submit_file_change(PathBuf::from("a.rs"), false);
        queue.close();

        assert!(matches!(
            queue.submit_query(noop_query()),
            Err(TaskError::Closed)
        ));
        // Existing work still drains, then the queue reports done
        assert_eq!(drain_kind(queue.next().await), "process");
        assert_eq!(drain_kind(queue.next().await), "none");
    }

    #[tokio::test]
    async fn test_cancelled_token_reports() {
        let queue = TaskQueue::new();
        let token = queue.submit_query(noop_query()).unwrap();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }
}
