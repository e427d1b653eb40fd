//! Filesystem watcher: OS events captured on an internal thread,
//! drained synchronously by the consumer
//!
//! The watcher thread normalizes notify events into `{path, kind}`
//! records and pushes them into a mutex-guarded deque. Consumers poll
//! `drain_events()` from the main event loop; no event-loop queue or
//! coroutine handle is ever shared with the watcher thread. Bridging OS
//! events into a loop-local queue via a transfer task loses events
//! silently whenever the bridge dies mid-reconfiguration, so the only
//! cross-thread surface here is the deque.
//!
//! Bursts of write events for one path coalesce into a single modified
//! event within the debounce window. Deletions are never debounced.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;

use crate::discovery::FileFilter;

/// Hard cap on buffered events. Events buffer until the consumer starts
/// draining (the MCP server only drains after storage is ready), so the
/// cap is generous; overflow drops the oldest record with a warning.
const MAX_QUEUE: usize = 65_536;

/// Poll interval of the internal thread's channel receive
const THREAD_TICK: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("Watcher thread failed to start: {0}")]
    Spawn(String),
}

/// Normalized filesystem event kinds delivered to consumers.
/// Renames are expanded to `Deleted(old)` + `Created(new)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

/// One normalized filesystem event
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
}

/// Watcher handle owned by the consumer.
///
/// Dropping (or calling `stop`) terminates the internal thread after it
/// flushes pending debounced events.
pub struct FileWatcher {
    queue: Arc<Mutex<VecDeque<WatchEvent>>>,
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl FileWatcher {
    /// Start watching `root` recursively. Events for paths that do not
    /// pass `filter` are dropped inside the watcher thread; the watcher
    /// owns the filter precisely so it can never run without one.
    pub fn spawn(root: PathBuf, filter: FileFilter, debounce: Duration) -> Result<Self, WatchError> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
        let mut watcher = RecommendedWatcher::new(tx, notify::Config::default())?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let thread_queue = Arc::clone(&queue);
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("chunkhound-watch".into())
            .spawn(move || {
                // The notify watcher must live on this thread for the
                // duration of the loop
                let _watcher = watcher;
                watch_loop(&root, &filter, debounce, &rx, &thread_queue, &thread_stop);
            })
            .map_err(|e| WatchError::Spawn(e.to_string()))?;

        Ok(Self {
            queue,
            stop,
            thread: Some(thread),
        })
    }

    /// Drain all buffered events in arrival order. The only consumer API;
    /// intended to be polled every ~200 ms from the event loop.
    pub fn drain_events(&self) -> Vec<WatchEvent> {
        let mut queue = self
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue.drain(..).collect()
    }

    /// Number of buffered events (for health reporting)
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether the watcher thread is still running
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Stop the watcher thread and join it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Watcher thread panicked during shutdown");
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_loop(
    root: &Path,
    filter: &FileFilter,
    debounce: Duration,
    rx: &std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    queue: &Mutex<VecDeque<WatchEvent>>,
    stop: &AtomicBool,
) {
    // Paths with a pending (coalesced) modified event and their last-seen time
    let mut pending_modified: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        if stop.load(Ordering::Acquire) {
            for path in pending_modified.into_keys() {
                push_event(queue, WatchEvent { path, kind: WatchEventKind::Modified });
            }
            return;
        }

        match rx.recv_timeout(THREAD_TICK) {
            Ok(Ok(event)) => {
                for record in normalize(&event) {
                    if !accepts(root, filter, &record.path) {
                        continue;
                    }
                    match record.kind {
                        WatchEventKind::Modified => {
                            pending_modified.insert(record.path, Instant::now());
                        }
                        WatchEventKind::Created | WatchEventKind::Deleted => {
                            // A pending write burst is superseded by the
                            // lifecycle event
                            pending_modified.remove(&record.path);
                            push_event(queue, record);
                        }
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Watch error");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher event channel disconnected; watcher thread exiting");
                return;
            }
        }

        // Flush coalesced modifications whose burst has gone quiet
        let now = Instant::now();
        let ready: Vec<PathBuf> = pending_modified
            .iter()
            .filter(|(_, last)| now.duration_since(**last) >= debounce)
            .map(|(path, _)| path.clone())
            .collect();
        for path in ready {
            pending_modified.remove(&path);
            push_event(queue, WatchEvent { path, kind: WatchEventKind::Modified });
        }
    }
}

/// Expand a notify event into normalized records.
fn normalize(event: &notify::Event) -> Vec<WatchEvent> {
    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Created })
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Deleted })
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            // Moves expand to deleted(old) + created(new)
            RenameMode::Both if event.paths.len() == 2 => vec![
                WatchEvent { path: event.paths[0].clone(), kind: WatchEventKind::Deleted },
                WatchEvent { path: event.paths[1].clone(), kind: WatchEventKind::Created },
            ],
            RenameMode::From => event
                .paths
                .iter()
                .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Deleted })
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Created })
                .collect(),
            _ => event
                .paths
                .iter()
                .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Modified })
                .collect(),
        },
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|p| WatchEvent { path: p.clone(), kind: WatchEventKind::Modified })
            .collect(),
        _ => Vec::new(),
    }
}

/// Include/exclude filtering happens here, inside the watcher; a watcher
/// without its pattern set would have to drop everything.
fn accepts(root: &Path, filter: &FileFilter, path: &Path) -> bool {
    let rel = path.strip_prefix(root).unwrap_or(path);
    filter.matches(rel)
}

fn push_event(queue: &Mutex<VecDeque<WatchEvent>>, event: WatchEvent) {
    let mut queue = queue
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if queue.len() >= MAX_QUEUE {
        tracing::warn!("Watcher queue full ({MAX_QUEUE}); dropping oldest event");
        queue.pop_front();
    }
    queue.push_back(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn test_filter() -> FileFilter {
        FileFilter::new(&FileFilter::default_includes(), &[]).unwrap()
    }

    fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }

    #[test]
    fn test_create_event_delivered() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let watcher =
            FileWatcher::spawn(root.clone(), test_filter(), Duration::from_millis(100)).unwrap();

        // Give the OS watcher a moment to arm
        std::thread::sleep(Duration::from_millis(200));
        fs::write(root.join("a.py"), "def f(): pass").unwrap();

        assert!(wait_for(|| watcher.pending() > 0, Duration::from_secs(5)));
        let events = watcher.drain_events();
        assert!(events.iter().any(|e| e.path.ends_with("a.py")));
    }

    #[test]
    fn test_non_matching_paths_dropped() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let watcher =
            FileWatcher::spawn(root.clone(), test_filter(), Duration::from_millis(100)).unwrap();

        std::thread::sleep(Duration::from_millis(200));
        fs::write(root.join("noise.txt"), "not code").unwrap();

        // No event should surface for an unmatched extension
        assert!(!wait_for(|| watcher.pending() > 0, Duration::from_secs(1)));
    }

    #[test]
    fn test_write_burst_coalesces() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        fs::write(root.join("b.py"), "x = 0").unwrap();

        let watcher =
            FileWatcher::spawn(root.clone(), test_filter(), Duration::from_millis(300)).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        for i in 0..5 {
            fs::write(root.join("b.py"), format!("x = {i}")).unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }

        assert!(wait_for(|| watcher.pending() > 0, Duration::from_secs(5)));
        // Let any stragglers flush, then expect a single modified event
        std::thread::sleep(Duration::from_millis(500));
        let modified: Vec<_> = watcher
            .drain_events()
            .into_iter()
            .filter(|e| e.kind == WatchEventKind::Modified && e.path.ends_with("b.py"))
            .collect();
        assert_eq!(modified.len(), 1, "write burst should coalesce: {modified:?}");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let root = dunce::canonicalize(dir.path()).unwrap();
        let mut watcher =
            FileWatcher::spawn(root, test_filter(), Duration::from_millis(100)).unwrap();
        watcher.stop();
        watcher.stop();
        assert!(!watcher.is_running());
    }
}
