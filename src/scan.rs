//! Periodic scanner: reconciliation safety net for missed watcher events
//!
//! Every `interval`, enumerate the source tree, compare against the
//! store, and schedule `process_file` for new/changed paths and
//! `remove_file` for stored paths that left the disk. Holds no state
//! between runs.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::discovery::{discover_files, FileFilter};
use crate::store::Store;
use crate::tasks::TaskQueue;

/// Default reconciliation interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(300);

pub struct PeriodicScanner {
    base_dir: PathBuf,
    filter: FileFilter,
    store: Arc<Store>,
    queue: Arc<TaskQueue>,
    interval: Duration,
    max_file_size: u64,
}

impl PeriodicScanner {
    pub fn new(
        base_dir: PathBuf,
        filter: FileFilter,
        store: Arc<Store>,
        queue: Arc<TaskQueue>,
        interval: Duration,
        max_file_size: u64,
    ) -> Self {
        Self {
            base_dir,
            filter,
            store,
            queue,
            interval,
            max_file_size,
        }
    }

    /// Run the reconciliation loop until the owning task is cancelled.
    /// Individual scan failures are logged and the loop keeps going; a
    /// scanner that silently dies defeats its purpose.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup indexing
        // (which just ran) is not repeated
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = self.scan_once().await {
                tracing::warn!(error = %e, "Periodic scan failed");
            }
        }
    }

    /// One reconciliation pass. Public for tests and the one-shot path.
    pub async fn scan_once(&self) -> Result<ScanReport, crate::store::StoreError> {
        let base = self.base_dir.clone();
        let filter = self.filter.clone();
        let max_size = self.max_file_size;
        let on_disk = tokio::task::spawn_blocking(move || discover_files(&base, &filter, max_size))
            .await
            .map_err(|e| crate::store::StoreError::Runtime(format!("scan task: {e}")))?;

        let stored = self.store.list_files().await?;
        let stored_by_path: HashMap<&str, &crate::store::FileRecord> =
            stored.iter().map(|f| (f.path.as_str(), f)).collect();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

        let mut report = ScanReport::default();

        for file in &on_disk {
            let rel = file
                .path
                .strip_prefix(&self.base_dir)
                .unwrap_or(&file.path)
                .to_string_lossy()
                .replace('\\', "/");
            match stored_by_path.get(rel.as_str()) {
                Some(record) if record.mtime == file.mtime && record.size == file.size as i64 => {}
                _ => {
                    // New path or drifted mtime/size
                    self.queue.submit_scan(file.path.clone(), false);
                    report.changed += 1;
                }
            }
            seen.insert(rel);
        }

        for record in &stored {
            if !seen.contains(record.path.as_str()) {
                self.queue
                    .submit_scan(self.base_dir.join(&record.path), true);
                report.removed += 1;
            }
        }

        if report.changed > 0 || report.removed > 0 {
            tracing::info!(
                changed = report.changed,
                removed = report.removed,
                "Reconciliation scan scheduled work"
            );
        }
        Ok(report)
    }
}

/// What one reconciliation pass scheduled
#[derive(Debug, Default, Clone, Copy)]
pub struct ScanReport {
    pub changed: usize,
    pub removed: usize,
}
