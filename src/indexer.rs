//! Indexing coordinator: the single ingestion path
//!
//! `process_file` is the only way chunks enter the store. The MCP
//! server, the file watcher, the periodic scanner, and the CLI all call
//! the same method; nothing bypasses the diff/transaction discipline.
//! A parallel "incremental" entry point that skipped the diff caused
//! duplicate chunks in an earlier design and must not come back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::diff::diff_chunks;
use crate::embed::EmbeddingService;
use crate::language::language_for_path;
use crate::parser::{FileParser, ParseError};
use crate::store::{FileUpdatePlan, Store, StoreError};

/// Attempts to read a file that exists but is briefly unreadable
/// (editor save-in-progress) before giving up
const READ_RETRIES: u32 = 3;

/// Delay between readability retries
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Embedding error: {0}")]
    Embed(String),
}

/// Why a file was skipped rather than indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// File does not exist or stayed unreadable through the retries
    Unreadable,
    /// Extension has no registered parser
    UnsupportedLanguage,
    /// The parser failed; the store was not touched
    ParseFailed(String),
}

/// Outcome of one `process_file` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    Indexed,
    /// Nothing to do and nothing mutated
    Skipped(SkipReason),
}

/// Summary returned by `process_file`
#[derive(Debug)]
pub struct ProcessSummary {
    pub status: ProcessStatus,
    /// Live chunks for the file after the call
    pub chunks: usize,
    pub inserted: usize,
    pub deleted: usize,
}

impl ProcessSummary {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            status: ProcessStatus::Skipped(reason),
            chunks: 0,
            inserted: 0,
            deleted: 0,
        }
    }
}

/// Orchestrates parse -> diff -> delete -> insert -> commit for one file
/// at a time, per path.
pub struct IndexCoordinator {
    store: Arc<Store>,
    parser: Arc<FileParser>,
    base_dir: PathBuf,
    /// Per-path locks: a file is never processed by two invocations
    /// concurrently
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Embed newly inserted chunks before returning (one-shot CLI mode);
    /// the watch/MCP path leaves embedding to the background pass
    inline_embeddings: Option<Arc<EmbeddingService>>,
    db_batch_size: usize,
}

impl IndexCoordinator {
    pub fn new(
        store: Arc<Store>,
        parser: Arc<FileParser>,
        base_dir: PathBuf,
        db_batch_size: usize,
    ) -> Self {
        Self {
            store,
            parser,
            base_dir,
            locks: Mutex::new(HashMap::new()),
            inline_embeddings: None,
            db_batch_size,
        }
    }

    /// Enable inline embedding generation for newly added chunks.
    pub fn with_inline_embeddings(mut self, service: Arc<EmbeddingService>) -> Self {
        self.inline_embeddings = Some(service);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Stored (relative) form of a path: relative to the base directory
    /// with forward slashes, absolute only for paths outside the base.
    pub fn to_stored_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.base_dir).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }

    async fn lock_for(&self, stored_path: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(stored_path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Parse, diff, and atomically apply one file's current contents.
    pub async fn process_file(&self, path: &Path) -> Result<ProcessSummary, IndexError> {
        // Resolve symlinks so two spellings of one file share a row
        let Some(canonical) = self.wait_readable(path).await else {
            return Ok(ProcessSummary::skipped(SkipReason::Unreadable));
        };
        let stored_path = self.to_stored_path(&canonical);

        let Some(language) = language_for_path(&canonical) else {
            return Ok(ProcessSummary::skipped(SkipReason::UnsupportedLanguage));
        };

        let path_lock = self.lock_for(&stored_path).await;
        let _guard = path_lock.lock().await;

        let existing_file = self.store.get_file_by_path(&stored_path).await?;

        // Parse on a blocking thread; tree-sitter is CPU-bound
        let parser = Arc::clone(&self.parser);
        let parse_path = canonical.clone();
        let parsed = tokio::task::spawn_blocking(move || parser.parse_file(&parse_path))
            .await
            .map_err(|e| StoreError::Runtime(format!("parse task: {e}")))?;

        let new_chunks = match parsed {
            Ok(chunks) => chunks,
            Err(ParseError::UnsupportedFileType(_)) => {
                return Ok(ProcessSummary::skipped(SkipReason::UnsupportedLanguage));
            }
            Err(e) => {
                tracing::warn!(path = %canonical.display(), error = %e, "Parse failed; store untouched");
                return Ok(ProcessSummary::skipped(SkipReason::ParseFailed(e.to_string())));
            }
        };

        let meta = match std::fs::metadata(&canonical) {
            Ok(m) => m,
            Err(_) => return Ok(ProcessSummary::skipped(SkipReason::Unreadable)),
        };
        let size = meta.len() as i64;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let total = new_chunks.len();
        let plan = match &existing_file {
            Some(file) => {
                let existing_chunks = self.store.get_chunks_by_file_id(file.id).await?;
                if existing_chunks.is_empty() {
                    // File row without chunks means an earlier update went
                    // sideways; wipe by file_id so nothing stale survives
                    FileUpdatePlan {
                        path: stored_path.clone(),
                        language: language.to_string(),
                        size,
                        mtime,
                        existing_file_id: Some(file.id),
                        delete_chunk_ids: Vec::new(),
                        insert_chunks: new_chunks,
                        wipe_existing: true,
                        db_batch_size: self.db_batch_size,
                    }
                } else {
                    let diff = diff_chunks(existing_chunks, new_chunks);
                    FileUpdatePlan {
                        path: stored_path.clone(),
                        language: language.to_string(),
                        size,
                        mtime,
                        existing_file_id: Some(file.id),
                        delete_chunk_ids: diff.deleted.iter().map(|c| c.id).collect(),
                        insert_chunks: diff.added,
                        wipe_existing: false,
                        db_batch_size: self.db_batch_size,
                    }
                }
            }
            None => FileUpdatePlan {
                path: stored_path.clone(),
                language: language.to_string(),
                size,
                mtime,
                existing_file_id: None,
                delete_chunk_ids: Vec::new(),
                insert_chunks: new_chunks,
                wipe_existing: false,
                db_batch_size: self.db_batch_size,
            },
        };

        let outcome = self.store.apply_file_update(plan).await?;

        tracing::debug!(
            path = %stored_path,
            chunks = total,
            inserted = outcome.inserted_ids.len(),
            deleted = outcome.deleted,
            "File indexed"
        );

        if let Some(service) = &self.inline_embeddings {
            if !outcome.inserted_ids.is_empty() {
                service
                    .embed_chunk_ids(&outcome.inserted_ids)
                    .await
                    .map_err(|e| IndexError::Embed(e.to_string()))?;
            }
        }

        Ok(ProcessSummary {
            status: ProcessStatus::Indexed,
            chunks: total,
            inserted: outcome.inserted_ids.len(),
            deleted: outcome.deleted,
        })
    }

    /// Remove a file and everything it owns. Returns false when the path
    /// was not indexed.
    pub async fn remove_file(&self, path: &Path) -> Result<bool, IndexError> {
        // The file is usually already gone from disk; resolve against the
        // base directory without touching the filesystem
        let stored_path = self.to_stored_path(path);

        let path_lock = self.lock_for(&stored_path).await;
        let _guard = path_lock.lock().await;

        match self.store.get_file_by_path(&stored_path).await? {
            Some(file) => {
                self.store.delete_file_completely(file.id).await?;
                tracing::debug!(path = %stored_path, "File removed from index");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Wait briefly until the path exists and is readable, resolving it
    /// to canonical form. None when it stays unreadable.
    async fn wait_readable(&self, path: &Path) -> Option<PathBuf> {
        for attempt in 0..READ_RETRIES {
            match dunce::canonicalize(path) {
                Ok(canonical) if canonical.is_file() => return Some(canonical),
                Ok(_) => return None, // directory or special file
                Err(_) => {
                    if attempt + 1 < READ_RETRIES {
                        tokio::time::sleep(READ_RETRY_DELAY).await;
                    }
                }
            }
        }
        None
    }
}
