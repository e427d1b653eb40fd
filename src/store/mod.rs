//! SQLite storage behind the serial execution gate
//!
//! All storage runs on one dedicated DB thread (see `gate`); the public
//! `Store` methods are thin async shims that submit an executor function
//! to the gate and await the materialized result.
//!
//! ## Module Structure
//!
//! - `gate` - the serial execution gate and DB-thread worker
//! - `files` - file CRUD executors
//! - `chunks` - chunk CRUD executors and the transactional file update
//! - `embeddings` - embedding CRUD and vector-index executors
//! - `search` - regex and semantic search executors
//! - `types` - entity types, results, errors

mod chunks;
mod embeddings;
mod files;
mod gate;
mod search;
pub mod types;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use gate::SerialGate;

pub use types::{
    capabilities_for, ChunkRecord, EmbeddingRow, FileRecord, FileUpdatePlan, SearchCapability,
    SearchHit, SearchPage, StoreError, StoreStats, UpdateOutcome, VectorIndexInfo,
    CURRENT_SCHEMA_VERSION,
};

/// Number of embedding rows at which the bulk-write path drops the vector
/// index before inserting and recreates it afterwards. Contractual, not a
/// tuning knob.
pub const VECTOR_INDEX_DROP_THRESHOLD: usize = 50;

/// Embedded chunk store over SQLite.
///
/// One instance owns one database file. Every method funnels through the
/// serial gate, so calls from any number of tasks are totally ordered and
/// the underlying connection never sees concurrent access.
///
/// # Example
///
/// ```no_run
/// use chunkhound::store::Store;
/// # async fn demo() -> Result<(), chunkhound::store::StoreError> {
/// let store = Store::new(".chunkhound/db")?;
/// store.connect().await?;
/// let stats = store.get_stats().await?;
/// println!("{} chunks in {} files", stats.chunks, stats.files);
/// # Ok(())
/// # }
/// ```
pub struct Store {
    gate: SerialGate,
    db_path: PathBuf,
}

impl Store {
    /// Create a store handle for a database path. Spawns the DB thread;
    /// the connection itself is opened lazily or by [`Store::connect`].
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        let gate = SerialGate::spawn(db_path.clone())?;
        Ok(Self { gate, db_path })
    }

    /// Database file location.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open the connection, create/verify the schema, and recover from a
    /// stale write-ahead log. Idempotent.
    pub async fn connect(&self) -> Result<(), StoreError> {
        self.gate.submit("connect", |w| w.open()).await
    }

    /// Checkpoint the WAL and close the connection. Idempotent; a later
    /// call re-opens lazily.
    pub async fn disconnect(&self) -> Result<(), StoreError> {
        self.gate.submit("disconnect", |w| w.close()).await
    }

    /// Close the store for good: disconnect and join the DB thread.
    pub async fn close(&self) -> Result<(), StoreError> {
        self.disconnect().await?;
        self.gate.shutdown();
        Ok(())
    }

    // ===== Transactions =====
    //
    // While a transaction is open, every call submitted through the gate
    // participates in it (single connection). The indexing coordinator
    // therefore applies its per-file transaction as one gate job
    // (`apply_file_update`) so queries can never interleave mid-write;
    // these methods exist for callers that own the whole gate, e.g. tests
    // and one-shot maintenance.

    /// Begin an immediate transaction.
    pub async fn begin(&self) -> Result<(), StoreError> {
        self.gate
            .submit("begin", |w| {
                let (rt, conn) = w.parts()?;
                rt.block_on(async {
                    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await
    }

    /// Commit the open transaction.
    pub async fn commit(&self) -> Result<(), StoreError> {
        self.gate
            .submit("commit", |w| {
                let (rt, conn) = w.parts()?;
                rt.block_on(async {
                    sqlx::query("COMMIT").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await
    }

    /// Roll back the open transaction.
    pub async fn rollback(&self) -> Result<(), StoreError> {
        self.gate
            .submit("rollback", |w| {
                let (rt, conn) = w.parts()?;
                rt.block_on(async {
                    sqlx::query("ROLLBACK").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await
    }

    // ===== File CRUD =====

    /// Insert a file row, returning its id.
    pub async fn insert_file(
        &self,
        path: String,
        language: String,
        size: i64,
        mtime: i64,
    ) -> Result<i64, StoreError> {
        self.gate
            .submit("insert_file", move |w| {
                files::insert_file(w, &path, &language, size, mtime)
            })
            .await
    }

    /// Look up a file by its stored (relative) path.
    pub async fn get_file_by_path(&self, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let path = path.to_string();
        self.gate
            .submit("get_file_by_path", move |w| files::get_file_by_path(w, &path))
            .await
    }

    /// Update size/mtime/last_indexed_at for a file row.
    pub async fn update_file(&self, id: i64, size: i64, mtime: i64) -> Result<(), StoreError> {
        self.gate
            .submit("update_file", move |w| files::update_file(w, id, size, mtime))
            .await
    }

    /// Delete a file and everything it owns (chunks cascade to embeddings).
    pub async fn delete_file_completely(&self, id: i64) -> Result<(), StoreError> {
        self.gate
            .submit("delete_file_completely", move |w| files::delete_file(w, id))
            .await
    }

    /// All file rows (path, mtime, size) for reconciliation scans.
    pub async fn list_files(&self) -> Result<Vec<FileRecord>, StoreError> {
        self.gate.submit("list_files", files::list_files).await
    }

    // ===== Chunk CRUD =====

    /// Bulk-insert chunks for a file, returning new ids in input order.
    ///
    /// One multi-row INSERT per `db_batch_size` rows; never a per-row loop.
    pub async fn insert_chunks_batch(
        &self,
        file_id: i64,
        chunks: Vec<crate::parser::ParsedChunk>,
        db_batch_size: usize,
    ) -> Result<Vec<i64>, StoreError> {
        self.gate
            .submit("insert_chunks_batch", move |w| {
                chunks::insert_chunks_batch(w, file_id, &chunks, db_batch_size)
            })
            .await
    }

    /// All live chunks for a file.
    pub async fn get_chunks_by_file_id(&self, file_id: i64) -> Result<Vec<ChunkRecord>, StoreError> {
        self.gate
            .submit("get_chunks_by_file_id", move |w| {
                chunks::get_chunks_by_file_id(w, file_id)
            })
            .await
    }

    /// `(id, code)` pairs for specific chunks (inline embedding path).
    pub async fn get_chunk_codes(&self, ids: Vec<i64>) -> Result<Vec<(i64, String)>, StoreError> {
        self.gate
            .submit("get_chunk_codes", move |w| chunks::get_chunk_codes(w, &ids))
            .await
    }

    /// Delete one chunk by id (embeddings cascade).
    pub async fn delete_chunk(&self, id: i64) -> Result<(), StoreError> {
        self.gate
            .submit("delete_chunk", move |w| chunks::delete_chunk(w, id))
            .await
    }

    /// Delete every chunk for a file.
    pub async fn delete_chunks_by_file_id(&self, file_id: i64) -> Result<u64, StoreError> {
        self.gate
            .submit("delete_chunks_by_file_id", move |w| {
                chunks::delete_chunks_by_file_id(w, file_id)
            })
            .await
    }

    /// Apply one file's parse/diff outcome atomically.
    ///
    /// Runs as a single gate job wrapping BEGIN..COMMIT, so a query can
    /// never observe a half-applied update. On any error the transaction
    /// rolls back and the error is re-raised.
    pub async fn apply_file_update(
        &self,
        plan: FileUpdatePlan,
    ) -> Result<UpdateOutcome, StoreError> {
        self.gate
            .submit("apply_file_update", move |w| chunks::apply_file_update(w, plan))
            .await
    }

    // ===== Embedding CRUD =====

    /// Which of the given chunks already have an embedding for
    /// (provider, model).
    pub async fn get_existing_embeddings(
        &self,
        chunk_ids: Vec<i64>,
        provider: String,
        model: String,
    ) -> Result<HashSet<i64>, StoreError> {
        self.gate
            .submit("get_existing_embeddings", move |w| {
                embeddings::get_existing_embeddings(w, &chunk_ids, &provider, &model)
            })
            .await
    }

    /// Upsert embedding rows (keyed by chunk_id). Runs of at least
    /// [`VECTOR_INDEX_DROP_THRESHOLD`] rows drop the vector index first
    /// and recreate it afterwards.
    pub async fn insert_embeddings_batch(
        &self,
        rows: Vec<EmbeddingRow>,
    ) -> Result<usize, StoreError> {
        self.gate
            .submit("insert_embeddings_batch", move |w| {
                embeddings::insert_embeddings_batch(w, &rows)
            })
            .await
    }

    /// Chunks lacking an embedding for (provider, model), optionally
    /// scoped to a path prefix, up to `limit`.
    pub async fn get_chunks_without_embeddings(
        &self,
        provider: String,
        model: String,
        path_prefix: Option<String>,
        limit: usize,
    ) -> Result<Vec<(i64, String)>, StoreError> {
        self.gate
            .submit("get_chunks_without_embeddings", move |w| {
                embeddings::get_chunks_without_embeddings(
                    w,
                    &provider,
                    &model,
                    path_prefix.as_deref(),
                    limit,
                )
            })
            .await
    }

    // ===== Vector index =====

    /// Register a vector index for (provider, model) and create the
    /// physical index.
    pub async fn create_vector_index(
        &self,
        provider: String,
        model: String,
        dims: u32,
        metric: String,
    ) -> Result<(), StoreError> {
        self.gate
            .submit("create_vector_index", move |w| {
                embeddings::create_vector_index(w, &provider, &model, dims, &metric)
            })
            .await
    }

    /// Drop the vector index for (provider, model).
    pub async fn drop_vector_index(
        &self,
        provider: String,
        model: String,
    ) -> Result<(), StoreError> {
        self.gate
            .submit("drop_vector_index", move |w| {
                embeddings::drop_vector_index(w, &provider, &model)
            })
            .await
    }

    /// All registered vector indexes.
    pub async fn list_vector_indexes(&self) -> Result<Vec<VectorIndexInfo>, StoreError> {
        self.gate
            .submit("list_vector_indexes", embeddings::list_vector_indexes)
            .await
    }

    /// Rebuild the (provider, model) embedding rows at a new width:
    /// deletes rows with the wrong dimension and updates the registry.
    pub async fn rebuild_vector_column(
        &self,
        provider: String,
        model: String,
        dims: u32,
    ) -> Result<u64, StoreError> {
        self.gate
            .submit("rebuild_vector_column", move |w| {
                embeddings::rebuild_vector_column(w, &provider, &model, dims)
            })
            .await
    }

    // ===== Search =====

    /// Regex search over chunk code, paginated in chunk-id order.
    ///
    /// The pattern is compiled by the caller and executed inside the
    /// store layer; the path prefix is pushed down as a parameter.
    pub async fn search_regex(
        &self,
        pattern: regex::Regex,
        path_prefix: Option<String>,
        page_size: usize,
        offset: usize,
    ) -> Result<SearchPage, StoreError> {
        self.gate
            .submit("search_regex", move |w| {
                search::search_regex(w, &pattern, path_prefix.as_deref(), page_size, offset)
            })
            .await
    }

    /// Semantic (vector) search over embeddings for (provider, model),
    /// ordered by cosine distance, paginated.
    #[allow(clippy::too_many_arguments)]
    pub async fn search_semantic(
        &self,
        vector: Vec<f32>,
        provider: String,
        model: String,
        threshold: Option<f32>,
        path_prefix: Option<String>,
        page_size: usize,
        offset: usize,
    ) -> Result<SearchPage, StoreError> {
        self.gate
            .submit("search_semantic", move |w| {
                search::search_semantic(
                    w,
                    &vector,
                    &provider,
                    &model,
                    threshold,
                    path_prefix.as_deref(),
                    page_size,
                    offset,
                )
            })
            .await
    }

    /// Aggregate statistics.
    pub async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let db_path = self.db_path.clone();
        self.gate
            .submit("get_stats", move |w| {
                let mut stats = files::get_stats(w)?;
                stats.db_size_bytes = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
                Ok(stats)
            })
            .await
    }
}
