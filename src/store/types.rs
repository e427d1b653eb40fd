//! Store entity types, search results, and error definitions

use std::collections::HashMap;
use thiserror::Error;

use crate::language::ChunkKind;
use crate::parser::ParsedChunk;

/// Schema version for database migrations
///
/// Increment this when changing the database schema. `Store::connect()`
/// checks this against the stored version and refuses newer schemas.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Store operation errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Storage gate is closed")]
    GateClosed,
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Database invalidated by a fatal write error; reconnect required")]
    Invalidated,
    #[error("Schema version mismatch: database is v{0}, chunkhound expects v{1}")]
    SchemaMismatch(i32, i32),
    #[error("Database created by newer chunkhound (schema v{0}). Please upgrade.")]
    SchemaNewerThanBinary(i32),
    #[error("Embedding dimension mismatch: index declares {declared}, observed {observed}")]
    DimensionMismatch { declared: u32, observed: u32 },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Whether this error indicates the database connection can no longer
    /// be trusted for writes (disk full, corrupted image). Such errors
    /// invalidate the store until reconnect.
    pub(crate) fn is_fatal_write(&self) -> bool {
        match self {
            StoreError::Io(_) => true,
            StoreError::Database(sqlx::Error::Io(_)) => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                let msg = db.message();
                msg.contains("disk I/O error")
                    || msg.contains("database disk image is malformed")
                    || msg.contains("database or disk is full")
            }
            _ => false,
        }
    }
}

/// A file row as stored
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    /// Path relative to the base directory (absolute only for outside files)
    pub path: String,
    pub language: String,
    pub size: i64,
    /// Unix mtime seconds
    pub mtime: i64,
    /// ISO 8601 timestamp of the last successful index
    pub last_indexed_at: String,
}

/// A chunk row as stored
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: i64,
    pub file_id: i64,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
}

/// One embedding row for bulk upsert
#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub chunk_id: i64,
    pub provider: String,
    pub model: String,
    pub dims: u32,
    pub vector: Vec<f32>,
}

/// A registered vector index
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndexInfo {
    pub provider: String,
    pub model: String,
    pub dims: u32,
    pub metric: String,
}

/// Index statistics returned by `Store::get_stats`
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub files: u64,
    pub chunks: u64,
    pub embeddings: u64,
    /// Distinct "provider/model" pairs with at least one embedding
    pub providers: Vec<String>,
    pub files_by_language: HashMap<String, u64>,
    pub db_size_bytes: u64,
}

/// A single search hit (regex or semantic)
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: i64,
    /// Stored (relative) file path; the search service absolutizes it
    pub path: String,
    pub kind: ChunkKind,
    pub name: Option<String>,
    pub start_line: u32,
    pub end_line: u32,
    pub code: String,
    /// Cosine distance for semantic hits, None for regex hits
    pub distance: Option<f32>,
}

/// One page of search results from the store
#[derive(Debug, Clone)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// True when more matches exist past this page's offset + len
    pub has_more: bool,
}

/// Search primitives a storage backend declares it supports.
///
/// The MCP server derives its tool list from this set eagerly, before the
/// store ever connects, so the client's tool list is stable from the
/// first `tools/list` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCapability {
    Regex,
    Semantic,
}

/// Capability set for a configured database provider.
pub fn capabilities_for(provider: &str) -> &'static [SearchCapability] {
    match provider {
        "sqlite" => &[SearchCapability::Regex, SearchCapability::Semantic],
        _ => &[],
    }
}

/// Plan for one transactional file update, produced by the indexing
/// coordinator and applied by a single gate job so no query can observe
/// a half-applied state.
#[derive(Debug)]
pub struct FileUpdatePlan {
    pub path: String,
    pub language: String,
    pub size: i64,
    pub mtime: i64,
    /// Existing file id, None for first-time indexing
    pub existing_file_id: Option<i64>,
    /// Chunk ids classified as deleted by the diff
    pub delete_chunk_ids: Vec<i64>,
    /// New chunks classified as added by the diff
    pub insert_chunks: Vec<ParsedChunk>,
    /// When true, delete every chunk for the file before inserting.
    /// Set when the file row exists but chunk loading returned nothing
    /// (inconsistent state); without this, stale chunks survive updates.
    pub wipe_existing: bool,
    /// Rows per bulk INSERT statement
    pub db_batch_size: usize,
}

/// Result of applying a [`FileUpdatePlan`]
#[derive(Debug)]
pub struct UpdateOutcome {
    pub file_id: i64,
    pub inserted_ids: Vec<i64>,
    pub deleted: usize,
}

/// Clamp i64 to valid u32 line number range (1-indexed)
///
/// SQLite returns i64, but line numbers are u32 and 1-indexed.
#[inline]
pub(crate) fn clamp_line_number(n: i64) -> u32 {
    n.clamp(1, u32::MAX as i64) as u32
}

/// Parse a stored chunk kind, defaulting noisily rather than failing a
/// whole result set over one corrupt row.
pub(crate) fn parse_kind(chunk_id: i64, raw: &str) -> ChunkKind {
    raw.parse().unwrap_or_else(|_| {
        tracing::warn!(
            chunk_id,
            stored_value = %raw,
            "Failed to parse chunk kind from database, defaulting to function"
        );
        ChunkKind::Function
    })
}

// ============ Embedding Serialization ============

/// Convert an embedding vector to little-endian bytes for storage.
pub(crate) fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert stored bytes back to an owned vector.
///
/// Returns None if the byte length is not a whole number of f32s or does
/// not match the declared dimension count. This prevents silently using
/// corrupted/truncated embeddings.
pub(crate) fn bytes_to_vector(bytes: &[u8], dims: u32) -> Option<Vec<f32>> {
    if bytes.len() != dims as usize * 4 {
        tracing::trace!(
            expected = dims * 4,
            actual = bytes.len(),
            "Embedding byte length mismatch, skipping"
        );
        return None;
    }
    Some(bytemuck::cast_slice::<u8, f32>(bytes).to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_bytes_round_trip() {
        let v = vec![0.5f32, -1.25, 3.0];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_vector(&bytes, 3), Some(v));
    }

    #[test]
    fn test_bytes_to_vector_rejects_wrong_length() {
        let bytes = vector_to_bytes(&[1.0f32, 2.0]);
        assert!(bytes_to_vector(&bytes, 3).is_none());
        assert!(bytes_to_vector(&bytes[..7], 2).is_none());
    }

    #[test]
    fn test_clamp_line_number() {
        assert_eq!(clamp_line_number(1), 1);
        assert_eq!(clamp_line_number(0), 1);
        assert_eq!(clamp_line_number(-5), 1);
        assert_eq!(clamp_line_number(i64::MAX), u32::MAX);
    }

    #[test]
    fn test_capabilities_for_sqlite() {
        let caps = capabilities_for("sqlite");
        assert!(caps.contains(&SearchCapability::Regex));
        assert!(caps.contains(&SearchCapability::Semantic));
        assert!(capabilities_for("unknown").is_empty());
    }
}
