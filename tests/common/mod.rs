//! Common test fixtures and helpers
//!
//! Usage in test files:
//! ```ignore
//! mod common;
//! use common::TestStore;
//! ```

// Not every test binary uses every helper
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chunkhound::parser::{ChunkKind, ParsedChunk};
use chunkhound::store::Store;
use tempfile::TempDir;

/// Test store with automatic cleanup
///
/// Wraps a connected `Store` with its backing `TempDir`, ensuring the
/// directory lives as long as the store is in use.
pub struct TestStore {
    /// The store instance
    pub store: Arc<Store>,
    /// Temp directory (kept alive to prevent cleanup)
    pub dir: TempDir,
}

impl TestStore {
    /// Create a connected store in a fresh temporary directory
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::new(dir.path().join("db")).expect("Failed to create store");
        store.connect().await.expect("Failed to connect store");
        Self {
            store: Arc::new(store),
            dir,
        }
    }

    /// Path of the backing database file
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("db")
    }
}

/// Create a test chunk with sensible defaults
pub fn test_chunk(code: &str) -> ParsedChunk {
    ParsedChunk {
        kind: ChunkKind::Function,
        name: Some("helper".to_string()),
        start_line: 1,
        end_line: 3,
        code: code.to_string(),
    }
}

/// Create a mock unit vector pointing along one axis.
///
/// Same axis = distance 0 to itself, distance 1 to any other axis, so
/// ordering assertions stay readable.
pub fn axis_vector(axis: usize, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[axis % dims] = 1.0;
    v
}

/// A vector at a known angle from axis 0, for graded distances
pub fn angled_vector(weight: f32, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[0] = 1.0;
    v[1] = weight;
    v
}
