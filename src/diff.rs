//! Chunk diff: classify old vs new chunk sets for a file
//!
//! Identity is the exact byte sequence of `code`. No hashing (collision
//! risk) and no normalization (false matches); comparison is on the raw
//! string. The match is a multiset bijection: two identical chunks in the
//! old set consume two identical chunks in the new set one-for-one, so
//! duplicates never collapse.

use std::collections::{HashMap, VecDeque};

use crate::parser::ParsedChunk;
use crate::store::ChunkRecord;

/// Classification of one file's chunk sets
#[derive(Debug, Default)]
pub struct ChunkDiff {
    /// Existing chunks matched byte-for-byte by a new chunk; retained
    /// along with their embeddings
    pub unchanged: Vec<ChunkRecord>,
    /// Existing chunks whose code no longer appears in the new set
    pub deleted: Vec<ChunkRecord>,
    /// New chunks whose code did not exist in the old set
    pub added: Vec<ParsedChunk>,
}

/// Compare existing (stored) chunks against a fresh parse.
///
/// Each new chunk consumes at most one existing chunk with identical
/// `code`; leftovers on either side become `deleted`/`added`.
pub fn diff_chunks(existing: Vec<ChunkRecord>, new: Vec<ParsedChunk>) -> ChunkDiff {
    // Buckets of existing indices per code string, consumed FIFO
    let mut buckets: HashMap<&str, VecDeque<usize>> = HashMap::new();
    for (idx, chunk) in existing.iter().enumerate() {
        buckets.entry(chunk.code.as_str()).or_default().push_back(idx);
    }

    let mut matched = vec![false; existing.len()];
    let mut added = Vec::new();

    for chunk in new {
        match buckets.get_mut(chunk.code.as_str()).and_then(|b| b.pop_front()) {
            Some(idx) => matched[idx] = true,
            None => added.push(chunk),
        }
    }
    drop(buckets);

    let mut unchanged = Vec::new();
    let mut deleted = Vec::new();
    for (idx, chunk) in existing.into_iter().enumerate() {
        if matched[idx] {
            unchanged.push(chunk);
        } else {
            deleted.push(chunk);
        }
    }

    ChunkDiff {
        unchanged,
        deleted,
        added,
    }
}
