//! Data types for the parser module

use thiserror::Error;

// Re-export from language module (source of truth)
pub use crate::language::ChunkKind;

/// Errors that can occur during code parsing
#[derive(Error, Debug)]
pub enum ParseError {
    /// File extension not recognized as a supported language
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// Tree-sitter failed to parse the file contents
    #[error("Failed to parse: {0}")]
    ParseFailed(String),
    /// Tree-sitter query compilation failed (indicates bug in query string)
    #[error("Failed to compile query for {0}: {1}")]
    QueryCompileFailed(String, String),
    /// File read error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A parsed code chunk before it has a database identity.
///
/// Chunks are the basic unit of indexing and search. The `code` field is
/// the chunk's raw text and is also its identity for incremental diffing;
/// line numbers and names are metadata that may change without the chunk
/// counting as different.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Kind of code element
    pub kind: ChunkKind,
    /// Name of the function/class/heading, when the element has one
    pub name: Option<String>,
    /// Starting line number (1-indexed)
    pub start_line: u32,
    /// Ending line number (1-indexed)
    pub end_line: u32,
    /// Raw chunk text
    pub code: String,
}
