//! Code parsing with tree-sitter
//!
//! Split into submodules:
//! - `types` - data structures and error types
//! - `markdown` - custom grammar-less markdown parser

pub mod markdown;
pub mod types;

pub use types::{ChunkKind, ParseError, ParsedChunk};

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::StreamingIterator;

use crate::language::{LanguageDef, REGISTRY};

/// Maximum file size to parse (prevents OOM on generated monsters)
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum chunk size in bytes (oversized chunks are skipped)
const MAX_CHUNK_BYTES: usize = 100_000;

/// File parser dispatching on language, using tree-sitter grammars
///
/// Extracts functions, methods, classes, and other code elements from
/// source files in supported languages. Queries are compiled lazily on
/// first use per language.
///
/// # Example
///
/// ```no_run
/// use chunkhound::parser::FileParser;
///
/// let parser = FileParser::new();
/// let chunks = parser.parse_file(std::path::Path::new("src/main.rs"))?;
/// for chunk in chunks {
///     println!("{} ({})", chunk.name.as_deref().unwrap_or("<anon>"), chunk.kind);
/// }
/// # Ok::<(), chunkhound::parser::ParseError>(())
/// ```
pub struct FileParser {
    /// Lazily compiled chunk queries per language name
    queries: HashMap<&'static str, OnceCell<tree_sitter::Query>>,
}

// Note: Default impl intentionally omitted; use FileParser::new().

impl FileParser {
    /// Create a new parser (queries are compiled lazily on first use)
    pub fn new() -> Self {
        let mut queries = HashMap::new();
        for def in REGISTRY.all() {
            if def.grammar.is_some() {
                queries.insert(def.name, OnceCell::new());
            }
        }
        Self { queries }
    }

    /// Get or compile the chunk extraction query for a language
    fn get_query(&self, def: &'static LanguageDef) -> Result<&tree_sitter::Query, ParseError> {
        let cell = self.queries.get(def.name).ok_or_else(|| {
            ParseError::QueryCompileFailed(def.name.to_string(), "not registered".into())
        })?;

        cell.get_or_try_init(|| {
            let grammar = match def.grammar {
                Some(g) => g(),
                None => {
                    return Err(ParseError::QueryCompileFailed(
                        def.name.to_string(),
                        "grammar-less language".into(),
                    ))
                }
            };
            tree_sitter::Query::new(&grammar, def.chunk_query)
                .map_err(|e| ParseError::QueryCompileFailed(def.name.to_string(), format!("{:?}", e)))
        })
    }

    /// Parse a source file and extract code chunks
    ///
    /// Returns an empty Vec for non-UTF8 files (with a warning logged).
    /// Returns an error for unsupported file types.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<ParsedChunk>, ParseError> {
        let _span = tracing::debug_span!("parse_file", path = %path.display()).entered();

        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > MAX_FILE_SIZE => {
                tracing::warn!(
                    "Skipping large file ({}MB > {}MB limit): {}",
                    meta.len() / (1024 * 1024),
                    MAX_FILE_SIZE / (1024 * 1024),
                    path.display()
                );
                return Ok(vec![]);
            }
            Ok(_) => {}
            Err(e) => return Err(e.into()),
        }

        // Gracefully handle non-UTF8 files
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!("Skipping non-UTF8 file: {}", path.display());
                return Ok(vec![]);
            }
            Err(e) => return Err(e.into()),
        };

        // Normalize line endings (CRLF -> LF) so chunk identity is
        // byte-stable across platforms
        let source = source.replace("\r\n", "\n");

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let def = REGISTRY
            .from_extension(ext)
            .ok_or_else(|| ParseError::UnsupportedFileType(ext.to_string()))?;

        self.parse_source(&source, def)
    }

    /// Parse already-loaded source for a known language
    pub fn parse_source(
        &self,
        source: &str,
        def: &'static LanguageDef,
    ) -> Result<Vec<ParsedChunk>, ParseError> {
        // Grammar-less languages (Markdown) use custom parsers
        let grammar_fn = match def.grammar {
            Some(g) => g,
            None => return Ok(markdown::parse_markdown_chunks(source)),
        };

        let grammar = grammar_fn();
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| ParseError::ParseFailed(format!("{:?}", e)))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ParseError::ParseFailed(def.name.to_string()))?;

        let query = self.get_query(def)?;
        let capture_names = query.capture_names();

        let mut cursor = tree_sitter::QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source.as_bytes());

        let mut chunks: Vec<(std::ops::Range<usize>, ParsedChunk)> = Vec::new();

        while let Some(m) = matches.next() {
            let mut kind = None;
            let mut name = None;
            let mut node_range = None;
            let mut line_range = None;

            for capture in m.captures {
                let cap_name = capture_names[capture.index as usize];
                if cap_name == "name" {
                    name = source.get(capture.node.byte_range()).map(|s| s.to_string());
                    continue;
                }
                if let Some((_, k)) = def.kind_map.iter().find(|(n, _)| *n == cap_name) {
                    kind = Some(*k);
                    node_range = Some(capture.node.byte_range());
                    line_range = Some((
                        capture.node.start_position().row as u32 + 1,
                        capture.node.end_position().row as u32 + 1,
                    ));
                }
            }

            let (Some(kind), Some(byte_range), Some((start_line, end_line))) =
                (kind, node_range, line_range)
            else {
                continue;
            };

            let Some(code) = source.get(byte_range.clone()) else {
                continue;
            };
            if code.len() > MAX_CHUNK_BYTES {
                tracing::debug!(
                    "Skipping oversized chunk ({} bytes > {} max)",
                    code.len(),
                    MAX_CHUNK_BYTES
                );
                continue;
            }

            chunks.push((
                byte_range,
                ParsedChunk {
                    kind,
                    name,
                    start_line,
                    end_line,
                    code: code.to_string(),
                },
            ));
        }

        Ok(dedupe_overlapping(chunks))
    }

    /// All file extensions this parser can handle
    pub fn supported_extensions(&self) -> Vec<&'static str> {
        REGISTRY.supported_extensions().collect()
    }
}

/// Deduplicate chunks that matched more than one query pattern.
///
/// Nested patterns (a method inside an impl/class body) also match the
/// standalone function pattern; the same node then appears twice with
/// different kinds. Keep one entry per byte range, preferring the more
/// specific kind (method over function).
fn dedupe_overlapping(
    mut chunks: Vec<(std::ops::Range<usize>, ParsedChunk)>,
) -> Vec<ParsedChunk> {
    chunks.sort_by_key(|(range, chunk)| {
        (
            range.start,
            range.end,
            // Method sorts before Function so dedup keeps it
            match chunk.kind {
                ChunkKind::Method => 0u8,
                _ => 1,
            },
        )
    });
    chunks.dedup_by(|(b, _), (a, _)| a.start == b.start && a.end == b.end);
    chunks.into_iter().map(|(_, c)| c).collect()
}
