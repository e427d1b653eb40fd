//! # chunkhound - Local-First Code Search over MCP
//!
//! Parses a source tree into semantically meaningful chunks (functions,
//! classes, methods, headings, ...) with tree-sitter, stores them in an
//! embedded SQLite database, optionally computes vector embeddings
//! through an HTTP provider, and serves regex + semantic search to AI
//! assistants over the Model Context Protocol (JSON-RPC on stdio or
//! loopback HTTP).
//!
//! ## Architecture in one paragraph
//!
//! Every storage operation funnels through a serial execution gate onto
//! one dedicated DB thread (`store`). File updates take exactly one
//! path: parse, byte-exact multiset diff against the stored chunk set,
//! then a single transactional apply (`indexer` + `diff`). A notify
//! watcher buffers normalized events in a deque that the event loop
//! polls (`watch`); a three-priority task queue schedules user queries
//! ahead of indexing (`tasks`); a periodic scanner reconciles drift
//! (`scan`). The MCP server answers its handshake in milliseconds and
//! defers all slow startup work (`mcp`).
//!
//! ## Quick Start
//!
//! ```no_run
//! use chunkhound::parser::FileParser;
//! use chunkhound::store::Store;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let store = Store::new(".chunkhound/db")?;
//! store.connect().await?;
//!
//! let parser = FileParser::new();
//! let chunks = parser.parse_file(std::path::Path::new("src/main.rs"))?;
//! println!("parsed {} chunks", chunks.len());
//!
//! let page = store
//!     .search_regex(regex::Regex::new("fn main")?, None, 10, 0)
//!     .await?;
//! println!("{} hits", page.hits.len());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod diff;
pub mod discovery;
pub mod embed;
pub mod indexer;
pub mod language;
pub mod mcp;
pub mod parser;
pub mod scan;
pub mod search;
pub mod store;
pub mod tasks;
pub mod watch;

pub(crate) mod math;

pub use config::Config;
pub use diff::{diff_chunks, ChunkDiff};
pub use indexer::{IndexCoordinator, ProcessStatus, ProcessSummary};
pub use language::ChunkKind;
pub use mcp::McpServer;
pub use parser::{FileParser, ParsedChunk};
pub use search::{PageRequest, SearchService};
pub use store::Store;
