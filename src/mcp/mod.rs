//! MCP (Model Context Protocol) server
//!
//! Exposes the index to AI clients over JSON-RPC 2.0:
//!
//! - `server` - dispatch and the deferred-initialization state machine
//! - `tools` - the four tools and capability-driven discovery
//! - `transports` - stdio (default) and loopback HTTP
//! - `types` - protocol types
//! - `validation` - argument validation

mod server;
mod tools;
pub mod transports;
pub mod types;
pub mod validation;

pub use server::{McpServer, ServerPhase, MCP_PROTOCOL_VERSION};
