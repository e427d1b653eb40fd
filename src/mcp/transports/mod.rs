//! MCP transports: line-delimited stdio (default) and loopback HTTP

mod http;
mod stdio;

pub use http::serve_http;
pub use stdio::serve_stdio;
