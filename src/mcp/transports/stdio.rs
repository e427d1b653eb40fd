//! Stdio transport for the MCP server
//!
//! Line-delimited JSON-RPC 2.0 over stdin/stdout. stdout is reserved
//! exclusively for protocol frames; every diagnostic goes to stderr via
//! tracing.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use super::super::server::McpServer;

/// Run the server over stdin/stdout until EOF, then shut down.
pub async fn serve_stdio(server: Arc<McpServer>) -> Result<()> {
    server.start().await;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = server.handle_frame(&line).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    // Client closed the pipe
    server.shutdown().await;
    Ok(())
}
