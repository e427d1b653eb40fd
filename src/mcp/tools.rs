//! MCP tool handlers and tool discovery
//!
//! `get_stats` and `health_check` are always exposed; the search tools
//! come from the storage backend's declared capability set, computed
//! eagerly so the client's tool list never changes after the first
//! `tools/list`.

use std::sync::Arc;

use serde_json::Value;

use crate::search::{ErrorCategory, PageRequest, SearchError, SearchResponse};
use crate::store::SearchCapability;

use super::server::{AppContext, McpServer, ServerPhase, QUERY_DEADLINE};
use super::types::{JsonRpcError, RegexSearchArgs, SemanticSearchArgs, Tool, ToolsListResult};
use super::validation::{validate_page, validate_query_length};

/// Build the tool list from the capability set.
pub(super) fn handle_tools_list(server: &McpServer) -> Result<Value, JsonRpcError> {
    let caps = server.capabilities();
    let mut tools = Vec::new();

    if caps.contains(&SearchCapability::Regex) {
        tools.push(Tool {
            name: "search_regex".into(),
            description: "Search indexed code chunks with a regular expression. Results are ordered by chunk id (not relevance) and paginate with offset/page_size.".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Regular expression to match against chunk content"
                    },
                    "page_size": {
                        "type": "integer",
                        "description": "Results per page (default: 10, max: 100)",
                        "default": 10
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Match offset to start from (default: 0)",
                        "default": 0
                    },
                    "max_response_tokens": {
                        "type": "integer",
                        "description": "Response size ceiling in estimated tokens (default: 20000)",
                        "default": 20000
                    },
                    "path": {
                        "type": "string",
                        "description": "Restrict results to this directory (absolute or relative to the indexed root)"
                    }
                },
                "required": ["pattern"]
            }),
        });
    }

    if caps.contains(&SearchCapability::Semantic) {
        tools.push(Tool {
            name: "search_semantic".into(),
            description: "Search indexed code chunks by meaning using vector embeddings. Results are ordered by cosine distance (smaller is closer).".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Natural language description of the code you want"
                    },
                    "provider": {
                        "type": "string",
                        "description": "Embedding provider (default: the configured one)",
                        "default": "openai"
                    },
                    "model": {
                        "type": "string",
                        "description": "Embedding model (default: the configured one)",
                        "default": "text-embedding-3-small"
                    },
                    "threshold": {
                        "type": "number",
                        "description": "Maximum cosine distance to include (default: no threshold)"
                    },
                    "page_size": {
                        "type": "integer",
                        "description": "Results per page (default: 10, max: 100)",
                        "default": 10
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Result offset to start from (default: 0)",
                        "default": 0
                    },
                    "max_response_tokens": {
                        "type": "integer",
                        "description": "Response size ceiling in estimated tokens (default: 20000)",
                        "default": 20000
                    },
                    "path": {
                        "type": "string",
                        "description": "Restrict results to this directory (absolute or relative to the indexed root)"
                    }
                },
                "required": ["query"]
            }),
        });
    }

    tools.push(Tool {
        name: "get_stats".into(),
        description: "Index statistics: file/chunk/embedding counts, providers, task queue depths.".into(),
        input_schema: serde_json::json!({ "type": "object", "properties": {} }),
    });

    tools.push(Tool {
        name: "health_check".into(),
        description: "Server health: lifecycle phase, uptime, and per-component status.".into(),
        input_schema: serde_json::json!({ "type": "object", "properties": {} }),
    });

    serde_json::to_value(ToolsListResult { tools })
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::Internal, format!("serialize: {e}")))
}

/// Dispatch a tools/call request.
pub(super) async fn handle_tools_call(
    server: &McpServer,
    params: Option<Value>,
) -> Result<Value, JsonRpcError> {
    let params = params.ok_or_else(|| {
        JsonRpcError::categorized(ErrorCategory::Contract, "Missing tools/call params".into())
    })?;
    let name = params
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            JsonRpcError::categorized(ErrorCategory::Contract, "Missing tool name".into())
        })?;
    let arguments = params
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let caps = server.capabilities();
    match name {
        "search_regex" if caps.contains(&SearchCapability::Regex) => {
            tool_search_regex(server, arguments).await
        }
        "search_semantic" if caps.contains(&SearchCapability::Semantic) => {
            tool_search_semantic(server, arguments).await
        }
        "get_stats" => tool_get_stats(server).await,
        "health_check" => tool_health_check(server).await,
        other => Err(JsonRpcError::categorized(
            ErrorCategory::Contract,
            format!("Unknown tool: {other}"),
        )),
    }
}

/// Tool results ship as MCP content blocks with the JSON payload as text.
fn content_result(payload: &impl serde::Serialize) -> Result<Value, JsonRpcError> {
    let text = serde_json::to_string_pretty(payload)
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::Internal, format!("serialize: {e}")))?;
    Ok(serde_json::json!({
        "content": [{ "type": "text", "text": text }]
    }))
}

fn search_error(e: SearchError) -> JsonRpcError {
    JsonRpcError::categorized(e.category(), e.to_string())
}

/// The app context, or an "initializing" error before db_ready.
async fn require_ready(server: &McpServer) -> Result<Arc<AppContext>, JsonRpcError> {
    if server.phase() < ServerPhase::DbReady {
        return Err(JsonRpcError::categorized(
            ErrorCategory::Initializing,
            "Server is still initializing".into(),
        ));
    }
    server.app().await.ok_or_else(|| {
        JsonRpcError::categorized(
            ErrorCategory::Initializing,
            "Server is still initializing".into(),
        )
    })
}

/// Run a search closure through the task queue at user-query priority,
/// bounded by the query deadline.
async fn run_query<F>(app: &AppContext, job: F) -> Result<Value, JsonRpcError>
where
    F: FnOnce(
            Arc<crate::search::SearchService>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<SearchResponse, SearchError>> + Send>,
        > + Send
        + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    let searcher = Arc::clone(&app.searcher);

    let token = app
        .queue
        .submit_query(move || {
            Box::pin(async move {
                let result = job(searcher).await;
                // Receiver gone means the request timed out or the
                // client disconnected; nothing left to deliver
                let _ = tx.send(result);
            })
        })
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::TransientIo, e.to_string()))?;

    match tokio::time::timeout(QUERY_DEADLINE, rx).await {
        Ok(Ok(Ok(response))) => content_result(&response),
        Ok(Ok(Err(e))) => Err(search_error(e)),
        Ok(Err(_)) => Err(JsonRpcError::categorized(
            ErrorCategory::Internal,
            "Query task dropped its reply".into(),
        )),
        Err(_) => {
            token.cancel();
            Err(JsonRpcError::categorized(
                ErrorCategory::Timeout,
                format!("Query exceeded {}s deadline", QUERY_DEADLINE.as_secs()),
            ))
        }
    }
}

async fn tool_search_regex(server: &McpServer, arguments: Value) -> Result<Value, JsonRpcError> {
    let args: RegexSearchArgs = serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::Contract, e.to_string()))?;
    validate_query_length(&args.pattern).map_err(search_error)?;
    let page: PageRequest =
        validate_page(args.page_size, args.offset, args.max_response_tokens).map_err(search_error)?;

    let app = require_ready(server).await?;
    let pattern = args.pattern;
    let path = args.path;
    run_query(&app, move |searcher| {
        Box::pin(async move { searcher.search_regex(&pattern, path.as_deref(), page).await })
    })
    .await
}

async fn tool_search_semantic(server: &McpServer, arguments: Value) -> Result<Value, JsonRpcError> {
    let args: SemanticSearchArgs = serde_json::from_value(arguments)
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::Contract, e.to_string()))?;
    validate_query_length(&args.query).map_err(search_error)?;
    let page: PageRequest =
        validate_page(args.page_size, args.offset, args.max_response_tokens).map_err(search_error)?;

    let app = require_ready(server).await?;
    run_query(&app, move |searcher| {
        Box::pin(async move {
            searcher
                .search_semantic(
                    &args.query,
                    args.provider.as_deref(),
                    args.model.as_deref(),
                    args.threshold,
                    args.path.as_deref(),
                    page,
                )
                .await
        })
    })
    .await
}

async fn tool_get_stats(server: &McpServer) -> Result<Value, JsonRpcError> {
    let app = require_ready(server).await?;
    let stats = app
        .store
        .get_stats()
        .await
        .map_err(|e| JsonRpcError::categorized(ErrorCategory::Internal, e.to_string()))?;
    let queue = app.queue.status();

    content_result(&serde_json::json!({
        "files": stats.files,
        "chunks": stats.chunks,
        "embeddings": stats.embeddings,
        "providers": stats.providers,
        "files_by_language": stats.files_by_language,
        "db_size_bytes": stats.db_size_bytes,
        "task_queue_status": queue,
    }))
}

async fn tool_health_check(server: &McpServer) -> Result<Value, JsonRpcError> {
    let phase = server.phase();
    let ready = phase >= ServerPhase::DbReady;
    let (watcher_running, watcher_pending) = server.watcher_status();

    let mut components = vec![
        serde_json::json!({
            "name": "storage",
            "status": if ready { "ok" } else { "initializing" },
        }),
        serde_json::json!({
            "name": "file_watcher",
            "status": if watcher_running { "ok" } else { "disabled" },
            "pending_events": watcher_pending,
        }),
    ];

    match server.app().await {
        Some(app) => {
            components.push(serde_json::json!({
                "name": "task_queue",
                "status": "ok",
                "depths": app.queue.status(),
            }));
        }
        None => {
            components.push(serde_json::json!({
                "name": "task_queue",
                "status": "initializing",
            }));
        }
    }

    components.push(match server.embedding_configured() {
        Some(provider) => serde_json::json!({
            "name": "embeddings",
            "status": "ok",
            "provider": provider,
        }),
        None => serde_json::json!({
            "name": "embeddings",
            "status": "not_configured",
        }),
    });

    content_result(&serde_json::json!({
        "status": if phase == ServerPhase::ToolsReady { "ok" } else { "initializing" },
        "since": server.uptime_secs(),
        "components": components,
    }))
}
