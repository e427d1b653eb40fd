//! MCP server core: request dispatch and the initialization state machine
//!
//! The handshake must always be answerable in milliseconds: `initialize`
//! touches nothing but static data, and everything slow (storage
//! connect, registries, scanner start) happens in a deferred task that
//! fires once the client's `initialized` notification arrives. Tool
//! calls landing before storage is ready get a structured
//! "initializing" error instead of a crash.
//!
//! Phases: cold -> handshake_ready -> handshake_complete -> db_ready ->
//! tools_ready (terminal).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::discovery::FileFilter;
use crate::embed::{EmbeddingProvider, EmbeddingService};
use crate::indexer::IndexCoordinator;
use crate::parser::FileParser;
use crate::scan::{PeriodicScanner, DEFAULT_SCAN_INTERVAL};
use crate::search::{ErrorCategory, SearchService};
use crate::store::{SearchCapability, Store};
use crate::tasks::{run_worker, TaskQueue};
use crate::watch::{FileWatcher, WatchEventKind};

use super::tools;
use super::types::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ServerCapabilities, ServerInfo, ToolsCapability,
};

/// MCP protocol version
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Deadline for user-query tasks
pub(crate) const QUERY_DEADLINE: Duration = Duration::from_secs(30);

/// How often the event loop drains the watcher deque
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// How long shutdown waits for a background task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Server lifecycle phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ServerPhase {
    Cold,
    HandshakeReady,
    HandshakeComplete,
    DbReady,
    ToolsReady,
}

/// The one explicit application context: everything the tool handlers
/// need, constructed by the deferred init task and torn down at exit.
/// No hidden module-level singletons.
pub(crate) struct AppContext {
    pub store: Arc<Store>,
    pub searcher: Arc<SearchService>,
    pub queue: Arc<TaskQueue>,
}

/// MCP server over one source tree.
pub struct McpServer {
    config: Config,
    base_dir: PathBuf,
    phase: watch::Sender<ServerPhase>,
    /// Signals receipt of the client's `initialized` notification
    initialized: Notify,
    /// Signals shutdown to the polling loop and the scanner
    shutdown_signal: Notify,
    app: RwLock<Option<Arc<AppContext>>>,
    /// The watcher starts with the transport and buffers events in its
    /// deque until the polling loop begins draining at db_ready
    watcher: std::sync::Mutex<Option<FileWatcher>>,
    /// Every task spawned during initialization, awaited on shutdown.
    /// An unreferenced background task that fails would surface to the
    /// client as an opaque failure.
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    started_at: Instant,
}

impl McpServer {
    /// Construct the server and start the watcher. Touches no storage
    /// and scans no directories; the handshake depends on this staying
    /// fast.
    pub fn new(config: Config, base_dir: PathBuf) -> Result<Arc<Self>> {
        let indexing = config.indexing();
        let watcher = if indexing.watch {
            let filter = FileFilter::new(&indexing.include, &indexing.exclude)
                .context("building watch filter")?;
            match FileWatcher::spawn(
                base_dir.clone(),
                filter,
                Duration::from_millis(indexing.debounce_ms),
            ) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::error!(error = %e, "File watcher failed to start; continuing without watch");
                    None
                }
            }
        } else {
            None
        };

        let (phase, _) = watch::channel(ServerPhase::Cold);
        let server = Arc::new(Self {
            config,
            base_dir,
            phase,
            initialized: Notify::new(),
            shutdown_signal: Notify::new(),
            app: RwLock::new(None),
            watcher: std::sync::Mutex::new(watcher),
            handles: tokio::sync::Mutex::new(Vec::new()),
            started_at: Instant::now(),
        });
        server.set_phase(ServerPhase::HandshakeReady);
        Ok(server)
    }

    /// Spawn the deferred-initialization task. Called once by the
    /// transport before it starts reading frames.
    pub async fn start(self: &Arc<Self>) {
        let server = Arc::clone(self);
        let handle = tokio::spawn(async move {
            server.initialized.notified().await;
            server.set_phase(ServerPhase::HandshakeComplete);
            if let Err(e) = server.deferred_init().await {
                // The failure must not vanish: it is logged here and
                // every tool call keeps reporting "initializing"
                tracing::error!(error = %e, "Deferred initialization failed");
            }
        });
        self.track(handle).await;
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ServerPhase {
        *self.phase.borrow()
    }

    fn set_phase(&self, phase: ServerPhase) {
        tracing::debug!(?phase, "Server phase transition");
        // send_replace stores the value even with no receivers subscribed
        self.phase.send_replace(phase);
    }

    pub(crate) fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Search capabilities declared by the configured storage backend.
    /// Static: available before the store connects, so the tool list is
    /// stable from the first response.
    pub(crate) fn capabilities(&self) -> &'static [SearchCapability] {
        crate::store::capabilities_for(&self.config.database_provider())
    }

    pub(crate) async fn app(&self) -> Option<Arc<AppContext>> {
        self.app.read().await.clone()
    }

    pub(crate) fn watcher_status(&self) -> (bool, usize) {
        let guard = self
            .watcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.as_ref() {
            Some(w) => (w.is_running(), w.pending()),
            None => (false, 0),
        }
    }

    pub(crate) fn embedding_configured(&self) -> Option<String> {
        self.config.embedding().map(|e| e.provider)
    }

    async fn track(&self, handle: JoinHandle<()>) {
        self.handles.lock().await.push(handle);
    }

    /// The slow half of startup: storage, services, loops.
    async fn deferred_init(self: &Arc<Self>) -> Result<()> {
        let indexing = self.config.indexing();
        let db_path = self.config.database_path(&self.base_dir);

        let store = Arc::new(Store::new(db_path)?);
        store.connect().await?;

        let parser = Arc::new(FileParser::new());
        let coordinator = Arc::new(IndexCoordinator::new(
            Arc::clone(&store),
            parser,
            self.base_dir.clone(),
            indexing.db_batch_size,
        ));

        let embeddings = match self.config.embedding() {
            Some(settings) => match EmbeddingProvider::from_settings(&settings) {
                Ok(provider) => Some(Arc::new(EmbeddingService::new(
                    provider,
                    Arc::clone(&store),
                    settings.max_concurrent_batches,
                    settings.max_retries,
                ))),
                Err(e) => {
                    tracing::error!(error = %e, "Embedding provider misconfigured; semantic search disabled");
                    None
                }
            },
            None => None,
        };

        let searcher = Arc::new(SearchService::new(
            Arc::clone(&store),
            self.base_dir.clone(),
            embeddings,
        ));
        let queue = Arc::new(TaskQueue::new());

        let app = Arc::new(AppContext {
            store: Arc::clone(&store),
            searcher,
            queue: Arc::clone(&queue),
        });
        *self.app.write().await = Some(Arc::clone(&app));
        self.set_phase(ServerPhase::DbReady);

        // Single worker draining the priority queue
        self.track(tokio::spawn(run_worker(Arc::clone(&queue), coordinator)))
            .await;

        // Polling loop: drains the watcher deque (including everything
        // buffered during the handshake, in arrival order)
        let poller = Arc::clone(self);
        let poll_queue = Arc::clone(&queue);
        self.track(tokio::spawn(async move {
            poller.polling_loop(poll_queue).await;
        }))
        .await;

        // Reconciliation scanner
        let filter = FileFilter::new(&indexing.include, &indexing.exclude)
            .context("building scan filter")?;
        let scanner = PeriodicScanner::new(
            self.base_dir.clone(),
            filter,
            Arc::clone(&store),
            Arc::clone(&queue),
            DEFAULT_SCAN_INTERVAL,
            indexing.max_file_size,
        );
        let scan_server = Arc::clone(self);
        self.track(tokio::spawn(async move {
            tokio::select! {
                _ = scan_server.shutdown_signal.notified() => {}
                _ = scanner.run() => {}
            }
        }))
        .await;

        // Warm the storage page cache so the first query is not cold
        if let Err(e) = app.store.get_stats().await {
            tracing::warn!(error = %e, "Warmup stats query failed");
        }

        self.set_phase(ServerPhase::ToolsReady);
        tracing::info!("MCP server fully initialized");
        Ok(())
    }

    /// 200 ms poll of the watcher deque, dispatching into the queue.
    async fn polling_loop(self: Arc<Self>, queue: Arc<TaskQueue>) {
        let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown_signal.notified() => break,
                _ = ticker.tick() => {}
            }
            let events = {
                let guard = self
                    .watcher
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                match guard.as_ref() {
                    Some(watcher) => watcher.drain_events(),
                    None => break, // watch disabled; nothing to poll
                }
            };
            for event in events {
                let remove = event.kind == WatchEventKind::Deleted;
                queue.submit_file_change(event.path, remove);
            }
        }
        tracing::debug!("Watcher polling loop stopped");
    }

    /// Handle one raw JSON-RPC frame. Returns None for notifications
    /// (which get no response).
    pub async fn handle_frame(&self, line: &str) -> Option<String> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(req) => req,
            Err(e) => {
                let response = JsonRpcResponse::failure(
                    None,
                    JsonRpcError {
                        code: -32700,
                        message: format!("Parse error: {e}"),
                        data: Some(serde_json::json!({
                            "category": ErrorCategory::Protocol.as_str(),
                            "suggestion": ErrorCategory::Protocol.suggestion(),
                        })),
                    },
                );
                return serde_json::to_string(&response).ok();
            }
        };

        let is_notification = request.id.is_none();
        let response = self.handle_request(request).await;

        if is_notification
            && response
                .result
                .as_ref()
                .map(|v| v.is_null())
                .unwrap_or(true)
            && response.error.is_none()
        {
            return None;
        }

        match serde_json::to_string(&response) {
            Ok(json) => Some(json),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize response");
                None
            }
        }
    }

    /// Handle a parsed JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let result: Result<Value, JsonRpcError> = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "initialized" | "notifications/initialized" => {
                self.initialized.notify_one();
                Ok(Value::Null)
            }
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => tools::handle_tools_list(self),
            "tools/call" => tools::handle_tools_call(self, request.params).await,
            other => Err(JsonRpcError {
                code: -32601,
                message: format!("Unknown method: {other}"),
                data: None,
            }),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::failure(request.id, error),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        if let Some(params) = params {
            // Validated for shape only; any protocol version is accepted
            let _params: InitializeParams = serde_json::from_value(params).map_err(|e| {
                JsonRpcError::categorized(
                    ErrorCategory::Protocol,
                    format!("Invalid initialize params: {e}"),
                )
            })?;
        }

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.into(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: "chunkhound".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        };

        serde_json::to_value(result).map_err(|e| {
            JsonRpcError::categorized(ErrorCategory::Internal, format!("serialize: {e}"))
        })
    }

    /// Orderly teardown: stop accepting work, stop the watcher, await
    /// background tasks with a bounded grace period, close storage.
    pub async fn shutdown(&self) {
        tracing::info!("MCP server shutting down");
        self.shutdown_signal.notify_waiters();

        if let Some(app) = self.app().await {
            app.queue.close();
        }

        {
            let mut guard = self
                .watcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(mut watcher) = guard.take() {
                watcher.stop();
            }
        }

        let mut handles = self.handles.lock().await;
        for mut handle in handles.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
                let _ = handle.await;
            }
        }
        drop(handles);

        if let Some(app) = self.app.write().await.take() {
            if let Err(e) = app.store.close().await {
                tracing::warn!(error = %e, "Closing store during shutdown failed");
            }
        }
    }
}
