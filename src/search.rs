//! Query-side services: path scoping, query embedding, pagination, and
//! token-budgeted response truncation
//!
//! The store returns pages of hits; this layer turns them into wire
//! rows (absolute paths, serialized sizes) and enforces the response
//! token ceiling, truncating cleanly at a result boundary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::embed::{EmbedError, EmbeddingService};
use crate::store::{SearchHit, Store, StoreError};

/// Baseline token cost of the response envelope (results array plus the
/// pagination object), charged before the first row
const ENVELOPE_TOKENS: usize = 50;

/// Error category carried in structured JSON-RPC error data, mapping
/// the failure to a remediation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    TransientIo,
    RateLimit,
    FatalStorage,
    Protocol,
    Contract,
    Unsupported,
    Initializing,
    Timeout,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientIo => "transient_io",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::FatalStorage => "fatal_storage",
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Contract => "contract",
            ErrorCategory::Unsupported => "unsupported",
            ErrorCategory::Initializing => "initializing",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Internal => "internal",
        }
    }

    /// Suggested remediation shipped with MCP errors
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCategory::TransientIo => "Retry the request",
            ErrorCategory::RateLimit => "Back off and retry later",
            ErrorCategory::FatalStorage => "Restart the server to reconnect the database",
            ErrorCategory::Protocol => "Check the JSON-RPC frame format",
            ErrorCategory::Contract => "Fix the request arguments",
            ErrorCategory::Unsupported => "This operation is not available with the current configuration",
            ErrorCategory::Initializing => "The server is still initializing; retry shortly",
            ErrorCategory::Timeout => "The query exceeded its deadline; narrow it and retry",
            ErrorCategory::Internal => "Check the server logs",
        }
    }
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid argument: {0}")]
    Contract(String),
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Embedding error: {0}")]
    Embed(#[from] EmbedError),
}

impl SearchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SearchError::InvalidPattern(_) | SearchError::Contract(_) => ErrorCategory::Contract,
            SearchError::Unsupported(_) => ErrorCategory::Unsupported,
            SearchError::Store(StoreError::Invalidated) => ErrorCategory::FatalStorage,
            SearchError::Store(e) if e.is_fatal_write() => ErrorCategory::FatalStorage,
            SearchError::Store(_) => ErrorCategory::Internal,
            SearchError::Embed(EmbedError::RateLimited { .. }) => ErrorCategory::RateLimit,
            SearchError::Embed(EmbedError::Http(_)) => ErrorCategory::TransientIo,
            SearchError::Embed(_) => ErrorCategory::Internal,
        }
    }
}

/// Pagination window plus the response size ceiling
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page_size: usize,
    pub offset: usize,
    pub max_response_tokens: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page_size: 10,
            offset: 0,
            max_response_tokens: 20_000,
        }
    }
}

/// One result row on the wire
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub chunk_id: i64,
    /// Absolute path, converted from the stored relative form
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub offset: usize,
    pub page_size: usize,
    pub returned: usize,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<ResultRow>,
    pub pagination: Pagination,
}

/// Query-side facade shared by the MCP tools.
pub struct SearchService {
    store: Arc<Store>,
    base_dir: PathBuf,
    embeddings: Option<Arc<EmbeddingService>>,
}

impl SearchService {
    pub fn new(
        store: Arc<Store>,
        base_dir: PathBuf,
        embeddings: Option<Arc<EmbeddingService>>,
    ) -> Self {
        Self {
            store,
            base_dir,
            embeddings,
        }
    }

    /// Regex search. The pattern compiles here, once, and executes
    /// inside the store layer.
    pub async fn search_regex(
        &self,
        pattern: &str,
        path: Option<&str>,
        page: PageRequest,
    ) -> Result<SearchResponse, SearchError> {
        let regex = regex::Regex::new(pattern)
            .map_err(|e| SearchError::InvalidPattern(e.to_string()))?;
        let prefix = path.map(|p| self.scope_path(p));

        let store_page = self
            .store
            .search_regex(regex, prefix, page.page_size, page.offset)
            .await?;

        Ok(self.paginate(store_page.hits, store_page.has_more, page))
    }

    /// Semantic search: embed the query (cached), then vector search.
    #[allow(clippy::too_many_arguments)]
    pub async fn search_semantic(
        &self,
        query: &str,
        provider: Option<&str>,
        model: Option<&str>,
        threshold: Option<f32>,
        path: Option<&str>,
        page: PageRequest,
    ) -> Result<SearchResponse, SearchError> {
        let Some(embeddings) = &self.embeddings else {
            return Err(SearchError::Unsupported(
                "Semantic search requires a configured embedding provider".into(),
            ));
        };

        // The query vector always comes from the active provider; a
        // caller naming a different pair would search one vector space
        // with coordinates from another
        let active_provider = embeddings.provider_name();
        let active_model = embeddings.model();
        if let Some(requested) = provider {
            if requested != active_provider {
                return Err(SearchError::Unsupported(format!(
                    "Embedding provider '{requested}' is not active (active: {active_provider})"
                )));
            }
        }
        if let Some(requested) = model {
            if requested != active_model {
                return Err(SearchError::Unsupported(format!(
                    "Embedding model '{requested}' is not active (active: {active_model})"
                )));
            }
        }

        let vector = embeddings.embed_query(query).await?;
        let prefix = path.map(|p| self.scope_path(p));

        let store_page = self
            .store
            .search_semantic(
                vector,
                active_provider.to_string(),
                active_model,
                threshold,
                prefix,
                page.page_size,
                page.offset,
            )
            .await?;

        Ok(self.paginate(store_page.hits, store_page.has_more, page))
    }

    /// Convert a caller path argument into a stored-relative prefix.
    fn scope_path(&self, path: &str) -> String {
        let p = Path::new(path);
        let rel = p.strip_prefix(&self.base_dir).unwrap_or(p);
        rel.to_string_lossy().replace('\\', "/")
    }

    /// Absolute path for a stored (relative) one.
    fn absolutize(&self, stored: &str) -> String {
        let p = Path::new(stored);
        if p.is_absolute() {
            stored.to_string()
        } else {
            self.base_dir.join(p).to_string_lossy().to_string()
        }
    }

    /// Build the wire response, appending rows in order until the page is
    /// complete or the estimated serialized size would exceed the token
    /// ceiling. Truncation happens at a result boundary and flips
    /// `has_more`.
    fn paginate(
        &self,
        hits: Vec<SearchHit>,
        store_has_more: bool,
        page: PageRequest,
    ) -> SearchResponse {
        let mut results = Vec::with_capacity(hits.len());
        let mut spent = ENVELOPE_TOKENS;
        let mut truncated = false;

        for hit in hits {
            let row = ResultRow {
                chunk_id: hit.chunk_id,
                file_path: self.absolutize(&hit.path),
                start_line: hit.start_line,
                end_line: hit.end_line,
                kind: hit.kind.to_string(),
                name: hit.name,
                content: hit.code,
                distance: hit.distance,
            };
            let cost = estimate_row_tokens(&row);
            if spent + cost > page.max_response_tokens {
                // The ceiling is hard; even a first row that does not fit
                // is held back (the client can retry with a larger budget)
                truncated = true;
                break;
            }
            spent += cost;
            results.push(row);
        }

        let returned = results.len();
        let has_more = store_has_more || truncated;
        SearchResponse {
            results,
            pagination: Pagination {
                offset: page.offset,
                page_size: page.page_size,
                returned,
                has_more,
                next_offset: has_more.then_some(page.offset + returned),
            },
        }
    }
}

/// Conservative serialized-size estimate for one row: JSON bytes / 4.
fn estimate_row_tokens(row: &ResultRow) -> usize {
    let bytes = serde_json::to_string(row).map(|s| s.len()).unwrap_or(
        // Estimation must not fail the request; fall back to field sizes
        row.content.len() + row.file_path.len() + 64,
    );
    bytes.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::ChunkKind;

    fn hit(id: i64, content: &str) -> SearchHit {
        SearchHit {
            chunk_id: id,
            path: format!("src/file{id}.rs"),
            kind: ChunkKind::Function,
            name: Some(format!("fn{id}")),
            start_line: 1,
            end_line: 3,
            code: content.to_string(),
            distance: None,
        }
    }

    fn service() -> SearchService {
        let store = Arc::new(Store::new("/tmp/chunkhound-test-unused-db").unwrap());
        SearchService::new(store, PathBuf::from("/base"), None)
    }

    #[test]
    fn test_paginate_within_budget() {
        let svc = service();
        let page = PageRequest::default();
        let response = svc.paginate(vec![hit(1, "short"), hit(2, "short")], false, page);
        assert_eq!(response.results.len(), 2);
        assert!(!response.pagination.has_more);
        assert!(response.pagination.next_offset.is_none());
    }

    #[test]
    fn test_paginate_truncates_on_budget() {
        let svc = service();
        let page = PageRequest {
            page_size: 10,
            offset: 0,
            // Enough for the envelope plus roughly one row
            max_response_tokens: ENVELOPE_TOKENS + 600,
        };
        let big = "x".repeat(2000); // ~500 tokens per row
        let response = svc.paginate(vec![hit(1, &big), hit(2, &big), hit(3, &big)], false, page);
        assert_eq!(response.results.len(), 1);
        assert!(response.pagination.has_more);
        assert_eq!(response.pagination.next_offset, Some(1));
    }

    #[test]
    fn test_paginate_budget_is_a_hard_ceiling() {
        // Even a single over-budget row is held back; the response never
        // exceeds the declared ceiling
        let svc = service();
        let page = PageRequest {
            page_size: 10,
            offset: 0,
            max_response_tokens: 100,
        };
        let response = svc.paginate(vec![hit(1, &"y".repeat(5000))], false, page);
        assert!(response.results.is_empty());
        assert!(response.pagination.has_more);
        assert_eq!(response.pagination.next_offset, Some(0));
    }

    #[test]
    fn test_paginate_propagates_store_has_more() {
        let svc = service();
        let response = svc.paginate(vec![hit(1, "a")], true, PageRequest::default());
        assert!(response.pagination.has_more);
        assert_eq!(response.pagination.next_offset, Some(1));
    }

    #[test]
    fn test_absolutize_and_scope() {
        let svc = service();
        assert_eq!(svc.absolutize("src/a.rs"), "/base/src/a.rs");
        assert_eq!(svc.absolutize("/outside/a.rs"), "/outside/a.rs");
        assert_eq!(svc.scope_path("/base/src"), "src");
        assert_eq!(svc.scope_path("src"), "src");
    }
}
