//! Input validation for MCP tool arguments
//!
//! Contract violations are rejected with structured errors before any
//! side effect.

use crate::search::{PageRequest, SearchError};

/// Maximum query/pattern length to bound embedding and regex work
pub const MAX_QUERY_LENGTH: usize = 8192;

/// Largest accepted page
pub const MAX_PAGE_SIZE: i64 = 100;

/// Accepted response-budget range
pub const MIN_RESPONSE_TOKENS: i64 = 100;
pub const MAX_RESPONSE_TOKENS: i64 = 1_000_000;

/// Validate pagination arguments and assemble a [`PageRequest`].
pub fn validate_page(
    page_size: Option<i64>,
    offset: Option<i64>,
    max_response_tokens: Option<i64>,
) -> Result<PageRequest, SearchError> {
    let defaults = PageRequest::default();

    let page_size = page_size.unwrap_or(defaults.page_size as i64);
    if page_size < 1 || page_size > MAX_PAGE_SIZE {
        return Err(SearchError::Contract(format!(
            "page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    let offset = offset.unwrap_or(0);
    if offset < 0 {
        return Err(SearchError::Contract(format!(
            "offset must be non-negative, got {offset}"
        )));
    }

    let max_response_tokens = max_response_tokens.unwrap_or(defaults.max_response_tokens as i64);
    if !(MIN_RESPONSE_TOKENS..=MAX_RESPONSE_TOKENS).contains(&max_response_tokens) {
        return Err(SearchError::Contract(format!(
            "max_response_tokens must be between {MIN_RESPONSE_TOKENS} and {MAX_RESPONSE_TOKENS}, got {max_response_tokens}"
        )));
    }

    Ok(PageRequest {
        page_size: page_size as usize,
        offset: offset as usize,
        max_response_tokens: max_response_tokens as usize,
    })
}

/// Reject oversized queries/patterns before compiling or embedding them.
pub fn validate_query_length(query: &str) -> Result<(), SearchError> {
    if query.is_empty() {
        return Err(SearchError::Contract("query must not be empty".into()));
    }
    if query.len() > MAX_QUERY_LENGTH {
        return Err(SearchError::Contract(format!(
            "query too long: {} bytes (max {MAX_QUERY_LENGTH})",
            query.len()
        )));
    }
    Ok(())
}
