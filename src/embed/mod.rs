//! Embedding subsystem: HTTP providers and the batching service
//!
//! - `provider` - the provider backends (OpenAI-compatible, TEI) and
//!   their declared batch/token limits
//! - `service` - token-aware batching, concurrency-limited embedding
//!   calls, bulk vector upsert, query-embedding cache

mod provider;
mod service;

pub use provider::{EmbedError, EmbeddingProvider, ProviderLimits};
pub use service::{EmbeddingService, GenerateReport};
