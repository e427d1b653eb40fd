//! Embedding service: batching, retries, bulk upsert, query cache
//!
//! Chunks are grouped into batches bounded by the provider's declared
//! batch size and a per-batch token budget (tokens estimated client-side,
//! conservatively). Up to `max_concurrent_batches` embedding calls run in
//! parallel behind a semaphore; every storage write is serialized through
//! the store's gate. Rate limits back off exponentially with jitter; a
//! batch that fails terminally is skipped for the rest of the run and
//! picked up by the next one.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use rand::RngExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

use super::provider::{EmbedError, EmbeddingProvider};
use crate::store::{EmbeddingRow, Store};

/// Query-embedding cache entries (keyed by query text; provider/model
/// are fixed per service instance)
const QUERY_CACHE_CAP: NonZeroUsize = NonZeroUsize::new(128).unwrap();

/// Chunks fetched from the store per generate_missing round
const FETCH_WINDOW: usize = 2000;

/// Base delay for exponential backoff on rate limits
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Conservative token estimate: ~4 bytes per token for code-heavy text.
pub(crate) fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Summary of one `generate_missing` run
#[derive(Debug, Default, Clone)]
pub struct GenerateReport {
    pub embedded: usize,
    pub skipped: usize,
}

/// Token-aware, concurrency-limited embedding pipeline over one
/// (provider, model) pair.
pub struct EmbeddingService {
    provider: Arc<EmbeddingProvider>,
    store: Arc<Store>,
    permits: Arc<Semaphore>,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
    max_retries: u32,
}

impl EmbeddingService {
    pub fn new(
        provider: EmbeddingProvider,
        store: Arc<Store>,
        max_concurrent_batches: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            store,
            permits: Arc::new(Semaphore::new(max_concurrent_batches.max(1))),
            query_cache: Mutex::new(LruCache::new(QUERY_CACHE_CAP)),
            max_retries,
        }
    }

    /// Active provider identifier
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Active model identifier
    pub fn model(&self) -> String {
        self.provider.model().to_string()
    }

    /// Embed a single query string, with a small LRU cache so repeated
    /// identical queries skip the provider round-trip.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        {
            let mut cache = self.query_cache.lock().await;
            if let Some(vector) = cache.get(text) {
                return Ok(vector.clone());
            }
        }

        let texts = vec![text.to_string()];
        let mut vectors = self.embed_with_retry(&texts).await?;
        let vector = vectors.pop().ok_or(EmbedError::EmptyResponse)?;

        let mut cache = self.query_cache.lock().await;
        cache.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    /// Embed every chunk lacking an embedding for the active
    /// (provider, model), optionally scoped to a path prefix.
    pub async fn generate_missing(
        &self,
        path_prefix: Option<String>,
    ) -> Result<GenerateReport, EmbedError> {
        let provider = self.provider.name().to_string();
        let model = self.model();
        let mut report = GenerateReport::default();
        // Chunks whose batch failed terminally this run; skipped so the
        // fetch loop cannot spin on them
        let mut failed: HashSet<i64> = HashSet::new();

        loop {
            let pending = self
                .store
                .get_chunks_without_embeddings(
                    provider.clone(),
                    model.clone(),
                    path_prefix.clone(),
                    FETCH_WINDOW,
                )
                .await?;

            let pending: Vec<(i64, String)> = pending
                .into_iter()
                .filter(|(id, _)| !failed.contains(id))
                .collect();
            if pending.is_empty() {
                break;
            }

            let round = self.embed_batches(pending, &mut failed).await?;
            report.embedded += round.embedded;
            report.skipped += round.skipped;
        }

        if report.embedded > 0 || report.skipped > 0 {
            tracing::info!(
                embedded = report.embedded,
                skipped = report.skipped,
                provider = %provider,
                model = %model,
                "Embedding generation finished"
            );
        }
        Ok(report)
    }

    /// Embed specific chunks by id (inline mode of the coordinator).
    pub async fn embed_chunk_ids(&self, ids: &[i64]) -> Result<usize, EmbedError> {
        let chunks = self.store.get_chunk_codes(ids.to_vec()).await?;
        let mut failed = HashSet::new();
        let report = self.embed_batches(chunks, &mut failed).await?;
        Ok(report.embedded)
    }

    /// Plan batches for a set of chunks and run them concurrently.
    async fn embed_batches(
        &self,
        chunks: Vec<(i64, String)>,
        failed: &mut HashSet<i64>,
    ) -> Result<GenerateReport, EmbedError> {
        let batches = plan_batches(chunks, &self.provider.limits());
        let mut report = GenerateReport::default();
        let mut join_set: JoinSet<(Vec<i64>, Result<Vec<Vec<f32>>, EmbedError>)> = JoinSet::new();

        for batch in batches {
            let provider = Arc::clone(&self.provider);
            let permits = Arc::clone(&self.permits);
            let max_retries = self.max_retries;
            join_set.spawn(async move {
                let ids: Vec<i64> = batch.iter().map(|(id, _)| *id).collect();
                let texts: Vec<String> = batch.into_iter().map(|(_, code)| code).collect();
                let _permit = match permits.acquire().await {
                    Ok(p) => p,
                    Err(_) => {
                        return (
                            ids,
                            Err(EmbedError::Config("embedding semaphore closed".into())),
                        )
                    }
                };
                let result = embed_with_retry_inner(&provider, &texts, max_retries).await;
                (ids, result)
            });
        }

        let mut rows_buffer: Vec<EmbeddingRow> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let (ids, result) = match joined {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::error!(error = %e, "Embedding batch task panicked");
                    continue;
                }
            };
            match result {
                Ok(vectors) => {
                    self.check_dimensions(&vectors).await?;
                    let dims = vectors.first().map(|v| v.len() as u32).unwrap_or(0);
                    rows_buffer.extend(ids.into_iter().zip(vectors).map(|(chunk_id, vector)| {
                        EmbeddingRow {
                            chunk_id,
                            provider: self.provider.name().to_string(),
                            model: self.model(),
                            dims,
                            vector,
                        }
                    }));
                }
                Err(e) => {
                    tracing::warn!(
                        chunks = ids.len(),
                        error = %e,
                        "Embedding batch failed terminally; leaving chunks pending"
                    );
                    report.skipped += ids.len();
                    failed.extend(ids);
                }
            }
        }

        // One bulk upsert per round; the store drops and recreates the
        // vector index around large runs
        if !rows_buffer.is_empty() {
            report.embedded += self.store.insert_embeddings_batch(rows_buffer).await?;
        }

        Ok(report)
    }

    /// First non-empty batch fixes the vector width for (provider, model).
    /// A disagreeing stored width triggers a rebuild at the new width.
    async fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<(), EmbedError> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };
        let observed = first.len() as u32;
        let provider = self.provider.name().to_string();
        let model = self.model();

        let registered = self
            .store
            .list_vector_indexes()
            .await?
            .into_iter()
            .find(|idx| idx.provider == provider && idx.model == model);

        match registered {
            None => {
                self.store
                    .create_vector_index(provider, model, observed, "cosine".to_string())
                    .await?;
            }
            Some(idx) if idx.dims != observed => {
                tracing::warn!(
                    declared = idx.dims,
                    observed,
                    "Vector width changed; rebuilding embedding rows at new width"
                );
                let dropped = self
                    .store
                    .rebuild_vector_column(provider, model, observed)
                    .await?;
                tracing::info!(dropped, "Vector column rebuilt");
            }
            Some(_) => {}
        }
        Ok(())
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        embed_with_retry_inner(&self.provider, texts, self.max_retries).await
    }
}

/// Retry wrapper: exponential backoff with jitter on rate limits and
/// transient HTTP failures, honoring Retry-After when present.
async fn embed_with_retry_inner(
    provider: &EmbeddingProvider,
    texts: &[String],
    max_retries: u32,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    let mut attempt = 0u32;
    loop {
        match provider.embed(texts).await {
            Ok(vectors) => return Ok(vectors),
            Err(e) if attempt >= max_retries => return Err(e),
            Err(EmbedError::RateLimited { retry_after }) => {
                let delay = retry_after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| backoff_delay(attempt));
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited; backing off");
                tokio::time::sleep(delay).await;
            }
            Err(EmbedError::Http(e)) if e.is_timeout() || e.is_connect() => {
                let delay = backoff_delay(attempt);
                tracing::debug!(attempt, error = %e, "Transient HTTP failure; retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE * 2u32.saturating_pow(attempt.min(10));
    let jitter = rand::rng().random_range(0..250u64);
    exp + Duration::from_millis(jitter)
}

/// Group chunks into batches bounded by provider batch size and the
/// per-batch token budget. A single over-budget chunk still ships alone
/// rather than being dropped.
fn plan_batches(
    chunks: Vec<(i64, String)>,
    limits: &super::provider::ProviderLimits,
) -> Vec<Vec<(i64, String)>> {
    let mut batches = Vec::new();
    let mut current: Vec<(i64, String)> = Vec::new();
    let mut current_tokens = 0usize;

    for (id, code) in chunks {
        let tokens = estimate_tokens(&code);
        let would_overflow = !current.is_empty()
            && (current.len() >= limits.max_batch_size
                || current_tokens + tokens > limits.max_batch_tokens);
        if would_overflow {
            batches.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current_tokens += tokens;
        current.push((id, code));
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::provider::ProviderLimits;

    fn chunk(id: i64, len: usize) -> (i64, String) {
        (id, "x".repeat(len))
    }

    #[test]
    fn test_estimate_tokens_conservative() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_plan_batches_by_count() {
        let limits = ProviderLimits {
            max_batch_size: 2,
            max_batch_tokens: 1_000_000,
        };
        let batches = plan_batches(vec![chunk(1, 4), chunk(2, 4), chunk(3, 4)], &limits);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 1);
    }

    #[test]
    fn test_plan_batches_by_tokens() {
        let limits = ProviderLimits {
            max_batch_size: 100,
            max_batch_tokens: 10,
        };
        // 8 tokens each (32 bytes): two per batch would be 16 > 10
        let batches = plan_batches(vec![chunk(1, 32), chunk(2, 32), chunk(3, 32)], &limits);
        assert_eq!(batches.len(), 3);
    }

    #[test]
    fn test_plan_batches_oversized_chunk_ships_alone() {
        let limits = ProviderLimits {
            max_batch_size: 100,
            max_batch_tokens: 10,
        };
        let batches = plan_batches(vec![chunk(1, 400)], &limits);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn test_plan_batches_empty() {
        let limits = ProviderLimits {
            max_batch_size: 8,
            max_batch_tokens: 100,
        };
        assert!(plan_batches(vec![], &limits).is_empty());
    }
}
