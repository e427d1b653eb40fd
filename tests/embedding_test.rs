//! Embedding service tests against a mock OpenAI-compatible HTTP server

mod common;

use std::sync::Arc;

use chunkhound::config::EmbeddingSettings;
use chunkhound::embed::{EmbeddingProvider, EmbeddingService};
use common::{test_chunk, TestStore};
use httpmock::prelude::*;
use serde_json::json;

fn settings_for(server: &MockServer, batch_size: usize) -> EmbeddingSettings {
    EmbeddingSettings {
        provider: "openai-compatible".into(),
        api_key: Some("sk-test".into()),
        base_url: Some(server.base_url()),
        model: "test-model".into(),
        batch_size,
        max_concurrent_batches: 2,
        timeout_secs: 10,
        max_retries: 1,
        max_batch_tokens: 50_000,
    }
}

fn service_for(ts: &TestStore, server: &MockServer, batch_size: usize) -> EmbeddingService {
    let settings = settings_for(server, batch_size);
    let provider = EmbeddingProvider::from_settings(&settings).unwrap();
    EmbeddingService::new(provider, Arc::clone(&ts.store), 2, settings.max_retries)
}

/// Mock body builder: one 4-dim vector per requested input
fn embeddings_body(count: usize) -> serde_json::Value {
    let data: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "index": i,
                "embedding": [1.0, 0.0, 0.0, i as f32 * 0.01],
            })
        })
        .collect();
    json!({ "data": data })
}

async fn seed_chunks(ts: &TestStore, count: usize) -> Vec<i64> {
    let file_id = ts
        .store
        .insert_file("seed.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    let chunks = (0..count)
        .map(|i| test_chunk(&format!("def f{i}(): pass")))
        .collect();
    ts.store.insert_chunks_batch(file_id, chunks, 500).await.unwrap()
}

#[tokio::test]
async fn test_generate_missing_embeds_everything() {
    let ts = TestStore::new().await;
    seed_chunks(&ts, 5).await;

    let mock_server = MockServer::start_async().await;
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(embeddings_body(5));
        })
        .await;

    let service = service_for(&ts, &mock_server, 100);
    let report = service.generate_missing(None).await.unwrap();

    assert_eq!(report.embedded, 5);
    assert_eq!(report.skipped, 0);
    mock.assert_async().await;

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.embeddings, 5);
    assert_eq!(stats.providers, vec!["openai-compatible/test-model".to_string()]);

    // First batch registered the vector index at the observed width
    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].dims, 4);
    assert_eq!(indexes[0].metric, "cosine");
}

#[tokio::test]
async fn test_batching_respects_max_batch_size() {
    let ts = TestStore::new().await;
    seed_chunks(&ts, 5).await;

    let mock_server = MockServer::start_async().await;
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            // Batches arrive as exactly 2, 2, 1 inputs; answering with 2
            // vectors satisfies the two full batches, the final
            // single-input batch tolerates the extra via index sorting
            then.status(200).json_body(embeddings_body(2));
        })
        .await;

    // With batch_size 2 and 5 chunks, exactly 3 requests must go out
    let service = service_for(&ts, &mock_server, 2);
    let report = service.generate_missing(None).await.unwrap();

    assert_eq!(mock.hits_async().await, 3);
    // The last batch got 2 vectors for 1 input: a count mismatch, so
    // those chunks stay pending
    assert_eq!(report.embedded, 4);
    assert_eq!(report.skipped, 1);
}

#[tokio::test]
async fn test_embed_query_is_cached() {
    let ts = TestStore::new().await;
    let mock_server = MockServer::start_async().await;
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(embeddings_body(1));
        })
        .await;

    let service = service_for(&ts, &mock_server, 100);
    let first = service.embed_query("find the parser").await.unwrap();
    let second = service.embed_query("find the parser").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(mock.hits_async().await, 1, "identical query must hit the cache");

    service.embed_query("different query").await.unwrap();
    assert_eq!(mock.hits_async().await, 2);
}

#[tokio::test]
async fn test_rate_limit_is_retried() {
    let ts = TestStore::new().await;
    let mock_server = MockServer::start_async().await;

    // Always 429: with max_retries=1 the provider is called twice and
    // the batch is then skipped, not fatal
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(429).header("Retry-After", "0");
        })
        .await;

    seed_chunks(&ts, 3).await;
    let service = service_for(&ts, &mock_server, 100);
    let report = service.generate_missing(None).await.unwrap();

    assert_eq!(report.embedded, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(mock.hits_async().await, 2, "one retry after the 429");
}

#[tokio::test]
async fn test_api_error_skips_batch_and_continues() {
    let ts = TestStore::new().await;
    let mock_server = MockServer::start_async().await;
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(500).body("boom");
        })
        .await;

    seed_chunks(&ts, 2).await;
    let service = service_for(&ts, &mock_server, 100);
    let report = service.generate_missing(None).await.unwrap();

    assert_eq!(report.embedded, 0);
    assert_eq!(report.skipped, 2);
    assert!(mock.hits_async().await >= 1);

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.embeddings, 0);
}

#[tokio::test]
async fn test_dimension_change_rebuilds_rows() {
    let ts = TestStore::new().await;
    let ids = seed_chunks(&ts, 2).await;

    // A stale 8-dim embedding and registry entry from an older model run
    ts.store
        .create_vector_index("openai-compatible".into(), "test-model".into(), 8, "cosine".into())
        .await
        .unwrap();
    ts.store
        .insert_embeddings_batch(vec![chunkhound::store::EmbeddingRow {
            chunk_id: ids[0],
            provider: "openai-compatible".into(),
            model: "test-model".into(),
            dims: 8,
            vector: vec![0.5; 8],
        }])
        .await
        .unwrap();

    let mock_server = MockServer::start_async().await;
    mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embeddings");
            then.status(200).json_body(embeddings_body(1));
        })
        .await;

    let service = service_for(&ts, &mock_server, 1);
    service.generate_missing(None).await.unwrap();

    // Registry now declares the observed 4-dim width and no 8-dim rows
    // survive
    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes[0].dims, 4);

    let missing = ts
        .store
        .get_chunks_without_embeddings("openai-compatible".into(), "test-model".into(), None, 100)
        .await
        .unwrap();
    assert!(missing.is_empty() || missing.iter().all(|(id, _)| *id == ids[0]));
}

#[tokio::test]
async fn test_tei_provider_wire_format() {
    let ts = TestStore::new().await;
    seed_chunks(&ts, 2).await;

    let mock_server = MockServer::start_async().await;
    let mock = mock_server
        .mock_async(|when, then| {
            when.method(POST).path("/embed");
            then.status(200)
                .json_body(json!([[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]));
        })
        .await;

    let settings = EmbeddingSettings {
        provider: "tei".into(),
        api_key: None,
        base_url: Some(mock_server.base_url()),
        model: "bge-base".into(),
        batch_size: 100,
        max_concurrent_batches: 1,
        timeout_secs: 10,
        max_retries: 0,
        max_batch_tokens: 50_000,
    };
    let provider = EmbeddingProvider::from_settings(&settings).unwrap();
    let service = EmbeddingService::new(provider, Arc::clone(&ts.store), 1, 0);

    let report = service.generate_missing(None).await.unwrap();
    assert_eq!(report.embedded, 2);
    mock.assert_async().await;

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.providers, vec!["tei/bge-base".to_string()]);
}
