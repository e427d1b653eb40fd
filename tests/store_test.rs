//! Storage engine integration tests: CRUD, cascades, transactions,
//! search pagination, vector indexes

mod common;

use chunkhound::store::{EmbeddingRow, FileUpdatePlan};
use common::{angled_vector, axis_vector, test_chunk, TestStore};

async fn insert_file_with_chunks(
    ts: &TestStore,
    path: &str,
    codes: &[&str],
) -> (i64, Vec<i64>) {
    let file_id = ts
        .store
        .insert_file(path.to_string(), "python".into(), 100, 1111)
        .await
        .unwrap();
    let chunks = codes.iter().map(|c| test_chunk(c)).collect();
    let ids = ts
        .store
        .insert_chunks_batch(file_id, chunks, 500)
        .await
        .unwrap();
    (file_id, ids)
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let ts = TestStore::new().await;
    ts.store.connect().await.unwrap();
    ts.store.connect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_and_reconnect() {
    let ts = TestStore::new().await;
    let (file_id, _) = insert_file_with_chunks(&ts, "a.py", &["def a(): pass"]).await;

    ts.store.disconnect().await.unwrap();
    ts.store.disconnect().await.unwrap();

    // Lazily reconnects on next use
    let chunks = ts.store.get_chunks_by_file_id(file_id).await.unwrap();
    assert_eq!(chunks.len(), 1);
}

#[tokio::test]
async fn test_file_crud() {
    let ts = TestStore::new().await;
    let id = ts
        .store
        .insert_file("src/app.py".into(), "python".into(), 42, 1000)
        .await
        .unwrap();

    let file = ts
        .store
        .get_file_by_path("src/app.py")
        .await
        .unwrap()
        .expect("file should exist");
    assert_eq!(file.id, id);
    assert_eq!(file.language, "python");
    assert_eq!(file.size, 42);
    // Paths are stored exactly as given (relative for portability)
    assert_eq!(file.path, "src/app.py");

    ts.store.update_file(id, 99, 2000).await.unwrap();
    let file = ts.store.get_file_by_path("src/app.py").await.unwrap().unwrap();
    assert_eq!(file.size, 99);
    assert_eq!(file.mtime, 2000);

    ts.store.delete_file_completely(id).await.unwrap();
    assert!(ts.store.get_file_by_path("src/app.py").await.unwrap().is_none());
}

#[tokio::test]
async fn test_duplicate_path_rejected() {
    let ts = TestStore::new().await;
    ts.store
        .insert_file("dup.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    let err = ts
        .store
        .insert_file("dup.py".into(), "python".into(), 2, 2)
        .await;
    assert!(err.is_err(), "unique path constraint should hold");
}

#[tokio::test]
async fn test_insert_chunks_batch_returns_ids_in_order() {
    let ts = TestStore::new().await;
    let (_file_id, ids) =
        insert_file_with_chunks(&ts, "b.py", &["def a(): pass", "def b(): pass", "def c(): pass"])
            .await;

    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]), "rowids ascend: {ids:?}");

    // Small db_batch_size still returns everything, in order
    let file_id2 = ts
        .store
        .insert_file("c.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    let many: Vec<_> = (0..7).map(|i| test_chunk(&format!("def f{i}(): pass"))).collect();
    let ids2 = ts.store.insert_chunks_batch(file_id2, many, 2).await.unwrap();
    assert_eq!(ids2.len(), 7);

    let stored = ts.store.get_chunks_by_file_id(file_id2).await.unwrap();
    assert_eq!(stored.len(), 7);
    assert_eq!(stored[0].code, "def f0(): pass");
    assert_eq!(stored[6].code, "def f6(): pass");
}

#[tokio::test]
async fn test_delete_file_cascades_chunks_and_embeddings() {
    let ts = TestStore::new().await;
    let (file_id, ids) = insert_file_with_chunks(&ts, "d.py", &["x", "y"]).await;

    let rows = ids
        .iter()
        .enumerate()
        .map(|(i, id)| EmbeddingRow {
            chunk_id: *id,
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: axis_vector(i, 4),
        })
        .collect();
    ts.store.insert_embeddings_batch(rows).await.unwrap();

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!((stats.files, stats.chunks, stats.embeddings), (1, 2, 2));

    ts.store.delete_file_completely(file_id).await.unwrap();

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!((stats.files, stats.chunks, stats.embeddings), (0, 0, 0));
}

#[tokio::test]
async fn test_embedding_upsert_and_lookup() {
    let ts = TestStore::new().await;
    let (_file_id, ids) = insert_file_with_chunks(&ts, "e.py", &["a", "b", "c"]).await;

    let rows = vec![EmbeddingRow {
        chunk_id: ids[0],
        provider: "openai".into(),
        model: "m".into(),
        dims: 4,
        vector: axis_vector(0, 4),
    }];
    ts.store.insert_embeddings_batch(rows).await.unwrap();

    let existing = ts
        .store
        .get_existing_embeddings(ids.clone(), "openai".into(), "m".into())
        .await
        .unwrap();
    assert_eq!(existing.len(), 1);
    assert!(existing.contains(&ids[0]));

    let missing = ts
        .store
        .get_chunks_without_embeddings("openai".into(), "m".into(), None, 100)
        .await
        .unwrap();
    let missing_ids: Vec<i64> = missing.iter().map(|(id, _)| *id).collect();
    assert_eq!(missing_ids, vec![ids[1], ids[2]]);

    // Upsert replaces the vector, not duplicates the row
    let rows = vec![EmbeddingRow {
        chunk_id: ids[0],
        provider: "openai".into(),
        model: "m".into(),
        dims: 4,
        vector: axis_vector(1, 4),
    }];
    ts.store.insert_embeddings_batch(rows).await.unwrap();
    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.embeddings, 1);
}

#[tokio::test]
async fn test_bulk_embedding_insert_over_drop_threshold() {
    let ts = TestStore::new().await;
    let file_id = ts
        .store
        .insert_file("big.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    let chunks: Vec<_> = (0..60).map(|i| test_chunk(&format!("def f{i}(): pass"))).collect();
    let ids = ts.store.insert_chunks_batch(file_id, chunks, 500).await.unwrap();

    ts.store
        .create_vector_index("openai".into(), "m".into(), 4, "cosine".into())
        .await
        .unwrap();

    // 60 rows crosses the drop/recreate threshold; the index must
    // survive and all rows must land
    let rows: Vec<_> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| EmbeddingRow {
            chunk_id: *id,
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: axis_vector(i, 4),
        })
        .collect();
    let inserted = ts.store.insert_embeddings_batch(rows).await.unwrap();
    assert_eq!(inserted, 60);

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.embeddings, 60);
    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes.len(), 1);
}

#[tokio::test]
async fn test_vector_index_registry() {
    let ts = TestStore::new().await;
    ts.store
        .create_vector_index("openai".into(), "small".into(), 1536, "cosine".into())
        .await
        .unwrap();
    ts.store
        .create_vector_index("tei".into(), "bge".into(), 768, "cosine".into())
        .await
        .unwrap();

    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes.len(), 2);
    assert!(indexes.iter().any(|i| i.provider == "openai" && i.dims == 1536));

    ts.store
        .drop_vector_index("openai".into(), "small".into())
        .await
        .unwrap();
    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes.len(), 1);
    assert_eq!(indexes[0].provider, "tei");
}

#[tokio::test]
async fn test_rebuild_vector_column_drops_mismatched() {
    let ts = TestStore::new().await;
    let (_file_id, ids) = insert_file_with_chunks(&ts, "r.py", &["a", "b"]).await;

    ts.store
        .insert_embeddings_batch(vec![
            EmbeddingRow {
                chunk_id: ids[0],
                provider: "openai".into(),
                model: "m".into(),
                dims: 4,
                vector: axis_vector(0, 4),
            },
            EmbeddingRow {
                chunk_id: ids[1],
                provider: "openai".into(),
                model: "m".into(),
                dims: 8,
                vector: axis_vector(0, 8),
            },
        ])
        .await
        .unwrap();

    let dropped = ts
        .store
        .rebuild_vector_column("openai".into(), "m".into(), 8)
        .await
        .unwrap();
    assert_eq!(dropped, 1);

    let indexes = ts.store.list_vector_indexes().await.unwrap();
    assert_eq!(indexes[0].dims, 8);
    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.embeddings, 1);
}

#[tokio::test]
async fn test_transaction_rollback() {
    let ts = TestStore::new().await;
    ts.store.begin().await.unwrap();
    ts.store
        .insert_file("ephemeral.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    ts.store.rollback().await.unwrap();

    assert!(ts
        .store
        .get_file_by_path("ephemeral.py")
        .await
        .unwrap()
        .is_none());

    ts.store.begin().await.unwrap();
    ts.store
        .insert_file("durable.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    ts.store.commit().await.unwrap();
    assert!(ts
        .store
        .get_file_by_path("durable.py")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_apply_file_update_wipe_guard() {
    let ts = TestStore::new().await;
    let (file_id, ids) = insert_file_with_chunks(&ts, "g.py", &["old1", "old2"]).await;

    // Simulate the inconsistency the guard exists for: chunks that the
    // diff never saw (it was handed an empty set)
    let outcome = ts
        .store
        .apply_file_update(FileUpdatePlan {
            path: "g.py".into(),
            language: "python".into(),
            size: 10,
            mtime: 99,
            existing_file_id: Some(file_id),
            delete_chunk_ids: Vec::new(),
            insert_chunks: vec![test_chunk("new1")],
            wipe_existing: true,
            db_batch_size: 500,
        })
        .await
        .unwrap();

    assert_eq!(outcome.deleted, 2);
    assert_eq!(outcome.inserted_ids.len(), 1);

    let chunks = ts.store.get_chunks_by_file_id(file_id).await.unwrap();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].code, "new1");
    assert!(!ids.contains(&chunks[0].id));
}

#[tokio::test]
async fn test_search_regex_pagination_is_sound() {
    let ts = TestStore::new().await;
    let file_id = ts
        .store
        .insert_file("p.py".into(), "python".into(), 1, 1)
        .await
        .unwrap();
    // 37 matching chunks interleaved with noise
    let mut chunks = Vec::new();
    for i in 0..37 {
        chunks.push(test_chunk(&format!("def needle_{i}(): pass")));
        chunks.push(test_chunk(&format!("def hay_{i}(): pass")));
    }
    ts.store.insert_chunks_batch(file_id, chunks, 500).await.unwrap();

    let all = ts
        .store
        .search_regex(regex::Regex::new("needle").unwrap(), None, 1000, 0)
        .await
        .unwrap();
    assert_eq!(all.hits.len(), 37);
    assert!(!all.has_more);

    let mut collected = Vec::new();
    let mut expected_sizes = Vec::new();
    for offset in [0usize, 10, 20, 30] {
        let page = ts
            .store
            .search_regex(regex::Regex::new("needle").unwrap(), None, 10, offset)
            .await
            .unwrap();
        expected_sizes.push((page.hits.len(), page.has_more));
        collected.extend(page.hits);
    }
    assert_eq!(
        expected_sizes,
        vec![(10, true), (10, true), (10, true), (7, false)]
    );

    let all_ids: Vec<i64> = all.hits.iter().map(|h| h.chunk_id).collect();
    let paged_ids: Vec<i64> = collected.iter().map(|h| h.chunk_id).collect();
    assert_eq!(all_ids, paged_ids, "pages concatenate without gaps or duplicates");
}

#[tokio::test]
async fn test_search_regex_path_prefix() {
    let ts = TestStore::new().await;
    insert_file_with_chunks(&ts, "src/a.py", &["def target(): pass"]).await;
    insert_file_with_chunks(&ts, "tests/b.py", &["def target(): pass"]).await;

    let page = ts
        .store
        .search_regex(regex::Regex::new("target").unwrap(), Some("src".into()), 10, 0)
        .await
        .unwrap();
    assert_eq!(page.hits.len(), 1);
    assert_eq!(page.hits[0].path, "src/a.py");
}

#[tokio::test]
async fn test_search_semantic_orders_by_distance() {
    let ts = TestStore::new().await;
    let (_file_id, ids) =
        insert_file_with_chunks(&ts, "s.py", &["closest", "middle", "farthest"]).await;

    // Angles from the query vector grow with the weight
    let rows = vec![
        EmbeddingRow {
            chunk_id: ids[0],
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: angled_vector(0.1, 4),
        },
        EmbeddingRow {
            chunk_id: ids[1],
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: angled_vector(1.0, 4),
        },
        EmbeddingRow {
            chunk_id: ids[2],
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: axis_vector(1, 4),
        },
    ];
    ts.store.insert_embeddings_batch(rows).await.unwrap();

    let query = axis_vector(0, 4);
    let page = ts
        .store
        .search_semantic(query.clone(), "openai".into(), "m".into(), None, None, 10, 0)
        .await
        .unwrap();

    let codes: Vec<&str> = page.hits.iter().map(|h| h.code.as_str()).collect();
    assert_eq!(codes, vec!["closest", "middle", "farthest"]);
    let distances: Vec<f32> = page.hits.iter().map(|h| h.distance.unwrap()).collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));

    // Threshold cuts the tail
    let page = ts
        .store
        .search_semantic(query.clone(), "openai".into(), "m".into(), Some(0.5), None, 10, 0)
        .await
        .unwrap();
    assert_eq!(page.hits.len(), 2);

    // Pagination over the ordered results
    let page = ts
        .store
        .search_semantic(query, "openai".into(), "m".into(), None, None, 2, 0)
        .await
        .unwrap();
    assert_eq!(page.hits.len(), 2);
    assert!(page.has_more);
}

#[tokio::test]
async fn test_search_semantic_scopes_by_provider_model() {
    let ts = TestStore::new().await;
    let (_file_id, ids) = insert_file_with_chunks(&ts, "t.py", &["only-one"]).await;
    ts.store
        .insert_embeddings_batch(vec![EmbeddingRow {
            chunk_id: ids[0],
            provider: "openai".into(),
            model: "m".into(),
            dims: 4,
            vector: axis_vector(0, 4),
        }])
        .await
        .unwrap();

    let hits = ts
        .store
        .search_semantic(axis_vector(0, 4), "tei".into(), "other".into(), None, None, 10, 0)
        .await
        .unwrap();
    assert!(hits.hits.is_empty());
}

#[tokio::test]
async fn test_stats_by_language() {
    let ts = TestStore::new().await;
    insert_file_with_chunks(&ts, "a.py", &["x"]).await;
    insert_file_with_chunks(&ts, "b.py", &["y"]).await;
    ts.store
        .insert_file("c.rs".into(), "rust".into(), 1, 1)
        .await
        .unwrap();

    let stats = ts.store.get_stats().await.unwrap();
    assert_eq!(stats.files, 3);
    assert_eq!(stats.files_by_language.get("python"), Some(&2));
    assert_eq!(stats.files_by_language.get("rust"), Some(&1));
    assert!(stats.db_size_bytes > 0);
}
