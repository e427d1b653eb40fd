//! Embedding CRUD and vector-index executors (run on the DB thread)

use std::collections::HashSet;

use sqlx::Row;

use super::gate::DbWorker;
use super::types::{vector_to_bytes, EmbeddingRow, StoreError, VectorIndexInfo};
use super::VECTOR_INDEX_DROP_THRESHOLD;

/// Name of the physical covering index backing all registered vector
/// indexes. Dropped around bulk writes; presence tracked per
/// (provider, model) in the `vector_indexes` registry.
const PHYSICAL_INDEX: &str = "idx_embeddings_lookup";

pub(super) fn get_existing_embeddings(
    w: &mut DbWorker,
    chunk_ids: &[i64],
    provider: &str,
    model: &str,
) -> Result<HashSet<i64>, StoreError> {
    if chunk_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let mut found = HashSet::new();
        for window in chunk_ids.chunks(500) {
            let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
                "SELECT chunk_id FROM embeddings WHERE provider = ",
            );
            qb.push_bind(provider);
            qb.push(" AND model = ");
            qb.push_bind(model);
            qb.push(" AND chunk_id IN (");
            let mut sep = qb.separated(", ");
            for id in window {
                sep.push_bind(*id);
            }
            qb.push(")");

            let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
            found.extend(rows.into_iter().map(|(id,)| id));
        }
        Ok(found)
    })
}

/// Upsert embeddings in bulk, keyed by (chunk_id, provider, model).
///
/// Runs of >= [`VECTOR_INDEX_DROP_THRESHOLD`] rows drop the physical
/// index before inserting and recreate it afterwards; on the reference
/// storage this is an order-of-magnitude difference, and the behavior is
/// contractual.
pub(super) fn insert_embeddings_batch(
    w: &mut DbWorker,
    rows: &[EmbeddingRow],
) -> Result<usize, StoreError> {
    if rows.is_empty() {
        return Ok(0);
    }
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let bulk = rows.len() >= VECTOR_INDEX_DROP_THRESHOLD;
        if bulk {
            sqlx::query(&format!("DROP INDEX IF EXISTS {PHYSICAL_INDEX}"))
                .execute(&mut *conn)
                .await?;
        }

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        let result: Result<(), StoreError> = async {
            // Vector blobs are large; keep the multi-row windows small so
            // statements stay under SQLite's parameter ceiling.
            for window in rows.chunks(100) {
                let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
                    "INSERT INTO embeddings (chunk_id, provider, model, dims, vector) ",
                );
                qb.push_values(window.iter(), |mut b, row| {
                    b.push_bind(row.chunk_id)
                        .push_bind(row.provider.as_str())
                        .push_bind(row.model.as_str())
                        .push_bind(row.dims as i64)
                        .push_bind(vector_to_bytes(&row.vector));
                });
                qb.push(
                    " ON CONFLICT(chunk_id, provider, model)
                      DO UPDATE SET dims = excluded.dims, vector = excluded.vector",
                );
                qb.build().execute(&mut *conn).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
            }
            Err(e) => {
                if let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::error!(error = %rb, "Rollback failed after embedding batch error");
                }
                return Err(e);
            }
        }

        if bulk {
            recreate_physical_index(conn).await?;
        }
        Ok(rows.len())
    })
}

async fn recreate_physical_index(conn: &mut sqlx::SqliteConnection) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {PHYSICAL_INDEX} ON embeddings(provider, model, chunk_id)"
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub(super) fn get_chunks_without_embeddings(
    w: &mut DbWorker,
    provider: &str,
    model: &str,
    path_prefix: Option<&str>,
    limit: usize,
) -> Result<Vec<(i64, String)>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let rows = sqlx::query(
            "SELECT c.id, c.code
             FROM chunks c
             JOIN files f ON f.id = c.file_id
             WHERE (?3 IS NULL OR f.path LIKE ?3 || '%')
               AND NOT EXISTS (
                 SELECT 1 FROM embeddings e
                 WHERE e.chunk_id = c.id AND e.provider = ?1 AND e.model = ?2
               )
             ORDER BY c.id
             LIMIT ?4",
        )
        .bind(provider)
        .bind(model)
        .bind(path_prefix)
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<i64, _>(0), r.get::<String, _>(1)))
            .collect())
    })
}

pub(super) fn create_vector_index(
    w: &mut DbWorker,
    provider: &str,
    model: &str,
    dims: u32,
    metric: &str,
) -> Result<(), StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        sqlx::query(
            "INSERT INTO vector_indexes (provider, model, dims, metric) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(provider, model) DO UPDATE SET dims = excluded.dims, metric = excluded.metric",
        )
        .bind(provider)
        .bind(model)
        .bind(dims as i64)
        .bind(metric)
        .execute(&mut *conn)
        .await?;
        recreate_physical_index(conn).await
    })
}

pub(super) fn drop_vector_index(
    w: &mut DbWorker,
    provider: &str,
    model: &str,
) -> Result<(), StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        sqlx::query("DELETE FROM vector_indexes WHERE provider = ?1 AND model = ?2")
            .bind(provider)
            .bind(model)
            .execute(&mut *conn)
            .await?;
        let (remaining,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vector_indexes")
            .fetch_one(&mut *conn)
            .await?;
        if remaining == 0 {
            sqlx::query(&format!("DROP INDEX IF EXISTS {PHYSICAL_INDEX}"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    })
}

pub(super) fn list_vector_indexes(w: &mut DbWorker) -> Result<Vec<VectorIndexInfo>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let rows = sqlx::query(
            "SELECT provider, model, dims, metric FROM vector_indexes ORDER BY provider, model",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| VectorIndexInfo {
                provider: r.get(0),
                model: r.get(1),
                dims: r.get::<i64, _>(2) as u32,
                metric: r.get(3),
            })
            .collect())
    })
}

/// Rebuild the (provider, model) vector rows at a new width.
///
/// SQLite has no fixed-width vector type, so "rebuild the column" means
/// deleting rows whose stored dims disagree and re-registering the index
/// at the observed width. The deleted chunks show up again in
/// `get_chunks_without_embeddings` and get re-embedded.
pub(super) fn rebuild_vector_column(
    w: &mut DbWorker,
    provider: &str,
    model: &str,
    dims: u32,
) -> Result<u64, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let result =
            sqlx::query("DELETE FROM embeddings WHERE provider = ?1 AND model = ?2 AND dims != ?3")
                .bind(provider)
                .bind(model)
                .bind(dims as i64)
                .execute(&mut *conn)
                .await?;
        sqlx::query(
            "INSERT INTO vector_indexes (provider, model, dims, metric) VALUES (?1, ?2, ?3, 'cosine')
             ON CONFLICT(provider, model) DO UPDATE SET dims = excluded.dims",
        )
        .bind(provider)
        .bind(model)
        .bind(dims as i64)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected())
    })
}
