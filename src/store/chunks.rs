//! Chunk CRUD executors and the transactional per-file update
//! (run on the DB thread)

use sqlx::Row;

use super::gate::DbWorker;
use super::types::{
    clamp_line_number, parse_kind, ChunkRecord, FileUpdatePlan, StoreError, UpdateOutcome,
};
use crate::parser::ParsedChunk;

/// Bulk-insert chunks with one multi-row INSERT per batch window.
///
/// Returns the new rowids in input order (RETURNING preserves insertion
/// order for a single statement). SQLite's bind-parameter ceiling caps a
/// statement at `db_batch_size * 6` parameters, which the config keeps
/// well under the default limit.
pub(super) fn insert_chunks_batch(
    w: &mut DbWorker,
    file_id: i64,
    chunks: &[ParsedChunk],
    db_batch_size: usize,
) -> Result<Vec<i64>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(insert_chunks_inner(conn, file_id, chunks, db_batch_size))
}

pub(super) async fn insert_chunks_inner(
    conn: &mut sqlx::SqliteConnection,
    file_id: i64,
    chunks: &[ParsedChunk],
    db_batch_size: usize,
) -> Result<Vec<i64>, StoreError> {
    let batch = db_batch_size.max(1);
    let mut ids = Vec::with_capacity(chunks.len());

    for window in chunks.chunks(batch) {
        let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> = sqlx::QueryBuilder::new(
            "INSERT INTO chunks (file_id, kind, name, start_line, end_line, code) ",
        );
        qb.push_values(window.iter(), |mut b, chunk| {
            b.push_bind(file_id)
                .push_bind(chunk.kind.as_str())
                .push_bind(chunk.name.as_deref())
                .push_bind(chunk.start_line as i64)
                .push_bind(chunk.end_line as i64)
                .push_bind(chunk.code.as_str());
        });
        qb.push(" RETURNING id");

        let rows: Vec<(i64,)> = qb.build_query_as().fetch_all(&mut *conn).await?;
        ids.extend(rows.into_iter().map(|(id,)| id));
    }

    Ok(ids)
}

pub(super) fn get_chunks_by_file_id(
    w: &mut DbWorker,
    file_id: i64,
) -> Result<Vec<ChunkRecord>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let rows = sqlx::query(
            "SELECT id, file_id, kind, name, start_line, end_line, code
             FROM chunks WHERE file_id = ?1 ORDER BY id",
        )
        .bind(file_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let id: i64 = r.get(0);
                ChunkRecord {
                    id,
                    file_id: r.get(1),
                    kind: parse_kind(id, r.get(2)),
                    name: r.get(3),
                    start_line: clamp_line_number(r.get::<i64, _>(4)),
                    end_line: clamp_line_number(r.get::<i64, _>(5)),
                    code: r.get(6),
                }
            })
            .collect())
    })
}

pub(super) fn get_chunk_codes(
    w: &mut DbWorker,
    ids: &[i64],
) -> Result<Vec<(i64, String)>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let mut out = Vec::with_capacity(ids.len());
        for window in ids.chunks(500) {
            let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> =
                sqlx::QueryBuilder::new("SELECT id, code FROM chunks WHERE id IN (");
            let mut sep = qb.separated(", ");
            for id in window {
                sep.push_bind(*id);
            }
            qb.push(") ORDER BY id");
            let rows: Vec<(i64, String)> = qb.build_query_as().fetch_all(&mut *conn).await?;
            out.extend(rows);
        }
        Ok(out)
    })
}

pub(super) fn delete_chunk(w: &mut DbWorker, id: i64) -> Result<(), StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        sqlx::query("DELETE FROM chunks WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    })
}

pub(super) fn delete_chunks_by_file_id(w: &mut DbWorker, file_id: i64) -> Result<u64, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let result = sqlx::query("DELETE FROM chunks WHERE file_id = ?1")
            .bind(file_id)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    })
}

/// Apply one file's update inside a single transaction.
///
/// Order inside the transaction: wipe-or-delete old chunks, upsert the
/// file row, bulk-insert added chunks. The whole job runs on the DB
/// thread, so no other storage call can interleave between BEGIN and
/// COMMIT.
pub(super) fn apply_file_update(
    w: &mut DbWorker,
    plan: FileUpdatePlan,
) -> Result<UpdateOutcome, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result = apply_inner(conn, &plan).await;

        match result {
            Ok(outcome) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rb) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::error!(error = %rb, "Rollback failed after apply error");
                }
                Err(e)
            }
        }
    })
}

async fn apply_inner(
    conn: &mut sqlx::SqliteConnection,
    plan: &FileUpdatePlan,
) -> Result<UpdateOutcome, StoreError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut deleted = 0usize;

    let file_id = match plan.existing_file_id {
        Some(id) => {
            if plan.wipe_existing {
                let result = sqlx::query("DELETE FROM chunks WHERE file_id = ?1")
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                deleted += result.rows_affected() as usize;
            } else if !plan.delete_chunk_ids.is_empty() {
                for window in plan.delete_chunk_ids.chunks(500) {
                    let mut qb: sqlx::QueryBuilder<sqlx::Sqlite> =
                        sqlx::QueryBuilder::new("DELETE FROM chunks WHERE id IN (");
                    let mut sep = qb.separated(", ");
                    for chunk_id in window {
                        sep.push_bind(*chunk_id);
                    }
                    qb.push(")");
                    let result = qb.build().execute(&mut *conn).await?;
                    deleted += result.rows_affected() as usize;
                }
            }

            sqlx::query(
                "UPDATE files SET size = ?1, mtime = ?2, last_indexed_at = ?3 WHERE id = ?4",
            )
            .bind(plan.size)
            .bind(plan.mtime)
            .bind(&now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
            id
        }
        None => {
            let result = sqlx::query(
                "INSERT INTO files (path, language, size, mtime, last_indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&plan.path)
            .bind(&plan.language)
            .bind(plan.size)
            .bind(plan.mtime)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
            result.last_insert_rowid()
        }
    };

    let inserted_ids =
        insert_chunks_inner(conn, file_id, &plan.insert_chunks, plan.db_batch_size).await?;

    Ok(UpdateOutcome {
        file_id,
        inserted_ids,
        deleted,
    })
}
