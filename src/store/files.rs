//! File CRUD executors (run on the DB thread)

use sqlx::Row;

use super::gate::DbWorker;
use super::types::{FileRecord, StoreError, StoreStats};

pub(super) fn insert_file(
    w: &mut DbWorker,
    path: &str,
    language: &str,
    size: i64,
    mtime: i64,
) -> Result<i64, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let now = chrono::Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO files (path, language, size, mtime, last_indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(path)
        .bind(language)
        .bind(size)
        .bind(mtime)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        Ok(result.last_insert_rowid())
    })
}

pub(super) fn get_file_by_path(
    w: &mut DbWorker,
    path: &str,
) -> Result<Option<FileRecord>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let row = sqlx::query(
            "SELECT id, path, language, size, mtime, last_indexed_at FROM files WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(|r| FileRecord {
            id: r.get(0),
            path: r.get(1),
            language: r.get(2),
            size: r.get(3),
            mtime: r.get(4),
            last_indexed_at: r.get(5),
        }))
    })
}

pub(super) fn update_file(
    w: &mut DbWorker,
    id: i64,
    size: i64,
    mtime: i64,
) -> Result<(), StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("UPDATE files SET size = ?1, mtime = ?2, last_indexed_at = ?3 WHERE id = ?4")
            .bind(size)
            .bind(mtime)
            .bind(&now)
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    })
}

/// Delete a file row; chunks and embeddings cascade via foreign keys.
pub(super) fn delete_file(w: &mut DbWorker, id: i64) -> Result<(), StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        sqlx::query("DELETE FROM files WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    })
}

pub(super) fn list_files(w: &mut DbWorker) -> Result<Vec<FileRecord>, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let rows = sqlx::query(
            "SELECT id, path, language, size, mtime, last_indexed_at FROM files ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| FileRecord {
                id: r.get(0),
                path: r.get(1),
                language: r.get(2),
                size: r.get(3),
                mtime: r.get(4),
                last_indexed_at: r.get(5),
            })
            .collect())
    })
}

pub(super) fn get_stats(w: &mut DbWorker) -> Result<StoreStats, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let (files,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files")
            .fetch_one(&mut *conn)
            .await?;
        let (chunks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut *conn)
            .await?;
        let (embeddings,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&mut *conn)
            .await?;
        let providers: Vec<(String, String)> =
            sqlx::query_as("SELECT DISTINCT provider, model FROM embeddings ORDER BY provider, model")
                .fetch_all(&mut *conn)
                .await?;
        let by_language: Vec<(String, i64)> =
            sqlx::query_as("SELECT language, COUNT(*) FROM files GROUP BY language")
                .fetch_all(&mut *conn)
                .await?;

        Ok(StoreStats {
            files: files as u64,
            chunks: chunks as u64,
            embeddings: embeddings as u64,
            providers: providers
                .into_iter()
                .map(|(p, m)| format!("{p}/{m}"))
                .collect(),
            files_by_language: by_language
                .into_iter()
                .map(|(l, n)| (l, n as u64))
                .collect(),
            db_size_bytes: 0, // filled by the facade, which knows the path
        })
    })
}
