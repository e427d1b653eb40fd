//! Regex and semantic search executors (run on the DB thread)
//!
//! Both searches return deterministic orderings so offset pagination
//! reproduces one stable sequence: regex hits are ordered by chunk id,
//! semantic hits by (distance, chunk id).

use sqlx::Row;

use super::gate::DbWorker;
use super::types::{
    bytes_to_vector, clamp_line_number, parse_kind, SearchHit, SearchPage, StoreError,
};
use crate::math::cosine_distance;

/// Rows fetched per keyset window during a regex scan
const SCAN_WINDOW: usize = 1000;

/// Regex search over chunk code.
///
/// The path prefix is pushed down as a bound parameter; the compiled
/// pattern runs here, inside the store layer, over keyset-paginated
/// windows in chunk-id order. Collects `offset + page_size + 1` matches
/// so `has_more` reflects the match after the page boundary.
pub(super) fn search_regex(
    w: &mut DbWorker,
    pattern: &regex::Regex,
    path_prefix: Option<&str>,
    page_size: usize,
    offset: usize,
) -> Result<SearchPage, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let mut matched = 0usize;
        let mut hits = Vec::with_capacity(page_size.min(64));
        let mut has_more = false;
        let mut last_id = 0i64;

        'scan: loop {
            let rows = sqlx::query(
                "SELECT c.id, f.path, c.kind, c.name, c.start_line, c.end_line, c.code
                 FROM chunks c
                 JOIN files f ON f.id = c.file_id
                 WHERE c.id > ?1 AND (?2 IS NULL OR f.path LIKE ?2 || '%')
                 ORDER BY c.id
                 LIMIT ?3",
            )
            .bind(last_id)
            .bind(path_prefix)
            .bind(SCAN_WINDOW as i64)
            .fetch_all(&mut *conn)
            .await?;

            let window_len = rows.len();
            for row in rows {
                let id: i64 = row.get(0);
                last_id = id;
                let code: String = row.get(6);
                if !pattern.is_match(&code) {
                    continue;
                }
                matched += 1;
                if matched <= offset {
                    continue;
                }
                if hits.len() < page_size {
                    hits.push(SearchHit {
                        chunk_id: id,
                        path: row.get(1),
                        kind: parse_kind(id, row.get(2)),
                        name: row.get(3),
                        start_line: clamp_line_number(row.get::<i64, _>(4)),
                        end_line: clamp_line_number(row.get::<i64, _>(5)),
                        code,
                        distance: None,
                    });
                } else {
                    // The match past the page boundary proves there is more
                    has_more = true;
                    break 'scan;
                }
            }

            if window_len < SCAN_WINDOW {
                break;
            }
        }

        Ok(SearchPage { hits, has_more })
    })
}

/// Brute-force cosine search over the (provider, model) embedding slice.
///
/// Loads matching vectors, scores them against the query, sorts by
/// (distance, chunk id), then applies threshold and offset. Rows with
/// corrupt vectors are skipped with a trace log rather than failing the
/// query.
#[allow(clippy::too_many_arguments)]
pub(super) fn search_semantic(
    w: &mut DbWorker,
    query: &[f32],
    provider: &str,
    model: &str,
    threshold: Option<f32>,
    path_prefix: Option<&str>,
    page_size: usize,
    offset: usize,
) -> Result<SearchPage, StoreError> {
    let (rt, conn) = w.parts()?;
    rt.block_on(async {
        let rows = sqlx::query(
            "SELECT c.id, f.path, c.kind, c.name, c.start_line, c.end_line, c.code,
                    e.dims, e.vector
             FROM embeddings e
             JOIN chunks c ON c.id = e.chunk_id
             JOIN files f ON f.id = c.file_id
             WHERE e.provider = ?1 AND e.model = ?2
               AND (?3 IS NULL OR f.path LIKE ?3 || '%')",
        )
        .bind(provider)
        .bind(model)
        .bind(path_prefix)
        .fetch_all(&mut *conn)
        .await?;

        let mut scored: Vec<(f32, SearchHit)> = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get(0);
            let dims = row.get::<i64, _>(7) as u32;
            let blob: Vec<u8> = row.get(8);
            let Some(vector) = bytes_to_vector(&blob, dims) else {
                continue;
            };
            let Some(distance) = cosine_distance(query, &vector) else {
                continue;
            };
            if let Some(t) = threshold {
                if distance > t {
                    continue;
                }
            }
            scored.push((
                distance,
                SearchHit {
                    chunk_id: id,
                    path: row.get(1),
                    kind: parse_kind(id, row.get(2)),
                    name: row.get(3),
                    start_line: clamp_line_number(row.get::<i64, _>(4)),
                    end_line: clamp_line_number(row.get::<i64, _>(5)),
                    code: row.get(6),
                    distance: Some(distance),
                },
            ));
        }

        scored.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.chunk_id.cmp(&b.1.chunk_id))
        });

        let total = scored.len();
        let hits = scored
            .into_iter()
            .skip(offset)
            .take(page_size)
            .map(|(_, hit)| hit)
            .collect();

        Ok(SearchPage {
            hits,
            has_more: total > offset + page_size,
        })
    })
}
