use std::time::{Duration, Instant};

use rusqlite::{Connection, params};
use tracing::info;

use crate::db::touch_updated_at;
use crate::error::NotegrepResult;
use crate::retrieval::sanitize::SanitizedQuery;
use crate::retrieval::{HitSource, SearchHit};
use crate::util::{normalize_whitespace, truncate_chars};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildStats {
    pub chunks: usize,
    pub elapsed: Duration,
}

pub fn ensure(connection: &Connection) -> NotegrepResult<()> {
    connection.execute_batch(
        "
        CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts USING fts5(
          chunk_id UNINDEXED,
          item_id UNINDEXED,
          heading,
          text,
          tokenize = 'unicode61 remove_diacritics 2'
        );
        ",
    )?;
    Ok(())
}

/// Wipes the full-text index and refills it from the chunk table.
///
/// Runs inside one transaction, so concurrent readers keep seeing the previous
/// index until the commit lands.
pub fn rebuild(connection: &mut Connection) -> NotegrepResult<RebuildStats> {
    let started = Instant::now();
    ensure(connection)?;

    let tx = connection.transaction()?;
    tx.execute("DELETE FROM chunk_fts", [])?;
    let chunks = tx.execute(
        "INSERT INTO chunk_fts(chunk_id, item_id, heading, text)
         SELECT id, item_id, heading, text FROM chunk ORDER BY item_id, ordinal",
        [],
    )?;
    tx.execute("INSERT INTO chunk_fts(chunk_fts) VALUES('optimize')", [])?;
    touch_updated_at(&tx)?;
    tx.commit()?;

    let stats = RebuildStats {
        chunks,
        elapsed: started.elapsed(),
    };
    info!(
        chunks = stats.chunks,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "rebuilt full-text index"
    );
    Ok(stats)
}

/// Replaces the indexed rows of one item with its current chunks.
pub fn index_item(connection: &Connection, item_id: &str) -> NotegrepResult<usize> {
    delete_item(connection, item_id)?;
    let inserted = connection.execute(
        "INSERT INTO chunk_fts(chunk_id, item_id, heading, text)
         SELECT id, item_id, heading, text FROM chunk WHERE item_id = ?1 ORDER BY ordinal",
        [item_id],
    )?;
    Ok(inserted)
}

pub fn delete_item(connection: &Connection, item_id: &str) -> NotegrepResult<usize> {
    Ok(connection.execute("DELETE FROM chunk_fts WHERE item_id = ?1", [item_id])?)
}

pub fn count(connection: &Connection) -> NotegrepResult<usize> {
    let count: i64 = connection.query_row("SELECT COUNT(*) FROM chunk_fts", [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Returns up to `limit` hits ordered best first.
///
/// SQLite's `bm25()` is negative with lower meaning better; the score is
/// negated so larger is better, and `relevance` squashes it into `[0, 1)`.
pub fn query(
    connection: &Connection,
    query: &SanitizedQuery,
    limit: usize,
    preview_chars: usize,
) -> NotegrepResult<Vec<SearchHit>> {
    let Some(expression) = query.match_expression() else {
        return Ok(Vec::new());
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut statement = connection.prepare(
        "
        SELECT
          f.chunk_id,
          f.item_id,
          COALESCE(c.heading, ''),
          snippet(chunk_fts, -1, '[', ']', ' ... ', 18),
          bm25(chunk_fts) AS rank_value,
          i.item_type
        FROM chunk_fts f
        JOIN chunk c ON c.id = f.chunk_id
        LEFT JOIN indexed_item i ON i.item_id = f.item_id
        WHERE chunk_fts MATCH ?1
        ORDER BY rank_value ASC, f.chunk_id ASC
        LIMIT ?2
        ",
    )?;

    let mut rows = statement.query(params![expression, limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let raw_rank: f64 = row.get(4)?;
        let score = (-raw_rank).max(0.0);
        let snippet: String = row.get(3)?;
        out.push(SearchHit {
            chunk_id: row.get(0)?,
            item_id: row.get(1)?,
            heading: row.get(2)?,
            preview: truncate_chars(&normalize_whitespace(&snippet), preview_chars),
            score,
            relevance: score / (1.0 + score),
            item_type: row.get(5)?,
            sources: vec![HitSource::Bm25],
        });
    }

    Ok(out)
}
