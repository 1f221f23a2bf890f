use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{info, warn};

use crate::db::{read_metadata, table_exists, upsert_metadata};
use crate::error::{NotegrepError, NotegrepResult};
use crate::retrieval::{HitSource, SearchHit};
use crate::util::{normalize_whitespace, truncate_chars};

const VECTOR_DIMENSION_KEY: &str = "vector_dimension";

/// Storage and similarity search for chunk embeddings.
///
/// Implementations take a connection owned by the caller so that storing
/// vectors can join the same transaction as the chunk rows they describe.
pub trait VectorBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Prepares storage for vectors of `dimension`; `false` means this backend
    /// cannot accept them.
    fn ensure(&self, connection: &Connection, dimension: usize) -> NotegrepResult<bool>;

    fn store(
        &self,
        connection: &Connection,
        chunk_id: &str,
        model: &str,
        vector: &[f32],
    ) -> NotegrepResult<()>;

    fn delete_item(&self, connection: &Connection, item_id: &str) -> NotegrepResult<usize>;

    fn count(&self, connection: &Connection, model: &str) -> NotegrepResult<usize>;

    /// Nearest chunks for `model`, most similar first.
    fn query(
        &self,
        connection: &Connection,
        model: &str,
        vector: &[f32],
        limit: usize,
        preview_chars: usize,
    ) -> NotegrepResult<Vec<SearchHit>>;
}

/// Picks the backend once per process: the `vec0` module when the connection
/// exposes it, the linear scan otherwise.
pub fn probe_backend(connection: &Connection) -> Arc<dyn VectorBackend> {
    if native_module_available(connection) {
        info!(backend = NativeVectorBackend::NAME, "vector backend selected");
        Arc::new(NativeVectorBackend)
    } else {
        info!(
            backend = LinearScanBackend::NAME,
            "vec0 module not available; using linear-scan vector backend"
        );
        Arc::new(LinearScanBackend)
    }
}

fn native_module_available(connection: &Connection) -> bool {
    connection
        .query_row(
            "SELECT COUNT(*) FROM pragma_module_list WHERE name = 'vec0'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .map(|count| count > 0)
        .unwrap_or(false)
}

/// sqlite-vec `vec0` table plus a `(chunk_id, model) -> rowid` mapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeVectorBackend;

impl NativeVectorBackend {
    pub const NAME: &'static str = "sqlite-vec";
}

impl VectorBackend for NativeVectorBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn ensure(&self, connection: &Connection, dimension: usize) -> NotegrepResult<bool> {
        if dimension == 0 {
            return Ok(false);
        }
        if !native_module_available(connection) {
            return Err(NotegrepError::IndexUnavailable(
                "vec0 module is not registered on this connection".to_string(),
            ));
        }

        if let Some(existing) = read_metadata(connection, VECTOR_DIMENSION_KEY)?
            && table_exists(connection, "chunk_vec")?
        {
            let existing = existing.parse::<usize>().unwrap_or(0);
            if existing != dimension {
                warn!(
                    existing,
                    requested = dimension,
                    "vector dimension differs from the native index; skipping"
                );
                return Ok(false);
            }
            return Ok(true);
        }

        connection.execute_batch(&format!(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS chunk_vec USING vec0(
              model text partition key,
              embedding float[{dimension}] distance_metric=cosine
            );
            CREATE TABLE IF NOT EXISTS vector_map (
              chunk_id TEXT NOT NULL,
              model TEXT NOT NULL,
              vec_rowid INTEGER NOT NULL UNIQUE,
              PRIMARY KEY (chunk_id, model)
            );
            "
        ))?;
        upsert_metadata(connection, VECTOR_DIMENSION_KEY, &dimension.to_string())?;
        Ok(true)
    }

    fn store(
        &self,
        connection: &Connection,
        chunk_id: &str,
        model: &str,
        vector: &[f32],
    ) -> NotegrepResult<()> {
        let previous = connection
            .query_row(
                "SELECT vec_rowid FROM vector_map WHERE chunk_id = ?1 AND model = ?2",
                params![chunk_id, model],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(rowid) = previous {
            connection.execute("DELETE FROM chunk_vec WHERE rowid = ?1", [rowid])?;
            connection.execute(
                "DELETE FROM vector_map WHERE chunk_id = ?1 AND model = ?2",
                params![chunk_id, model],
            )?;
        }

        connection.execute(
            "INSERT INTO chunk_vec(model, embedding) VALUES (?1, ?2)",
            params![model, encode_vector_blob(vector)],
        )?;
        let rowid = connection.last_insert_rowid();
        connection.execute(
            "INSERT INTO vector_map(chunk_id, model, vec_rowid) VALUES (?1, ?2, ?3)",
            params![chunk_id, model, rowid],
        )?;
        Ok(())
    }

    fn delete_item(&self, connection: &Connection, item_id: &str) -> NotegrepResult<usize> {
        if !table_exists(connection, "vector_map")? {
            return Ok(0);
        }
        connection.execute(
            "DELETE FROM chunk_vec WHERE rowid IN (
               SELECT m.vec_rowid FROM vector_map m
               JOIN chunk c ON c.id = m.chunk_id
               WHERE c.item_id = ?1
             )",
            [item_id],
        )?;
        Ok(connection.execute(
            "DELETE FROM vector_map WHERE chunk_id IN (SELECT id FROM chunk WHERE item_id = ?1)",
            [item_id],
        )?)
    }

    fn count(&self, connection: &Connection, model: &str) -> NotegrepResult<usize> {
        if !table_exists(connection, "vector_map")? {
            return Ok(0);
        }
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM vector_map WHERE model = ?1",
            [model],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn query(
        &self,
        connection: &Connection,
        model: &str,
        vector: &[f32],
        limit: usize,
        preview_chars: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        if limit == 0 || vector.is_empty() || !table_exists(connection, "vector_map")? {
            return Ok(Vec::new());
        }

        // `model` is the partition key, so the KNN step only ranks that model.
        let mut statement = connection.prepare(
            "
            WITH knn AS (
              SELECT rowid, distance FROM chunk_vec
              WHERE embedding MATCH ?1 AND k = ?2 AND model = ?3
            )
            SELECT m.chunk_id, c.item_id, c.heading, c.text, knn.distance, i.item_type
            FROM knn
            JOIN vector_map m ON m.vec_rowid = knn.rowid
            JOIN chunk c ON c.id = m.chunk_id
            LEFT JOIN indexed_item i ON i.item_id = c.item_id
            ORDER BY knn.distance ASC, m.chunk_id ASC
            ",
        )?;

        let mut rows =
            statement.query(params![encode_vector_blob(vector), limit as i64, model])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let distance: f64 = row.get(4)?;
            let similarity = 1.0 - distance;
            let text: String = row.get(3)?;
            out.push(SearchHit {
                chunk_id: row.get(0)?,
                item_id: row.get(1)?,
                heading: row.get(2)?,
                preview: truncate_chars(&normalize_whitespace(&text), preview_chars),
                score: similarity,
                relevance: similarity.clamp(0.0, 1.0),
                item_type: row.get(5)?,
                sources: vec![HitSource::Vector],
            });
        }
        Ok(out)
    }
}

/// Plain `embedding` table scanned in full with cosine similarity.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearScanBackend;

impl LinearScanBackend {
    pub const NAME: &'static str = "linear-scan";
}

impl VectorBackend for LinearScanBackend {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn ensure(&self, connection: &Connection, dimension: usize) -> NotegrepResult<bool> {
        if dimension == 0 {
            return Ok(false);
        }
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS embedding (
              chunk_id TEXT NOT NULL,
              model TEXT NOT NULL,
              dimension INTEGER NOT NULL,
              vector BLOB NOT NULL,
              PRIMARY KEY (chunk_id, model)
            );
            ",
        )?;
        Ok(true)
    }

    fn store(
        &self,
        connection: &Connection,
        chunk_id: &str,
        model: &str,
        vector: &[f32],
    ) -> NotegrepResult<()> {
        connection.execute(
            "INSERT INTO embedding(chunk_id, model, dimension, vector) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chunk_id, model) DO UPDATE SET
               dimension=excluded.dimension,
               vector=excluded.vector",
            params![chunk_id, model, vector.len() as i64, encode_vector_blob(vector)],
        )?;
        Ok(())
    }

    fn delete_item(&self, connection: &Connection, item_id: &str) -> NotegrepResult<usize> {
        if !table_exists(connection, "embedding")? {
            return Ok(0);
        }
        Ok(connection.execute(
            "DELETE FROM embedding WHERE chunk_id IN (SELECT id FROM chunk WHERE item_id = ?1)",
            [item_id],
        )?)
    }

    fn count(&self, connection: &Connection, model: &str) -> NotegrepResult<usize> {
        if !table_exists(connection, "embedding")? {
            return Ok(0);
        }
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM embedding WHERE model = ?1",
            [model],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn query(
        &self,
        connection: &Connection,
        model: &str,
        vector: &[f32],
        limit: usize,
        preview_chars: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        if limit == 0 || vector.is_empty() || !table_exists(connection, "embedding")? {
            return Ok(Vec::new());
        }

        let mut statement = connection.prepare(
            "
            SELECT e.chunk_id, c.item_id, c.heading, c.text, e.dimension, e.vector, i.item_type
            FROM embedding e
            JOIN chunk c ON c.id = e.chunk_id
            LEFT JOIN indexed_item i ON i.item_id = c.item_id
            WHERE e.model = ?1
            ",
        )?;

        let mut rows = statement.query([model])?;
        let mut scored = Vec::<(f64, SearchHit)>::new();
        while let Some(row) = rows.next()? {
            let dimension = usize::try_from(row.get::<_, i64>(4)?).unwrap_or(0);
            if dimension != vector.len() {
                continue;
            }
            let blob: Vec<u8> = row.get(5)?;
            let Some(stored) = decode_vector_blob(&blob, dimension) else {
                continue;
            };
            let similarity = cosine_similarity(vector, &stored);
            let text: String = row.get(3)?;
            scored.push((
                similarity,
                SearchHit {
                    chunk_id: row.get(0)?,
                    item_id: row.get(1)?,
                    heading: row.get(2)?,
                    preview: truncate_chars(&normalize_whitespace(&text), preview_chars),
                    score: similarity,
                    relevance: similarity.clamp(0.0, 1.0),
                    item_type: row.get(6)?,
                    sources: vec![HitSource::Vector],
                },
            ));
        }

        scored.sort_by(|left, right| {
            right
                .0
                .partial_cmp(&left.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| left.1.chunk_id.cmp(&right.1.chunk_id))
        });
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, hit)| hit).collect())
    }
}

/// Cosine similarity; zero for mismatched lengths or zero vectors.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut left_norm = 0.0_f64;
    let mut right_norm = 0.0_f64;
    for (left_value, right_value) in left.iter().zip(right.iter()) {
        let (l, r) = (f64::from(*left_value), f64::from(*right_value));
        dot += l * r;
        left_norm += l * l;
        right_norm += r * r;
    }

    if left_norm <= f64::EPSILON || right_norm <= f64::EPSILON {
        return 0.0;
    }
    dot / (left_norm.sqrt() * right_norm.sqrt())
}

pub fn encode_vector_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_vector_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect(),
    )
}
