use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::db::{DB_SCHEMA_VERSION, Database, read_metadata, touch_updated_at};
use crate::error::NotegrepResult;
use crate::retrieval::chunker::{Chunk, Chunker};
use crate::retrieval::embedding::{
    EmbeddingFailure, EmbeddingProvider, build_provider, embedding_payload,
};
use crate::retrieval::fulltext::{self, RebuildStats};
use crate::retrieval::fusion::fuse;
use crate::retrieval::sanitize::sanitize;
use crate::retrieval::vector::{VectorBackend, probe_backend};
use crate::retrieval::{Note, SearchHit, SearchMode};
use crate::util::sha256_hex;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemIndexOutcome {
    pub item_id: String,
    pub chunks: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub skipped_unchanged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub items: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub embedding_failures: usize,
    pub skipped_unchanged: usize,
    pub elapsed_ms: u64,
}

impl ItemIndexOutcome {
    fn skipped(item_id: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            chunks: 0,
            embedded: 0,
            embedding_failures: 0,
            skipped_unchanged: true,
        }
    }
}

impl IndexReport {
    fn absorb(&mut self, outcome: &ItemIndexOutcome) {
        self.items += 1;
        if outcome.skipped_unchanged {
            self.skipped_unchanged += 1;
            return;
        }
        self.chunks += outcome.chunks;
        self.embedded += outcome.embedded;
        self.embedding_failures += outcome.embedding_failures;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub db_path: String,
    pub schema_version: String,
    pub items: usize,
    pub chunks: usize,
    pub fulltext_rows: usize,
    pub vector_backend: String,
    pub vector_search_available: bool,
    pub embedding_model: Option<String>,
    pub embeddings: usize,
    pub updated_at: Option<String>,
}

/// Query and indexing entry point over one on-disk index.
///
/// Cheap to clone; clones share the database handle, the selected vector
/// backend and the embedding provider.
#[derive(Debug, Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    db: Arc<Database>,
    chunker: Chunker,
    vectors: Arc<dyn VectorBackend>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

struct PreparedItem {
    note: Note,
    content_hash: String,
    force: bool,
    chunks: Vec<Chunk>,
    vectors: Vec<(String, Vec<f32>)>,
    embedding_failures: usize,
}

impl Engine {
    pub fn open(config: EngineConfig) -> NotegrepResult<Self> {
        config.validate()?;
        let db = Database::open(&config.db_path, config.vector_extension_path.as_deref())?;
        let connection = db.connect()?;
        fulltext::ensure(&connection)?;
        let vectors = probe_backend(&connection);
        let embedder = build_provider(&config);
        let chunker = Chunker::new(config.chunk_max_chars)?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            chunker,
            vectors,
            embedder,
        })
    }

    /// Replaces the configured embedding provider.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn without_embeddings(mut self) -> Self {
        self.embedder = None;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn database(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn vector_backend_name(&self) -> &'static str {
        self.vectors.name()
    }

    pub fn vector_search_available(&self) -> bool {
        self.embedder.is_some()
    }

    /// Replaces everything stored for `note`. Unchanged content is skipped
    /// unless `force` is set. The hash is checked again under the write gate,
    /// so concurrent indexing of one note writes it once.
    pub async fn index_note(&self, note: &Note, force: bool) -> NotegrepResult<ItemIndexOutcome> {
        let content_hash = self.content_hash(note);
        if !force && self.stored_hash(&note.id).await?.as_deref() == Some(content_hash.as_str()) {
            debug!(item_id = %note.id, "item unchanged; skipping");
            return Ok(ItemIndexOutcome::skipped(&note.id));
        }

        let chunks = self.chunker.chunk(&note.id, &note.title, &note.body);
        let (vectors, embedding_failures) = self.embed_chunks(&chunks).await;
        let prepared = PreparedItem {
            note: note.clone(),
            content_hash,
            force,
            chunks,
            vectors,
            embedding_failures,
        };
        self.store_prepared(prepared).await
    }

    pub async fn index_notes(&self, notes: &[Note], force: bool) -> NotegrepResult<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();
        for note in notes {
            let outcome = self.index_note(note, force).await?;
            report.absorb(&outcome);
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            items = report.items,
            chunks = report.chunks,
            embedded = report.embedded,
            embedding_failures = report.embedding_failures,
            skipped_unchanged = report.skipped_unchanged,
            elapsed_ms = report.elapsed_ms,
            "indexed notes"
        );
        Ok(report)
    }

    /// Removes chunks, full-text rows and vectors of one item.
    pub async fn delete_item(&self, item_id: &str) -> NotegrepResult<bool> {
        let vectors = Arc::clone(&self.vectors);
        let item_id = item_id.to_string();
        self.db
            .write(move |connection| {
                let tx = connection.transaction()?;
                vectors.delete_item(&tx, &item_id)?;
                fulltext::delete_item(&tx, &item_id)?;
                tx.execute("DELETE FROM chunk WHERE item_id = ?1", [&item_id])?;
                let removed =
                    tx.execute("DELETE FROM indexed_item WHERE item_id = ?1", [&item_id])?;
                touch_updated_at(&tx)?;
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
    }

    /// Rebuilds the full-text index from the stored chunks.
    pub async fn rebuild(&self) -> NotegrepResult<RebuildStats> {
        self.db.write(fulltext::rebuild).await
    }

    pub async fn bm25_search(&self, text: &str, k: usize) -> NotegrepResult<Vec<SearchHit>> {
        let query = sanitize(text);
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let preview_chars = self.config.preview_chars;
        self.db
            .read(move |connection| fulltext::query(connection, &query, k, preview_chars))
            .await
    }

    /// Nearest chunks by embedding. Empty when embeddings are off or the
    /// query cannot be embedded.
    pub async fn vector_search(&self, text: &str, k: usize) -> NotegrepResult<Vec<SearchHit>> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(Vec::new());
        };
        if k == 0 || text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = match embedder
            .embed(text, &self.config.embedding_model, self.config.embedding_timeout)
            .await
        {
            Ok(vector) => vector,
            Err(failure) => {
                warn!(error = %failure, "query embedding failed; vector results skipped");
                return Ok(Vec::new());
            }
        };

        let vectors = Arc::clone(&self.vectors);
        let model = self.config.embedding_model.clone();
        let preview_chars = self.config.preview_chars;
        self.db
            .read(move |connection| vectors.query(connection, &model, &vector, k, preview_chars))
            .await
    }

    /// Reciprocal rank fusion over both indexes, queried concurrently.
    pub async fn hybrid_search(
        &self,
        text: &str,
        k: usize,
        alpha: Option<f64>,
    ) -> NotegrepResult<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = k.saturating_mul(self.config.candidate_multiplier.max(1));
        let (bm25, vector) = tokio::join!(
            self.bm25_search(text, candidates),
            self.vector_search(text, candidates)
        );
        Ok(fuse(&bm25?, &vector?, k, alpha, self.config.rrf_k))
    }

    pub async fn search(
        &self,
        mode: SearchMode,
        text: &str,
        k: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        match mode {
            SearchMode::Bm25 => self.bm25_search(text, k).await,
            SearchMode::Vector => self.vector_search(text, k).await,
            SearchMode::Hybrid => self.hybrid_search(text, k, None).await,
        }
    }

    pub async fn status(&self) -> NotegrepResult<IndexStatus> {
        let vectors = Arc::clone(&self.vectors);
        let model = self.embedder.as_ref().map(|_| self.config.embedding_model.clone());
        let db_path = self.db.path().display().to_string();
        let vector_search_available = self.vector_search_available();

        self.db
            .read(move |connection| {
                let count = |sql: &str| -> NotegrepResult<usize> {
                    let value: i64 = connection.query_row(sql, [], |row| row.get(0))?;
                    Ok(usize::try_from(value).unwrap_or(0))
                };
                let embeddings = match model.as_deref() {
                    Some(model) => vectors.count(connection, model)?,
                    None => 0,
                };
                Ok(IndexStatus {
                    db_path,
                    schema_version: read_metadata(connection, "db_schema_version")?
                        .unwrap_or_else(|| DB_SCHEMA_VERSION.to_string()),
                    items: count("SELECT COUNT(*) FROM indexed_item")?,
                    chunks: count("SELECT COUNT(*) FROM chunk")?,
                    fulltext_rows: fulltext::count(connection)?,
                    vector_backend: vectors.name().to_string(),
                    vector_search_available,
                    embedding_model: model,
                    embeddings,
                    updated_at: read_metadata(connection, "db_updated_at")?,
                })
            })
            .await
    }

    fn content_hash(&self, note: &Note) -> String {
        let model = self
            .embedder
            .as_ref()
            .map(|embedder| format!("{}:{}", embedder.provider_name(), self.config.embedding_model))
            .unwrap_or_default();
        sha256_hex(&[
            &note.item_type,
            &note.title,
            &note.body,
            &self.chunker.max_chars().to_string(),
            &model,
        ])
    }

    async fn stored_hash(&self, item_id: &str) -> NotegrepResult<Option<String>> {
        let item_id = item_id.to_string();
        self.db
            .read(move |connection| read_content_hash(connection, &item_id))
            .await
    }

    /// Embeds every chunk before any write lock is taken. Failures are
    /// counted and the chunk is stored without a vector.
    async fn embed_chunks(&self, chunks: &[Chunk]) -> (Vec<(String, Vec<f32>)>, usize) {
        let Some(embedder) = self.embedder.as_ref() else {
            return (Vec::new(), 0);
        };

        let mut vectors = Vec::<(String, Vec<f32>)>::with_capacity(chunks.len());
        let mut failures = 0usize;
        let mut expected_dimension = None::<usize>;
        for chunk in chunks {
            let Some(payload) = embedding_payload(&chunk.heading, &chunk.text) else {
                continue;
            };
            let result = embedder
                .embed(&payload, &self.config.embedding_model, self.config.embedding_timeout)
                .await
                .and_then(|vector| match expected_dimension {
                    Some(expected) if expected != vector.len() => {
                        Err(EmbeddingFailure::DimensionMismatch {
                            expected,
                            actual: vector.len(),
                        })
                    }
                    _ => Ok(vector),
                });

            match result {
                Ok(vector) => {
                    expected_dimension.get_or_insert(vector.len());
                    vectors.push((chunk.id.clone(), vector));
                }
                Err(failure) => {
                    failures += 1;
                    warn!(chunk_id = %chunk.id, error = %failure, "chunk embedding failed");
                }
            }
        }
        (vectors, failures)
    }

    async fn store_prepared(&self, prepared: PreparedItem) -> NotegrepResult<ItemIndexOutcome> {
        let vectors = Arc::clone(&self.vectors);
        let model = self.config.embedding_model.clone();

        self.db
            .write(move |connection| {
                let PreparedItem {
                    note,
                    content_hash,
                    force,
                    chunks,
                    vectors: embedded,
                    mut embedding_failures,
                } = prepared;

                if !force
                    && read_content_hash(connection, &note.id)?.as_deref()
                        == Some(content_hash.as_str())
                {
                    debug!(item_id = %note.id, "item written concurrently; skipping");
                    return Ok(ItemIndexOutcome::skipped(&note.id));
                }

                let tx = connection.transaction()?;
                vectors.delete_item(&tx, &note.id)?;
                tx.execute("DELETE FROM chunk WHERE item_id = ?1", [&note.id])?;
                {
                    let mut insert = tx.prepare(
                        "INSERT INTO chunk(id, item_id, ordinal, heading, text, token_estimate)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    )?;
                    for chunk in &chunks {
                        insert.execute(params![
                            chunk.id,
                            chunk.parent_item_id,
                            chunk.ordinal,
                            chunk.heading,
                            chunk.text,
                            chunk.token_estimate,
                        ])?;
                    }
                }
                tx.execute(
                    "INSERT INTO indexed_item(item_id, item_type, title, content_hash, chunk_count, indexed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(item_id) DO UPDATE SET
                       item_type=excluded.item_type,
                       title=excluded.title,
                       content_hash=excluded.content_hash,
                       chunk_count=excluded.chunk_count,
                       indexed_at=excluded.indexed_at",
                    params![
                        note.id,
                        note.item_type,
                        note.title,
                        content_hash,
                        chunks.len() as i64,
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                fulltext::index_item(&tx, &note.id)?;

                let mut stored = 0usize;
                for (chunk_id, vector) in &embedded {
                    if vectors.ensure(&tx, vector.len())? {
                        vectors.store(&tx, chunk_id, &model, vector)?;
                        stored += 1;
                    } else {
                        embedding_failures += 1;
                    }
                }
                touch_updated_at(&tx)?;
                tx.commit()?;

                Ok(ItemIndexOutcome {
                    item_id: note.id,
                    chunks: chunks.len(),
                    embedded: stored,
                    embedding_failures,
                    skipped_unchanged: false,
                })
            })
            .await
    }
}

fn read_content_hash(connection: &Connection, item_id: &str) -> NotegrepResult<Option<String>> {
    Ok(connection
        .query_row(
            "SELECT content_hash FROM indexed_item WHERE item_id = ?1",
            [item_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}
