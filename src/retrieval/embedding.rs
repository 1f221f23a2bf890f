use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{EmbeddingProviderKind, EngineConfig};
use crate::util::normalize_whitespace;

/// Why one text could not be embedded. Callers count these and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingFailure {
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding service unreachable: {0}")]
    Unreachable(String),

    #[error("embedding service returned HTTP {0}")]
    Status(u16),

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("nothing to embed")]
    EmptyInput,

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    fn provider_name(&self) -> &'static str;

    /// Embeds `text` with `model`, giving up after `timeout`.
    async fn embed(
        &self,
        text: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingFailure>;
}

/// Builds the provider selected by `config`, or `None` when embeddings are off.
pub fn build_provider(config: &EngineConfig) -> Option<Arc<dyn EmbeddingProvider>> {
    if !config.embeddings_enabled {
        return None;
    }
    match config.embedding_provider {
        EmbeddingProviderKind::Ollama => Some(Arc::new(OllamaEmbedder::new(&config.embedding_url))),
        EmbeddingProviderKind::LocalHash => {
            Some(Arc::new(LocalHashEmbedder::new(config.embedding_dimension)))
        }
    }
}

/// Text sent to the provider for one chunk: heading, blank line, body.
pub fn embedding_payload(heading: &str, text: &str) -> Option<String> {
    let body = normalize_whitespace(text);
    if body.is_empty() {
        return None;
    }
    let heading = normalize_whitespace(heading);
    if heading.is_empty() {
        Some(body)
    } else {
        Some(format!("{heading}\n\n{body}"))
    }
}

/// Client for an Ollama-compatible `/api/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    async fn embed(
        &self,
        text: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingFailure> {
        if text.trim().is_empty() {
            return Err(EmbeddingFailure::EmptyInput);
        }

        let url = format!("{}/api/embeddings", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(&EmbeddingRequest { model, prompt: text })
            .send()
            .await
            .map_err(|err| classify_transport_error(err, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingFailure::Status(status.as_u16()));
        }

        let body = response
            .json::<EmbeddingResponse>()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    EmbeddingFailure::Timeout(timeout)
                } else {
                    EmbeddingFailure::Malformed(err.to_string())
                }
            })?;

        let vector = body
            .embedding
            .or_else(|| body.embeddings.and_then(|rows| rows.into_iter().next()))
            .ok_or_else(|| EmbeddingFailure::Malformed("response has no embedding".to_string()))?;

        if vector.is_empty() {
            return Err(EmbeddingFailure::Malformed("embedding is empty".to_string()));
        }
        if vector.iter().any(|value| !value.is_finite()) {
            return Err(EmbeddingFailure::Malformed(
                "embedding contains non-finite values".to_string(),
            ));
        }
        Ok(vector)
    }
}

fn classify_transport_error(err: reqwest::Error, timeout: Duration) -> EmbeddingFailure {
    if err.is_timeout() {
        EmbeddingFailure::Timeout(timeout)
    } else {
        EmbeddingFailure::Unreachable(err.to_string())
    }
}

/// Deterministic feature-hashing embedder that needs no service.
///
/// Words and adjacent word pairs are hashed into a fixed number of buckets
/// with a signed weight, then the vector is L2-normalized. Texts sharing
/// vocabulary land close together, which is enough for offline use and tests.
#[derive(Debug, Clone)]
pub struct LocalHashEmbedder {
    dimension: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn embed_text(&self, payload: &str) -> Vec<f32> {
        let mut vector = vec![0_f32; self.dimension];
        for feature in hash_features(payload) {
            let hash = stable_hash(&feature);
            let index = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + ((hash >> 48) & 0xFF) as f32 / 255.0;
            vector[index] += sign * weight;
        }
        normalize_vector(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalHashEmbedder {
    fn provider_name(&self) -> &'static str {
        "local-hash"
    }

    async fn embed(
        &self,
        text: &str,
        _model: &str,
        _timeout: Duration,
    ) -> Result<Vec<f32>, EmbeddingFailure> {
        if hash_features(text).is_empty() {
            return Err(EmbeddingFailure::EmptyInput);
        }
        Ok(self.embed_text(text))
    }
}

fn hash_features(payload: &str) -> Vec<String> {
    let words = payload
        .to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect::<Vec<String>>();

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn normalize_vector(values: &mut [f32]) {
    let norm = values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt();
    if norm <= f64::EPSILON {
        return;
    }
    for value in values.iter_mut() {
        *value = (f64::from(*value) / norm) as f32;
    }
}
