use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NotegrepError, NotegrepResult};

/// Smoothing constant `K` in the reciprocal rank fusion term `1 / (rank + K)`.
pub const DEFAULT_RRF_K: f64 = 60.0;
/// Relative slowdown over baseline that raises a performance alert.
pub const DEFAULT_PERFORMANCE_DEGRADATION: f64 = 0.2;
/// Relative relevance drop under baseline that raises a quality alert.
pub const DEFAULT_QUALITY_DEGRADATION: f64 = 0.15;
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_EMBEDDING_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_EMBEDDING_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_LOCAL_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_CANDIDATE_MULTIPLIER: usize = 3;
pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_200;
pub const DEFAULT_PREVIEW_CHARS: usize = 220;

pub const EMBEDDINGS_ENABLED_ENV: &str = "NOTEGREP_EMBEDDINGS";
pub const EMBEDDING_PROVIDER_ENV: &str = "NOTEGREP_EMBEDDING_PROVIDER";
pub const EMBEDDING_MODEL_ENV: &str = "NOTEGREP_EMBEDDING_MODEL";
pub const EMBEDDING_URL_ENV: &str = "NOTEGREP_EMBEDDING_URL";
pub const VECTOR_EXTENSION_ENV: &str = "NOTEGREP_VECTOR_EXTENSION";
pub const RRF_K_ENV: &str = "NOTEGREP_RRF_K";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionThresholds {
    pub performance_degradation: f64,
    pub quality_degradation: f64,
}

impl Default for RegressionThresholds {
    fn default() -> Self {
        Self {
            performance_degradation: DEFAULT_PERFORMANCE_DEGRADATION,
            quality_degradation: DEFAULT_QUALITY_DEGRADATION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProviderKind {
    Ollama,
    LocalHash,
}

impl EmbeddingProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::LocalHash => "local-hash",
        }
    }
}

impl FromStr for EmbeddingProviderKind {
    type Err = NotegrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" | "http" => Ok(Self::Ollama),
            "local-hash" | "local" | "hash" => Ok(Self::LocalHash),
            other => Err(NotegrepError::Configuration(format!(
                "unknown embedding provider '{other}' (expected ollama or local-hash)"
            ))),
        }
    }
}

/// Immutable settings shared by every component of one process.
///
/// Built once, usually through [`EngineConfig::new`] followed by
/// [`EngineConfig::with_env_overrides`], then handed out behind an `Arc`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub db_path: PathBuf,
    pub embeddings_enabled: bool,
    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,
    pub embedding_url: String,
    pub embedding_dimension: usize,
    pub embedding_timeout: Duration,
    pub vector_extension_path: Option<PathBuf>,
    pub rrf_k: f64,
    pub candidate_multiplier: usize,
    pub chunk_max_chars: usize,
    pub preview_chars: usize,
    pub regression_thresholds: RegressionThresholds,
}

impl EngineConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            embeddings_enabled: false,
            embedding_provider: EmbeddingProviderKind::Ollama,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_url: DEFAULT_EMBEDDING_URL.to_string(),
            embedding_dimension: DEFAULT_LOCAL_EMBEDDING_DIM,
            embedding_timeout: Duration::from_millis(DEFAULT_EMBEDDING_TIMEOUT_MS),
            vector_extension_path: None,
            rrf_k: DEFAULT_RRF_K,
            candidate_multiplier: DEFAULT_CANDIDATE_MULTIPLIER,
            chunk_max_chars: DEFAULT_CHUNK_MAX_CHARS,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            regression_thresholds: RegressionThresholds::default(),
        }
    }

    pub fn with_embeddings(mut self, provider: EmbeddingProviderKind, model: &str) -> Self {
        self.embeddings_enabled = true;
        self.embedding_provider = provider;
        self.embedding_model = model.trim().to_string();
        self
    }

    /// Applies `NOTEGREP_*` environment overrides on top of the current values.
    pub fn with_env_overrides(self) -> NotegrepResult<Self> {
        let lookup = |key: &str| std::env::var(key).ok();
        self.with_overrides_from(lookup)
    }

    pub(crate) fn with_overrides_from<F>(mut self, lookup: F) -> NotegrepResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = parse_bool_flag(lookup(EMBEDDINGS_ENABLED_ENV).as_deref()) {
            self.embeddings_enabled = enabled;
        }
        if let Some(provider) = non_empty(lookup(EMBEDDING_PROVIDER_ENV)) {
            self.embedding_provider = provider.parse()?;
        }
        if let Some(model) = non_empty(lookup(EMBEDDING_MODEL_ENV)) {
            self.embedding_model = model;
        }
        if let Some(url) = non_empty(lookup(EMBEDDING_URL_ENV)) {
            self.embedding_url = url;
        }
        if let Some(path) = non_empty(lookup(VECTOR_EXTENSION_ENV)) {
            self.vector_extension_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = non_empty(lookup(RRF_K_ENV)) {
            self.rrf_k = parse_positive_f64(RRF_K_ENV, &raw)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> NotegrepResult<()> {
        if !(self.rrf_k.is_finite() && self.rrf_k > 0.0) {
            return Err(NotegrepError::Configuration(format!(
                "rrf_k must be a positive number, got {}",
                self.rrf_k
            )));
        }
        if self.embeddings_enabled && self.embedding_model.is_empty() {
            return Err(NotegrepError::Configuration(
                "embeddings are enabled but no embedding model is configured".to_string(),
            ));
        }
        validate_thresholds(&self.regression_thresholds)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

pub fn validate_thresholds(thresholds: &RegressionThresholds) -> NotegrepResult<()> {
    let RegressionThresholds {
        performance_degradation,
        quality_degradation,
    } = *thresholds;
    if !(performance_degradation.is_finite() && performance_degradation >= 0.0) {
        return Err(NotegrepError::Configuration(format!(
            "performance_degradation must be >= 0, got {performance_degradation}"
        )));
    }
    if !(quality_degradation.is_finite() && (0.0..=1.0).contains(&quality_degradation)) {
        return Err(NotegrepError::Configuration(format!(
            "quality_degradation must be within [0, 1], got {quality_degradation}"
        )));
    }
    Ok(())
}

pub fn parse_bool_flag(value: Option<&str>) -> Option<bool> {
    let value = value?.trim();
    if ["1", "true", "yes", "on"]
        .iter()
        .any(|candidate| value.eq_ignore_ascii_case(candidate))
    {
        Some(true)
    } else if ["0", "false", "no", "off"]
        .iter()
        .any(|candidate| value.eq_ignore_ascii_case(candidate))
    {
        Some(false)
    } else {
        None
    }
}

fn parse_positive_f64(key: &str, raw: &str) -> NotegrepResult<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
        .ok_or_else(|| {
            NotegrepError::Configuration(format!("{key} must be a positive number, got '{raw}'"))
        })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
