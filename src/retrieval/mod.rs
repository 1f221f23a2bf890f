//! Hybrid retrieval core: chunking, full-text and vector indexes, rank fusion.

pub mod chunker;
pub mod embedding;
pub mod engine;
pub mod fulltext;
pub mod fusion;
pub mod sanitize;
pub mod vector;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NotegrepError;

pub use engine::{Engine, IndexReport, IndexStatus, ItemIndexOutcome};

/// A note handed to the indexer by whatever owns note storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    #[serde(default = "default_item_type")]
    pub item_type: String,
    #[serde(default)]
    pub title: String,
    pub body: String,
}

impl Note {
    pub fn new(id: &str, title: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            item_type: default_item_type(),
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    pub fn with_type(mut self, item_type: &str) -> Self {
        self.item_type = item_type.to_string();
        self
    }
}

fn default_item_type() -> String {
    "note".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HitSource {
    Bm25,
    Vector,
}

/// One ranked result as surfaced to the outer application.
///
/// `score` is "larger is better" within one result list; `relevance` is the
/// same evidence mapped onto `[0, 1]` so that lists from different modes can
/// be compared by the benchmark scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item_id: String,
    pub chunk_id: String,
    pub heading: String,
    pub preview: String,
    pub score: f64,
    #[serde(default)]
    pub relevance: f64,
    #[serde(default)]
    pub item_type: Option<String>,
    pub sources: Vec<HitSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[serde(alias = "fts", alias = "keyword", alias = "lexical")]
    Bm25,
    #[serde(alias = "semantic", alias = "embedding")]
    Vector,
    Hybrid,
}

impl SearchMode {
    pub const ALL: [SearchMode; 3] = [SearchMode::Bm25, SearchMode::Vector, SearchMode::Hybrid];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bm25 => "bm25",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = NotegrepError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bm25" | "fts" | "keyword" | "lexical" => Ok(Self::Bm25),
            "vector" | "semantic" | "embedding" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(NotegrepError::Configuration(format!(
                "unknown search mode '{other}'"
            ))),
        }
    }
}
