use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::RegressionThresholds;
use crate::retrieval::SearchMode;

pub const DEFAULT_RESULT_LIMIT: usize = 10;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Contents of a golden-query file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoldenQuerySpec {
    #[serde(default)]
    pub scenarios: Vec<Scenario>,
    #[serde(default)]
    pub benchmarking_config: BenchmarkingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub category: String,
    #[serde(default)]
    pub queries: Vec<GoldenQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenQuery {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub expected_result_types: Vec<String>,
    #[serde(default)]
    pub min_results: usize,
    #[serde(default)]
    pub quality_threshold: f64,
    #[serde(default)]
    pub context: Option<String>,
    /// Upper bound on execution time in milliseconds.
    #[serde(default)]
    pub performance_target: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkingConfig {
    #[serde(default = "default_search_modes")]
    pub search_modes: Vec<SearchMode>,
    #[serde(default = "default_result_limits")]
    pub result_limits: Vec<usize>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub regression_thresholds: Option<RegressionThresholds>,
}

impl Default for BenchmarkingConfig {
    fn default() -> Self {
        Self {
            search_modes: default_search_modes(),
            result_limits: default_result_limits(),
            timeout_ms: default_timeout_ms(),
            regression_thresholds: None,
        }
    }
}

fn default_search_modes() -> Vec<SearchMode> {
    vec![SearchMode::Hybrid]
}

fn default_result_limits() -> Vec<usize> {
    vec![DEFAULT_RESULT_LIMIT]
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// A golden query together with the category it was listed under.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    pub category: String,
    pub query: GoldenQuery,
}

impl GoldenQuerySpec {
    /// Queries of the selected categories, in file order. `None` or an empty
    /// filter selects every category.
    pub fn queries_in_scope(&self, categories: Option<&[String]>) -> Vec<ScopedQuery> {
        let wanted = categories
            .filter(|values| !values.is_empty())
            .map(|values| {
                values
                    .iter()
                    .map(|value| value.trim().to_ascii_lowercase())
                    .collect::<BTreeSet<String>>()
            });

        self.scenarios
            .iter()
            .filter(|scenario| {
                wanted
                    .as_ref()
                    .is_none_or(|wanted| wanted.contains(&scenario.category.trim().to_ascii_lowercase()))
            })
            .flat_map(|scenario| {
                scenario.queries.iter().map(|query| ScopedQuery {
                    category: scenario.category.clone(),
                    query: query.clone(),
                })
            })
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.scenarios.iter().map(|scenario| scenario.queries.len()).sum()
    }
}

/// Reads a golden-query file. A missing or malformed file yields an empty
/// spec and a warning; the harness keeps running.
pub fn load_golden_queries(path: &Path) -> GoldenQuerySpec {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "golden query file unavailable; continuing with no scenarios"
            );
            return GoldenQuerySpec::default();
        }
    };

    match parse_golden_queries(&raw) {
        Ok(spec) => spec,
        Err(err) => {
            warn!(
                path = %path.display(),
                error = %err,
                "golden query file is malformed; continuing with no scenarios"
            );
            GoldenQuerySpec::default()
        }
    }
}

pub fn parse_golden_queries(raw: &str) -> Result<GoldenQuerySpec, serde_json::Error> {
    let mut spec = serde_json::from_str::<GoldenQuerySpec>(raw)?;
    let config = &mut spec.benchmarking_config;
    if config.search_modes.is_empty() {
        config.search_modes = default_search_modes();
    }
    config.result_limits.retain(|limit| *limit > 0);
    if config.result_limits.is_empty() {
        config.result_limits = default_result_limits();
    }
    if config.timeout_ms == 0 {
        config.timeout_ms = default_timeout_ms();
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "scenarios": [
        {
          "category": "productivity",
          "queries": [
            {
              "id": "prod-1",
              "query": "weekly review",
              "expected_result_types": ["note"],
              "min_results": 1,
              "quality_threshold": 0.3,
              "performance_target": 250
            }
          ]
        },
        {
          "category": "Technical",
          "queries": [
            { "id": "tech-1", "query": "sqlite performance" },
            { "id": "tech-2", "query": "fts5 ranking", "context": "search internals" }
          ]
        }
      ],
      "benchmarking_config": {
        "search_modes": ["bm25", "semantic", "hybrid"],
        "result_limits": [5, 0, 10],
        "timeout_ms": 1500,
        "regression_thresholds": { "performance_degradation": 0.3, "quality_degradation": 0.1 }
      }
    }"#;

    #[test]
    fn parses_full_spec_with_aliases_and_defaults() {
        let spec = parse_golden_queries(SAMPLE).expect("sample should parse");
        assert_eq!(spec.query_count(), 3);
        assert_eq!(
            spec.benchmarking_config.search_modes,
            vec![SearchMode::Bm25, SearchMode::Vector, SearchMode::Hybrid]
        );
        assert_eq!(spec.benchmarking_config.result_limits, vec![5, 10]);
        assert_eq!(spec.benchmarking_config.timeout_ms, 1500);

        let tech = &spec.scenarios[1].queries[0];
        assert!(tech.expected_result_types.is_empty());
        assert_eq!(tech.min_results, 0);
        assert_eq!(tech.performance_target, None);
        assert_eq!(spec.scenarios[0].queries[0].performance_target, Some(250.0));
    }

    #[test]
    fn category_filter_is_case_insensitive() {
        let spec = parse_golden_queries(SAMPLE).expect("parse");
        let scoped = spec.queries_in_scope(Some(&["technical".to_string()]));
        assert_eq!(scoped.len(), 2);
        assert!(scoped.iter().all(|entry| entry.category == "Technical"));
        assert_eq!(spec.queries_in_scope(None).len(), 3);
        assert_eq!(spec.queries_in_scope(Some(&[])).len(), 3);
    }

    #[test]
    fn missing_and_malformed_files_degrade_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            load_golden_queries(&dir.path().join("absent.json")),
            GoldenQuerySpec::default()
        );

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ \"scenarios\": [ {").expect("write");
        let spec = load_golden_queries(&broken);
        assert!(spec.scenarios.is_empty());
        assert_eq!(spec.benchmarking_config, BenchmarkingConfig::default());
    }
}
