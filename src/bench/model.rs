use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retrieval::{SearchHit, SearchMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenchmarkStatus {
    Completed,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BenchmarkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for BenchmarkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SuiteStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SuiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-result quality metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    /// Mean relevance of the returned hits, 0 when there are none.
    pub relevance: f64,
    pub result_count: usize,
    pub search_time_ms: f64,
    /// Number of distinct item types among the hits.
    pub diversity: usize,
    pub intent_accuracy: f64,
    /// `min(1, result_count / min_results)`; absent when no minimum is set.
    pub recall: Option<f64>,
    /// Share of hits whose relevance reaches the query's quality threshold.
    pub precision: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpectedVsActual {
    pub expected_result_types: Vec<String>,
    pub actual_result_types: Vec<String>,
    pub min_results: usize,
    pub actual_results: usize,
    pub meets_min_results: bool,
    pub quality_threshold: f64,
    pub meets_quality_threshold: bool,
    pub performance_target_ms: Option<f64>,
    pub meets_performance_target: Option<bool>,
}

/// One (query, mode, limit) execution. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub suite_id: String,
    pub query_id: String,
    pub category: String,
    pub query_text: String,
    pub search_mode: SearchMode,
    pub result_limit: usize,
    pub execution_time_ms: f64,
    pub result_count: usize,
    pub results: Vec<SearchHit>,
    pub quality_scores: Option<QualityScores>,
    pub expected_vs_actual: Option<ExpectedVsActual>,
    pub status: BenchmarkStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl BenchmarkResult {
    pub fn relevance(&self) -> Option<f64> {
        self.quality_scores.as_ref().map(|scores| scores.relevance)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySummary {
    pub relevance: MetricSummary,
    pub result_count: MetricSummary,
    pub search_time_ms: MetricSummary,
    pub diversity: MetricSummary,
    pub intent_accuracy: MetricSummary,
    pub recall: MetricSummary,
    pub precision: MetricSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPerformance {
    pub category: String,
    pub queries: usize,
    pub executions: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub avg_execution_time_ms: f64,
    pub avg_relevance: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionKind {
    Performance,
    Quality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionAlert {
    pub query_id: String,
    pub search_mode: SearchMode,
    pub result_limit: usize,
    pub kind: RegressionKind,
    pub baseline_value: f64,
    pub current_value: f64,
    /// Relative change in the bad direction, e.g. `0.5` for 50% slower.
    pub degradation: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub compared: usize,
    pub without_baseline: usize,
    pub performance_regressions: usize,
    pub quality_regressions: usize,
    pub avg_time_change: Option<f64>,
    pub avg_quality_change: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSuite {
    pub suite_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SuiteStatus,
    /// Distinct golden queries in scope.
    pub total_queries: usize,
    /// Queries whose every execution completed.
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_executions: usize,
    pub queries_meeting_min_results: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub quality_summary: QualitySummary,
    pub category_performance: Vec<CategoryPerformance>,
    pub regression_alerts: Vec<RegressionAlert>,
    pub baseline_comparison: Option<BaselineComparison>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set when saving failed; the in-memory results are still complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistence_error: Option<String>,
    #[serde(default)]
    pub results: Vec<BenchmarkResult>,
}

impl BenchmarkSuite {
    /// Placeholder for a suite that has been started but not finished.
    pub fn pending(suite_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            suite_id: suite_id.to_string(),
            timestamp,
            status: SuiteStatus::Running,
            total_queries: 0,
            successful_queries: 0,
            failed_queries: 0,
            total_executions: 0,
            queries_meeting_min_results: 0,
            success_rate: 0.0,
            avg_execution_time_ms: 0.0,
            quality_summary: QualitySummary::default(),
            category_performance: Vec::new(),
            regression_alerts: Vec::new(),
            baseline_comparison: None,
            error_message: None,
            persistence_error: None,
            results: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub query_id: String,
    pub search_mode: SearchMode,
    pub baseline_execution_time_ms: f64,
    pub baseline_quality_score: f64,
    pub baseline_result_count: f64,
    pub established_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub source_suite_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteHistoryEntry {
    pub suite_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SuiteStatus,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub avg_relevance: f64,
    pub regression_alerts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub suite_id: String,
    pub query_id: String,
    pub search_mode: SearchMode,
    pub result_limit: usize,
    pub execution_time_ms: f64,
    pub result_count: usize,
    pub relevance: Option<f64>,
    pub status: BenchmarkStatus,
    pub timestamp: DateTime<Utc>,
}

/// Recent suites, or recent executions of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "entries", rename_all = "snake_case")]
pub enum History {
    Suites(Vec<SuiteHistoryEntry>),
    Query(Vec<QueryHistoryEntry>),
}

impl History {
    pub fn len(&self) -> usize {
        match self {
            Self::Suites(entries) => entries.len(),
            Self::Query(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
