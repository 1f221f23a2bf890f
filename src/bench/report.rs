use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bench::model::{
    BaselineComparison, BenchmarkStatus, BenchmarkSuite, CategoryPerformance, RegressionAlert,
    RegressionKind, SuiteStatus,
};
use crate::retrieval::SearchMode;

const SLOWEST_QUERIES: usize = 5;
const LOW_RELEVANCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_executions: usize,
    pub queries_meeting_min_results: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub avg_relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryTiming {
    pub query_id: String,
    pub search_mode: SearchMode,
    pub result_limit: usize,
    pub execution_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub query_id: String,
    pub search_mode: SearchMode,
    pub result_limit: usize,
    pub status: BenchmarkStatus,
    pub error_message: Option<String>,
}

/// Human-oriented digest of one suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub suite_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SuiteStatus,
    pub summary: ReportSummary,
    pub categories: Vec<CategoryPerformance>,
    pub slowest_queries: Vec<QueryTiming>,
    pub failures: Vec<QueryFailure>,
    pub regression_alerts: Vec<RegressionAlert>,
    pub baseline_comparison: Option<BaselineComparison>,
    pub recommendations: Vec<String>,
}

pub fn generate_report(suite: &BenchmarkSuite) -> BenchmarkReport {
    let mut slowest = suite
        .results
        .iter()
        .filter(|result| result.status == BenchmarkStatus::Completed)
        .map(|result| QueryTiming {
            query_id: result.query_id.clone(),
            search_mode: result.search_mode,
            result_limit: result.result_limit,
            execution_time_ms: result.execution_time_ms,
        })
        .collect::<Vec<QueryTiming>>();
    slowest.sort_by(|left, right| {
        right
            .execution_time_ms
            .total_cmp(&left.execution_time_ms)
            .then_with(|| left.query_id.cmp(&right.query_id))
    });
    slowest.truncate(SLOWEST_QUERIES);

    let failures = suite
        .results
        .iter()
        .filter(|result| result.status != BenchmarkStatus::Completed)
        .map(|result| QueryFailure {
            query_id: result.query_id.clone(),
            search_mode: result.search_mode,
            result_limit: result.result_limit,
            status: result.status,
            error_message: result.error_message.clone(),
        })
        .collect::<Vec<QueryFailure>>();

    BenchmarkReport {
        suite_id: suite.suite_id.clone(),
        timestamp: suite.timestamp,
        status: suite.status,
        summary: ReportSummary {
            total_queries: suite.total_queries,
            successful_queries: suite.successful_queries,
            failed_queries: suite.failed_queries,
            total_executions: suite.total_executions,
            queries_meeting_min_results: suite.queries_meeting_min_results,
            success_rate: suite.success_rate,
            avg_execution_time_ms: suite.avg_execution_time_ms,
            avg_relevance: suite.quality_summary.relevance.mean,
        },
        categories: suite.category_performance.clone(),
        slowest_queries: slowest,
        recommendations: recommendations(suite, &failures),
        failures,
        regression_alerts: suite.regression_alerts.clone(),
        baseline_comparison: suite.baseline_comparison.clone(),
    }
}

fn recommendations(suite: &BenchmarkSuite, failures: &[QueryFailure]) -> Vec<String> {
    let mut out = Vec::<String>::new();

    let timeouts = failures
        .iter()
        .filter(|failure| failure.status == BenchmarkStatus::Timeout)
        .count();
    let errors = failures.len() - timeouts;
    if errors > 0 {
        out.push(format!(
            "{errors} execution(s) failed; check the index status and the logged errors"
        ));
    }
    if timeouts > 0 {
        out.push(format!(
            "{timeouts} execution(s) timed out; consider raising timeout_ms or reducing result limits"
        ));
    }

    let performance = count_alerts(&suite.regression_alerts, RegressionKind::Performance);
    if performance > 0 {
        out.push(format!(
            "{performance} performance regression(s) against the baseline; profile the affected modes"
        ));
    }
    let quality = count_alerts(&suite.regression_alerts, RegressionKind::Quality);
    if quality > 0 {
        out.push(format!(
            "{quality} quality regression(s) against the baseline; review recent indexing or fusion changes"
        ));
    }

    let relevance = &suite.quality_summary.relevance;
    if relevance.samples > 0 && relevance.mean < LOW_RELEVANCE {
        out.push(format!(
            "average relevance {:.2} is low; the corpus may not cover the golden queries",
            relevance.mean
        ));
    }

    let short = suite
        .total_queries
        .saturating_sub(suite.queries_meeting_min_results);
    if suite.total_queries > 0 && short > 0 {
        out.push(format!("{short} query(ies) returned fewer results than expected"));
    }

    if out.is_empty() {
        out.push("no action needed".to_string());
    }
    out
}

fn count_alerts(alerts: &[RegressionAlert], kind: RegressionKind) -> usize {
    alerts.iter().filter(|alert| alert.kind == kind).count()
}

/// Plain-text rendering for terminals.
pub fn write_text(out: &mut impl fmt::Write, report: &BenchmarkReport) -> fmt::Result {
    let summary = &report.summary;
    writeln!(out, "suite {} ({})", report.suite_id, report.status)?;
    writeln!(out, "  timestamp: {}", report.timestamp.to_rfc3339())?;
    writeln!(
        out,
        "  queries: {} total, {} successful, {} failed ({:.1}% success)",
        summary.total_queries,
        summary.successful_queries,
        summary.failed_queries,
        summary.success_rate * 100.0
    )?;
    writeln!(
        out,
        "  executions: {}, avg time {:.2} ms, avg relevance {:.3}",
        summary.total_executions, summary.avg_execution_time_ms, summary.avg_relevance
    )?;

    if !report.categories.is_empty() {
        writeln!(out, "categories:")?;
        for category in &report.categories {
            writeln!(
                out,
                "  {}: {} queries, {:.1}% success, {:.2} ms, relevance {:.3}",
                category.category,
                category.queries,
                category.success_rate * 100.0,
                category.avg_execution_time_ms,
                category.avg_relevance
            )?;
        }
    }

    if !report.slowest_queries.is_empty() {
        writeln!(out, "slowest:")?;
        for timing in &report.slowest_queries {
            writeln!(
                out,
                "  {} [{} k={}] {:.2} ms",
                timing.query_id, timing.search_mode, timing.result_limit, timing.execution_time_ms
            )?;
        }
    }

    if !report.failures.is_empty() {
        writeln!(out, "failures:")?;
        for failure in &report.failures {
            writeln!(
                out,
                "  {} [{} k={}] {}: {}",
                failure.query_id,
                failure.search_mode,
                failure.result_limit,
                failure.status,
                failure.error_message.as_deref().unwrap_or("-")
            )?;
        }
    }

    if !report.regression_alerts.is_empty() {
        writeln!(out, "regressions:")?;
        for alert in &report.regression_alerts {
            writeln!(
                out,
                "  {} [{} k={}] {:?}: {:.3} -> {:.3} ({:.1}% worse)",
                alert.query_id,
                alert.search_mode,
                alert.result_limit,
                alert.kind,
                alert.baseline_value,
                alert.current_value,
                alert.degradation * 100.0
            )?;
        }
    }

    writeln!(out, "recommendations:")?;
    for recommendation in &report.recommendations {
        writeln!(out, "  - {recommendation}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bench::model::{BenchmarkResult, MetricSummary, QualityScores};

    fn result(query_id: &str, time: f64, status: BenchmarkStatus) -> BenchmarkResult {
        BenchmarkResult {
            suite_id: "s".to_string(),
            query_id: query_id.to_string(),
            category: "work".to_string(),
            query_text: query_id.to_string(),
            search_mode: SearchMode::Bm25,
            result_limit: 5,
            execution_time_ms: time,
            result_count: 0,
            results: Vec::new(),
            quality_scores: (status == BenchmarkStatus::Completed).then(QualityScores::default),
            expected_vs_actual: None,
            status,
            error_message: (status != BenchmarkStatus::Completed).then(|| "slow".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn healthy_suite_needs_no_action() {
        let mut suite = BenchmarkSuite::pending("s", Utc::now());
        suite.status = SuiteStatus::Completed;
        suite.total_queries = 1;
        suite.successful_queries = 1;
        suite.queries_meeting_min_results = 1;
        suite.success_rate = 1.0;
        suite.results = vec![result("q1", 4.0, BenchmarkStatus::Completed)];

        let report = generate_report(&suite);
        assert_eq!(report.recommendations, vec!["no action needed".to_string()]);
        assert!(report.failures.is_empty());
        let mut text = String::new();
        write_text(&mut text, &report).expect("render");
        assert!(text.contains("suite s (completed)"));
    }

    #[test]
    fn report_lists_slowest_failures_and_low_relevance() {
        let mut suite = BenchmarkSuite::pending("s", Utc::now());
        suite.status = SuiteStatus::Completed;
        suite.total_queries = 7;
        suite.results = (0..6)
            .map(|index| result(&format!("q{index}"), index as f64 * 10.0, BenchmarkStatus::Completed))
            .chain([result("late", 900.0, BenchmarkStatus::Timeout)])
            .collect();
        suite.quality_summary.relevance = MetricSummary {
            samples: 6,
            mean: 0.1,
            ..MetricSummary::default()
        };

        let report = generate_report(&suite);
        assert_eq!(report.slowest_queries.len(), SLOWEST_QUERIES);
        assert_eq!(report.slowest_queries[0].query_id, "q5");
        assert_eq!(report.failures.len(), 1);
        assert!(report.recommendations.iter().any(|line| line.contains("timed out")));
        assert!(report.recommendations.iter().any(|line| line.contains("relevance")));
        assert!(report.recommendations.iter().any(|line| line.contains("fewer results")));
    }
}
