use std::collections::{BTreeMap, BTreeSet};

use crate::bench::golden::{GoldenQuery, ScopedQuery};
use crate::bench::model::{
    BenchmarkResult, BenchmarkStatus, CategoryPerformance, ExpectedVsActual, MetricSummary,
    QualityScores, QualitySummary,
};
use crate::retrieval::SearchHit;

/// Suite-level figures derived from one run's results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuiteTotals {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub total_executions: usize,
    pub queries_meeting_min_results: usize,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub quality_summary: QualitySummary,
    pub category_performance: Vec<CategoryPerformance>,
}

pub fn score_result(
    hits: &[SearchHit],
    query: &GoldenQuery,
    execution_time_ms: f64,
) -> (QualityScores, ExpectedVsActual) {
    let result_count = hits.len();
    let relevance = mean(&hits.iter().map(|hit| hit.relevance).collect::<Vec<f64>>());

    let actual_types = hits
        .iter()
        .filter_map(|hit| hit.item_type.as_deref())
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect::<BTreeSet<String>>();
    let expected_types = query
        .expected_result_types
        .iter()
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .collect::<BTreeSet<String>>();

    let intent_accuracy = if expected_types.is_empty() {
        1.0
    } else {
        expected_types.intersection(&actual_types).count() as f64 / expected_types.len() as f64
    };

    let recall = (query.min_results > 0)
        .then(|| (result_count as f64 / query.min_results as f64).min(1.0));

    let precision = if hits.is_empty() {
        0.0
    } else {
        hits.iter()
            .filter(|hit| hit.relevance >= query.quality_threshold)
            .count() as f64
            / result_count as f64
    };

    let scores = QualityScores {
        relevance,
        result_count,
        search_time_ms: execution_time_ms,
        diversity: actual_types.len(),
        intent_accuracy,
        recall,
        precision,
    };

    let meets_performance_target = query
        .performance_target
        .map(|target| execution_time_ms <= target);
    let comparison = ExpectedVsActual {
        expected_result_types: expected_types.into_iter().collect(),
        actual_result_types: actual_types.into_iter().collect(),
        min_results: query.min_results,
        actual_results: result_count,
        meets_min_results: result_count >= query.min_results,
        quality_threshold: query.quality_threshold,
        meets_quality_threshold: relevance >= query.quality_threshold,
        performance_target_ms: query.performance_target,
        meets_performance_target,
    };

    (scores, comparison)
}

/// Zero in-scope queries give a success rate of `0.0`.
pub fn success_rate(successful: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (successful as f64 / total as f64).clamp(0.0, 1.0)
    }
}

pub fn metric_summary(values: &[f64]) -> MetricSummary {
    if values.is_empty() {
        return MetricSummary::default();
    }
    let avg = mean(values);
    let variance = values
        .iter()
        .map(|value| (value - avg) * (value - avg))
        .sum::<f64>()
        / values.len() as f64;

    MetricSummary {
        samples: values.len(),
        mean: avg,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std_dev: variance.sqrt(),
    }
}

pub fn summarize_quality(results: &[BenchmarkResult]) -> QualitySummary {
    let scores = results
        .iter()
        .filter(|result| result.status == BenchmarkStatus::Completed)
        .filter_map(|result| result.quality_scores.as_ref())
        .collect::<Vec<&QualityScores>>();
    let collect = |metric: fn(&QualityScores) -> Option<f64>| {
        metric_summary(&scores.iter().filter_map(|score| metric(score)).collect::<Vec<f64>>())
    };

    QualitySummary {
        relevance: collect(|score| Some(score.relevance)),
        result_count: collect(|score| Some(score.result_count as f64)),
        search_time_ms: collect(|score| Some(score.search_time_ms)),
        diversity: collect(|score| Some(score.diversity as f64)),
        intent_accuracy: collect(|score| Some(score.intent_accuracy)),
        recall: collect(|score| score.recall),
        precision: collect(|score| Some(score.precision)),
    }
}

/// Aggregates one run.
///
/// A query counts as successful when every one of its executions completed;
/// meeting `min_results` is tracked separately in
/// `queries_meeting_min_results`.
pub fn summarize_suite(scoped: &[ScopedQuery], results: &[BenchmarkResult]) -> SuiteTotals {
    let mut by_query = BTreeMap::<&str, Vec<&BenchmarkResult>>::new();
    for result in results {
        by_query.entry(result.query_id.as_str()).or_default().push(result);
    }

    let query_ids = scoped
        .iter()
        .map(|entry| entry.query.id.as_str())
        .collect::<BTreeSet<&str>>();
    let total_queries = query_ids.len();

    let mut successful_queries = 0usize;
    let mut queries_meeting_min_results = 0usize;
    for query_id in &query_ids {
        let Some(executions) = by_query.get(query_id) else {
            continue;
        };
        if !executions.is_empty()
            && executions
                .iter()
                .all(|result| result.status == BenchmarkStatus::Completed)
        {
            successful_queries += 1;
        }
        if !executions.is_empty()
            && executions.iter().all(|result| {
                result
                    .expected_vs_actual
                    .as_ref()
                    .is_some_and(|comparison| comparison.meets_min_results)
            })
        {
            queries_meeting_min_results += 1;
        }
    }

    let completed_times = results
        .iter()
        .filter(|result| result.status == BenchmarkStatus::Completed)
        .map(|result| result.execution_time_ms)
        .collect::<Vec<f64>>();

    SuiteTotals {
        total_queries,
        successful_queries,
        failed_queries: total_queries - successful_queries,
        total_executions: results.len(),
        queries_meeting_min_results,
        success_rate: success_rate(successful_queries, total_queries),
        avg_execution_time_ms: mean(&completed_times),
        quality_summary: summarize_quality(results),
        category_performance: category_performance(scoped, results),
    }
}

pub fn category_performance(
    scoped: &[ScopedQuery],
    results: &[BenchmarkResult],
) -> Vec<CategoryPerformance> {
    let mut categories = BTreeMap::<String, CategoryPerformance>::new();
    for entry in scoped {
        let category = categories
            .entry(entry.category.clone())
            .or_insert_with(|| CategoryPerformance {
                category: entry.category.clone(),
                ..CategoryPerformance::default()
            });
        category.queries += 1;
    }

    let mut times = BTreeMap::<String, Vec<f64>>::new();
    let mut relevances = BTreeMap::<String, Vec<f64>>::new();
    for result in results {
        let category = categories
            .entry(result.category.clone())
            .or_insert_with(|| CategoryPerformance {
                category: result.category.clone(),
                ..CategoryPerformance::default()
            });
        category.executions += 1;
        match result.status {
            BenchmarkStatus::Completed => {
                category.completed += 1;
                times
                    .entry(result.category.clone())
                    .or_default()
                    .push(result.execution_time_ms);
                if let Some(relevance) = result.relevance() {
                    relevances
                        .entry(result.category.clone())
                        .or_default()
                        .push(relevance);
                }
            }
            BenchmarkStatus::Failed => category.failed += 1,
            BenchmarkStatus::Timeout => category.timed_out += 1,
        }
    }

    categories
        .into_values()
        .map(|mut category| {
            category.avg_execution_time_ms =
                times.get(&category.category).map(|values| mean(values)).unwrap_or(0.0);
            category.avg_relevance = relevances
                .get(&category.category)
                .map(|values| mean(values))
                .unwrap_or(0.0);
            category.success_rate = success_rate(category.completed, category.executions);
            category
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
