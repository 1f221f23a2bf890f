use std::collections::HashMap;

use tracing::warn;

use crate::bench::model::{
    Baseline, BaselineComparison, BenchmarkResult, BenchmarkStatus, RegressionAlert,
    RegressionKind,
};
use crate::config::RegressionThresholds;
use crate::retrieval::SearchMode;

pub type BaselineMap = HashMap<(String, SearchMode), Baseline>;

/// Relative slowdown when `current_ms > baseline_ms * (1 + threshold)`.
pub fn performance_degradation(baseline_ms: f64, current_ms: f64, threshold: f64) -> Option<f64> {
    if baseline_ms <= 0.0 || !current_ms.is_finite() {
        return None;
    }
    (current_ms > baseline_ms * (1.0 + threshold)).then(|| (current_ms - baseline_ms) / baseline_ms)
}

/// Relative quality drop when `current < baseline * (1 - threshold)`.
pub fn quality_degradation(baseline: f64, current: f64, threshold: f64) -> Option<f64> {
    if baseline <= 0.0 || !current.is_finite() {
        return None;
    }
    (current < baseline * (1.0 - threshold)).then(|| (baseline - current) / baseline)
}

/// Compares completed results with their `(query_id, mode)` baselines.
///
/// Results without a baseline are counted and otherwise ignored; failed and
/// timed-out results are never compared.
pub fn detect_regressions(
    results: &[BenchmarkResult],
    baselines: &BaselineMap,
    thresholds: &RegressionThresholds,
) -> (Vec<RegressionAlert>, BaselineComparison) {
    let mut alerts = Vec::<RegressionAlert>::new();
    let mut comparison = BaselineComparison::default();
    let mut time_changes = Vec::<f64>::new();
    let mut quality_changes = Vec::<f64>::new();

    for result in results
        .iter()
        .filter(|result| result.status == BenchmarkStatus::Completed)
    {
        let Some(baseline) = baselines.get(&(result.query_id.clone(), result.search_mode)) else {
            comparison.without_baseline += 1;
            continue;
        };
        comparison.compared += 1;

        if baseline.baseline_execution_time_ms > 0.0 {
            time_changes.push(
                (result.execution_time_ms - baseline.baseline_execution_time_ms)
                    / baseline.baseline_execution_time_ms,
            );
        }
        if let Some(degradation) = performance_degradation(
            baseline.baseline_execution_time_ms,
            result.execution_time_ms,
            thresholds.performance_degradation,
        ) {
            comparison.performance_regressions += 1;
            alerts.push(alert(
                result,
                RegressionKind::Performance,
                baseline.baseline_execution_time_ms,
                result.execution_time_ms,
                degradation,
                thresholds.performance_degradation,
            ));
        }

        let current_quality = result.relevance().unwrap_or(0.0);
        if baseline.baseline_quality_score > 0.0 {
            quality_changes.push(
                (current_quality - baseline.baseline_quality_score)
                    / baseline.baseline_quality_score,
            );
        }
        if let Some(degradation) = quality_degradation(
            baseline.baseline_quality_score,
            current_quality,
            thresholds.quality_degradation,
        ) {
            comparison.quality_regressions += 1;
            alerts.push(alert(
                result,
                RegressionKind::Quality,
                baseline.baseline_quality_score,
                current_quality,
                degradation,
                thresholds.quality_degradation,
            ));
        }
    }

    comparison.avg_time_change = average(&time_changes);
    comparison.avg_quality_change = average(&quality_changes);

    for alert in &alerts {
        warn!(
            query_id = %alert.query_id,
            mode = %alert.search_mode,
            kind = ?alert.kind,
            baseline = alert.baseline_value,
            current = alert.current_value,
            degradation = alert.degradation,
            "regression detected"
        );
    }

    (alerts, comparison)
}

fn alert(
    result: &BenchmarkResult,
    kind: RegressionKind,
    baseline_value: f64,
    current_value: f64,
    degradation: f64,
    threshold: f64,
) -> RegressionAlert {
    RegressionAlert {
        query_id: result.query_id.clone(),
        search_mode: result.search_mode,
        result_limit: result.result_limit,
        kind,
        baseline_value,
        current_value,
        degradation,
        threshold,
    }
}

fn average(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}
