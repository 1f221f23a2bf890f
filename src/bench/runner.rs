use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bench::golden::ScopedQuery;
use crate::bench::model::{BenchmarkResult, BenchmarkStatus};
use crate::bench::scoring::score_result;
use crate::error::NotegrepResult;
use crate::retrieval::{Engine, SearchHit, SearchMode};
use crate::util::millis;

/// The query path a benchmark exercises.
#[async_trait]
pub trait SearchTarget: Send + Sync {
    async fn run_query(
        &self,
        mode: SearchMode,
        text: &str,
        limit: usize,
    ) -> NotegrepResult<Vec<SearchHit>>;
}

#[async_trait]
impl SearchTarget for Engine {
    async fn run_query(
        &self,
        mode: SearchMode,
        text: &str,
        limit: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        self.search(mode, text, limit).await
    }
}

/// Every combination one suite executes.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub suite_id: String,
    pub queries: Vec<ScopedQuery>,
    pub modes: Vec<SearchMode>,
    pub limits: Vec<usize>,
    pub timeout: Duration,
}

impl RunPlan {
    pub fn combinations(&self) -> usize {
        self.queries.len() * self.modes.len() * self.limits.len()
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub results: Vec<BenchmarkResult>,
    pub cancelled: bool,
}

/// Runs one combination under `timeout`. Errors and timeouts become the
/// result's status; nothing is propagated.
pub async fn execute_query(
    target: &dyn SearchTarget,
    suite_id: &str,
    scoped: &ScopedQuery,
    mode: SearchMode,
    limit: usize,
    timeout: Duration,
) -> BenchmarkResult {
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, target.run_query(mode, &scoped.query.query, limit)).await;
    let execution_time_ms = millis(started.elapsed());

    let mut result = BenchmarkResult {
        suite_id: suite_id.to_string(),
        query_id: scoped.query.id.clone(),
        category: scoped.category.clone(),
        query_text: scoped.query.query.clone(),
        search_mode: mode,
        result_limit: limit,
        execution_time_ms,
        result_count: 0,
        results: Vec::new(),
        quality_scores: None,
        expected_vs_actual: None,
        status: BenchmarkStatus::Completed,
        error_message: None,
        timestamp: Utc::now(),
    };

    match outcome {
        Ok(Ok(hits)) => {
            let (scores, comparison) = score_result(&hits, &scoped.query, execution_time_ms);
            result.result_count = hits.len();
            result.results = hits;
            result.quality_scores = Some(scores);
            result.expected_vs_actual = Some(comparison);
        }
        Ok(Err(err)) => {
            warn!(query_id = %scoped.query.id, mode = %mode, error = %err, "benchmark query failed");
            result.status = BenchmarkStatus::Failed;
            result.error_message = Some(err.to_string());
        }
        Err(_) => {
            warn!(
                query_id = %scoped.query.id,
                mode = %mode,
                timeout_ms = timeout.as_millis() as u64,
                "benchmark query timed out"
            );
            result.status = BenchmarkStatus::Timeout;
            result.error_message = Some(format!(
                "query exceeded timeout of {} ms",
                timeout.as_millis()
            ));
        }
    }

    result
}

/// Executes the plan one combination at a time so timings do not contend.
/// `cancel` is checked between combinations.
pub async fn run_plan(
    target: &dyn SearchTarget,
    plan: &RunPlan,
    cancel: &CancellationToken,
) -> RunOutcome {
    info!(
        suite_id = %plan.suite_id,
        queries = plan.queries.len(),
        combinations = plan.combinations(),
        "benchmark run started"
    );

    let mut results = Vec::<BenchmarkResult>::with_capacity(plan.combinations());
    for scoped in &plan.queries {
        for mode in &plan.modes {
            for limit in &plan.limits {
                if cancel.is_cancelled() {
                    info!(suite_id = %plan.suite_id, completed = results.len(), "benchmark run cancelled");
                    return RunOutcome {
                        results,
                        cancelled: true,
                    };
                }
                let result =
                    execute_query(target, &plan.suite_id, scoped, *mode, *limit, plan.timeout).await;
                debug!(
                    query_id = %result.query_id,
                    mode = %result.search_mode,
                    limit = result.result_limit,
                    status = %result.status,
                    elapsed_ms = result.execution_time_ms,
                    "benchmark combination finished"
                );
                results.push(result);
            }
        }
    }

    RunOutcome {
        results,
        cancelled: false,
    }
}
