use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::bench::golden::GoldenQuerySpec;
use crate::bench::model::{BenchmarkSuite, History, SuiteStatus};
use crate::bench::regression::detect_regressions;
use crate::bench::report::{BenchmarkReport, generate_report};
use crate::bench::runner::{RunPlan, SearchTarget, run_plan};
use crate::bench::scoring::summarize_suite;
use crate::bench::store::BenchmarkStore;
use crate::config::{RegressionThresholds, validate_thresholds};
use crate::error::{NotegrepError, NotegrepResult};
use crate::retrieval::{Engine, SearchMode};
use crate::util::utc_compact_string;

/// Options for one suite run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub suite_id: Option<String>,
    /// Restricts the run to these categories; `None` runs all of them.
    pub categories: Option<Vec<String>>,
    /// Overrides the modes listed in the golden file.
    pub search_modes: Option<Vec<SearchMode>>,
    pub save_results: bool,
}

struct RunHandle {
    timestamp: DateTime<Utc>,
    status: SuiteStatus,
    cancel: CancellationToken,
    suite: Option<BenchmarkSuite>,
}

/// Runs golden-query suites against a search target and keeps their history.
#[derive(Clone)]
pub struct BenchmarkService {
    target: Arc<dyn SearchTarget>,
    store: BenchmarkStore,
    spec: Arc<GoldenQuerySpec>,
    thresholds: RegressionThresholds,
    runs: Arc<Mutex<HashMap<String, RunHandle>>>,
}

impl fmt::Debug for BenchmarkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchmarkService")
            .field("scenarios", &self.spec.scenarios.len())
            .field("thresholds", &self.thresholds)
            .field("active_runs", &self.runs.lock().len())
            .finish_non_exhaustive()
    }
}

impl BenchmarkService {
    /// Thresholds in the golden file take precedence over `default_thresholds`.
    pub fn new(
        target: Arc<dyn SearchTarget>,
        store: BenchmarkStore,
        spec: GoldenQuerySpec,
        default_thresholds: RegressionThresholds,
    ) -> NotegrepResult<Self> {
        let thresholds = spec
            .benchmarking_config
            .regression_thresholds
            .unwrap_or(default_thresholds);
        validate_thresholds(&thresholds)?;

        Ok(Self {
            target,
            store,
            spec: Arc::new(spec),
            thresholds,
            runs: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn for_engine(engine: &Engine, spec: GoldenQuerySpec) -> NotegrepResult<Self> {
        let store = BenchmarkStore::new(engine.database())?;
        let thresholds = engine.config().regression_thresholds;
        Self::new(Arc::new(engine.clone()), store, spec, thresholds)
    }

    pub fn thresholds(&self) -> RegressionThresholds {
        self.thresholds
    }

    /// Runs a suite to completion. Per-query failures are recorded in the
    /// suite; a failed save is reported in `persistence_error` and the suite
    /// is still returned.
    pub async fn run_suite(&self, request: RunRequest) -> NotegrepResult<BenchmarkSuite> {
        let timestamp = Utc::now();
        let (suite_id, cancel) = self
            .claim_suite_id(request.suite_id.as_deref(), timestamp, request.save_results)
            .await?;
        let mut suite = self.execute(&suite_id, timestamp, &request, &cancel).await;

        if request.save_results {
            self.persist(&mut suite).await;
        }
        self.release(&suite_id);
        Ok(suite)
    }

    /// Starts a suite in the background and returns its id immediately.
    /// Background runs are always saved.
    pub async fn start_suite(&self, request: RunRequest) -> NotegrepResult<String> {
        let timestamp = Utc::now();
        let (suite_id, cancel) = self
            .claim_suite_id(request.suite_id.as_deref(), timestamp, true)
            .await?;

        let service = self.clone();
        let task_suite_id = suite_id.clone();
        tokio::spawn(async move {
            let runner = service.clone();
            let run_id = task_suite_id.clone();
            let execution = tokio::spawn(async move {
                runner.execute(&run_id, timestamp, &request, &cancel).await
            });

            match execution.await {
                Ok(mut suite) => {
                    service.persist(&mut suite).await;
                    if suite.persistence_error.is_none() {
                        service.release(&task_suite_id);
                    } else {
                        service.finish(&task_suite_id, suite.status, Some(suite));
                    }
                }
                Err(err) => {
                    error!(suite_id = %task_suite_id, error = %err, "benchmark task aborted");
                    match service
                        .store
                        .mark_suite_failed(&task_suite_id, &err.to_string())
                        .await
                    {
                        Ok(()) => service.release(&task_suite_id),
                        Err(store_err) => {
                            warn!(suite_id = %task_suite_id, error = %store_err, "failed to record suite failure");
                            service.finish(&task_suite_id, SuiteStatus::Failed, None);
                        }
                    }
                }
            }
        });

        Ok(suite_id)
    }

    /// Looks up a suite, running or finished, in memory first and then in
    /// the store.
    pub async fn get_suite(&self, suite_id: &str) -> NotegrepResult<Option<BenchmarkSuite>> {
        let in_memory = self.runs.lock().get(suite_id).map(|handle| {
            handle.suite.clone().unwrap_or_else(|| {
                let mut pending = BenchmarkSuite::pending(suite_id, handle.timestamp);
                pending.status = handle.status;
                pending
            })
        });
        match in_memory {
            Some(suite) => Ok(Some(suite)),
            None => self.store.get_suite(suite_id).await,
        }
    }

    /// Requests cooperative cancellation; returns `false` when the suite is
    /// not running in this process.
    pub fn cancel_suite(&self, suite_id: &str) -> bool {
        match self.runs.lock().get(suite_id) {
            Some(handle) if handle.status == SuiteStatus::Running => {
                handle.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Returns `true` when at least one baseline row was written.
    pub async fn establish_baseline(
        &self,
        suite_id: &str,
        notes: Option<&str>,
    ) -> NotegrepResult<bool> {
        Ok(self.store.establish_baseline(suite_id, notes).await? > 0)
    }

    pub async fn get_history(
        &self,
        limit: usize,
        query_id: Option<&str>,
    ) -> NotegrepResult<History> {
        self.store.get_history(limit, query_id).await
    }

    pub async fn generate_report(&self, suite_id: &str) -> NotegrepResult<BenchmarkReport> {
        let suite = self
            .get_suite(suite_id)
            .await?
            .ok_or_else(|| NotegrepError::NotFound(format!("benchmark suite '{suite_id}'")))?;
        Ok(generate_report(&suite))
    }

    pub async fn prune_history(&self, keep: usize) -> NotegrepResult<usize> {
        self.store.prune_history(keep).await
    }

    /// Reserves the suite id in this process and, for saved runs, in the
    /// store. Both reservations are check-and-insert, so two runs can never
    /// share an id.
    async fn claim_suite_id(
        &self,
        requested: Option<&str>,
        timestamp: DateTime<Utc>,
        save_results: bool,
    ) -> NotegrepResult<(String, CancellationToken)> {
        let suite_id = match requested.map(str::trim).filter(|value| !value.is_empty()) {
            Some(value) => value.to_string(),
            None => {
                let suffix = Uuid::new_v4().simple().to_string();
                format!("bench-{}-{}", utc_compact_string(Utc::now()), &suffix[..8])
            }
        };

        let cancel = CancellationToken::new();
        {
            let mut runs = self.runs.lock();
            if runs.contains_key(&suite_id) {
                return Err(duplicate_suite(&suite_id));
            }
            runs.insert(
                suite_id.clone(),
                RunHandle {
                    timestamp,
                    status: SuiteStatus::Running,
                    cancel: cancel.clone(),
                    suite: None,
                },
            );
        }

        let reserved = if save_results {
            self.store.reserve_suite(&suite_id, timestamp).await
        } else {
            self.store.suite_exists(&suite_id).await.map(|exists| !exists)
        };
        match reserved {
            Ok(true) => Ok((suite_id, cancel)),
            Ok(false) => {
                self.release(&suite_id);
                Err(duplicate_suite(&suite_id))
            }
            Err(err) => {
                self.release(&suite_id);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        suite_id: &str,
        timestamp: DateTime<Utc>,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> BenchmarkSuite {
        let config = &self.spec.benchmarking_config;
        let modes = request
            .search_modes
            .clone()
            .filter(|modes| !modes.is_empty())
            .unwrap_or_else(|| config.search_modes.clone());
        let plan = RunPlan {
            suite_id: suite_id.to_string(),
            queries: self.spec.queries_in_scope(request.categories.as_deref()),
            modes,
            limits: config.result_limits.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        };
        if plan.queries.is_empty() {
            warn!(suite_id, "no golden queries in scope");
        }

        let outcome = run_plan(self.target.as_ref(), &plan, cancel).await;
        let totals = summarize_suite(&plan.queries, &outcome.results);

        let baselines = match self.store.load_baselines().await {
            Ok(baselines) => baselines,
            Err(err) => {
                warn!(suite_id, error = %err, "failed to load baselines; skipping regression checks");
                HashMap::new()
            }
        };
        let (regression_alerts, comparison) =
            detect_regressions(&outcome.results, &baselines, &self.thresholds);

        let status = if outcome.cancelled {
            SuiteStatus::Cancelled
        } else {
            SuiteStatus::Completed
        };
        info!(
            suite_id,
            status = %status,
            total_queries = totals.total_queries,
            successful_queries = totals.successful_queries,
            executions = totals.total_executions,
            alerts = regression_alerts.len(),
            "benchmark run finished"
        );

        BenchmarkSuite {
            suite_id: suite_id.to_string(),
            timestamp,
            status,
            total_queries: totals.total_queries,
            successful_queries: totals.successful_queries,
            failed_queries: totals.failed_queries,
            total_executions: totals.total_executions,
            queries_meeting_min_results: totals.queries_meeting_min_results,
            success_rate: totals.success_rate,
            avg_execution_time_ms: totals.avg_execution_time_ms,
            quality_summary: totals.quality_summary,
            category_performance: totals.category_performance,
            regression_alerts,
            baseline_comparison: (!baselines.is_empty()).then_some(comparison),
            error_message: None,
            persistence_error: None,
            results: outcome.results,
        }
    }

    async fn persist(&self, suite: &mut BenchmarkSuite) {
        let Err(err) = self.store.save_suite(suite).await else {
            return;
        };
        warn!(suite_id = %suite.suite_id, error = %err, "failed to save benchmark suite");
        let message = err.to_string();
        if let Err(mark_err) = self.store.mark_suite_failed(&suite.suite_id, &message).await {
            warn!(suite_id = %suite.suite_id, error = %mark_err, "failed to record suite failure");
        }
        suite.persistence_error = Some(message);
    }

    /// Keeps an unsaved outcome in memory so `get_suite` can still serve it.
    fn finish(&self, suite_id: &str, status: SuiteStatus, suite: Option<BenchmarkSuite>) {
        if let Some(handle) = self.runs.lock().get_mut(suite_id) {
            handle.status = status;
            handle.suite = suite;
        }
    }

    /// Drops the in-memory handle once the store holds the outcome.
    fn release(&self, suite_id: &str) {
        self.runs.lock().remove(suite_id);
    }
}

fn duplicate_suite(suite_id: &str) -> NotegrepError {
    NotegrepError::Configuration(format!("benchmark suite '{suite_id}' already exists"))
}

#[cfg(test)]
mod tests;
