use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::bench::model::{
    Baseline, BenchmarkResult, BenchmarkStatus, BenchmarkSuite, History, QueryHistoryEntry,
    SuiteHistoryEntry, SuiteStatus,
};
use crate::bench::regression::BaselineMap;
use crate::db::Database;
use crate::error::{NotegrepError, NotegrepResult};
use crate::retrieval::SearchMode;

/// Durable suites, results and baselines, kept in the index database.
#[derive(Debug, Clone)]
pub struct BenchmarkStore {
    db: Arc<Database>,
}

impl BenchmarkStore {
    pub fn new(db: Arc<Database>) -> NotegrepResult<Self> {
        let connection = db.connect()?;
        ensure_schema(&connection)?;
        Ok(Self { db })
    }

    pub async fn suite_exists(&self, suite_id: &str) -> NotegrepResult<bool> {
        let suite_id = suite_id.to_string();
        self.db
            .read(move |connection| {
                let count: i64 = connection.query_row(
                    "SELECT COUNT(*) FROM benchmark_suite WHERE suite_id = ?1",
                    [&suite_id],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await
    }

    /// Inserts the `running` row that claims `suite_id`. Returns `false`
    /// without touching the existing row when the id is already taken.
    pub async fn reserve_suite(
        &self,
        suite_id: &str,
        timestamp: DateTime<Utc>,
    ) -> NotegrepResult<bool> {
        let suite_id = suite_id.to_string();
        self.db
            .write(move |connection| {
                let inserted = connection.execute(
                    "INSERT INTO benchmark_suite(suite_id, timestamp, status) VALUES (?1, ?2, ?3)
                     ON CONFLICT(suite_id) DO NOTHING",
                    params![suite_id, timestamp, SuiteStatus::Running.as_str()],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(persistence)
    }

    pub async fn mark_suite_failed(&self, suite_id: &str, message: &str) -> NotegrepResult<()> {
        let suite_id = suite_id.to_string();
        let message = message.to_string();
        self.db
            .write(move |connection| {
                connection.execute(
                    "UPDATE benchmark_suite SET status = ?2, error_message = ?3 WHERE suite_id = ?1",
                    params![suite_id, SuiteStatus::Failed.as_str(), message],
                )?;
                Ok(())
            })
            .await
            .map_err(persistence)
    }

    /// Writes the suite row and replaces its results in one transaction.
    pub async fn save_suite(&self, suite: &BenchmarkSuite) -> NotegrepResult<()> {
        let suite = suite.clone();
        self.db
            .write(move |connection| {
                let tx = connection.transaction()?;
                tx.execute(
                    "INSERT INTO benchmark_suite(
                       suite_id, timestamp, status, total_queries, successful_queries,
                       failed_queries, total_executions, queries_meeting_min_results,
                       success_rate, avg_execution_time, quality_summary_json,
                       category_performance_json, regression_alerts_json,
                       baseline_comparison_json, error_message
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(suite_id) DO UPDATE SET
                       timestamp=excluded.timestamp,
                       status=excluded.status,
                       total_queries=excluded.total_queries,
                       successful_queries=excluded.successful_queries,
                       failed_queries=excluded.failed_queries,
                       total_executions=excluded.total_executions,
                       queries_meeting_min_results=excluded.queries_meeting_min_results,
                       success_rate=excluded.success_rate,
                       avg_execution_time=excluded.avg_execution_time,
                       quality_summary_json=excluded.quality_summary_json,
                       category_performance_json=excluded.category_performance_json,
                       regression_alerts_json=excluded.regression_alerts_json,
                       baseline_comparison_json=excluded.baseline_comparison_json,
                       error_message=excluded.error_message",
                    params![
                        suite.suite_id,
                        suite.timestamp,
                        suite.status.as_str(),
                        suite.total_queries as i64,
                        suite.successful_queries as i64,
                        suite.failed_queries as i64,
                        suite.total_executions as i64,
                        suite.queries_meeting_min_results as i64,
                        suite.success_rate,
                        suite.avg_execution_time_ms,
                        serde_json::to_string(&suite.quality_summary)?,
                        serde_json::to_string(&suite.category_performance)?,
                        serde_json::to_string(&suite.regression_alerts)?,
                        suite
                            .baseline_comparison
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        suite.error_message,
                    ],
                )?;

                tx.execute(
                    "DELETE FROM benchmark_result WHERE suite_id = ?1",
                    [&suite.suite_id],
                )?;
                {
                    let mut insert = tx.prepare(
                        "INSERT INTO benchmark_result(
                           suite_id, query_id, category, query_text, search_mode, result_limit,
                           execution_time, result_count, results_json, quality_scores_json,
                           expected_vs_actual_json, status, error_message, timestamp
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    )?;
                    for result in &suite.results {
                        insert.execute(params![
                            result.suite_id,
                            result.query_id,
                            result.category,
                            result.query_text,
                            result.search_mode.as_str(),
                            result.result_limit as i64,
                            result.execution_time_ms,
                            result.result_count as i64,
                            serde_json::to_string(&result.results)?,
                            result
                                .quality_scores
                                .as_ref()
                                .map(serde_json::to_string)
                                .transpose()?,
                            result
                                .expected_vs_actual
                                .as_ref()
                                .map(serde_json::to_string)
                                .transpose()?,
                            result.status.as_str(),
                            result.error_message,
                            result.timestamp,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(persistence)
    }

    pub async fn get_suite(&self, suite_id: &str) -> NotegrepResult<Option<BenchmarkSuite>> {
        let suite_id = suite_id.to_string();
        self.db
            .read(move |connection| {
                let suite = connection
                    .query_row(
                        &format!("SELECT {SUITE_COLUMNS} FROM benchmark_suite WHERE suite_id = ?1"),
                        [&suite_id],
                        |row| Ok(suite_from_row(row)),
                    )
                    .optional()?
                    .transpose()?;
                let Some(mut suite) = suite else {
                    return Ok(None);
                };
                suite.results = load_results(connection, &suite_id)?;
                Ok(Some(suite))
            })
            .await
    }

    /// Upserts one baseline per `(query_id, mode)` from the suite's completed
    /// results, averaging over result limits. Returns the number of rows written.
    pub async fn establish_baseline(
        &self,
        suite_id: &str,
        notes: Option<&str>,
    ) -> NotegrepResult<usize> {
        let suite_id = suite_id.to_string();
        let notes = notes.map(str::to_string);
        self.db
            .write(move |connection| {
                let suite_timestamp = connection
                    .query_row(
                        "SELECT timestamp FROM benchmark_suite WHERE suite_id = ?1",
                        [&suite_id],
                        |row| row.get::<_, DateTime<Utc>>(0),
                    )
                    .optional()?;
                let Some(established_at) = suite_timestamp else {
                    return Ok(0);
                };

                let results = load_results(connection, &suite_id)?;
                let mut grouped = BTreeMap::<(String, SearchMode), Vec<&BenchmarkResult>>::new();
                for result in results
                    .iter()
                    .filter(|result| result.status == BenchmarkStatus::Completed)
                {
                    grouped
                        .entry((result.query_id.clone(), result.search_mode))
                        .or_default()
                        .push(result);
                }

                let tx = connection.transaction()?;
                for ((query_id, mode), group) in &grouped {
                    let count = group.len() as f64;
                    let time = group.iter().map(|result| result.execution_time_ms).sum::<f64>() / count;
                    let quality = group
                        .iter()
                        .map(|result| result.relevance().unwrap_or(0.0))
                        .sum::<f64>()
                        / count;
                    let result_count =
                        group.iter().map(|result| result.result_count as f64).sum::<f64>() / count;

                    tx.execute(
                        "INSERT INTO benchmark_baseline(
                           query_id, search_mode, baseline_execution_time, baseline_quality_score,
                           baseline_result_count, established_at, notes, source_suite_id
                         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                         ON CONFLICT(query_id, search_mode) DO UPDATE SET
                           baseline_execution_time=excluded.baseline_execution_time,
                           baseline_quality_score=excluded.baseline_quality_score,
                           baseline_result_count=excluded.baseline_result_count,
                           established_at=excluded.established_at,
                           notes=excluded.notes,
                           source_suite_id=excluded.source_suite_id",
                        params![
                            query_id,
                            mode.as_str(),
                            time,
                            quality,
                            result_count,
                            established_at,
                            notes,
                            suite_id,
                        ],
                    )?;
                }
                tx.commit()?;

                info!(suite_id = %suite_id, baselines = grouped.len(), "baseline established");
                Ok(grouped.len())
            })
            .await
            .map_err(persistence)
    }

    pub async fn load_baselines(&self) -> NotegrepResult<BaselineMap> {
        self.db
            .read(|connection| {
                let mut statement = connection.prepare(
                    "SELECT query_id, search_mode, baseline_execution_time, baseline_quality_score,
                            baseline_result_count, established_at, notes, source_suite_id
                     FROM benchmark_baseline",
                )?;
                let mut rows = statement.query([])?;
                let mut out = HashMap::new();
                while let Some(row) = rows.next()? {
                    let baseline = Baseline {
                        query_id: row.get(0)?,
                        search_mode: parse_mode(&row.get::<_, String>(1)?)?,
                        baseline_execution_time_ms: row.get(2)?,
                        baseline_quality_score: row.get(3)?,
                        baseline_result_count: row.get(4)?,
                        established_at: row.get(5)?,
                        notes: row.get(6)?,
                        source_suite_id: row.get(7)?,
                    };
                    out.insert((baseline.query_id.clone(), baseline.search_mode), baseline);
                }
                Ok(out)
            })
            .await
    }

    /// Most recent suites first, or the executions of `query_id` across suites.
    pub async fn get_history(
        &self,
        limit: usize,
        query_id: Option<&str>,
    ) -> NotegrepResult<History> {
        let query_id = query_id.map(str::to_string);
        self.db
            .read(move |connection| match query_id {
                Some(query_id) => query_history(connection, &query_id, limit).map(History::Query),
                None => suite_history(connection, limit).map(History::Suites),
            })
            .await
    }

    /// Deletes all but the `keep` most recent finished suites.
    pub async fn prune_history(&self, keep: usize) -> NotegrepResult<usize> {
        self.db
            .write(move |connection| {
                let tx = connection.transaction()?;
                let doomed = {
                    let mut statement = tx.prepare(
                        "SELECT suite_id FROM benchmark_suite
                         WHERE status != 'running'
                         ORDER BY timestamp DESC, suite_id DESC
                         LIMIT -1 OFFSET ?1",
                    )?;
                    statement
                        .query_map([keep as i64], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<String>, _>>()?
                };
                for suite_id in &doomed {
                    tx.execute("DELETE FROM benchmark_result WHERE suite_id = ?1", [suite_id])?;
                    tx.execute("DELETE FROM benchmark_suite WHERE suite_id = ?1", [suite_id])?;
                }
                tx.commit()?;
                Ok(doomed.len())
            })
            .await
            .map_err(persistence)
    }
}

const SUITE_COLUMNS: &str = "suite_id, timestamp, status, total_queries, successful_queries,
    failed_queries, total_executions, queries_meeting_min_results, success_rate,
    avg_execution_time, quality_summary_json, category_performance_json,
    regression_alerts_json, baseline_comparison_json, error_message";

const RESULT_COLUMNS: &str = "suite_id, query_id, category, query_text, search_mode,
    result_limit, execution_time, result_count, results_json, quality_scores_json,
    expected_vs_actual_json, status, error_message, timestamp";

fn ensure_schema(connection: &Connection) -> NotegrepResult<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS benchmark_suite (
          suite_id TEXT PRIMARY KEY,
          timestamp TEXT NOT NULL,
          status TEXT NOT NULL,
          total_queries INTEGER NOT NULL DEFAULT 0,
          successful_queries INTEGER NOT NULL DEFAULT 0,
          failed_queries INTEGER NOT NULL DEFAULT 0,
          total_executions INTEGER NOT NULL DEFAULT 0,
          queries_meeting_min_results INTEGER NOT NULL DEFAULT 0,
          success_rate REAL NOT NULL DEFAULT 0,
          avg_execution_time REAL NOT NULL DEFAULT 0,
          quality_summary_json TEXT NOT NULL DEFAULT '{}',
          category_performance_json TEXT NOT NULL DEFAULT '[]',
          regression_alerts_json TEXT NOT NULL DEFAULT '[]',
          baseline_comparison_json TEXT,
          error_message TEXT
        );

        CREATE TABLE IF NOT EXISTS benchmark_result (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          suite_id TEXT NOT NULL,
          query_id TEXT NOT NULL,
          category TEXT NOT NULL DEFAULT '',
          query_text TEXT NOT NULL,
          search_mode TEXT NOT NULL,
          result_limit INTEGER NOT NULL,
          execution_time REAL NOT NULL,
          result_count INTEGER NOT NULL,
          results_json TEXT NOT NULL,
          quality_scores_json TEXT,
          expected_vs_actual_json TEXT,
          status TEXT NOT NULL,
          error_message TEXT,
          timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_benchmark_result_suite ON benchmark_result(suite_id);
        CREATE INDEX IF NOT EXISTS idx_benchmark_result_query
          ON benchmark_result(query_id, timestamp);

        CREATE TABLE IF NOT EXISTS benchmark_baseline (
          query_id TEXT NOT NULL,
          search_mode TEXT NOT NULL,
          baseline_execution_time REAL NOT NULL,
          baseline_quality_score REAL NOT NULL,
          baseline_result_count REAL NOT NULL,
          established_at TEXT NOT NULL,
          notes TEXT,
          source_suite_id TEXT NOT NULL,
          PRIMARY KEY (query_id, search_mode)
        );
        ",
    )?;
    Ok(())
}

fn suite_from_row(row: &Row<'_>) -> NotegrepResult<BenchmarkSuite> {
    Ok(BenchmarkSuite {
        suite_id: row.get(0)?,
        timestamp: row.get(1)?,
        status: parse_suite_status(&row.get::<_, String>(2)?)?,
        total_queries: row.get::<_, i64>(3)? as usize,
        successful_queries: row.get::<_, i64>(4)? as usize,
        failed_queries: row.get::<_, i64>(5)? as usize,
        total_executions: row.get::<_, i64>(6)? as usize,
        queries_meeting_min_results: row.get::<_, i64>(7)? as usize,
        success_rate: row.get(8)?,
        avg_execution_time_ms: row.get(9)?,
        quality_summary: from_json(&row.get::<_, String>(10)?)?,
        category_performance: from_json(&row.get::<_, String>(11)?)?,
        regression_alerts: from_json(&row.get::<_, String>(12)?)?,
        baseline_comparison: row
            .get::<_, Option<String>>(13)?
            .map(|raw| from_json(&raw))
            .transpose()?,
        error_message: row.get(14)?,
        persistence_error: None,
        results: Vec::new(),
    })
}

fn result_from_row(row: &Row<'_>) -> NotegrepResult<BenchmarkResult> {
    Ok(BenchmarkResult {
        suite_id: row.get(0)?,
        query_id: row.get(1)?,
        category: row.get(2)?,
        query_text: row.get(3)?,
        search_mode: parse_mode(&row.get::<_, String>(4)?)?,
        result_limit: row.get::<_, i64>(5)? as usize,
        execution_time_ms: row.get(6)?,
        result_count: row.get::<_, i64>(7)? as usize,
        results: from_json(&row.get::<_, String>(8)?)?,
        quality_scores: row
            .get::<_, Option<String>>(9)?
            .map(|raw| from_json(&raw))
            .transpose()?,
        expected_vs_actual: row
            .get::<_, Option<String>>(10)?
            .map(|raw| from_json(&raw))
            .transpose()?,
        status: parse_result_status(&row.get::<_, String>(11)?)?,
        error_message: row.get(12)?,
        timestamp: row.get(13)?,
    })
}

fn load_results(connection: &Connection, suite_id: &str) -> NotegrepResult<Vec<BenchmarkResult>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM benchmark_result WHERE suite_id = ?1 ORDER BY id"
    ))?;
    let mut rows = statement.query([suite_id])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(result_from_row(row)?);
    }
    Ok(out)
}

fn suite_history(connection: &Connection, limit: usize) -> NotegrepResult<Vec<SuiteHistoryEntry>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {SUITE_COLUMNS} FROM benchmark_suite
         ORDER BY timestamp DESC, suite_id DESC
         LIMIT ?1"
    ))?;
    let mut rows = statement.query([limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let suite = suite_from_row(row)?;
        out.push(SuiteHistoryEntry {
            avg_relevance: suite.quality_summary.relevance.mean,
            regression_alerts: suite.regression_alerts.len(),
            suite_id: suite.suite_id,
            timestamp: suite.timestamp,
            status: suite.status,
            total_queries: suite.total_queries,
            successful_queries: suite.successful_queries,
            success_rate: suite.success_rate,
            avg_execution_time_ms: suite.avg_execution_time_ms,
        });
    }
    Ok(out)
}

fn query_history(
    connection: &Connection,
    query_id: &str,
    limit: usize,
) -> NotegrepResult<Vec<QueryHistoryEntry>> {
    let mut statement = connection.prepare(&format!(
        "SELECT {RESULT_COLUMNS} FROM benchmark_result
         WHERE query_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2"
    ))?;
    let mut rows = statement.query(params![query_id, limit as i64])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let result = result_from_row(row)?;
        out.push(QueryHistoryEntry {
            relevance: result.relevance(),
            suite_id: result.suite_id,
            query_id: result.query_id,
            search_mode: result.search_mode,
            result_limit: result.result_limit,
            execution_time_ms: result.execution_time_ms,
            result_count: result.result_count,
            status: result.status,
            timestamp: result.timestamp,
        });
    }
    Ok(out)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> NotegrepResult<T> {
    Ok(serde_json::from_str(raw)?)
}

fn parse_mode(raw: &str) -> NotegrepResult<SearchMode> {
    raw.parse::<SearchMode>()
        .map_err(|_| NotegrepError::Persistence(format!("unknown search mode '{raw}' in store")))
}

fn parse_suite_status(raw: &str) -> NotegrepResult<SuiteStatus> {
    SuiteStatus::parse(raw)
        .ok_or_else(|| NotegrepError::Persistence(format!("unknown suite status '{raw}'")))
}

fn parse_result_status(raw: &str) -> NotegrepResult<BenchmarkStatus> {
    BenchmarkStatus::parse(raw)
        .ok_or_else(|| NotegrepError::Persistence(format!("unknown result status '{raw}'")))
}

fn persistence(err: NotegrepError) -> NotegrepError {
    match err {
        NotegrepError::Persistence(_) => err,
        other => NotegrepError::Persistence(other.to_string()),
    }
}

#[cfg(test)]
mod tests;
