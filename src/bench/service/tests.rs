use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use super::*;
use crate::bench::golden::parse_golden_queries;
use crate::bench::model::{BenchmarkStatus, RegressionKind};
use crate::db::Database;
use crate::retrieval::SearchHit;

const GOLDEN: &str = r#"{
  "scenarios": [
    { "category": "work", "queries": [
      { "id": "w1", "query": "weekly review", "min_results": 1, "expected_result_types": ["note"] },
      { "id": "w2", "query": "standup notes", "min_results": 1 }
    ] },
    { "category": "tech", "queries": [
      { "id": "t1", "query": "sqlite tuning", "min_results": 1 }
    ] }
  ],
  "benchmarking_config": {
    "search_modes": ["bm25", "hybrid"],
    "result_limits": [5],
    "timeout_ms": 2000
  }
}"#;

struct DelayedTarget {
    delay_ms: AtomicU64,
}

impl DelayedTarget {
    fn new(delay_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            delay_ms: AtomicU64::new(delay_ms),
        })
    }
}

#[async_trait]
impl SearchTarget for DelayedTarget {
    async fn run_query(
        &self,
        _mode: SearchMode,
        text: &str,
        _limit: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(vec![SearchHit {
            item_id: "n1".to_string(),
            chunk_id: "n1#0000".to_string(),
            heading: String::new(),
            preview: text.to_string(),
            score: 1.0,
            relevance: 0.7,
            item_type: Some("note".to_string()),
            sources: Vec::new(),
        }])
    }
}

fn service_with(
    target: Arc<DelayedTarget>,
    golden: &str,
) -> (tempfile::TempDir, Arc<Database>, BenchmarkService) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(Database::open(&dir.path().join("bench.sqlite"), None).expect("open"));
    let store = BenchmarkStore::new(Arc::clone(&db)).expect("store");
    let spec = parse_golden_queries(golden).expect("golden");
    let service = BenchmarkService::new(target, store, spec, RegressionThresholds::default())
        .expect("service");
    (dir, db, service)
}

fn saved(suite_id: &str) -> RunRequest {
    RunRequest {
        suite_id: Some(suite_id.to_string()),
        save_results: true,
        ..RunRequest::default()
    }
}

async fn wait_until_finished(service: &BenchmarkService, suite_id: &str) -> BenchmarkSuite {
    for _ in 0..200 {
        let suite = service
            .get_suite(suite_id)
            .await
            .expect("lookup")
            .expect("suite should be known");
        if suite.status.is_finished() {
            return suite;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("suite {suite_id} did not finish");
}

#[tokio::test]
async fn run_suite_covers_every_combination_and_saves() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    let suite = service.run_suite(saved("s1")).await.expect("run");

    assert_eq!(suite.status, SuiteStatus::Completed);
    assert_eq!(suite.total_queries, 3);
    assert_eq!(suite.total_executions, 6);
    assert_eq!(suite.successful_queries, 3);
    assert_eq!(suite.success_rate, 1.0);
    assert!(suite.baseline_comparison.is_none());
    assert!(suite.persistence_error.is_none());

    let stored = service.get_suite("s1").await.expect("get").expect("stored");
    assert_eq!(stored.results.len(), 6);
    let report = service.generate_report("s1").await.expect("report");
    assert_eq!(report.summary.total_queries, 3);
}

#[tokio::test]
async fn duplicate_suite_id_is_rejected() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    service.run_suite(saved("dup")).await.expect("first run");
    let err = service.run_suite(saved("dup")).await.expect_err("duplicate");
    assert!(matches!(err, NotegrepError::Configuration(_)));
}

#[tokio::test]
async fn concurrent_runs_cannot_share_a_suite_id() {
    let (_dir, db, first) = service_with(DelayedTarget::new(10), GOLDEN);
    let store = BenchmarkStore::new(Arc::clone(&db)).expect("store");
    let small = parse_golden_queries(
        r#"{ "scenarios": [{ "category": "misc", "queries": [{ "id": "m1", "query": "misc" }] }] }"#,
    )
    .expect("golden");
    let second = BenchmarkService::new(
        DelayedTarget::new(10),
        store,
        small,
        RegressionThresholds::default(),
    )
    .expect("service");

    let (a, b, c) = tokio::join!(
        first.run_suite(saved("nightly")),
        second.run_suite(saved("nightly")),
        first.run_suite(saved("nightly")),
    );
    let outcomes = [a, b, c];
    let winners = outcomes
        .iter()
        .filter_map(|outcome| outcome.as_ref().ok())
        .collect::<Vec<_>>();
    assert_eq!(winners.len(), 1);
    assert!(winners[0].persistence_error.is_none());
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|err| matches!(err, NotegrepError::Configuration(_)))
    );

    let stored = first.get_suite("nightly").await.expect("get").expect("stored");
    assert_eq!(stored.total_queries, winners[0].total_queries);
    assert_eq!(stored.results.len(), winners[0].results.len());
}

#[tokio::test]
async fn unsaved_run_rejects_an_id_already_stored() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    service.run_suite(saved("kept")).await.expect("saved run");
    let err = service
        .run_suite(RunRequest {
            suite_id: Some("kept".to_string()),
            ..RunRequest::default()
        })
        .await
        .expect_err("duplicate");
    assert!(matches!(err, NotegrepError::Configuration(_)));
    let stored = service.get_suite("kept").await.expect("get").expect("stored");
    assert_eq!(stored.results.len(), 6);
}

#[tokio::test]
async fn generated_suite_ids_are_unique() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    let first = service.run_suite(RunRequest::default()).await.expect("first");
    let second = service.run_suite(RunRequest::default()).await.expect("second");
    assert!(first.suite_id.starts_with("bench-"));
    assert_ne!(first.suite_id, second.suite_id);
}

#[tokio::test]
async fn request_can_narrow_categories_and_modes() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    let suite = service
        .run_suite(RunRequest {
            categories: Some(vec!["TECH".to_string()]),
            search_modes: Some(vec![SearchMode::Vector]),
            ..RunRequest::default()
        })
        .await
        .expect("run");
    assert_eq!(suite.total_queries, 1);
    assert_eq!(suite.total_executions, 1);
    assert_eq!(suite.results[0].search_mode, SearchMode::Vector);
}

#[tokio::test]
async fn save_failure_keeps_the_in_memory_suite() {
    let (_dir, db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    db.connect()
        .expect("connect")
        .execute_batch("DROP TABLE benchmark_result;")
        .expect("drop");

    let suite = service.run_suite(saved("lost")).await.expect("run still succeeds");
    assert_eq!(suite.total_executions, 6);
    assert!(suite.persistence_error.is_some());

    let status: String = db
        .connect()
        .expect("connect")
        .query_row(
            "SELECT status FROM benchmark_suite WHERE suite_id = 'lost'",
            [],
            |row| row.get(0),
        )
        .expect("reserved row");
    assert_eq!(status, SuiteStatus::Failed.as_str());
}

#[tokio::test]
async fn background_suite_transitions_from_running_to_completed() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(10), GOLDEN);
    let suite_id = service.start_suite(saved("bg")).await.expect("start");
    assert_eq!(suite_id, "bg");

    let finished = wait_until_finished(&service, &suite_id).await;
    assert_eq!(finished.status, SuiteStatus::Completed);
    assert_eq!(finished.total_executions, 6);
    assert!(!service.cancel_suite(&suite_id));

    let History::Suites(entries) = service.get_history(10, None).await.expect("history") else {
        panic!("expected suite history");
    };
    assert_eq!(entries[0].suite_id, "bg");
    assert_eq!(entries[0].status, SuiteStatus::Completed);
}

#[tokio::test]
async fn finished_background_suite_is_evicted_but_still_readable() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    let suite_id = service.start_suite(saved("evict")).await.expect("start");

    for _ in 0..200 {
        if service.runs.lock().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(service.runs.lock().is_empty());

    let stored = service.get_suite(&suite_id).await.expect("get").expect("stored");
    assert_eq!(stored.status, SuiteStatus::Completed);
    assert_eq!(stored.results.len(), 6);
    assert!(service.start_suite(saved("evict")).await.is_err());
}

#[tokio::test]
async fn cancelled_background_suite_keeps_partial_results() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(50), GOLDEN);
    let suite_id = service.start_suite(saved("stop")).await.expect("start");
    assert!(service.cancel_suite(&suite_id));

    let finished = wait_until_finished(&service, &suite_id).await;
    assert_eq!(finished.status, SuiteStatus::Cancelled);
    assert!(finished.total_executions < 6);
    assert!(
        finished
            .results
            .iter()
            .all(|result| result.status == BenchmarkStatus::Completed)
    );
}

#[tokio::test]
async fn slower_run_after_baseline_raises_performance_alerts() {
    let target = DelayedTarget::new(5);
    let (_dir, _db, service) = service_with(Arc::clone(&target), GOLDEN);
    service.run_suite(saved("base")).await.expect("baseline run");
    assert!(service.establish_baseline("base", Some("initial")).await.expect("baseline"));

    target.delay_ms.store(60, Ordering::SeqCst);
    let suite = service.run_suite(saved("slow")).await.expect("slow run");
    let comparison = suite.baseline_comparison.expect("comparison");
    assert_eq!(comparison.compared, 6);
    assert_eq!(comparison.performance_regressions, 6);
    assert!(
        suite
            .regression_alerts
            .iter()
            .all(|alert| alert.kind == RegressionKind::Performance && alert.degradation > 0.2)
    );
}

#[tokio::test]
async fn empty_golden_file_runs_without_queries() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), r#"{"scenarios": []}"#);
    let suite = service.run_suite(saved("empty")).await.expect("run");
    assert_eq!(suite.total_queries, 0);
    assert_eq!(suite.success_rate, 0.0);
    assert!(suite.results.is_empty());
}

#[tokio::test]
async fn report_for_unknown_suite_is_not_found() {
    let (_dir, _db, service) = service_with(DelayedTarget::new(0), GOLDEN);
    let err = service.generate_report("missing").await.expect_err("missing");
    assert!(matches!(err, NotegrepError::NotFound(_)));
    assert!(!service.establish_baseline("missing", None).await.expect("baseline"));
}
