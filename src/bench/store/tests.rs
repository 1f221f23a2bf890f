use chrono::{Duration as ChronoDuration, TimeZone};

use super::*;
use crate::bench::model::QualityScores;

fn open_store() -> (tempfile::TempDir, BenchmarkStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = Database::open(&dir.path().join("bench.sqlite"), None).expect("open db");
    let store = BenchmarkStore::new(Arc::new(db)).expect("store");
    (dir, store)
}

fn at(offset_minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("timestamp")
        + ChronoDuration::minutes(offset_minutes)
}

fn result(
    suite_id: &str,
    query_id: &str,
    mode: SearchMode,
    limit: usize,
    time: f64,
    relevance: f64,
    status: BenchmarkStatus,
    timestamp: DateTime<Utc>,
) -> BenchmarkResult {
    let completed = status == BenchmarkStatus::Completed;
    BenchmarkResult {
        suite_id: suite_id.to_string(),
        query_id: query_id.to_string(),
        category: "work".to_string(),
        query_text: format!("text for {query_id}"),
        search_mode: mode,
        result_limit: limit,
        execution_time_ms: time,
        result_count: if completed { 2 } else { 0 },
        results: Vec::new(),
        quality_scores: completed.then(|| QualityScores {
            relevance,
            result_count: 2,
            ..QualityScores::default()
        }),
        expected_vs_actual: None,
        status,
        error_message: (!completed).then(|| "boom".to_string()),
        timestamp,
    }
}

fn suite(suite_id: &str, timestamp: DateTime<Utc>, results: Vec<BenchmarkResult>) -> BenchmarkSuite {
    let mut suite = BenchmarkSuite::pending(suite_id, timestamp);
    suite.status = SuiteStatus::Completed;
    suite.total_queries = 1;
    suite.successful_queries = 1;
    suite.total_executions = results.len();
    suite.success_rate = 1.0;
    suite.results = results;
    suite
}

#[tokio::test]
async fn saved_suite_round_trips_with_results() {
    let (_dir, store) = open_store();
    let saved = suite(
        "s1",
        at(0),
        vec![
            result("s1", "q1", SearchMode::Bm25, 5, 10.0, 0.6, BenchmarkStatus::Completed, at(0)),
            result("s1", "q1", SearchMode::Hybrid, 5, 30.0, 0.0, BenchmarkStatus::Timeout, at(0)),
        ],
    );
    store.save_suite(&saved).await.expect("save");

    assert!(store.suite_exists("s1").await.expect("exists"));
    assert!(!store.suite_exists("s2").await.expect("exists"));
    let loaded = store.get_suite("s1").await.expect("get").expect("present");
    assert_eq!(loaded, saved);
}

#[tokio::test]
async fn saving_again_replaces_results() {
    let (_dir, store) = open_store();
    let mut saved = suite(
        "s1",
        at(0),
        vec![result("s1", "q1", SearchMode::Bm25, 5, 10.0, 0.6, BenchmarkStatus::Completed, at(0))],
    );
    store.save_suite(&saved).await.expect("first save");
    saved.results.clear();
    store.save_suite(&saved).await.expect("second save");

    let loaded = store.get_suite("s1").await.expect("get").expect("present");
    assert!(loaded.results.is_empty());
}

#[tokio::test]
async fn running_suite_row_loads_with_defaults() {
    let (_dir, store) = open_store();
    assert!(store.reserve_suite("bg", at(0)).await.expect("reserve"));
    assert!(!store.reserve_suite("bg", at(5)).await.expect("second reserve"));
    let loaded = store.get_suite("bg").await.expect("get").expect("present");
    assert_eq!(loaded.status, SuiteStatus::Running);
    assert_eq!(loaded.timestamp, at(0));
    assert_eq!(loaded.total_queries, 0);

    store.mark_suite_failed("bg", "engine went away").await.expect("fail");
    let loaded = store.get_suite("bg").await.expect("get").expect("present");
    assert_eq!(loaded.status, SuiteStatus::Failed);
    assert_eq!(loaded.error_message.as_deref(), Some("engine went away"));
}

#[tokio::test]
async fn baseline_averages_completed_results_and_is_idempotent() {
    let (_dir, store) = open_store();
    store
        .save_suite(&suite(
            "base",
            at(0),
            vec![
                result("base", "q1", SearchMode::Bm25, 5, 10.0, 0.4, BenchmarkStatus::Completed, at(0)),
                result("base", "q1", SearchMode::Bm25, 10, 30.0, 0.8, BenchmarkStatus::Completed, at(0)),
                result("base", "q1", SearchMode::Bm25, 20, 900.0, 0.0, BenchmarkStatus::Timeout, at(0)),
                result("base", "q2", SearchMode::Hybrid, 5, 7.0, 0.5, BenchmarkStatus::Completed, at(0)),
            ],
        ))
        .await
        .expect("save");

    assert_eq!(store.establish_baseline("base", Some("first")).await.expect("baseline"), 2);
    let first = store.load_baselines().await.expect("load");
    assert_eq!(store.establish_baseline("base", Some("first")).await.expect("again"), 2);
    let second = store.load_baselines().await.expect("load");
    assert_eq!(first, second);

    let q1 = &first[&("q1".to_string(), SearchMode::Bm25)];
    assert!((q1.baseline_execution_time_ms - 20.0).abs() < 1e-9);
    assert!((q1.baseline_quality_score - 0.6).abs() < 1e-9);
    assert_eq!(q1.baseline_result_count, 2.0);
    assert_eq!(q1.established_at, at(0));
    assert_eq!(q1.source_suite_id, "base");
}

#[tokio::test]
async fn baseline_for_unknown_suite_writes_nothing() {
    let (_dir, store) = open_store();
    assert_eq!(store.establish_baseline("nope", None).await.expect("baseline"), 0);
    assert!(store.load_baselines().await.expect("load").is_empty());
}

#[tokio::test]
async fn history_lists_recent_suites_and_query_executions() {
    let (_dir, store) = open_store();
    for (index, suite_id) in ["s1", "s2", "s3"].iter().enumerate() {
        let ts = at(index as i64);
        store
            .save_suite(&suite(
                suite_id,
                ts,
                vec![result(suite_id, "q1", SearchMode::Bm25, 5, 10.0, 0.5, BenchmarkStatus::Completed, ts)],
            ))
            .await
            .expect("save");
    }

    let History::Suites(entries) = store.get_history(2, None).await.expect("history") else {
        panic!("expected suite history");
    };
    assert_eq!(
        entries.iter().map(|entry| entry.suite_id.as_str()).collect::<Vec<_>>(),
        vec!["s3", "s2"]
    );
    assert_eq!(entries[0].avg_relevance, 0.0);

    let History::Query(runs) = store.get_history(10, Some("q1")).await.expect("history") else {
        panic!("expected query history");
    };
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[0].suite_id, "s3");
    assert_eq!(runs[0].relevance, Some(0.5));
}

#[tokio::test]
async fn prune_keeps_newest_suites_and_running_ones() {
    let (_dir, store) = open_store();
    for (index, suite_id) in ["s1", "s2", "s3"].iter().enumerate() {
        let ts = at(index as i64);
        store
            .save_suite(&suite(
                suite_id,
                ts,
                vec![result(suite_id, "q1", SearchMode::Bm25, 5, 10.0, 0.5, BenchmarkStatus::Completed, ts)],
            ))
            .await
            .expect("save");
    }
    assert!(store.reserve_suite("live", at(-10)).await.expect("running"));

    assert_eq!(store.prune_history(1).await.expect("prune"), 2);
    assert!(store.suite_exists("s3").await.expect("exists"));
    assert!(store.suite_exists("live").await.expect("exists"));
    assert!(!store.suite_exists("s1").await.expect("exists"));
    let History::Query(runs) = store.get_history(10, Some("q1")).await.expect("history") else {
        panic!("expected query history");
    };
    assert_eq!(runs.len(), 1);
}
