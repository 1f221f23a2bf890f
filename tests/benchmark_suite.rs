use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use notegrep::bench::model::{Baseline, QualityScores, RegressionKind};
use notegrep::bench::regression::detect_regressions;
use notegrep::bench::{
    BenchmarkResult, BenchmarkService, BenchmarkStatus, BenchmarkStore, History, RunRequest,
    SearchTarget, SuiteStatus, load_golden_queries, parse_golden_queries,
};
use notegrep::{
    Engine, EngineConfig, Note, NotegrepResult, RegressionThresholds, SearchHit, SearchMode,
};

const GOLDEN: &str = r#"{
  "scenarios": [
    {
      "category": "productivity",
      "queries": [
        { "id": "review", "query": "weekly review", "expected_result_types": ["note"], "min_results": 1, "quality_threshold": 0.1 },
        { "id": "tuning", "query": "performance", "min_results": 1 }
      ]
    },
    {
      "category": "science",
      "queries": [
        { "id": "physics", "query": "quantum physics", "expected_result_types": ["reference"], "min_results": 1 }
      ]
    }
  ],
  "benchmarking_config": {
    "search_modes": ["bm25", "hybrid"],
    "result_limits": [3, 5],
    "timeout_ms": 5000
  }
}"#;

fn saved(suite_id: &str) -> RunRequest {
    RunRequest {
        suite_id: Some(suite_id.to_string()),
        save_results: true,
        ..RunRequest::default()
    }
}

async fn engine_with_notes(dir: &tempfile::TempDir, notes: &[Note]) -> Engine {
    let engine = Engine::open(EngineConfig::new(dir.path().join("index.sqlite")))
        .expect("engine should open");
    engine.index_notes(notes, false).await.expect("index");
    engine
}

fn scenario_notes() -> Vec<Note> {
    vec![
        Note::new("weekly", "Routine", "weekly review checklist"),
        Note::new("sqlite", "Databases", "SQLite performance tuning"),
        Note::new("physics", "Science", "quantum physics notes").with_type("reference"),
    ]
}

#[tokio::test]
async fn suite_over_scenario_corpus_scores_every_combination() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &scenario_notes()).await;
    let spec = parse_golden_queries(GOLDEN).expect("golden");
    let service = BenchmarkService::for_engine(&engine, spec).expect("service");

    let suite = service.run_suite(saved("scenario")).await.expect("run");
    assert_eq!(suite.status, SuiteStatus::Completed);
    assert_eq!(suite.total_queries, 3);
    assert_eq!(suite.total_executions, 12);
    assert_eq!(suite.success_rate, 1.0);
    assert_eq!(suite.queries_meeting_min_results, 3);
    assert!(suite.quality_summary.relevance.mean > 0.0);
    assert_eq!(suite.category_performance.len(), 2);

    let physics = suite
        .results
        .iter()
        .find(|result| result.query_id == "physics")
        .expect("physics result");
    let scores = physics.quality_scores.as_ref().expect("scores");
    assert_eq!(scores.intent_accuracy, 1.0);
    assert_eq!(physics.results[0].item_id, "physics");
}

#[tokio::test]
async fn empty_corpus_reports_queries_without_raising() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &[]).await;
    let spec = parse_golden_queries(GOLDEN).expect("golden");
    let service = BenchmarkService::for_engine(&engine, spec).expect("service");

    let suite = service.run_suite(saved("empty")).await.expect("run");
    assert_eq!(suite.total_queries, 3);
    assert_eq!(suite.queries_meeting_min_results, 0);
    assert!((0.0..=1.0).contains(&suite.success_rate));
    assert!(suite.results.iter().all(|result| result.result_count == 0));

    let report = service.generate_report("empty").await.expect("report");
    assert!(
        report
            .recommendations
            .iter()
            .any(|line| line.contains("fewer results"))
    );
}

#[tokio::test]
async fn missing_golden_file_yields_an_empty_suite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &scenario_notes()).await;
    let spec = load_golden_queries(&dir.path().join("absent.json"));
    let service = BenchmarkService::for_engine(&engine, spec).expect("service");

    let suite = service.run_suite(RunRequest::default()).await.expect("run");
    assert_eq!(suite.total_queries, 0);
    assert_eq!(suite.success_rate, 0.0);
}

#[tokio::test]
async fn establishing_a_baseline_twice_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &scenario_notes()).await;
    let spec = parse_golden_queries(GOLDEN).expect("golden");
    let service = BenchmarkService::for_engine(&engine, spec).expect("service");
    service.run_suite(saved("base")).await.expect("run");

    let store = BenchmarkStore::new(engine.database()).expect("store");
    assert!(service.establish_baseline("base", Some("v1")).await.expect("first"));
    let first = store.load_baselines().await.expect("load");
    assert!(service.establish_baseline("base", Some("v1")).await.expect("second"));
    let second = store.load_baselines().await.expect("load");

    assert_eq!(first.len(), 6);
    assert_eq!(first, second);

    let next = service.run_suite(saved("next")).await.expect("run");
    let comparison = next.baseline_comparison.expect("comparison");
    assert_eq!(comparison.compared, 12);
    assert_eq!(comparison.without_baseline, 0);
    assert_eq!(comparison.quality_regressions, 0);
}

#[tokio::test]
async fn history_follows_one_query_across_suites() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &scenario_notes()).await;
    let spec = parse_golden_queries(GOLDEN).expect("golden");
    let service = BenchmarkService::for_engine(&engine, spec).expect("service");
    service.run_suite(saved("first")).await.expect("run");
    service.run_suite(saved("second")).await.expect("run");

    let History::Query(entries) = service.get_history(100, Some("review")).await.expect("history")
    else {
        panic!("expected per-query history");
    };
    assert_eq!(entries.len(), 8);
    assert!(entries.iter().all(|entry| entry.query_id == "review"));

    let History::Suites(suites) = service.get_history(10, None).await.expect("history") else {
        panic!("expected suite history");
    };
    assert_eq!(suites.len(), 2);
    assert_eq!(service.prune_history(1).await.expect("prune"), 1);
}

struct SleepyTarget;

#[async_trait]
impl SearchTarget for SleepyTarget {
    async fn run_query(
        &self,
        _mode: SearchMode,
        _text: &str,
        _limit: usize,
    ) -> NotegrepResult<Vec<SearchHit>> {
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn slow_queries_time_out_without_failing_the_suite() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = engine_with_notes(&dir, &[]).await;
    let store = BenchmarkStore::new(engine.database()).expect("store");
    let spec = parse_golden_queries(
        r#"{
          "scenarios": [{ "category": "any", "queries": [{ "id": "slow", "query": "anything" }] }],
          "benchmarking_config": { "search_modes": ["bm25"], "result_limits": [5], "timeout_ms": 20 }
        }"#,
    )
    .expect("golden");
    let service = BenchmarkService::new(
        Arc::new(SleepyTarget),
        store,
        spec,
        RegressionThresholds::default(),
    )
    .expect("service");

    let suite = service.run_suite(saved("timeouts")).await.expect("run");
    assert_eq!(suite.status, SuiteStatus::Completed);
    assert_eq!(suite.results.len(), 1);
    assert_eq!(suite.results[0].status, BenchmarkStatus::Timeout);
    assert_eq!(suite.successful_queries, 0);
    assert_eq!(suite.success_rate, 0.0);
}

fn timed_result(execution_time_ms: f64) -> BenchmarkResult {
    BenchmarkResult {
        suite_id: "current".to_string(),
        query_id: "q".to_string(),
        category: "any".to_string(),
        query_text: "q".to_string(),
        search_mode: SearchMode::Hybrid,
        result_limit: 5,
        execution_time_ms,
        result_count: 1,
        results: Vec::new(),
        quality_scores: Some(QualityScores {
            relevance: 0.5,
            ..QualityScores::default()
        }),
        expected_vs_actual: None,
        status: BenchmarkStatus::Completed,
        error_message: None,
        timestamp: Utc::now(),
    }
}

#[test]
fn regression_threshold_boundary() {
    let baseline = Baseline {
        query_id: "q".to_string(),
        search_mode: SearchMode::Hybrid,
        baseline_execution_time_ms: 40.0,
        baseline_quality_score: 0.5,
        baseline_result_count: 1.0,
        established_at: Utc::now(),
        notes: None,
        source_suite_id: "base".to_string(),
    };
    let baselines = HashMap::from([(("q".to_string(), SearchMode::Hybrid), baseline)]);
    let thresholds = RegressionThresholds {
        performance_degradation: 0.2,
        quality_degradation: 0.15,
    };

    let (alerts, _) = detect_regressions(&[timed_result(60.0)], &baselines, &thresholds);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, RegressionKind::Performance);

    let (alerts, _) = detect_regressions(&[timed_result(44.0)], &baselines, &thresholds);
    assert!(alerts.is_empty());
}
