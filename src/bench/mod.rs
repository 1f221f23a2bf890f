//! Golden-query benchmark harness: runs, scoring, regression checks and history.

pub mod golden;
pub mod model;
pub mod regression;
pub mod report;
pub mod runner;
pub mod scoring;
pub mod service;
pub mod store;

pub use golden::{GoldenQuerySpec, load_golden_queries, parse_golden_queries};
pub use model::{BenchmarkResult, BenchmarkStatus, BenchmarkSuite, History, SuiteStatus};
pub use report::{BenchmarkReport, generate_report};
pub use runner::SearchTarget;
pub use service::{BenchmarkService, RunRequest};
pub use store::BenchmarkStore;
