//! Hybrid full-text and vector retrieval over personal notes, plus a
//! golden-query benchmark harness that tracks latency and quality against
//! stored baselines.

pub mod bench;
pub mod config;
pub mod db;
pub mod error;
pub mod retrieval;
pub mod util;

pub use config::{EngineConfig, RegressionThresholds};
pub use error::{NotegrepError, NotegrepResult};
pub use retrieval::{Engine, Note, SearchHit, SearchMode};
