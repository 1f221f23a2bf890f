use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use notegrep::config::EmbeddingProviderKind;
use notegrep::retrieval::SearchMode;

#[derive(Parser, Debug)]
#[command(
    name = "notegrep",
    version,
    about = "Local hybrid note search with a golden-query benchmark harness"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Ingest(IngestArgs),
    Rebuild(RebuildArgs),
    Search(SearchArgs),
    Status(StatusArgs),
    #[command(subcommand)]
    Bench(BenchCommands),
}

#[derive(Subcommand, Debug)]
pub enum BenchCommands {
    Run(BenchRunArgs),
    Baseline(BenchBaselineArgs),
    History(BenchHistoryArgs),
    Report(BenchReportArgs),
    Prune(BenchPruneArgs),
}

/// Index location and embedding settings shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    #[arg(long, default_value = ".cache/notegrep/index.sqlite")]
    pub db_path: PathBuf,

    #[arg(long, default_value_t = false)]
    pub embeddings: bool,

    #[arg(long, value_enum)]
    pub embedding_provider: Option<ProviderArg>,

    #[arg(long)]
    pub embedding_model: Option<String>,

    #[arg(long)]
    pub embedding_url: Option<String>,

    #[arg(long)]
    pub embedding_timeout_ms: Option<u64>,

    #[arg(long)]
    pub vector_extension: Option<PathBuf>,

    #[arg(long)]
    pub rrf_k: Option<f64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderArg {
    Ollama,
    LocalHash,
}

impl From<ProviderArg> for EmbeddingProviderKind {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Ollama => Self::Ollama,
            ProviderArg::LocalHash => Self::LocalHash,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    Bm25,
    Vector,
    Hybrid,
}

impl From<ModeArg> for SearchMode {
    fn from(value: ModeArg) -> Self {
        match value {
            ModeArg::Bm25 => Self::Bm25,
            ModeArg::Vector => Self::Vector,
            ModeArg::Hybrid => Self::Hybrid,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct IngestArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    /// Directory scanned recursively for `.md` and `.txt` notes.
    #[arg(long)]
    pub notes_dir: PathBuf,

    #[arg(long, default_value_t = false)]
    pub force: bool,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    pub query: String,

    #[arg(long, value_enum, default_value_t = ModeArg::Hybrid)]
    pub mode: ModeArg,

    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Weight of the vector list for documents found by both indexes.
    #[arg(long)]
    pub alpha: Option<f64>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BenchRunArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, default_value = "golden_queries.json")]
    pub golden: PathBuf,

    #[arg(long)]
    pub suite_id: Option<String>,

    #[arg(long = "category")]
    pub categories: Vec<String>,

    #[arg(long = "mode", value_enum)]
    pub modes: Vec<ModeArg>,

    #[arg(long, default_value_t = false)]
    pub no_save: bool,

    /// Writes the full suite as JSON to this path.
    #[arg(long)]
    pub output_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct BenchBaselineArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub suite_id: String,

    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BenchHistoryArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    #[arg(long)]
    pub query_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct BenchReportArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub suite_id: String,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BenchPruneArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub keep: usize,
}
