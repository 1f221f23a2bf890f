pub mod bench;
pub mod ingest;
pub mod rebuild;
pub mod search;
pub mod status;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use notegrep::{Engine, EngineConfig};

use crate::cli::EngineArgs;

/// Environment overrides apply first; explicit flags win over both.
pub fn engine_config(args: &EngineArgs) -> Result<EngineConfig> {
    let mut config = EngineConfig::new(&args.db_path)
        .with_env_overrides()
        .context("invalid NOTEGREP_* environment configuration")?;

    if args.embeddings {
        config.embeddings_enabled = true;
    }
    if let Some(provider) = args.embedding_provider {
        config.embedding_provider = provider.into();
    }
    if let Some(model) = &args.embedding_model {
        config.embedding_model = model.trim().to_string();
    }
    if let Some(url) = &args.embedding_url {
        config.embedding_url = url.clone();
    }
    if let Some(timeout_ms) = args.embedding_timeout_ms {
        config.embedding_timeout = Duration::from_millis(timeout_ms);
    }
    if let Some(path) = &args.vector_extension {
        config.vector_extension_path = Some(path.clone());
    }
    if let Some(rrf_k) = args.rrf_k {
        config.rrf_k = rrf_k;
    }

    config.validate().context("invalid engine configuration")?;
    Ok(config)
}

pub fn open_engine(args: &EngineArgs) -> Result<Engine> {
    let config = engine_config(args)?;
    let engine = Engine::open(config)
        .with_context(|| format!("failed to open index at {}", args.db_path.display()))?;
    info!(
        db_path = %args.db_path.display(),
        vector_backend = engine.vector_backend_name(),
        vector_search = engine.vector_search_available(),
        "engine ready"
    );
    Ok(engine)
}
