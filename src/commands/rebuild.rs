use anyhow::{Context, Result};
use tracing::info;

use crate::cli::RebuildArgs;
use crate::commands::open_engine;

pub async fn run(args: RebuildArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let stats = engine
        .rebuild()
        .await
        .context("failed to rebuild the full-text index")?;

    info!(
        chunks = stats.chunks,
        elapsed_ms = stats.elapsed.as_millis() as u64,
        "rebuild completed"
    );
    Ok(())
}
