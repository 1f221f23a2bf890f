use std::io::{self, Write};

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::StatusArgs;
use crate::commands::open_engine;

pub async fn run(args: StatusArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let status = engine.status().await.context("failed to read index status")?;

    info!(
        db_path = %status.db_path,
        schema_version = %status.schema_version,
        items = status.items,
        chunks = status.chunks,
        fulltext_rows = status.fulltext_rows,
        vector_backend = %status.vector_backend,
        vector_search = status.vector_search_available,
        embeddings = status.embeddings,
        updated_at = %status.updated_at.as_deref().unwrap_or("never"),
        "index status"
    );

    if args.json {
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &status)
            .context("failed to serialize status json output")?;
        writeln!(output)?;
        output.flush()?;
    }
    Ok(())
}
