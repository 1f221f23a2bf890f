use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use notegrep::{SearchHit, SearchMode};

use crate::cli::SearchArgs;
use crate::commands::open_engine;

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    mode: SearchMode,
    limit: usize,
    returned: usize,
    results: &'a [SearchHit],
}

pub async fn run(args: SearchArgs) -> Result<()> {
    let engine = open_engine(&args.engine)?;
    let mode = SearchMode::from(args.mode);

    let hits = match (mode, args.alpha) {
        (SearchMode::Hybrid, Some(alpha)) => {
            engine.hybrid_search(&args.query, args.limit, Some(alpha)).await
        }
        _ => engine.search(mode, &args.query, args.limit).await,
    }
    .with_context(|| format!("{mode} search failed"))?;

    info!(mode = %mode, limit = args.limit, returned = hits.len(), "search completed");

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        let response = SearchResponse {
            query: &args.query,
            mode,
            limit: args.limit,
            returned: hits.len(),
            results: &hits,
        };
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize search json output")?;
        writeln!(output)?;
    } else {
        writeln!(output, "Query: {}", args.query)?;
        writeln!(output, "Mode: {mode}")?;
        writeln!(output, "Results: {}", hits.len())?;
        for (index, hit) in hits.iter().enumerate() {
            let sources = hit
                .sources
                .iter()
                .map(|source| format!("{source:?}").to_ascii_lowercase())
                .collect::<Vec<String>>()
                .join(",");
            writeln!(
                output,
                "{}.\t{}\t{}\tscore={:.6} relevance={:.3}",
                index + 1,
                hit.chunk_id,
                if hit.heading.is_empty() { "-" } else { &hit.heading },
                hit.score,
                hit.relevance
            )?;
            writeln!(output, "\tsources={sources}")?;
            writeln!(output, "\t{}", hit.preview)?;
        }
    }
    output.flush()?;
    Ok(())
}
