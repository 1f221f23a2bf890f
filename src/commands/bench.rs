use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use notegrep::SearchMode;
use notegrep::bench::report::write_text;
use notegrep::bench::{
    BenchmarkService, GoldenQuerySpec, History, RunRequest, generate_report, load_golden_queries,
};
use notegrep::util::write_json_pretty;

use crate::cli::{
    BenchBaselineArgs, BenchHistoryArgs, BenchPruneArgs, BenchReportArgs, BenchRunArgs, EngineArgs,
};
use crate::commands::open_engine;

fn open_service(engine_args: &EngineArgs, spec: GoldenQuerySpec) -> Result<BenchmarkService> {
    let engine = open_engine(engine_args)?;
    BenchmarkService::for_engine(&engine, spec).context("failed to prepare benchmark service")
}

pub async fn run(args: BenchRunArgs) -> Result<()> {
    let spec = load_golden_queries(&args.golden);
    info!(
        golden = %args.golden.display(),
        scenarios = spec.scenarios.len(),
        queries = spec.query_count(),
        "loaded golden queries"
    );

    let service = open_service(&args.engine, spec)?;
    let request = RunRequest {
        suite_id: args.suite_id.clone(),
        categories: (!args.categories.is_empty()).then(|| args.categories.clone()),
        search_modes: (!args.modes.is_empty())
            .then(|| args.modes.iter().copied().map(SearchMode::from).collect()),
        save_results: !args.no_save,
    };
    let suite = service
        .run_suite(request)
        .await
        .context("benchmark suite could not start")?;

    if let Some(reason) = &suite.persistence_error {
        warn!(suite_id = %suite.suite_id, error = %reason, "suite results were not saved");
    }
    if let Some(output_path) = &args.output_path {
        write_json_pretty(output_path, &suite)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        info!(path = %output_path.display(), "wrote benchmark suite");
    }

    let mut text = String::new();
    write_text(&mut text, &generate_report(&suite)).context("failed to render report")?;
    let mut output = io::BufWriter::new(io::stdout().lock());
    output.write_all(text.as_bytes())?;
    output.flush()?;
    Ok(())
}

pub async fn baseline(args: BenchBaselineArgs) -> Result<()> {
    let service = open_service(&args.engine, GoldenQuerySpec::default())?;
    let written = service
        .establish_baseline(&args.suite_id, args.notes.as_deref())
        .await
        .with_context(|| format!("failed to establish baseline from {}", args.suite_id))?;

    if !written {
        bail!("suite {} has no completed results to baseline", args.suite_id);
    }
    info!(suite_id = %args.suite_id, "baseline established");
    Ok(())
}

pub async fn history(args: BenchHistoryArgs) -> Result<()> {
    let service = open_service(&args.engine, GoldenQuerySpec::default())?;
    let history = service
        .get_history(args.limit, args.query_id.as_deref())
        .await
        .context("failed to load benchmark history")?;
    if history.is_empty() {
        info!("no benchmark history recorded yet");
    } else {
        info!(entries = history.len(), "loaded benchmark history");
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    match &history {
        History::Suites(entries) => {
            writeln!(output, "Suites: {}", entries.len())?;
            for entry in entries {
                writeln!(
                    output,
                    "{}\t{}\t{}\tqueries={} success={:.1}% avg_ms={:.2} relevance={:.3} alerts={}",
                    entry.timestamp.to_rfc3339(),
                    entry.suite_id,
                    entry.status,
                    entry.total_queries,
                    entry.success_rate * 100.0,
                    entry.avg_execution_time_ms,
                    entry.avg_relevance,
                    entry.regression_alerts
                )?;
            }
        }
        History::Query(entries) => {
            writeln!(output, "Executions: {}", entries.len())?;
            for entry in entries {
                writeln!(
                    output,
                    "{}\t{}\t{} k={}\t{}\tms={:.2} results={} relevance={}",
                    entry.timestamp.to_rfc3339(),
                    entry.suite_id,
                    entry.search_mode,
                    entry.result_limit,
                    entry.status,
                    entry.execution_time_ms,
                    entry.result_count,
                    entry
                        .relevance
                        .map(|value| format!("{value:.3}"))
                        .unwrap_or_else(|| "-".to_string())
                )?;
            }
        }
    }
    output.flush()?;
    Ok(())
}

pub async fn report(args: BenchReportArgs) -> Result<()> {
    let service = open_service(&args.engine, GoldenQuerySpec::default())?;
    let report = service
        .generate_report(&args.suite_id)
        .await
        .with_context(|| format!("failed to build report for {}", args.suite_id))?;

    let mut output = io::BufWriter::new(io::stdout().lock());
    if args.json {
        serde_json::to_writer_pretty(&mut output, &report)
            .context("failed to serialize report json output")?;
        writeln!(output)?;
    } else {
        let mut text = String::new();
        write_text(&mut text, &report).context("failed to render report")?;
        output.write_all(text.as_bytes())?;
    }
    output.flush()?;
    Ok(())
}

pub async fn prune(args: BenchPruneArgs) -> Result<()> {
    let service = open_service(&args.engine, GoldenQuerySpec::default())?;
    let removed = service
        .prune_history(args.keep)
        .await
        .context("failed to prune benchmark history")?;
    info!(keep = args.keep, removed, "benchmark history pruned");
    Ok(())
}
