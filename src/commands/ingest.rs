use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use notegrep::Note;
use notegrep::util::write_json_pretty;

use crate::cli::IngestArgs;
use crate::commands::open_engine;

const NOTE_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

pub async fn run(args: IngestArgs) -> Result<()> {
    let notes = load_notes(&args.notes_dir)?;
    if notes.is_empty() {
        bail!("no notes found in {}", args.notes_dir.display());
    }
    info!(
        notes_dir = %args.notes_dir.display(),
        notes = notes.len(),
        force = args.force,
        "ingest started"
    );

    let engine = open_engine(&args.engine)?;
    let report = engine
        .index_notes(&notes, args.force)
        .await
        .context("failed to index notes")?;

    info!(
        items = report.items,
        chunks = report.chunks,
        embedded = report.embedded,
        embedding_failures = report.embedding_failures,
        skipped_unchanged = report.skipped_unchanged,
        elapsed_ms = report.elapsed_ms,
        "ingest completed"
    );
    if report.embedding_failures > 0 {
        warn!(
            embedding_failures = report.embedding_failures,
            "some chunks were indexed without embeddings"
        );
    }

    if let Some(report_path) = &args.report_path {
        write_json_pretty(report_path, &report)
            .with_context(|| format!("failed to write {}", report_path.display()))?;
        info!(path = %report_path.display(), "wrote ingest report");
    }

    Ok(())
}

/// Reads every note file under `root`, ordered by path.
///
/// The id is the path relative to `root` without its extension. Files in a
/// subdirectory take that directory's name as their item type.
pub fn load_notes(root: &Path) -> Result<Vec<Note>> {
    let mut paths = Vec::new();
    discover_note_files(root, &mut paths)?;
    paths.sort();

    let mut notes = Vec::with_capacity(paths.len());
    for path in paths {
        let relative = path
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
        let body = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;

        let id = relative
            .with_extension("")
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<String>>()
            .join("/");
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&id)
            .to_string();
        let title = first_heading(&body).unwrap_or(stem);

        let mut note = Note::new(&id, &title, &body);
        if let Some(item_type) = relative
            .parent()
            .and_then(|parent| parent.components().next())
            .map(|component| component.as_os_str().to_string_lossy().to_ascii_lowercase())
        {
            note = note.with_type(&item_type);
        }
        notes.push(note);
    }

    Ok(notes)
}

fn discover_note_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?;

        if file_type.is_dir() {
            let hidden = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if !hidden {
                discover_note_files(&path, out)?;
            }
            continue;
        }

        let is_note = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                NOTE_EXTENSIONS
                    .iter()
                    .any(|candidate| ext.eq_ignore_ascii_case(candidate))
            })
            .unwrap_or(false);
        if file_type.is_file() && is_note {
            out.push(path);
        }
    }

    Ok(())
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}
