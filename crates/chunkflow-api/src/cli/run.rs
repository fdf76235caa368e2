//! End-to-end runs: digest a file, or resume an existing session.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, CellAlignment, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use chunkflow_core::workflow::engine::CompletedRun;
use chunkflow_core::workflow::heartbeat::{Heartbeat, HeartbeatTick, NoopHeartbeat, RunPhase};
use chunkflow_core::workflow::strategy::StartRequest;

use crate::state::AppState;
use crate::workflows::document_digest::DocumentDigest;

/// Options for [`run_file`].
pub struct RunOptions<'a> {
    pub file: &'a Path,
    pub paragraphs_per_chunk: usize,
    pub batch_size: Option<usize>,
    pub title: Option<String>,
}

/// Digest a text file in one call.
///
/// # Examples
///
/// ```bash
/// chunkflow run notes.md
/// chunkflow run notes.md --paragraphs-per-chunk 5 --json
/// ```
pub async fn run_file(state: &AppState, opts: RunOptions<'_>, json: bool, quiet: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(opts.file)
        .await
        .with_context(|| format!("failed to read {}", opts.file.display()))?;

    let mut params = json!({
        "text": text,
        "paragraphs_per_chunk": opts.paragraphs_per_chunk,
    });
    if let Some(title) = opts.title {
        params["title"] = json!(title);
    }
    let request = StartRequest {
        params,
        batch_size: opts.batch_size,
        max_items: None,
    };

    let cancel = cancel_on_ctrl_c();
    let progress = progress_printer(json || quiet);
    let run = state
        .engine
        .run_auto_complete(request, progress.as_ref(), &cancel)
        .await?;

    print_run(&run, json, quiet)
}

/// Finish an existing session.
pub async fn resume(state: &AppState, session_id: &str, json: bool, quiet: bool) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    let progress = progress_printer(json || quiet);
    let run = state
        .engine
        .run_complete_from_session(session_id, progress.as_ref(), &cancel)
        .await?;

    print_run(&run, json, quiet)
}

/// Cancels the returned token on Ctrl+C; the run stops at the next shard
/// boundary.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; cancelling run");
            token.cancel();
        }
    });
    cancel
}

fn progress_printer(silent: bool) -> Box<dyn Heartbeat> {
    if silent {
        return Box::new(NoopHeartbeat);
    }
    Box::new(|tick: &HeartbeatTick| {
        let label = match tick.phase {
            RunPhase::Starting => "started",
            RunPhase::Sharding => "sharding",
            RunPhase::Synthesizing => "synthesizing",
        };
        eprintln!(
            "  {} {:<12} round {} · {} done · {} pending · {}ms",
            style("›").cyan(),
            label,
            tick.round,
            tick.completed,
            tick.pending,
            tick.elapsed_ms
        );
    })
}

fn print_run(run: &CompletedRun<DocumentDigest>, json: bool, quiet: bool) -> Result<()> {
    if json {
        let out = json!({
            "session_id": run.session_id,
            "shard_rounds": run.shard_rounds,
            "result": run.result,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }
    if quiet {
        println!("{}", run.session_id);
        return Ok(());
    }

    let digest = &run.result;
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Section").fg(Color::White),
        Cell::new("Paragraphs").fg(Color::White),
        Cell::new("Words").fg(Color::White),
        Cell::new("Lead").fg(Color::White),
    ]);

    for section in &digest.sections {
        let lead = section
            .paragraphs
            .first()
            .map(|p| p.headline.as_str())
            .unwrap_or("");
        table.add_row(vec![
            Cell::new(&section.name).fg(Color::Cyan),
            Cell::new(section.paragraphs.len()).set_alignment(CellAlignment::Right),
            Cell::new(section.words).set_alignment(CellAlignment::Right),
            Cell::new(lead).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!(
        "  {} Digest complete for session {}",
        style("✓").green().bold(),
        style(&run.session_id).cyan()
    );
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} paragraphs · {} words · {} chars · {} shard round{}",
        style(digest.total_paragraphs).bold(),
        style(digest.total_words).bold(),
        style(digest.total_chars).bold(),
        run.shard_rounds,
        if run.shard_rounds == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}
