//! Session inspection CLI commands: status, purge.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::json;

use chunkflow_types::session::{ChildStatus, WorkflowSession};

use crate::state::AppState;

async fn require_session(state: &AppState, session_id: &str) -> Result<WorkflowSession> {
    state
        .engine
        .load_session(session_id)
        .await?
        .with_context(|| format!("session '{session_id}' not found"))
}

/// Show a session's chunk table and batch cache state.
///
/// # Examples
///
/// ```bash
/// chunkflow status 01934f7e-...
/// chunkflow status 01934f7e-... --json
/// ```
pub async fn status(state: &AppState, session_id: &str, json: bool) -> Result<()> {
    let session = require_session(state, session_id).await?;
    let progress = state.engine.progress(session_id).await?;

    let mut chunks = Vec::with_capacity(session.plan.len());
    for chunk in session.plan.chunks() {
        let child = state
            .engine
            .records()
            .load_child(session_id, &chunk.chunk_id)
            .await?;
        chunks.push((chunk, child));
    }

    if json {
        let out = json!({
            "session_id": session.session_id,
            "workflow_type": session.workflow_type,
            "status": session.status.to_string(),
            "created_at": session.created_at.to_rfc3339(),
            "updated_at": session.updated_at.to_rfc3339(),
            "pending_chunk_ids": progress.pending,
            "completed_chunk_ids": progress.completed,
            "cache_ready": session.batch.cache_ready,
            "batch_size": session.batch.batch_size,
            "extensions": session.extensions,
            "chunks": chunks.iter().map(|(chunk, child)| json!({
                "chunk_id": chunk.chunk_id,
                "name": chunk.name,
                "status": child.as_ref().map_or(ChildStatus::Pending, |c| c.status),
                "steps_taken": child.as_ref().map_or(0, |c| c.steps_taken),
                "remaining": child.as_ref().map_or(chunk.items.len(), |c| c.remaining.len()),
                "error": child.as_ref().and_then(|c| c.error.clone()),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Chunk").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Steps").fg(Color::White),
        Cell::new("Remaining").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);

    for (chunk, child) in &chunks {
        let status = child.as_ref().map_or(ChildStatus::Pending, |c| c.status);
        let status_cell = match status {
            ChildStatus::Completed => Cell::new("completed").fg(Color::Green),
            ChildStatus::Running => Cell::new("running").fg(Color::Yellow),
            ChildStatus::Failed => Cell::new("failed").fg(Color::Red),
            ChildStatus::Pending => Cell::new("pending").fg(Color::DarkGrey),
        };
        let remaining = child.as_ref().map_or(chunk.items.len(), |c| c.remaining.len());

        table.add_row(vec![
            Cell::new(&chunk.chunk_id).fg(Color::Cyan),
            Cell::new(&chunk.name),
            status_cell,
            Cell::new(child.as_ref().map_or(0, |c| c.steps_taken)),
            Cell::new(remaining),
            Cell::new(child.as_ref().and_then(|c| c.error.as_deref()).unwrap_or("")).fg(Color::Red),
        ]);
    }

    println!();
    println!(
        "  {} {}",
        style(&session.workflow_type).cyan().bold(),
        style(&session.session_id).dim()
    );
    if let Some(title) = session.extensions.get("title").and_then(|t| t.as_str()) {
        println!("  {}", style(title).bold());
    }
    println!();
    println!("  {}", style("── Chunks ──").dim());
    println!("{table}");
    println!();
    println!("  {}", style("── Progress ──").dim());
    println!(
        "  Status:     {}",
        style(session.status.to_string()).bold()
    );
    println!(
        "  Completed:  {}/{}",
        style(progress.completed.len()).green(),
        session.plan.len()
    );
    println!(
        "  Batch:      {} per page, cache {}",
        session.batch.batch_size,
        if session.batch.cache_ready { "filled" } else { "empty" }
    );
    println!(
        "  Updated:    {}",
        session.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    Ok(())
}

/// Delete a session and all its chunk records.
pub async fn purge(state: &AppState, session_id: &str, json: bool) -> Result<()> {
    require_session(state, session_id).await?;
    let removed = state.engine.purge(session_id).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({"session_id": session_id, "records_removed": removed}))?
        );
    } else {
        println!(
            "  {} Purged session {} ({} record{})",
            style("✓").green().bold(),
            style(session_id).cyan(),
            removed,
            if removed == 1 { "" } else { "s" }
        );
    }
    Ok(())
}
