//! Raw action protocol from the command line.

use std::io::Read;

use anyhow::{Context, Result};
use console::style;

use chunkflow_types::protocol::{ActionRequest, ActionResponse};

use crate::state::AppState;

/// Dispatch one JSON request and print the reply.
///
/// The reply is always printed as JSON (it is the protocol). Error envelopes
/// make the command exit non-zero.
///
/// # Examples
///
/// ```bash
/// chunkflow dispatch '{"action":"start","params":{"text":"..."}}'
/// echo '{"action":"shard","session_id":"..."}' | chunkflow dispatch
/// ```
pub async fn dispatch(state: &AppState, request: Option<String>, quiet: bool) -> Result<()> {
    let raw = match request {
        Some(raw) => raw,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read request from stdin")?;
            buf
        }
    };
    let request = parse_request(&raw)?;

    let response = state.dispatcher.dispatch(request).await;
    println!("{}", serde_json::to_string_pretty(&response)?);

    if let ActionResponse::Error(envelope) = &response {
        if !quiet {
            eprintln!(
                "  {} {} ({})",
                style("✗").red().bold(),
                envelope.message,
                style(serde_json::to_string(&envelope.kind)?.trim_matches('"')).dim()
            );
        }
        anyhow::bail!("action '{}' failed", envelope.action);
    }
    Ok(())
}

fn parse_request(raw: &str) -> Result<ActionRequest> {
    serde_json::from_str(raw.trim()).context("request is not a valid action request JSON object")
}
