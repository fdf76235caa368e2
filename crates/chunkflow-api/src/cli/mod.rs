//! CLI command definitions and dispatch for the `chunkflow` binary.
//!
//! Uses clap derive macros for argument parsing. `dispatch` speaks the raw
//! action protocol; `run` and `resume` drive sessions to completion; `status`
//! and `purge` inspect and remove persisted sessions.

pub mod action;
pub mod run;
pub mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Drive chunked workflows from the command line or over HTTP.
#[derive(Parser)]
#[command(name = "chunkflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout via OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to $CHUNKFLOW_DATA_DIR or ~/.chunkflow).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dispatch one action request (JSON) and print the reply.
    Dispatch {
        /// Request JSON, e.g. '{"action":"shard","session_id":"..."}'.
        /// Read from stdin when omitted.
        request: Option<String>,
    },

    /// Digest a text file end to end (start, shard, synthesize).
    Run {
        /// Text file to digest.
        file: PathBuf,

        /// Paragraphs per chunk.
        #[arg(long, default_value = "3")]
        paragraphs_per_chunk: usize,

        /// Rows per batch page.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Title stored on the session.
        #[arg(long)]
        title: Option<String>,
    },

    /// Finish an existing session from where it left off.
    Resume {
        /// Session to complete.
        session_id: String,
    },

    /// Show a session's chunk progress.
    Status {
        /// Session to inspect.
        session_id: String,
    },

    /// Delete a session and all of its chunk records.
    Purge {
        /// Session to delete.
        session_id: String,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
