//! chunkflow CLI and REST API entry point.
//!
//! Binary name: `chunkflow`
//!
//! Parses CLI arguments, initializes the database and engine, then dispatches
//! to the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;
mod workflows;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,chunkflow=debug",
        _ => "trace",
    };
    chunkflow_observe::tracing_setup::init_tracing(filter, cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "chunkflow", &mut std::io::stdout());
        return Ok(());
    }

    let result = run(cli).await;
    chunkflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize application state (DB, config, engine)
    let state = AppState::init(cli.data_dir.clone()).await?;

    match cli.command {
        Commands::Dispatch { request } => {
            cli::action::dispatch(&state, request, cli.quiet).await?;
        }

        Commands::Run {
            file,
            paragraphs_per_chunk,
            batch_size,
            title,
        } => {
            let opts = cli::run::RunOptions {
                file: &file,
                paragraphs_per_chunk,
                batch_size,
                title,
            };
            cli::run::run_file(&state, opts, cli.json, cli.quiet).await?;
        }

        Commands::Resume { session_id } => {
            cli::run::resume(&state, &session_id, cli.json, cli.quiet).await?;
        }

        Commands::Status { session_id } => {
            cli::session::status(&state, &session_id, cli.json).await?;
        }

        Commands::Purge { session_id } => {
            cli::session::purge(&state, &session_id, cli.json).await?;
        }

        Commands::Serve { port, host } => {
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            println!(
                "  {} chunkflow API listening on {}",
                console::style("⚡").bold(),
                console::style(format!("http://{addr}")).cyan()
            );
            println!(
                "  {}",
                console::style(format!("Data: {}", state.data_dir.display())).dim()
            );
            println!(
                "  {}",
                console::style("Press Ctrl+C to stop").dim()
            );

            let router = http::router::build_router(state);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            println!("\n  Server stopped.");
        }

        Commands::Completions { .. } => unreachable!("handled before state init"),
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
