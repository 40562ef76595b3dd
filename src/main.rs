use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcp_deliberation::{
    config::Config,
    server::{AppState, McpServer},
    storage::{Session, SqliteStorage, Storage},
};

/// Command-line overrides for the environment configuration.
#[derive(Debug, Parser)]
#[command(name = "mcp-deliberation", version, about = "MCP deliberation graph server")]
struct Cli {
    /// Database file path (overrides DATABASE_PATH).
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// Resume a persisted session instead of starting a new one.
    #[arg(long)]
    resume: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.database_path {
        config.database.path = path;
    }

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "MCP Deliberation Server starting..."
    );

    // Initialize storage
    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Start a fresh session or reload a persisted one
    let state = match cli.resume {
        Some(session_id) => {
            let graph = storage
                .load_graph(&session_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No persisted session: {}", session_id))?;
            info!(session_id = %session_id, thoughts = graph.len(), "Session resumed");
            Arc::new(AppState::with_graph(config, storage, graph))
        }
        None => {
            let state = Arc::new(AppState::new(config, storage));
            let session = {
                let engine = state.engine.lock().await;
                Session::for_graph(&engine.graph)
            };
            if let Err(e) = state.storage.create_session(&session).await {
                error!(error = %e, "Failed to persist session row");
            }
            info!(session_id = %state.session_id, "Session started");
            state
        }
    };

    // Start MCP server
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        mcp_deliberation::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        mcp_deliberation::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
