//! Startup helpers for the conversation graph server.

use std::process::ExitCode;

use crate::graph::core::config::GraphConfig;
use crate::graph::core::errors::GraphResult;
use crate::server::{self, AppState};

/// Run the server until Ctrl-C.
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting convo-graph v{}", env!("CARGO_PKG_VERSION"));

    let config = match GraphConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!("Database: {}", config.storage.sqlite_path.display());

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(serve(config)) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}

/// Open the database and serve until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if the database cannot be opened or the server fails.
pub async fn serve(config: GraphConfig) -> GraphResult<()> {
    let port = config.server.port;
    let state = AppState::from_config(config).await?;
    server::run_server_with_shutdown(state, port, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
