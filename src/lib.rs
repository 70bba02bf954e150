pub mod auth;
pub mod clicks;
pub mod config;
pub mod db;
pub mod errors;
pub mod http;
pub mod models;
pub mod reconcile;
pub mod source;
pub mod store;

#[cfg(test)]
mod test_support;

use crate::auth::SharedSecretAuthorizer;
use crate::config::Config;
use crate::db::Database;
use crate::http::{build_router, AppState};
use crate::source::FileProfileSource;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Opens the store, builds the router and serves until ctrl-c.
pub async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(config.log_dir.as_deref()).map_err(anyhow::Error::msg)?;

    let db = Database::new(&config.database, config.busy_timeout)?;
    tracing::info!(
        database = %db.path().to_string_lossy(),
        data_dir = %config.data_dir.to_string_lossy(),
        reload_enabled = config.reload_token.is_some(),
        "store ready"
    );
    if config.reload_token.is_none() {
        tracing::warn!("no reload token configured, /api/system/reload will refuse every request");
    }

    let state = AppState::new(
        db,
        FileProfileSource::new(config.data_dir.clone()),
        SharedSecretAuthorizer::new(config.reload_token.clone()),
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// JSON to a daily rolling file when `log_dir` is set, plain lines on stderr
/// otherwise.
fn init_tracing(log_dir: Option<&Path>) -> Result<(), String> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_dir {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "profile-directory.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let _ = LOG_GUARD.set(guard);

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(non_blocking)
                .try_init()
                .map_err(|error| error.to_string())
        }
        None => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|error| error.to_string()),
    }
}
