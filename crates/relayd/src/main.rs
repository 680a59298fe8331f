//! # relayd
//!
//! Relay server binary — wires the `SQLite` store, connection registry,
//! and WebSocket server together.

#![deny(unsafe_code)]

mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_server::{RelayServer, metrics};
use relay_store::{ConnectionConfig, SqliteStore, sqlite};

/// Relay chat server.
#[derive(Parser, Debug)]
#[command(name = "relayd", about = "WebSocket chat relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the settings file.
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings.unwrap_or_else(settings::settings_path);
    let mut settings = settings::load_settings_from_path(&settings_path)
        .context("failed to load settings")?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db_path) = args.db_path {
        settings.db_path = db_path.to_string_lossy().into_owned();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let metrics_handle = metrics::install_recorder();

    let db_path = PathBuf::from(&settings.db_path);
    ensure_parent_dir(&db_path)?;
    let pool = sqlite::new_file(&settings.db_path, &ConnectionConfig::default())
        .context("failed to open database")?;
    {
        let conn = pool.get().context("failed to get DB connection")?;
        let applied = sqlite::run_migrations(&conn).context("failed to run migrations")?;
        tracing::info!(applied, db_path = %settings.db_path, "database ready");
    }
    let store = Arc::new(SqliteStore::new(pool));

    let server = RelayServer::new(settings.server.clone(), store.clone(), store)
        .with_metrics(metrics_handle);
    let shutdown = server.shutdown().clone();

    let listener = server.bind().await.context("failed to bind server")?;
    let addr = listener.local_addr()?;
    let serve_handle = tokio::spawn(server.serve(listener));

    tracing::info!("relayd listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    shutdown.shutdown();
    let _ = serve_handle.await;

    tracing::info!("shutdown complete");
    Ok(())
}
