//! # contact-identity
//!
//! Identity resolution server binary: wires telemetry, the SQLite contact
//! store, the resolver and the HTTP surface together.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use identity_core::Resolver;
use identity_server::ServerConfig;
use identity_store::{ContactRepo, Database};
use identity_telemetry::{init_telemetry, TelemetryConfig};

/// Contact identity resolution server.
#[derive(Parser, Debug)]
#[command(name = "contact-identity", about = "Contact identity resolution server")]
struct Cli {
    /// Host to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind (0 for auto-assign).
    #[arg(long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Path to the SQLite contact database.
    #[arg(long, env = "IDENTITY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Keep contacts in memory only; nothing survives a restart.
    #[arg(long, conflicts_with = "db_path")]
    in_memory: bool,

    /// Default log level (RUST_LOG overrides).
    #[arg(long, env = "IDENTITY_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Emit JSON log lines.
    #[arg(long, env = "IDENTITY_LOG_JSON")]
    log_json: bool,

    /// Seconds after which a resolution is logged as slow.
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        let defaults = ServerConfig::default();
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            db_path: self.db_path.clone().unwrap_or(defaults.db_path),
            request_timeout_secs: self.request_timeout_secs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.log_json,
        ..Default::default()
    });

    let config = cli.server_config();
    let db = if cli.in_memory {
        tracing::warn!("using in-memory contact store");
        Database::in_memory().context("Failed to open in-memory database")?
    } else {
        Database::open(&config.db_path)
            .with_context(|| format!("Failed to open database: {}", config.db_path.display()))?
    };

    let resolver = Arc::new(Resolver::new(ContactRepo::new(db)));
    let handle = identity_server::start(config, resolver, telemetry.metrics())
        .await
        .context("Failed to start server")?;

    tracing::info!(
        port = handle.port,
        "identify endpoint on http://localhost:{}/identify",
        handle.port
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
