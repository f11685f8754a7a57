//! # Registry SCM Main Entry Point
//!
//! This is the main entry point for the registry SCM service.

use anyhow::Context;
use clap::{Parser, Subcommand};
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;

use registry_scm::{
    config::ConfigLoader,
    connectors::ConnectorRegistry,
    db::init_pool,
    server::{AppState, run_server},
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "registry-scm", version, about = "SCM credential service for the Terraform registry")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply migrations and serve the HTTP API (default)
    Serve,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;
    config.validate()?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = init_pool(&config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply database migrations")?;

    if matches!(cli.command, Some(Command::Migrate)) {
        tracing::info!("Migrations applied");
        return Ok(());
    }

    // Vendor connectors are linked in by the deployment; none ship by default.
    let registry = ConnectorRegistry::new();
    if registry.available_kinds().is_empty() {
        tracing::warn!("No SCM connectors registered; OAuth and repository calls will fail");
    }

    let state = AppState::new(config, db, registry)?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    run_server(state, shutdown)
        .await
        .map_err(|err| anyhow::anyhow!("server error: {err}"))
}
