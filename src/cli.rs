use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::config::{mask_password, Config};

#[derive(Parser)]
#[command(name = "ledger-core")]
#[command(about = "Ledger Core - transfer engine and settlement reconciler", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the reconciliation loop until Ctrl-C (default)
    Serve,

    /// Run database migrations
    Migrate,

    /// Check configuration and connectivity to Postgres, Redis and the gateway
    Check,
}

pub async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    crate::db::run_migrations(&pool).await?;

    let core = crate::startup::build_core(config, pool).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = tokio::spawn(core.reconciler.clone().run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    reconciler.await?;

    tracing::info!(circuit = %core.gateway.circuit_state(), "Ledger core stopped");
    Ok(())
}

pub async fn handle_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_check(config: &Config) -> anyhow::Result<()> {
    println!("Configuration:");
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Redis URL: {}", mask_password(&config.redis_url));
    println!("  Settlement Gateway URL: {}", config.gateway_url);
    println!("  Regulator Webhook URL: {}", config.regulator_webhook_url);

    let report = crate::startup::validate_environment(config).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Connectivity check failed");
    }
    Ok(())
}
