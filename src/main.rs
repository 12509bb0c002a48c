use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ledger_core::cli::{self, Cli, Commands};
use ledger_core::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => cli::handle_serve(&config).await,
        Commands::Migrate => cli::handle_migrate(&config).await,
        Commands::Check => cli::handle_check(&config).await,
    }
}
