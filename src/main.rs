use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ramp_core::cli::{self, Cli, Commands, DbCommands, RateCommands, TxCommands};
use ramp_core::config::{Config, LogFormat};
use ramp_core::startup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    dotenvy::dotenv().ok(); // Load .env file if present

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => startup::serve(Config::from_env()?).await,
        Commands::Tx(TxCommands::Show { tx_id }) => {
            cli::handle_tx_show(&Config::from_env()?, tx_id).await
        }
        Commands::Tx(TxCommands::Watch { tx_id }) => {
            cli::handle_tx_watch(&Config::from_env()?, tx_id).await
        }
        Commands::Tx(TxCommands::Cancel { tx_id }) => {
            cli::handle_tx_cancel(&Config::from_env()?, tx_id).await
        }
        Commands::Rate(RateCommands::Set { rate }) => {
            cli::handle_rate_set(&Config::from_env()?, &rate).await
        }
        Commands::Rate(RateCommands::Show) => cli::handle_rate_show(&Config::from_env()?).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&Config::from_env()?).await,
        Commands::Config => cli::handle_config_validate(Config::from_env()),
    }
}
