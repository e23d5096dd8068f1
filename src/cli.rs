use bigdecimal::BigDecimal;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::{AllowedIps, Config, ConfigError};
use crate::domain::Transaction;
use crate::services::{PollOutcome, TransactionOrchestrator};
use crate::startup;
use crate::utils::sanitize::mask_phone;

#[derive(Parser)]
#[command(name = "ramp-core")]
#[command(about = "M-Pesa <-> USDT (TRC-20) exchange orchestration service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction management commands
    #[command(subcommand)]
    Tx(TxCommands),

    /// Exchange rate commands
    #[command(subcommand)]
    Rate(RateCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a transaction
    Show {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
    /// Poll a transaction until it settles or the poll timeout passes
    Watch {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
    /// Cancel a pending transaction
    Cancel {
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum RateCommands {
    /// Record a new KES per USDT rate
    Set {
        #[arg(value_name = "RATE")]
        rate: BigDecimal,
    },
    /// Show the rate new transactions would use
    Show,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

/// Operator commands act on the shared database, never on a throwaway
/// in-memory ledger.
async fn orchestrator_for_cli(config: &Config) -> anyhow::Result<TransactionOrchestrator> {
    if config.database_url.is_none() {
        anyhow::bail!("DATABASE_URL is required for this command");
    }
    let stores = startup::open_stores(config).await?;
    startup::build_orchestrator(config, stores)
}

pub async fn handle_tx_show(config: &Config, tx_id: Uuid) -> anyhow::Result<()> {
    let orchestrator = orchestrator_for_cli(config).await?;
    let tx = orchestrator.poll_status(tx_id).await?;
    print_transaction(&tx);
    Ok(())
}

pub async fn handle_tx_watch(config: &Config, tx_id: Uuid) -> anyhow::Result<()> {
    let orchestrator = orchestrator_for_cli(config).await?;
    let poller = startup::build_poller(config);

    println!(
        "Watching {} (every {}s, up to {}s)...",
        tx_id,
        poller.interval().as_secs(),
        poller.timeout().as_secs()
    );

    match poller.wait_for_terminal(&orchestrator, tx_id).await? {
        PollOutcome::Terminal(tx) => {
            print_transaction(&tx);
            Ok(())
        }
        PollOutcome::TimedOut(last_seen) => {
            let status = last_seen
                .map(|tx| tx.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            anyhow::bail!("Transaction {} still {} after poll timeout", tx_id, status)
        }
    }
}

pub async fn handle_tx_cancel(config: &Config, tx_id: Uuid) -> anyhow::Result<()> {
    let orchestrator = orchestrator_for_cli(config).await?;
    let tx = orchestrator.cancel(tx_id).await?;
    tracing::info!("Transaction {} cancelled", tx_id);
    println!("✓ Transaction {} cancelled", tx.id);
    Ok(())
}

pub async fn handle_rate_set(config: &Config, rate: &BigDecimal) -> anyhow::Result<()> {
    let orchestrator = orchestrator_for_cli(config).await?;
    let entry = orchestrator.record_rate(rate).await?;
    println!("✓ Rate {} recorded at {}", entry.rate, entry.recorded_at);
    Ok(())
}

pub async fn handle_rate_show(config: &Config) -> anyhow::Result<()> {
    let orchestrator = orchestrator_for_cli(config).await?;
    let quote = orchestrator.current_rate().await?;
    if quote.is_default {
        println!("{} (default, no rate recorded)", quote.rate);
    } else {
        println!("{}", quote.rate);
    }
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required to run migrations"))?;

    let pool = crate::db::create_pool(url).await?;
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

/// Reports on the loaded configuration, or names the variable that stopped
/// it from loading.
pub fn handle_config_validate(loaded: Result<Config, ConfigError>) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "configuration is invalid");
            println!("✗ Configuration is invalid: {}", e);
            return Err(e.into());
        }
    };

    // Key material is checked without printing it.
    startup::build_tron_client(&config)?;

    let allowed_ips = match &config.callback_allowed_ips {
        AllowedIps::Any => "*".to_string(),
        AllowedIps::Cidrs(cidrs) => cidrs
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    };

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(not set, in-memory ledger)".to_string())
    );
    println!("  Callback URL: {}", config.callback_url());
    println!("  M-Pesa: {:?} at {}", config.mpesa.environment, config.mpesa.base_url);
    println!("  M-Pesa Short Code: {}", config.mpesa.short_code);
    println!("  M-Pesa Consumer Secret: {}", config.mpesa.consumer_secret.masked());
    println!("  M-Pesa Passkey: {}", config.mpesa.passkey.masked());
    println!("  TRON API: {}", config.tron.api_url);
    println!("  TRON Sender: {}", config.tron.sender_address);
    println!("  TRON Private Key: {}", config.tron.private_key.masked());
    println!("  USDT Contract: {}", config.tron.contract_address);
    println!("  Default Rate: {}", config.default_exchange_rate);
    println!(
        "  Poller: every {}s for up to {}s",
        config.poller.interval.as_secs(),
        config.poller.timeout.as_secs()
    );
    println!("  Callback Allowed IPs: {}", allowed_ips);
    println!("  Trusted Proxy Depth: {}", config.trusted_proxy_depth);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn print_transaction(tx: &Transaction) {
    println!("Transaction {}", tx.id);
    println!("  Type:           {}", tx.kind);
    println!("  Status:         {}", tx.status);
    println!("  Source amount:  {}", tx.source_amount);
    println!("  Target amount:  {}", tx.target_amount);
    println!("  Rate:           {}", tx.exchange_rate);
    println!("  Mobile:         {}", mask_phone(&tx.mobile_number));
    println!("  Wallet:         {}", tx.chain_wallet_address);
    if let Some(checkout) = &tx.gateway_checkout_id {
        println!("  Checkout id:    {}", checkout);
    }
    if let Some(receipt) = &tx.gateway_receipt_id {
        println!("  Receipt:        {}", receipt);
    }
    if let Some(hash) = &tx.chain_tx_hash {
        println!("  Chain tx:       {}", hash);
    }
    println!("  Created:        {}", tx.created_at);
    if let Some(done) = tx.completed_at {
        println!("  Completed:      {}", done);
    }
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
