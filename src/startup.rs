use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::adapters::{
    InMemoryRateProvider, InMemoryTransactionLedger, PostgresRateProvider,
    PostgresTransactionRepository,
};
use crate::config::Config;
use crate::middleware::CallbackSourcePolicy;
use crate::mpesa::DarajaClient;
use crate::ports::{RateProvider, TransactionLedger};
use crate::services::{OrchestratorSettings, StatusPoller, TransactionOrchestrator};
use crate::tron::{TransactionSigner, TronClient, TronClientConfig};
use crate::{create_app, db, AppState};

/// Persistence pair chosen at startup.
pub struct Stores {
    pub ledger: Arc<dyn TransactionLedger>,
    pub rates: Arc<dyn RateProvider>,
}

/// Connects to Postgres and applies pending migrations, or falls back to
/// process-local storage when no database is configured.
pub async fn open_stores(config: &Config) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            Ok(Stores {
                ledger: Arc::new(PostgresTransactionRepository::new(pool.clone())),
                rates: Arc::new(PostgresRateProvider::new(pool)),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory ledger; data is lost on restart");
            Ok(Stores {
                ledger: Arc::new(InMemoryTransactionLedger::new()),
                rates: Arc::new(InMemoryRateProvider::new()),
            })
        }
    }
}

pub fn build_tron_client(config: &Config) -> Result<TronClient> {
    let signer = TransactionSigner::from_hex(config.tron.private_key.expose())
        .context("TRON_PRIVATE_KEY is not a valid secp256k1 key")?;

    Ok(TronClient::new(
        TronClientConfig {
            base_url: config.tron.api_url.clone(),
            api_key: config.tron.api_key.as_ref().map(|key| key.expose().to_string()),
            sender: config.tron.sender_address,
            contract: config.tron.contract_address,
            fee_limit: config.tron.fee_limit,
            timeout: config.http_timeout,
        },
        signer,
    ))
}

pub fn build_orchestrator(config: &Config, stores: Stores) -> Result<TransactionOrchestrator> {
    let gateway = DarajaClient::new(config.mpesa.clone(), config.http_timeout)
        .context("Invalid M-Pesa configuration")?;
    let chain = build_tron_client(config)?;

    Ok(TransactionOrchestrator::new(
        stores.ledger,
        stores.rates,
        Arc::new(gateway),
        Arc::new(chain),
        OrchestratorSettings {
            callback_url: config.callback_url(),
            default_rate: config.default_exchange_rate.clone(),
            deposit_address: config.token_deposit_address.map(|a| a.to_string()),
        },
    ))
}

pub fn build_poller(config: &Config) -> StatusPoller {
    StatusPoller::new(config.poller.interval, config.poller.timeout)
}

pub async fn serve(config: Config) -> Result<()> {
    let stores = open_stores(&config).await?;
    let state = AppState {
        orchestrator: build_orchestrator(&config, stores)?,
        poller: build_poller(&config),
    };
    let callback_sources = CallbackSourcePolicy::new(
        config.callback_allowed_ips.clone(),
        config.trusted_proxy_depth,
    );

    tracing::info!(
        callback_url = %config.callback_url(),
        mpesa_environment = ?config.mpesa.environment,
        tron_sender = %config.tron.sender_address,
        "components initialized"
    );

    let app = create_app(state, callback_sources);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
