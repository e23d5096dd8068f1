//! Boundaries between the orchestrator and the systems it drives.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ExchangeRate, Transaction, TransactionStatus, TransitionFields};
use crate::mpesa::GatewayError;
use crate::tron::ChainError;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound(err.to_string()),
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Transactional store of [`Transaction`] rows.
///
/// Every status write is conditional on the stored status, so concurrent
/// mutators of one transaction serialize without a lock.
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    async fn create(&self, tx: &Transaction) -> RepositoryResult<Transaction>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Transaction>;

    async fn get_by_checkout_id(&self, checkout_id: &str) -> RepositoryResult<Option<Transaction>>;

    /// Moves `id` from `expected` to `new`, writing `fields` alongside.
    ///
    /// Returns `None` when the stored status is no longer `expected`.
    /// `completed_at` is set when `new` is terminal.
    async fn update_status(
        &self,
        id: Uuid,
        expected: TransactionStatus,
        new: TransactionStatus,
        fields: TransitionFields,
    ) -> RepositoryResult<Option<Transaction>>;

    /// Claims the right to run the chain transfer for a `processing` row,
    /// recording the payment receipt. Only the first caller gets `Some`.
    async fn claim_transfer(&self, id: Uuid, receipt: Option<String>)
        -> RepositoryResult<Option<Transaction>>;

    /// Fails a `processing` row whose transfer was never claimed. A claimed
    /// row belongs to the delivery that claimed it, so this returns `None`.
    async fn fail_unclaimed(&self, id: Uuid) -> RepositoryResult<Option<Transaction>>;

    async fn health_check(&self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn latest_rate(&self) -> RepositoryResult<Option<ExchangeRate>>;

    async fn record_rate(&self, rate: &BigDecimal) -> RepositoryResult<ExchangeRate>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Whole mobile-currency units.
    pub amount: u64,
    pub phone_number: String,
    pub callback_url: String,
    pub account_reference: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAccepted {
    pub checkout_id: String,
    pub merchant_request_id: String,
    pub response_description: String,
    pub customer_message: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_payment(&self, request: &PaymentRequest) -> Result<PushAccepted, GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub tx_hash: String,
    pub amount_minor_units: u64,
}

/// Sends tokens from the service's account. At most one broadcast per call.
#[async_trait]
pub trait TokenTransfer: Send + Sync {
    async fn transfer(&self, to: &str, amount: &BigDecimal) -> Result<TransferReceipt, ChainError>;
}
