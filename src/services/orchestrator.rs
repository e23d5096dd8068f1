//! Transaction lifecycle: push-payment initiation, callback confirmation and
//! the guarded chain transfer.

use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::money::convert_amount;
use crate::domain::{Transaction, TransactionStatus, TransactionType, TransitionFields};
use crate::mpesa::{parse_callback, CallbackError, ConfirmationEvent, GatewayError};
use crate::ports::{
    PaymentGateway, PaymentRequest, RateProvider, RepositoryError, TokenTransfer,
    TransactionLedger,
};
use crate::validation::{
    normalize_mobile_number, validate_exchange_rate, validate_source_amount,
    validate_wallet_address, ValidationError,
};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("gateway authentication failed: {reason}")]
    Auth {
        transaction_id: Option<Uuid>,
        reason: String,
    },
    #[error("payment request rejected: {reason}")]
    GatewayRejected { transaction_id: Uuid, reason: String },
    #[error("payment gateway unreachable: {reason}")]
    Transport { transaction_id: Uuid, reason: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transaction {id} is {status}")]
    InvalidState { id: Uuid, status: TransactionStatus },
    #[error("malformed callback: {0}")]
    MalformedCallback(String),
    #[error("ledger error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for OrchestratorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => OrchestratorError::NotFound(what),
            other => OrchestratorError::Repository(other),
        }
    }
}

impl From<CallbackError> for OrchestratorError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::Malformed(reason) => OrchestratorError::MalformedCallback(reason),
        }
    }
}

impl OrchestratorError {
    fn from_gateway(transaction_id: Uuid, err: GatewayError) -> Self {
        match err {
            GatewayError::Configuration(reason) => OrchestratorError::Configuration(reason),
            GatewayError::Auth(reason) => OrchestratorError::Auth {
                transaction_id: Some(transaction_id),
                reason,
            },
            GatewayError::Rejected(reason) => OrchestratorError::GatewayRejected {
                transaction_id,
                reason,
            },
            GatewayError::Transport(reason) => OrchestratorError::Transport {
                transaction_id,
                reason,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Public URL of the callback endpoint handed to the gateway.
    pub callback_url: String,
    /// Used when the rate log is empty.
    pub default_rate: BigDecimal,
    /// Where token sellers send their tokens.
    pub deposit_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub owner_id: Uuid,
    pub source_amount: BigDecimal,
    pub mobile_number: String,
    pub wallet_address: String,
    pub direction: TransactionType,
}

#[derive(Debug, Clone)]
pub struct InitiateOutcome {
    pub transaction: Transaction,
    pub checkout_id: Option<String>,
    pub customer_message: Option<String>,
    pub deposit_address: Option<String>,
}

/// What a callback delivery did to its transaction.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Completed(Transaction),
    /// Payment confirmed but the token transfer failed. The debit stands.
    TransferFailed(Transaction),
    PaymentFailed(Transaction),
    /// Already handled by an earlier delivery; nothing changed.
    Duplicate(Transaction),
}

impl CallbackOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            CallbackOutcome::Completed(tx)
            | CallbackOutcome::TransferFailed(tx)
            | CallbackOutcome::PaymentFailed(tx)
            | CallbackOutcome::Duplicate(tx) => tx,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateQuote {
    pub rate: BigDecimal,
    pub is_default: bool,
}

/// Owns every status write. Concurrent callers are serialized per
/// transaction by the ledger's conditional updates.
#[derive(Clone)]
pub struct TransactionOrchestrator {
    ledger: Arc<dyn TransactionLedger>,
    rates: Arc<dyn RateProvider>,
    gateway: Arc<dyn PaymentGateway>,
    chain: Arc<dyn TokenTransfer>,
    settings: OrchestratorSettings,
}

impl TransactionOrchestrator {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        rates: Arc<dyn RateProvider>,
        gateway: Arc<dyn PaymentGateway>,
        chain: Arc<dyn TokenTransfer>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            ledger,
            rates,
            gateway,
            chain,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<dyn TransactionLedger> {
        &self.ledger
    }

    /// Latest recorded rate, or the configured default when none is usable.
    pub async fn current_rate(&self) -> Result<RateQuote, OrchestratorError> {
        match self.rates.latest_rate().await? {
            Some(entry) if entry.rate > BigDecimal::zero() => Ok(RateQuote {
                rate: entry.rate,
                is_default: false,
            }),
            _ => Ok(RateQuote {
                rate: self.settings.default_rate.clone(),
                is_default: true,
            }),
        }
    }

    pub async fn record_rate(
        &self,
        rate: &BigDecimal,
    ) -> Result<crate::domain::ExchangeRate, OrchestratorError> {
        validate_exchange_rate(rate)?;
        let entry = self.rates.record_rate(rate).await?;
        tracing::info!(rate = %entry.rate, "exchange rate recorded");
        Ok(entry)
    }

    #[tracing::instrument(
        skip(self, request),
        fields(owner_id = %request.owner_id, direction = %request.direction)
    )]
    pub async fn initiate(&self, request: InitiateRequest) -> Result<InitiateOutcome, OrchestratorError> {
        let mobile_number = normalize_mobile_number(&request.mobile_number)?;
        let wallet = validate_wallet_address(&request.wallet_address)?;
        validate_source_amount(&request.source_amount, request.direction)?;

        match request.direction {
            TransactionType::MobileToToken if self.settings.callback_url.trim().is_empty() => {
                return Err(OrchestratorError::Configuration(
                    "callback URL is not configured".to_string(),
                ));
            }
            TransactionType::TokenToMobile if self.settings.deposit_address.is_none() => {
                return Err(OrchestratorError::Configuration(
                    "token deposit address is not configured".to_string(),
                ));
            }
            _ => {}
        }

        let push_amount = match request.direction {
            TransactionType::MobileToToken => Some(request.source_amount.to_u64().ok_or_else(|| {
                ValidationError::new("source_amount", "is too large for a push payment")
            })?),
            TransactionType::TokenToMobile => None,
        };

        let quote = self.current_rate().await?;
        if quote.is_default {
            tracing::warn!(rate = %quote.rate, "no stored exchange rate, using default");
        }
        let target_amount = convert_amount(&request.source_amount, &quote.rate, request.direction)
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!("unusable exchange rate {}", quote.rate))
            })?;

        let tx = Transaction::new(
            request.owner_id,
            request.direction,
            request.source_amount.clone(),
            target_amount,
            quote.rate,
            mobile_number,
            wallet.to_string(),
        );
        let tx = self.ledger.create(&tx).await?;
        tracing::info!(transaction_id = %tx.id, target_amount = %tx.target_amount, "transaction created");

        match push_amount {
            Some(amount) => self.request_push(tx, amount).await,
            None => Ok(InitiateOutcome {
                transaction: tx,
                checkout_id: None,
                customer_message: None,
                deposit_address: self.settings.deposit_address.clone(),
            }),
        }
    }

    async fn request_push(
        &self,
        tx: Transaction,
        amount: u64,
    ) -> Result<InitiateOutcome, OrchestratorError> {
        let request = PaymentRequest {
            amount,
            phone_number: tx.mobile_number.clone(),
            callback_url: self.settings.callback_url.clone(),
            account_reference: tx.id.to_string(),
            description: format!("Token purchase {} USDT", tx.target_amount),
        };

        match self.gateway.request_payment(&request).await {
            Ok(accepted) => {
                let updated = self
                    .ledger
                    .update_status(
                        tx.id,
                        TransactionStatus::Pending,
                        TransactionStatus::Processing,
                        TransitionFields::checkout(accepted.checkout_id.clone()),
                    )
                    .await;

                let updated = match updated {
                    Ok(Some(updated)) => updated,
                    Ok(None) => return Err(self.invalid_state(tx.id).await),
                    Err(e) => {
                        tracing::error!(
                            transaction_id = %tx.id,
                            checkout_id = %accepted.checkout_id,
                            error = %e,
                            "push accepted but checkout id could not be recorded"
                        );
                        self.fail_pending(tx.id).await;
                        return Err(e.into());
                    }
                };

                tracing::info!(
                    transaction_id = %updated.id,
                    checkout_id = %accepted.checkout_id,
                    "push payment accepted"
                );
                Ok(InitiateOutcome {
                    transaction: updated,
                    checkout_id: Some(accepted.checkout_id),
                    customer_message: Some(accepted.customer_message),
                    deposit_address: None,
                })
            }
            Err(err) => {
                tracing::warn!(transaction_id = %tx.id, error = %err, "push payment failed");
                self.fail_pending(tx.id).await;
                Err(OrchestratorError::from_gateway(tx.id, err))
            }
        }
    }

    /// Best effort: the caller already has an error to report.
    async fn fail_pending(&self, id: Uuid) {
        if let Err(e) = self
            .ledger
            .update_status(
                id,
                TransactionStatus::Pending,
                TransactionStatus::Failed,
                TransitionFields::none(),
            )
            .await
        {
            tracing::error!(transaction_id = %id, error = %e, "could not mark transaction failed");
        }
    }

    async fn invalid_state(&self, id: Uuid) -> OrchestratorError {
        match self.ledger.get_by_id(id).await {
            Ok(current) => OrchestratorError::InvalidState {
                id,
                status: current.status,
            },
            Err(e) => e.into(),
        }
    }

    async fn reread(&self, id: Uuid) -> Result<Transaction, OrchestratorError> {
        Ok(self.ledger.get_by_id(id).await?)
    }

    /// Applies a gateway confirmation. Safe to call any number of times with
    /// the same event: only the first delivery can start a transfer.
    #[tracing::instrument(skip(self, raw))]
    pub async fn handle_callback(&self, raw: &[u8]) -> Result<CallbackOutcome, OrchestratorError> {
        let event = parse_callback(raw)?;
        let tx = self
            .ledger
            .get_by_checkout_id(&event.checkout_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!(checkout_id = %event.checkout_id, "callback for unknown checkout id");
                OrchestratorError::NotFound(format!("checkout id {}", event.checkout_id))
            })?;

        if tx.status.is_terminal() || tx.transfer_started_at.is_some() {
            tracing::info!(transaction_id = %tx.id, status = %tx.status, "duplicate callback ignored");
            return Ok(CallbackOutcome::Duplicate(tx));
        }

        if !event.is_success() {
            return self.apply_payment_failure(tx, &event).await;
        }
        self.apply_payment_success(tx, &event).await
    }

    async fn apply_payment_failure(
        &self,
        tx: Transaction,
        event: &ConfirmationEvent,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        tracing::info!(
            transaction_id = %tx.id,
            result_code = event.result_code,
            result_desc = %event.result_desc,
            "payment not completed"
        );

        match self.ledger.fail_unclaimed(tx.id).await? {
            Some(failed) => Ok(CallbackOutcome::PaymentFailed(failed)),
            None => Ok(CallbackOutcome::Duplicate(self.reread(tx.id).await?)),
        }
    }

    async fn apply_payment_success(
        &self,
        tx: Transaction,
        event: &ConfirmationEvent,
    ) -> Result<CallbackOutcome, OrchestratorError> {
        let receipt = event.receipt.clone().ok_or_else(|| {
            OrchestratorError::MalformedCallback("success callback without receipt number".to_string())
        })?;

        if let Some(confirmed) = &event.amount {
            if confirmed != &tx.source_amount {
                tracing::warn!(
                    transaction_id = %tx.id,
                    confirmed = %confirmed,
                    requested = %tx.source_amount,
                    "confirmed amount differs from requested amount"
                );
            }
        }

        let claimed = match self.ledger.claim_transfer(tx.id, Some(receipt.clone())).await? {
            Some(claimed) => claimed,
            None => {
                tracing::info!(transaction_id = %tx.id, "transfer already claimed by another delivery");
                return Ok(CallbackOutcome::Duplicate(self.reread(tx.id).await?));
            }
        };
        tracing::info!(transaction_id = %claimed.id, receipt = %receipt, "payment confirmed");

        match self
            .chain
            .transfer(&claimed.chain_wallet_address, &claimed.target_amount)
            .await
        {
            Ok(transfer) => {
                let completed = self
                    .ledger
                    .update_status(
                        claimed.id,
                        TransactionStatus::Processing,
                        TransactionStatus::Completed,
                        TransitionFields::chain_hash(transfer.tx_hash.clone()),
                    )
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            transaction_id = %claimed.id,
                            tx_hash = %transfer.tx_hash,
                            error = %e,
                            "transfer broadcast but completion could not be recorded"
                        );
                        e
                    })?;

                match completed {
                    Some(completed) => {
                        tracing::info!(
                            transaction_id = %completed.id,
                            tx_hash = %transfer.tx_hash,
                            "transaction completed"
                        );
                        Ok(CallbackOutcome::Completed(completed))
                    }
                    None => {
                        tracing::error!(
                            transaction_id = %claimed.id,
                            tx_hash = %transfer.tx_hash,
                            "transaction left processing while its transfer was in flight"
                        );
                        Err(self.invalid_state(claimed.id).await)
                    }
                }
            }
            Err(err) => {
                // No refund path exists; the failed row is the record of the debit.
                tracing::error!(
                    transaction_id = %claimed.id,
                    receipt = %receipt,
                    error = %err,
                    "token transfer failed after payment"
                );
                match self
                    .ledger
                    .update_status(
                        claimed.id,
                        TransactionStatus::Processing,
                        TransactionStatus::Failed,
                        TransitionFields::none(),
                    )
                    .await?
                {
                    Some(failed) => Ok(CallbackOutcome::TransferFailed(failed)),
                    None => Err(self.invalid_state(claimed.id).await),
                }
            }
        }
    }

    /// Read-only snapshot.
    pub async fn poll_status(&self, id: Uuid) -> Result<Transaction, OrchestratorError> {
        Ok(self.ledger.get_by_id(id).await?)
    }

    /// Abandons a transaction that has not reached the gateway or chain yet.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> Result<Transaction, OrchestratorError> {
        let current = self.ledger.get_by_id(id).await?;
        if current.status != TransactionStatus::Pending {
            return Err(OrchestratorError::InvalidState {
                id,
                status: current.status,
            });
        }

        match self
            .ledger
            .update_status(
                id,
                TransactionStatus::Pending,
                TransactionStatus::Cancelled,
                TransitionFields::none(),
            )
            .await?
        {
            Some(cancelled) => {
                tracing::info!(transaction_id = %id, "transaction cancelled");
                Ok(cancelled)
            }
            None => Err(self.invalid_state(id).await),
        }
    }
}
