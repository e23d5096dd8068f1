use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionStatus, TransactionType};
use crate::error::{AppError, ErrorBody};
use crate::services::{InitiateRequest, PollOutcome};
use crate::utils::sanitize::mask_phone;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiateTransactionRequest {
    pub user_id: Uuid,
    /// Decimal string or number, in source-currency units.
    #[schema(value_type = String, example = "1000")]
    pub source_amount: BigDecimal,
    #[schema(example = "0712345678")]
    pub mobile_number: String,
    #[schema(example = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t")]
    pub wallet_address: String,
    #[serde(default)]
    pub direction: TransactionType,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiateTransactionResponse {
    pub transaction_id: Uuid,
    pub checkout_id: Option<String>,
    #[schema(value_type = String)]
    pub target_amount: BigDecimal,
    #[schema(value_type = String)]
    pub exchange_rate: BigDecimal,
    pub status: TransactionStatus,
    pub customer_message: Option<String>,
    /// Where to send tokens, for token -> mobile transactions.
    pub deposit_address: Option<String>,
}

/// Public view of a transaction. The mobile number is masked.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    pub owner_id: Uuid,
    #[schema(value_type = String)]
    pub source_amount: BigDecimal,
    #[schema(value_type = String)]
    pub target_amount: BigDecimal,
    #[schema(value_type = String)]
    pub exchange_rate: BigDecimal,
    pub mobile_number: String,
    pub chain_wallet_address: String,
    pub gateway_checkout_id: Option<String>,
    pub gateway_receipt_id: Option<String>,
    pub chain_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Transaction> for TransactionView {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            kind: tx.kind,
            status: tx.status,
            owner_id: tx.owner_id,
            source_amount: tx.source_amount,
            target_amount: tx.target_amount,
            exchange_rate: tx.exchange_rate,
            mobile_number: mask_phone(&tx.mobile_number),
            chain_wallet_address: tx.chain_wallet_address,
            gateway_checkout_id: tx.gateway_checkout_id,
            gateway_receipt_id: tx.gateway_receipt_id,
            chain_tx_hash: tx.chain_tx_hash,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            completed_at: tx.completed_at,
        }
    }
}

#[utoipa::path(
    post,
    path = "/transactions",
    request_body = InitiateTransactionRequest,
    responses(
        (status = 201, description = "Transaction created", body = InitiateTransactionResponse),
        (status = 400, description = "Invalid input", body = ErrorBody),
        (status = 422, description = "Payment request declined", body = ErrorBody),
        (status = 502, description = "Payment gateway unreachable", body = ErrorBody)
    ),
    tag = "Transactions"
)]
pub async fn initiate(
    State(state): State<AppState>,
    payload: Result<Json<InitiateTransactionRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let outcome = state
        .orchestrator
        .initiate(InitiateRequest {
            owner_id: payload.user_id,
            source_amount: payload.source_amount,
            mobile_number: payload.mobile_number,
            wallet_address: payload.wallet_address,
            direction: payload.direction,
        })
        .await?;

    let tx = outcome.transaction;
    let response = InitiateTransactionResponse {
        transaction_id: tx.id,
        checkout_id: outcome.checkout_id,
        target_amount: tx.target_amount,
        exchange_rate: tx.exchange_rate,
        status: tx.status,
        customer_message: outcome.customer_message,
        deposit_address: outcome.deposit_address,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Current snapshot", body = TransactionView),
        (status = 404, description = "Unknown transaction", body = ErrorBody)
    ),
    tag = "Transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    let tx = state.orchestrator.poll_status(id).await?;
    Ok(Json(tx.into()))
}

#[utoipa::path(
    get,
    path = "/transactions/{id}/wait",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Terminal snapshot", body = TransactionView),
        (status = 404, description = "Unknown transaction", body = ErrorBody),
        (status = 408, description = "Still not terminal at the deadline", body = ErrorBody)
    ),
    tag = "Transactions"
)]
pub async fn wait_for_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    match state.poller.wait_for_terminal(&state.orchestrator, id).await? {
        PollOutcome::Terminal(tx) => Ok(Json(tx.into())),
        PollOutcome::TimedOut(last_seen) => Err(AppError::PollTimeout {
            status: last_seen.map(|tx| tx.status),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/transactions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "Cancelled", body = TransactionView),
        (status = 404, description = "Unknown transaction", body = ErrorBody),
        (status = 409, description = "Transaction is no longer pending", body = ErrorBody)
    ),
    tag = "Transactions"
)]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionView>, AppError> {
    let tx = state.orchestrator.cancel(id).await?;
    Ok(Json(tx.into()))
}
