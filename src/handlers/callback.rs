use axum::{body::Bytes, extract::State, Json};

use crate::error::{AppError, ErrorBody};
use crate::mpesa::CallbackAck;
use crate::services::CallbackOutcome;
use crate::utils::sanitize::sanitize_json;
use crate::AppState;

/// Confirmation webhook for STK push payments.
///
/// Any durably processed event is acknowledged, including ones whose token
/// transfer failed. Malformed bodies, unknown checkout ids and ledger
/// failures get a non-2xx so the gateway re-delivers.
#[utoipa::path(
    post,
    path = "/callbacks/mpesa",
    request_body(content = String, description = "STK push callback envelope", content_type = "application/json"),
    responses(
        (status = 200, description = "Event processed", body = CallbackAck),
        (status = 400, description = "Malformed callback", body = ErrorBody),
        (status = 403, description = "Caller not in the allowlist", body = ErrorBody),
        (status = 404, description = "Unknown checkout id", body = ErrorBody),
        (status = 500, description = "Ledger failure", body = ErrorBody)
    ),
    tag = "Callbacks"
)]
pub async fn mpesa_callback(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CallbackAck>, AppError> {
    match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(json) => tracing::info!(payload = %sanitize_json(&json), "M-Pesa callback received"),
        Err(_) => tracing::warn!(body_size = body.len(), "M-Pesa callback with non-JSON body"),
    }

    let outcome = state.orchestrator.handle_callback(&body).await?;

    let tx = outcome.transaction();
    match &outcome {
        CallbackOutcome::Completed(_) => {
            tracing::info!(transaction_id = %tx.id, "callback completed transaction")
        }
        CallbackOutcome::TransferFailed(_) => tracing::error!(
            transaction_id = %tx.id,
            receipt = ?tx.gateway_receipt_id,
            "payment received but token transfer failed"
        ),
        CallbackOutcome::PaymentFailed(_) => {
            tracing::info!(transaction_id = %tx.id, "callback reported failed payment")
        }
        CallbackOutcome::Duplicate(_) => {
            tracing::info!(transaction_id = %tx.id, status = %tx.status, "duplicate callback acknowledged")
        }
    }

    Ok(Json(CallbackAck::accepted()))
}
