use axum::Json;
use utoipa::OpenApi;

use crate::domain::{TransactionStatus, TransactionType};
use crate::error::ErrorBody;
use crate::handlers;
use crate::handlers::transactions::{
    InitiateTransactionRequest, InitiateTransactionResponse, TransactionView,
};
use crate::mpesa::CallbackAck;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::health,
        handlers::transactions::initiate,
        handlers::transactions::get_transaction,
        handlers::transactions::wait_for_transaction,
        handlers::transactions::cancel_transaction,
        handlers::callback::mpesa_callback,
    ),
    components(schemas(
        handlers::HealthStatus,
        InitiateTransactionRequest,
        InitiateTransactionResponse,
        TransactionView,
        TransactionStatus,
        TransactionType,
        CallbackAck,
        ErrorBody,
    )),
    tags(
        (name = "Transactions", description = "Mobile-money <-> token exchanges"),
        (name = "Callbacks", description = "Payment gateway webhooks"),
        (name = "Health", description = "Liveness")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
