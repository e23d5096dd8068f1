use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::domain::TransactionStatus;
use crate::services::OrchestratorError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    GatewayRejected(String),

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("transaction did not reach a terminal status in time")]
    PollTimeout { status: Option<TransactionStatus> },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub status: u16,
    /// Last observed transaction status, on poll timeouts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_status: Option<TransactionStatus>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) | AppError::Database(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Auth(_) | AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::PollTimeout { .. } => StatusCode::REQUEST_TIMEOUT,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Configuration(_) => "configuration_error",
            AppError::Auth(_) => "auth_error",
            AppError::GatewayRejected(_) => "gateway_rejected",
            AppError::Transport(_) => "transport_error",
            AppError::NotFound(_) => "not_found",
            AppError::Forbidden(_) => "forbidden",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Database(_) => "database_error",
            AppError::PollTimeout { .. } => "poll_timeout",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn body(&self) -> ErrorBody {
        let transaction_status = match self {
            AppError::PollTimeout { status } => *status,
            _ => None,
        };
        ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            status: self.status_code().as_u16(),
            transaction_status,
        }
    }
}

impl From<OrchestratorError> for AppError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(e) => AppError::Validation(e.to_string()),
            OrchestratorError::Configuration(msg) => AppError::Configuration(msg),
            OrchestratorError::Auth { .. } => AppError::Auth(err.to_string()),
            OrchestratorError::GatewayRejected { .. } => AppError::GatewayRejected(err.to_string()),
            OrchestratorError::Transport { .. } => AppError::Transport(err.to_string()),
            OrchestratorError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            OrchestratorError::InvalidState { .. } => AppError::InvalidState(err.to_string()),
            OrchestratorError::MalformedCallback(msg) => AppError::BadRequest(msg),
            OrchestratorError::Repository(e) => AppError::Database(e.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }

        (status, Json(self.body())).into_response()
    }
}
