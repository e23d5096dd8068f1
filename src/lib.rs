pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod mpesa;
pub mod openapi;
pub mod ports;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod tron;
pub mod utils;
pub mod validation;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::middleware::{guard_callback_source, request_logger_middleware, CallbackSourcePolicy};
use crate::services::{StatusPoller, TransactionOrchestrator};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: TransactionOrchestrator,
    pub poller: StatusPoller,
}

/// Builds the HTTP surface. The callback route alone checks its caller;
/// serve with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// check can see the peer address.
pub fn create_app(state: AppState, callback_sources: CallbackSourcePolicy) -> Router {
    let callbacks = Router::new()
        .route("/callbacks/mpesa", post(handlers::callback::mpesa_callback))
        .route_layer(axum_middleware::from_fn_with_state(
            callback_sources,
            guard_callback_source,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions", post(handlers::transactions::initiate))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/transactions/:id/wait",
            get(handlers::transactions::wait_for_transaction),
        )
        .route(
            "/transactions/:id/cancel",
            post(handlers::transactions::cancel_transaction),
        )
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .merge(callbacks)
        .layer(axum_middleware::from_fn(request_logger_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
