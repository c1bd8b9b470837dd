//! Axum route handlers for the paywall server.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Uri;
use axum::routing::{get, post};
use axum::{Json, Router};
use l402::backend::{MockBackend, PaymentBackend};
use l402_http::server::Paygate;
use serde_json::{Value, json};

use crate::error::ServerError;

/// `GET /health`: Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Gate shared by the middleware and the handlers.
pub type SharedPaygate = Arc<Paygate<Arc<dyn PaymentBackend>>>;

/// Fallback behind the paywall. Protected paths are only reached once the
/// request is admitted; everything else is not found.
///
/// # Errors
///
/// Returns 404 for paths outside the protected routes.
pub async fn protected_resource(
    State(paygate): State<SharedPaygate>,
    uri: Uri,
) -> Result<Json<Value>, ServerError> {
    if !paygate.is_protected(uri.path()) {
        return Err(ServerError::NotFound(uri.path().to_owned()));
    }
    Ok(Json(json!({
        "message": "Access granted",
        "path": uri.path(),
    })))
}

/// `POST /mock/invoices/{payment_hash}/settle`: Marks a mock invoice as paid
/// and reveals its preimage, standing in for a wallet.
///
/// # Errors
///
/// Returns 404 if the mock backend never issued this invoice.
pub async fn mock_settle(
    State(backend): State<Arc<MockBackend>>,
    Path(payment_hash): Path<String>,
) -> Result<Json<Value>, ServerError> {
    if !backend.settle(&payment_hash) {
        return Err(ServerError::UnknownInvoice(payment_hash));
    }
    let preimage = backend
        .preimage_for(&payment_hash)
        .ok_or_else(|| ServerError::UnknownInvoice(payment_hash.clone()))?;
    tracing::info!(payment_hash = %payment_hash, "Mock invoice settled");
    Ok(Json(json!({
        "paymentHash": payment_hash,
        "preimage": preimage,
    })))
}

/// Builds the router exposing the mock wallet endpoint.
pub fn mock_router(backend: Arc<MockBackend>) -> Router {
    Router::new()
        .route("/mock/invoices/{payment_hash}/settle", post(mock_settle))
        .with_state(backend)
}

/// Builds the router for `/health`.
pub fn health_router() -> Router {
    Router::new().route("/health", get(health))
}
