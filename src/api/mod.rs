//! HTTP surface
//!
//! Client-facing payment endpoints, the gateway return URL, operator endpoints and
//! health probes. Every route shares one [`AppState`].

pub mod payments;

use crate::database::repository::PaymentStore;
use crate::health::{HealthChecker, HealthStatus};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::queue::JobQueue;
use crate::services::{ReceiptRenderer, RegistrationService};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub queue: Arc<dyn JobQueue>,
    pub registration: Arc<RegistrationService>,
    pub receipts: Arc<dyn ReceiptRenderer>,
    pub health_checker: HealthChecker,
    /// Base URL of the client result page the return handler redirects to
    pub frontend_url: String,
}

/// Build the application router with request-id and logging layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/payment/prepare", post(payments::prepare_payment))
        .route("/payment/register", post(payments::register_payment))
        .route("/payment/return", get(payments::payment_return))
        .route("/payment/status", get(payments::payment_status))
        .route("/payments", get(payments::list_payments))
        .route("/payments/{order_id}", get(payments::get_payment))
        .route("/payments/{order_id}/retry", post(payments::retry_payment))
        .route("/payments/{order_id}/receipt", get(payments::get_receipt))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let health_status = state.health_checker.check_health().await;
    if health_status.is_healthy() {
        (StatusCode::OK, Json(health_status))
    } else {
        error!("❌ Health check failed - service unhealthy");
        (StatusCode::SERVICE_UNAVAILABLE, Json(health_status))
    }
}

/// Liveness probe - the process is up and serving requests
async fn liveness() -> Json<serde_json::Value> {
    info!("💓 Liveness probe requested");
    Json(serde_json::json!({ "ok": true, "status": "alive" }))
}
