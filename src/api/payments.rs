use crate::api::AppState;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::middleware::error::get_request_id_from_headers;
use crate::payments::types::{ActionType, Payment, PaymentAction, PaymentStatus, PaymentUpdate};
use crate::queue::{EnqueueOutcome, JobKind};
use crate::services::{
    PrepareRequest, PrepareResponse, ReceiptData, RegisterRequest, RegisterResponse,
};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

fn tag(err: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}

fn invalid_body(rejection: JsonRejection) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
        field: "body".to_string(),
        reason: rejection.body_text(),
    }))
}

/// POST /payment/prepare
pub async fn prepare_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<PrepareRequest>, JsonRejection>,
) -> Result<Json<PrepareResponse>, AppError> {
    let Json(request) = body.map_err(|e| tag(invalid_body(e), &headers))?;
    let response = state
        .registration
        .prepare(request)
        .await
        .map_err(|e| tag(e, &headers))?;
    Ok(Json(response))
}

/// POST /payment/register
pub async fn register_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, AppError> {
    let Json(request) = body.map_err(|e| tag(invalid_body(e), &headers))?;
    let response = state
        .registration
        .register(request)
        .await
        .map_err(|e| tag(e, &headers))?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
    /// Some gateway versions send the order id as `mdOrder`
    #[serde(rename = "mdOrder")]
    pub md_order: Option<String>,
}

impl ReturnQuery {
    fn order_id(&self) -> Option<&str> {
        self.order_id
            .as_deref()
            .or(self.md_order.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// GET /payment/return
///
/// Customer browser lands here after the card form. Enqueues the acknowledgment and
/// redirects to the client result page without waiting for the gateway.
pub async fn payment_return(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReturnQuery>,
) -> Result<Response, AppError> {
    let order_id = query
        .order_id()
        .ok_or_else(|| tag(AppError::missing_field("orderId"), &headers))?
        .to_string();

    let outcome = state
        .queue
        .enqueue(JobKind::Acknowledge, &order_id)
        .await
        .map_err(|e| tag(AppError::from(e).with_order_id(order_id.clone()), &headers))?;

    let update = PaymentUpdate::new(PaymentAction::new(
        ActionType::ReturnReceived,
        json!({ "ackJob": matches!(outcome, EnqueueOutcome::Enqueued) }),
    ));
    match state
        .store
        .apply(&order_id, &PaymentStatus::ALL, update)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => warn!(order_id = %order_id, "Return received for unknown order"),
        Err(e) => warn!(order_id = %order_id, error = %e, "Failed to record return"),
    }

    info!(order_id = %order_id, outcome = ?outcome, "↩️  Gateway return received");

    let location = result_url(&state.frontend_url, &order_id);
    let escaped = escape_html(&location);
    let body = format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\">\
         <meta http-equiv=\"refresh\" content=\"0;url={0}\"></head>\
         <body><p>Redirecting to <a href=\"{0}\">{0}</a></p></body></html>",
        escaped
    );

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (header::CONTENT_TYPE, "text/html; charset=utf-8".to_string()),
        ],
        body,
    )
        .into_response())
}

fn result_url(frontend_url: &str, order_id: &str) -> String {
    let base = format!("{}/result", frontend_url.trim_end_matches('/'));
    match reqwest::Url::parse_with_params(&base, &[("orderId", order_id)]) {
        Ok(url) => url.to_string(),
        Err(_) => format!("{}?orderId={}", base, order_id),
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /payment/status
pub async fn payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, AppError> {
    let order_id = query
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| tag(AppError::missing_field("orderId"), &headers))?;

    let payment = state
        .store
        .find_by_order_id(order_id)
        .await
        .map_err(|e| tag(AppError::from(e), &headers))?;

    Ok(Json(match payment {
        Some(payment) => StatusResponse {
            order_id: Some(payment.order_id),
            status: payment.status.to_string(),
            last_error: payment.last_error,
        },
        None => StatusResponse {
            order_id: None,
            status: "unknown".to_string(),
            last_error: None,
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /payments
pub async fn list_payments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let payments = state
        .store
        .list(limit)
        .await
        .map_err(|e| tag(AppError::from(e), &headers))?;
    Ok(Json(payments))
}

async fn load(state: &AppState, order_id: &str, headers: &HeaderMap) -> Result<Payment, AppError> {
    state
        .store
        .find_by_order_id(order_id)
        .await
        .map_err(|e| tag(AppError::from(e).with_order_id(order_id), headers))?
        .ok_or_else(|| tag(AppError::not_found(order_id), headers))
}

/// GET /payments/{order_id}
pub async fn get_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(load(&state, &order_id, &headers).await?))
}

/// POST /payments/{order_id}/retry
///
/// Operator retry: resets the payment to `registered` and re-enqueues the
/// acknowledgment.
pub async fn retry_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Json<Payment>, AppError> {
    let payment = load(&state, &order_id, &headers).await?;
    let sources = PaymentStatus::manual_retry_sources();
    if !sources.contains(&payment.status) {
        return Err(tag(
            AppError::new(AppErrorKind::Domain(DomainError::InvalidState {
                order_id: order_id.clone(),
                status: payment.status.to_string(),
                reason: "payment was never registered with the gateway".to_string(),
            }))
            .with_order_id(order_id),
            &headers,
        ));
    }

    let update = PaymentUpdate::new(PaymentAction::new(
        ActionType::ManualRetry,
        json!({ "previousStatus": payment.status }),
    ))
    .status(PaymentStatus::Registered)
    .increment_retry()
    .clear_last_error();

    let updated = state
        .store
        .apply(&order_id, &sources, update)
        .await
        .map_err(|e| tag(AppError::from(e).with_order_id(order_id.clone()), &headers))?
        .ok_or_else(|| tag(AppError::not_found(order_id.clone()), &headers))?;

    let outcome = state
        .queue
        .enqueue(JobKind::Acknowledge, &order_id)
        .await
        .map_err(|e| tag(AppError::from(e).with_order_id(order_id.clone()), &headers))?;

    info!(
        order_id = %order_id,
        previous_status = %payment.status,
        retry_count = updated.retry_count,
        outcome = ?outcome,
        "🔁 Manual retry requested"
    );
    Ok(Json(updated))
}

/// GET /payments/{order_id}/receipt
pub async fn get_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Result<Response, AppError> {
    let payment = load(&state, &order_id, &headers).await?;
    let data = ReceiptData::from_payment(&payment).map_err(|e| tag(e, &headers))?;
    let document = state.receipts.render(&data);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, document.content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename={}", document.filename),
            ),
        ],
        document.body,
    )
        .into_response())
}
