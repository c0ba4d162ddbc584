//! Error response formatting
//!
//! Every handler error is rendered through [`ErrorResponse`] so clients always see the
//! same JSON shape.

use crate::error::{AppError, ErrorCode};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Standardized error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub error: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Payment the error relates to, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    /// Request ID for debugging and support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// RFC 3339 timestamp of the error
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// Whether the client should retry the request
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn from_app_error(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            order_id: error.order_id.clone(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: error.is_retryable(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn internal_error(request_id: Option<String>) -> Self {
        Self {
            error: ErrorCode::InternalError,
            message: "An internal server error occurred. Please try again later.".to_string(),
            order_id: None,
            request_id,
            timestamp: Utc::now().to_rfc3339(),
            details: None,
            retryable: false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status_code.is_server_error() {
            tracing::error!(
                error = ?self,
                request_id = ?self.request_id,
                order_id = ?self.order_id,
                status = %status_code.as_u16(),
                "Server error occurred"
            );
        } else {
            tracing::warn!(
                error = ?self.kind,
                request_id = ?self.request_id,
                order_id = ?self.order_id,
                status = %status_code.as_u16(),
                "Client error occurred"
            );
        }

        let mut error_response = ErrorResponse::from_app_error(&self);
        if let Some(context) = self.context.filter(|_| !status_code.is_server_error()) {
            error_response = error_response.with_details(serde_json::json!({ "context": context }));
        }
        (status_code, Json(error_response)).into_response()
    }
}

/// Helper to extract request ID from request headers
pub fn get_request_id_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppErrorKind, ExternalError, InfrastructureError, ValidationError};

    #[test]
    fn test_error_response_from_app_error() {
        let app_error = AppError::not_found("ord-77").with_request_id("req_123");

        let error_response = ErrorResponse::from_app_error(&app_error);

        assert_eq!(error_response.error, ErrorCode::PaymentNotFound);
        assert_eq!(error_response.request_id, Some("req_123".to_string()));
        assert_eq!(error_response.order_id, Some("ord-77".to_string()));
        assert!(!error_response.retryable);
    }

    #[test]
    fn test_error_response_serializes_camel_case() {
        let app_error = AppError::not_found("ord-1").with_request_id("req_1");
        let value = serde_json::to_value(ErrorResponse::from_app_error(&app_error)).unwrap();

        assert_eq!(value["error"], "PAYMENT_NOT_FOUND");
        assert_eq!(value["orderId"], "ord-1");
        assert_eq!(value["requestId"], "req_1");
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_app_error_into_response() {
        let app_error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        let response = app_error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_status_code_mapping() {
        let duplicate = AppError::new(AppErrorKind::External(ExternalError::DuplicateOrder {
            order_number: "2600000001".to_string(),
            message: "already processed".to_string(),
        }));
        assert_eq!(duplicate.into_response().status(), StatusCode::CONFLICT);

        let db = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Queue {
            message: "redis down".to_string(),
        }));
        assert_eq!(
            db.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_error_response() {
        let error = ErrorResponse::internal_error(Some("req_456".to_string()));

        assert_eq!(error.error, ErrorCode::InternalError);
        assert_eq!(error.request_id, Some("req_456".to_string()));
        assert!(error.message.contains("internal server error"));
    }
}
