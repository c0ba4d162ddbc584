//! Unified error handling for the settlement bridge
//!
//! Every failure that can reach an HTTP client is expressed as an [`AppError`],
//! which carries the HTTP status, a machine-readable [`ErrorCode`] and a message
//! that is safe to show outside the process.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "RECEIPT_UNAVAILABLE")]
    ReceiptUnavailable,
    #[serde(rename = "INVALID_PAYMENT_STATE")]
    InvalidPaymentState,
    #[serde(rename = "DUPLICATE_ORDER")]
    DuplicateOrder,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "QUEUE_ERROR")]
    QueueError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "TRANSIENT_NETWORK_ERROR")]
    TransientNetworkError,
    #[serde(rename = "ERP_VALIDATION_ERROR")]
    ErpValidationError,
    #[serde(rename = "UPSTREAM_ERROR")]
    UpstreamError,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations on the payment aggregate
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment with this order id
    PaymentNotFound { order_id: String },
    /// The payment never received a successful acknowledgment
    ReceiptUnavailable { order_id: String },
    /// The requested operation is not allowed from the current status
    InvalidState {
        order_id: String,
        status: String,
        reason: String,
    },
}

/// Infrastructure-level errors (database, broker, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Queue { message: String },
    Configuration { message: String },
}

/// Failures reported by, or while talking to, the gateway and the ERP
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Gateway `errorCode == 1`
    DuplicateOrder {
        order_number: String,
        message: String,
    },
    /// Gateway business refusal
    Gateway { code: i64, message: String },
    /// Timeout or connection failure
    Network { message: String },
    /// ERP 4xx
    ErpRejected { status: u16, message: String },
    /// Unexpected upstream answer (5xx, malformed body)
    Upstream {
        service: String,
        message: String,
        is_retryable: bool,
    },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    MissingField { field: String },
    InvalidField { field: String, reason: String },
    InvalidAmount { amount: String, reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub order_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            order_id: None,
            context: None,
        }
    }

    pub fn not_found(order_id: impl Into<String>) -> Self {
        let order_id = order_id.into();
        Self::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            order_id: order_id.clone(),
        }))
        .with_order_id(order_id)
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::ReceiptUnavailable { .. } => 404,
                DomainError::InvalidState { .. } => 400,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::DuplicateOrder { .. } => 409,
                ExternalError::Gateway { .. } => 502,
                ExternalError::Network { .. } => 503,
                ExternalError::ErpRejected { .. } => 422,
                ExternalError::Upstream { .. } => 502,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::ReceiptUnavailable { .. } => ErrorCode::ReceiptUnavailable,
                DomainError::InvalidState { .. } => ErrorCode::InvalidPaymentState,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Queue { .. } => ErrorCode::QueueError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::DuplicateOrder { .. } => ErrorCode::DuplicateOrder,
                ExternalError::Gateway { .. } => ErrorCode::GatewayError,
                ExternalError::Network { .. } => ErrorCode::TransientNetworkError,
                ExternalError::ErpRejected { .. } => ErrorCode::ErpValidationError,
                ExternalError::Upstream { .. } => ErrorCode::UpstreamError,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-facing error message. Never contains upstream bodies or credentials
    /// for 5xx errors.
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { order_id } => {
                    format!("Payment '{}' not found", order_id)
                }
                DomainError::ReceiptUnavailable { order_id } => {
                    format!("No confirmed payment receipt for order '{}'", order_id)
                }
                DomainError::InvalidState {
                    order_id,
                    status,
                    reason,
                } => format!(
                    "Payment '{}' is in status '{}': {}",
                    order_id, status, reason
                ),
            },
            AppErrorKind::Infrastructure(_) => match &self.order_id {
                Some(order_id) => format!(
                    "Service temporarily unavailable while processing order '{}'. Please try again later",
                    order_id
                ),
                None => "Service temporarily unavailable. Please try again later".to_string(),
            },
            AppErrorKind::External(err) => match err {
                ExternalError::DuplicateOrder { order_number, .. } => {
                    format!("Order '{}' has already been processed", order_number)
                }
                ExternalError::Gateway { code, message } => {
                    format!("Payment gateway refused the request (code {}): {}", code, message)
                }
                ExternalError::Network { .. } => {
                    "Payment service is temporarily unreachable. Please try again".to_string()
                }
                ExternalError::ErpRejected { .. } => {
                    "The accounting system rejected the payment document".to_string()
                }
                ExternalError::Upstream { service, .. } => {
                    format!("{} returned an unexpected response", service)
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Queue { .. } => true,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::DuplicateOrder { .. } => false,
                ExternalError::Gateway { .. } => false,
                ExternalError::Network { .. } => true,
                ExternalError::ErpRejected { .. } => false,
                ExternalError::Upstream { is_retryable, .. } => *is_retryable,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

// From<DatabaseError> lives in database/error.rs, From<QueueError> in queue/error.rs.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_not_found_error() {
        let error = AppError::not_found("ord-1");

        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::PaymentNotFound);
        assert_eq!(error.order_id.as_deref(), Some("ord-1"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_duplicate_order_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::DuplicateOrder {
            order_number: "2600000042".to_string(),
            message: "Order already processed".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicateOrder);
        assert!(error.user_message().contains("2600000042"));
    }

    #[test]
    fn test_network_error_is_retryable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Network {
            message: "connect timeout".to_string(),
        }));

        assert_eq!(error.status_code(), 503);
        assert_eq!(error.error_code(), ErrorCode::TransientNetworkError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_infrastructure_message_is_generic() {
        let error = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "password authentication failed for user settlement".to_string(),
            is_retryable: false,
        }))
        .with_order_id("ord-9");

        assert_eq!(error.status_code(), 500);
        let message = error.user_message();
        assert!(message.contains("ord-9"));
        assert!(!message.contains("password"));
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount must be positive".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
