use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// Gateway `errorCode == 1`: the merchant order number was already registered.
    #[error("Order already processed: order_number={order_number}, message={message}")]
    DuplicateOrderError {
        order_number: String,
        message: String,
    },

    /// Any other non-zero gateway `errorCode`.
    #[error("Gateway error: code={code}, message={message}")]
    GatewayError { code: i64, message: String },

    /// Timeouts, refused connections, DNS failures.
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// The ERP answered with a 4xx.
    #[error("ERP rejected the document: status={status}, message={message}")]
    ErpValidationError { status: u16, message: String },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn validation(message: impl Into<String>, field: &str) -> Self {
        PaymentError::ValidationError {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::DuplicateOrderError { .. } => false,
            PaymentError::GatewayError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::ErpValidationError { .. } => false,
            PaymentError::ProviderError { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ValidationError { .. } => 400,
            PaymentError::DuplicateOrderError { .. } => 409,
            PaymentError::GatewayError { .. } => 502,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::ErpValidationError { .. } => 422,
            PaymentError::ProviderError { .. } => 502,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::DuplicateOrderError { .. } => {
                "This order has already been processed by the payment gateway".to_string()
            }
            PaymentError::GatewayError { message, .. } => {
                format!("Payment gateway refused the request: {}", message)
            }
            PaymentError::NetworkError { .. } => {
                "Payment service is temporarily unavailable".to_string()
            }
            PaymentError::ErpValidationError { .. } => {
                "The accounting system rejected the payment document".to_string()
            }
            PaymentError::ProviderError { .. } => "Upstream service returned an error".to_string(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};

        match err {
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.unwrap_or_else(|| "request".to_string()),
                    reason: message,
                }))
            }
            PaymentError::DuplicateOrderError {
                order_number,
                message,
            } => AppError::new(AppErrorKind::External(ExternalError::DuplicateOrder {
                order_number,
                message,
            })),
            PaymentError::GatewayError { code, message } => {
                AppError::new(AppErrorKind::External(ExternalError::Gateway { code, message }))
            }
            PaymentError::NetworkError { message } => {
                AppError::new(AppErrorKind::External(ExternalError::Network { message }))
            }
            PaymentError::ErpValidationError { status, message } => {
                AppError::new(AppErrorKind::External(ExternalError::ErpRejected {
                    status,
                    message,
                }))
            }
            PaymentError::ProviderError {
                provider,
                message,
                retryable,
                ..
            } => AppError::new(AppErrorKind::External(ExternalError::Upstream {
                service: provider,
                message,
                is_retryable: retryable,
            })),
        }
    }
}
