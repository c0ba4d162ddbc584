use crate::payments::error::{PaymentError, PaymentResult};
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// Gateway code meaning the merchant order number was already used.
pub const ERROR_CODE_ALREADY_PROCESSED: i64 = 1;

/// Order registration request sent to the card gateway.
#[derive(Debug, Clone)]
pub struct RegisterOrder {
    /// Merchant-side sequential order number (`gateway_order_number`)
    pub order_number: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub return_url: String,
    pub fail_url: String,
    pub language: String,
}

/// Successful registration: the gateway order id and the hosted card form.
#[derive(Debug, Clone)]
pub struct RegisteredOrder {
    pub order_id: String,
    pub form_url: String,
    pub raw: JsonValue,
}

/// Card gateway operations used by the pipeline. Implementations hold their own
/// merchant credentials.
#[async_trait]
pub trait CardGateway: Send + Sync {
    /// Register an order. `errorCode == 1` maps to
    /// [`PaymentError::DuplicateOrderError`], any other non-zero code to
    /// [`PaymentError::GatewayError`].
    async fn register(&self, order: &RegisterOrder) -> PaymentResult<RegisteredOrder>;

    /// Confirm the outcome of a card session. Returns the raw gateway payload; the
    /// success decision is made by [`crate::payments::ack_rules`].
    async fn acknowledge(&self, order_id: &str) -> PaymentResult<JsonValue>;

    fn name(&self) -> &'static str;
}

/// Read a field that the gateway sends either as a JSON number or a numeric string.
pub fn numeric_field(value: &JsonValue, key: &str) -> Option<i64> {
    match value.get(key)? {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a `register.do` response body.
pub fn interpret_register_response(
    order_number: &str,
    raw: JsonValue,
) -> PaymentResult<RegisteredOrder> {
    let error_code = numeric_field(&raw, "errorCode").unwrap_or(-1);
    let message = raw
        .get("errorMessage")
        .and_then(|v| v.as_str())
        .unwrap_or("no error message")
        .to_string();

    match error_code {
        0 => {
            let order_id = raw
                .get("orderId")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| PaymentError::ProviderError {
                    provider: "gateway".to_string(),
                    message: "register response without orderId".to_string(),
                    provider_code: Some("0".to_string()),
                    retryable: false,
                })?
                .to_string();
            let form_url = raw
                .get("formUrl")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            Ok(RegisteredOrder {
                order_id,
                form_url,
                raw,
            })
        }
        ERROR_CODE_ALREADY_PROCESSED => Err(PaymentError::DuplicateOrderError {
            order_number: order_number.to_string(),
            message,
        }),
        code => Err(PaymentError::GatewayError { code, message }),
    }
}
