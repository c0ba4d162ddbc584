//! Registration Service
//!
//! Prepares invoice payments (ERP amount lookup, confirmation token) and registers
//! them with the card gateway.

use crate::database::repository::PaymentStore;
use crate::error::{AppError, AppErrorKind, DomainError, ValidationError};
use crate::payments::erp::ErpClient;
use crate::payments::error::PaymentError;
use crate::payments::gateway::{CardGateway, RegisterOrder};
use crate::payments::types::{
    major_to_minor, minor_to_major, parse_major_amount, ActionType, NewPayment, Payment,
    PaymentAction, PaymentStatus, PaymentUpdate, StagePayload,
};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, OnceLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const MAX_REFERENCE_LEN: usize = 64;

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9]+$").expect("reference pattern is valid"))
}

fn currency_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{3}$").expect("currency pattern is valid"))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub fail_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub order_number: String,
    pub account_id: String,
    /// Major units, e.g. `500.00`
    #[serde(with = "rust_decimal::serde::float")]
    pub amount_to_pay: Decimal,
    pub currency: String,
    pub confirmation_token: Uuid,
    pub return_url: String,
    pub fail_url: String,
}

/// Either `{confirmationToken}` or the explicit `{orderNumber, amount, ...}` form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub confirmation_token: Option<String>,
    #[serde(default)]
    pub order_number: Option<String>,
    /// Major units, as a JSON number or a decimal string
    #[serde(default)]
    pub amount: Option<JsonValue>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub fail_url: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub order_id: String,
    pub form_url: String,
}

pub struct RegistrationService {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn CardGateway>,
    erp: Arc<dyn ErpClient>,
    default_currency: String,
    language: String,
}

impl RegistrationService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn CardGateway>,
        erp: Arc<dyn ErpClient>,
        default_currency: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            erp,
            default_currency: default_currency.into(),
            language: language.into(),
        }
    }

    /// Look up the outstanding invoice amount and create a `pending` payment.
    #[instrument(skip(self, request), fields(order_number = ?request.order_number))]
    pub async fn prepare(&self, request: PrepareRequest) -> Result<PrepareResponse, AppError> {
        let order_number = require_reference("orderNumber", request.order_number.as_deref())?;
        let account_id = require_reference("accountId", request.account_id.as_deref())?;
        let return_url = require_url("returnUrl", request.return_url.as_deref())?;
        let fail_url = require_url("failUrl", request.fail_url.as_deref())?;

        let pending = self
            .erp
            .fetch_pending_amount(&order_number)
            .await
            .map_err(|e| AppError::from(e).with_context(format!("invoice {}", order_number)))?;

        let amount = positive_minor_amount(pending.amount)?;
        let currency = if pending.currency.trim().is_empty() {
            self.default_currency.clone()
        } else {
            pending.currency.trim().to_string()
        };

        let payment = self
            .create_pending(
                &order_number,
                Some(account_id.clone()),
                amount,
                &currency,
                &return_url,
                &fail_url,
                json!({ "source": "prepare", "erpAmount": pending.amount.to_string() }),
            )
            .await?;

        let token = payment
            .confirmation_token
            .ok_or_else(|| AppError::new(AppErrorKind::Domain(DomainError::InvalidState {
                order_id: payment.order_id.clone(),
                status: payment.status.to_string(),
                reason: "payment created without a confirmation token".to_string(),
            })))?;

        info!(
            order_id = %payment.order_id,
            order_number = %order_number,
            amount = payment.amount,
            "💳 Payment prepared"
        );

        Ok(PrepareResponse {
            order_number,
            account_id,
            amount_to_pay: minor_to_major(payment.amount),
            currency,
            confirmation_token: token,
            return_url,
            fail_url,
        })
    }

    /// Register a `pending` payment with the gateway and return the hosted form.
    #[instrument(skip(self, request))]
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResponse, AppError> {
        let token = request
            .confirmation_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let payment = match token {
            Some(token) => self.resolve_token(token).await?,
            None => self.create_from_explicit(&request).await?,
        };

        if payment.status != PaymentStatus::Pending {
            return Err(already_registered(&payment));
        }

        let return_url = match request.return_url.as_deref() {
            Some(url) if !url.trim().is_empty() => require_url("returnUrl", Some(url))?,
            _ => payment
                .return_url
                .clone()
                .ok_or_else(|| AppError::missing_field("returnUrl"))?,
        };
        let fail_url = match request.fail_url.as_deref() {
            Some(url) if !url.trim().is_empty() => require_url("failUrl", Some(url))?,
            _ => payment
                .fail_url
                .clone()
                .ok_or_else(|| AppError::missing_field("failUrl"))?,
        };

        let order = RegisterOrder {
            order_number: payment.gateway_order_number.clone(),
            amount: payment.amount,
            currency: payment.currency.clone(),
            return_url,
            fail_url,
            language: self.language.clone(),
        };

        let registered = self.gateway.register(&order).await.map_err(|e| {
            warn!(
                order_id = %payment.order_id,
                gateway = self.gateway.name(),
                error = %e,
                "Gateway registration failed"
            );
            AppError::from(e).with_order_id(payment.order_id.clone())
        })?;

        let update = PaymentUpdate::new(PaymentAction::new(
            ActionType::Registered,
            json!({ "orderId": registered.order_id, "formUrl": registered.form_url }),
        ))
        .status(PaymentStatus::Registered)
        .rekey(registered.order_id.clone())
        .payload(StagePayload::RegisterResponse(registered.raw.clone()))
        .consume_token()
        .clear_last_error();

        let updated = self
            .store
            .apply(&payment.order_id, &[PaymentStatus::Pending], update)
            .await
            .map_err(AppError::from)?;

        let Some(updated) = updated else {
            // Lost the race against a concurrent register of the same payment.
            return Err(already_registered(&payment));
        };

        info!(
            order_id = %updated.order_id,
            gateway_order_number = %updated.gateway_order_number,
            "✅ Payment registered with gateway"
        );

        Ok(RegisterResponse {
            order_id: registered.order_id,
            form_url: registered.form_url,
        })
    }

    async fn resolve_token(&self, token: &str) -> Result<Payment, AppError> {
        let unknown = || {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
                field: "confirmationToken".to_string(),
                reason: "unknown or already used confirmation token".to_string(),
            }))
        };
        let token = Uuid::parse_str(token).map_err(|_| unknown())?;
        self.store
            .find_by_token(token)
            .await
            .map_err(AppError::from)?
            .ok_or_else(unknown)
    }

    async fn create_from_explicit(&self, request: &RegisterRequest) -> Result<Payment, AppError> {
        let order_number = require_reference("orderNumber", request.order_number.as_deref())?;
        let account_id = match request.account_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Some(require_reference("accountId", Some(id))?),
            _ => None,
        };
        let return_url = require_url("returnUrl", request.return_url.as_deref())?;
        let fail_url = require_url("failUrl", request.fail_url.as_deref())?;

        let major = match &request.amount {
            None | Some(JsonValue::Null) => return Err(AppError::missing_field("amount")),
            Some(JsonValue::String(raw)) => parse_major_amount(raw).map_err(AppError::from)?,
            Some(JsonValue::Number(n)) => parse_major_amount(&n.to_string()).map_err(AppError::from)?,
            Some(other) => {
                return Err(AppError::new(AppErrorKind::Validation(
                    ValidationError::InvalidAmount {
                        amount: other.to_string(),
                        reason: "amount must be a number or a decimal string".to_string(),
                    },
                )))
            }
        };
        let amount = positive_minor_amount(major)?;

        let currency = match request.currency.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                if !currency_pattern().is_match(code) {
                    return Err(AppError::new(AppErrorKind::Validation(
                        ValidationError::InvalidField {
                            field: "currency".to_string(),
                            reason: "currency must be a 3-digit numeric code".to_string(),
                        },
                    )));
                }
                code.to_string()
            }
            _ => self.default_currency.clone(),
        };

        self.create_pending(
            &order_number,
            account_id,
            amount,
            &currency,
            &return_url,
            &fail_url,
            json!({ "source": "register" }),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_pending(
        &self,
        order_number: &str,
        account_id: Option<String>,
        amount: i64,
        currency: &str,
        return_url: &str,
        fail_url: &str,
        details: JsonValue,
    ) -> Result<Payment, AppError> {
        let gateway_order_number = self
            .store
            .next_gateway_order_number()
            .await
            .map_err(AppError::from)?;

        let mut details = details;
        if let JsonValue::Object(map) = &mut details {
            map.insert("amount".to_string(), json!(amount));
            map.insert("gatewayOrderNumber".to_string(), json!(gateway_order_number));
        }

        self.store
            .create(NewPayment {
                gateway_order_number,
                order_number: order_number.to_string(),
                account_id,
                amount,
                currency: currency.to_string(),
                confirmation_token: Uuid::new_v4(),
                return_url: Some(return_url.to_string()),
                fail_url: Some(fail_url.to_string()),
                action: PaymentAction::new(ActionType::Prepared, details),
            })
            .await
            .map_err(AppError::from)
    }
}

fn already_registered(payment: &Payment) -> AppError {
    AppError::new(AppErrorKind::Validation(ValidationError::InvalidField {
        field: "confirmationToken".to_string(),
        reason: format!("payment is already {}", payment.status),
    }))
    .with_order_id(payment.order_id.clone())
}

fn require_reference(field: &str, value: Option<&str>) -> Result<String, AppError> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(AppError::missing_field(field));
    }
    if value.len() > MAX_REFERENCE_LEN || !reference_pattern().is_match(value) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: field.to_string(),
                reason: format!("{} must be alphanumeric", field),
            },
        )));
    }
    Ok(value.to_string())
}

fn require_url(field: &str, value: Option<&str>) -> Result<String, AppError> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(AppError::missing_field(field));
    }
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(AppError::new(AppErrorKind::Validation(
            ValidationError::InvalidField {
                field: field.to_string(),
                reason: format!("{} must start with http:// or https://", field),
            },
        )));
    }
    Ok(value.to_string())
}

fn positive_minor_amount(major: Decimal) -> Result<i64, AppError> {
    let minor = major_to_minor(major).map_err(AppError::from)?;
    if minor <= 0 {
        return Err(PaymentError::validation(
            format!("amount to pay must be positive, got {}", major),
            "amount",
        )
        .into());
    }
    Ok(minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentStore;
    use crate::payments::erp::{ErpPaymentDocument, PendingAmount};
    use crate::payments::error::PaymentResult;
    use crate::payments::gateway::{interpret_register_response, RegisteredOrder};
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::Mutex;

    struct FixedErp(Decimal);

    #[async_trait]
    impl ErpClient for FixedErp {
        async fn fetch_pending_amount(&self, _order_number: &str) -> PaymentResult<PendingAmount> {
            Ok(PendingAmount {
                amount: self.0,
                currency: "012".to_string(),
            })
        }

        async fn post_payment(&self, _document: &ErpPaymentDocument) -> PaymentResult<JsonValue> {
            Ok(json!({}))
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    /// Replies with the scripted bodies in order and records the requests.
    struct ScriptedGateway {
        replies: Mutex<Vec<JsonValue>>,
        seen: Mutex<Vec<RegisterOrder>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<JsonValue>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CardGateway for ScriptedGateway {
        async fn register(&self, order: &RegisterOrder) -> PaymentResult<RegisteredOrder> {
            self.seen.lock().unwrap().push(order.clone());
            let reply = self.replies.lock().unwrap().remove(0);
            interpret_register_response(&order.order_number, reply)
        }

        async fn acknowledge(&self, _order_id: &str) -> PaymentResult<JsonValue> {
            Ok(json!({}))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn service(
        store: Arc<InMemoryPaymentStore>,
        gateway: Arc<ScriptedGateway>,
        amount: &str,
    ) -> RegistrationService {
        RegistrationService::new(
            store,
            gateway,
            Arc::new(FixedErp(Decimal::from_str(amount).unwrap())),
            "012",
            "FR",
        )
    }

    fn prepare_request() -> PrepareRequest {
        PrepareRequest {
            order_number: Some("INV1001".to_string()),
            account_id: Some("C42".to_string()),
            return_url: Some("https://shop.test/ok".to_string()),
            fail_url: Some("https://shop.test/ko".to_string()),
        }
    }

    #[tokio::test]
    async fn test_prepare_scales_amount_and_stores_pending() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let svc = service(store.clone(), Arc::new(ScriptedGateway::new(vec![])), "500.00");

        let response = svc.prepare(prepare_request()).await.unwrap();
        assert_eq!(response.amount_to_pay, Decimal::from_str("500.00").unwrap());

        let payment = store
            .find_by_token(response.confirmation_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.amount, 50000);
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.actions.len(), 1);
        assert!(payment.has_action(ActionType::Prepared));
    }

    #[tokio::test]
    async fn test_prepare_rejects_zero_amount_and_bad_input() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let svc = service(store.clone(), Arc::new(ScriptedGateway::new(vec![])), "0");
        let err = svc.prepare(prepare_request()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(store.is_empty().await);

        let mut bad = prepare_request();
        bad.order_number = Some("INV-1001; DROP".to_string());
        assert_eq!(svc.prepare(bad).await.unwrap_err().status_code(), 400);

        let mut bad = prepare_request();
        bad.return_url = Some("ftp://shop.test".to_string());
        assert_eq!(svc.prepare(bad).await.unwrap_err().status_code(), 400);
    }

    #[tokio::test]
    async fn test_register_with_token_rekeys_and_consumes_token() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(ScriptedGateway::new(vec![json!({
            "errorCode": "0",
            "orderId": "gw-1",
            "formUrl": "https://gateway.test/form/gw-1"
        })]));
        let svc = service(store.clone(), gateway.clone(), "500.00");
        let prepared = svc.prepare(prepare_request()).await.unwrap();

        let response = svc
            .register(RegisterRequest {
                confirmation_token: Some(prepared.confirmation_token.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.order_id, "gw-1");

        let payment = store.find_by_order_id("gw-1").await.unwrap().unwrap();
        assert_eq!(payment.status, PaymentStatus::Registered);
        assert!(payment.confirmation_token.is_none());
        assert!(payment.gateway_register_response.is_some());

        let sent = gateway.seen.lock().unwrap()[0].clone();
        assert_eq!(sent.amount, 50000);
        assert_eq!(sent.language, "FR");
        assert_eq!(sent.return_url, "https://shop.test/ok");

        // Second use of the same token is refused without another gateway call
        let err = svc
            .register(RegisterRequest {
                confirmation_token: Some(prepared.confirmation_token.to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(gateway.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_order_leaves_payment_pending() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(ScriptedGateway::new(vec![json!({
            "errorCode": 1,
            "errorMessage": "Order number already processed"
        })]));
        let svc = service(store.clone(), gateway, "12.5");
        let prepared = svc.prepare(prepare_request()).await.unwrap();

        let err = svc
            .register(RegisterRequest {
                confirmation_token: Some(prepared.confirmation_token.to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);

        let payment = store
            .find_by_token(prepared.confirmation_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.status, PaymentStatus::Pending);
        assert_eq!(payment.amount, 1250);
        assert_eq!(payment.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_register_explicit_form_creates_and_registers() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let gateway = Arc::new(ScriptedGateway::new(vec![json!({
            "errorCode": 0,
            "orderId": "gw-7",
            "formUrl": "https://gateway.test/form/gw-7"
        })]));
        let svc = service(store.clone(), gateway.clone(), "1");

        let response = svc
            .register(RegisterRequest {
                order_number: Some("INV77".to_string()),
                amount: Some(json!("1234.56")),
                return_url: Some("https://shop.test/ok".to_string()),
                fail_url: Some("https://shop.test/ko".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(response.form_url, "https://gateway.test/form/gw-7");

        let payment = store.find_by_order_id("gw-7").await.unwrap().unwrap();
        assert_eq!(payment.amount, 123456);
        assert!(payment.account_id.is_none());
        assert_eq!(payment.actions.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_token_is_validation_error() {
        let store = Arc::new(InMemoryPaymentStore::new());
        let svc = service(store, Arc::new(ScriptedGateway::new(vec![])), "1");
        let err = svc
            .register(RegisterRequest {
                confirmation_token: Some(Uuid::new_v4().to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("unknown or already used"));
    }
}
