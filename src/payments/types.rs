use crate::payments::error::PaymentError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an invoice payment.
///
/// `pending → registered → paid → sap_pending → sap_synced`, with `error` as the
/// terminal outcome of a rejected acknowledgment and `sap_failed` as the
/// (retryable) outcome of a failed ERP posting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Registered,
    Paid,
    SapPending,
    SapSynced,
    SapFailed,
    Error,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 7] = [
        PaymentStatus::Pending,
        PaymentStatus::Registered,
        PaymentStatus::Paid,
        PaymentStatus::SapPending,
        PaymentStatus::SapSynced,
        PaymentStatus::SapFailed,
        PaymentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Registered => "registered",
            PaymentStatus::Paid => "paid",
            PaymentStatus::SapPending => "sap_pending",
            PaymentStatus::SapSynced => "sap_synced",
            PaymentStatus::SapFailed => "sap_failed",
            PaymentStatus::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "registered" => Some(PaymentStatus::Registered),
            "paid" => Some(PaymentStatus::Paid),
            "sap_pending" => Some(PaymentStatus::SapPending),
            "sap_synced" => Some(PaymentStatus::SapSynced),
            "sap_failed" => Some(PaymentStatus::SapFailed),
            "error" => Some(PaymentStatus::Error),
            _ => None,
        }
    }

    /// Validates if a state transition is allowed
    pub fn can_transition_to(&self, next: &PaymentStatus) -> bool {
        match (self, next) {
            // Normal flow
            (PaymentStatus::Pending, PaymentStatus::Registered) => true,
            (PaymentStatus::Registered, PaymentStatus::Paid) => true,
            (PaymentStatus::Paid, PaymentStatus::SapPending) => true,
            (PaymentStatus::SapPending, PaymentStatus::SapSynced) => true,

            // Failure flow
            (PaymentStatus::Registered, PaymentStatus::Error) => true,
            (PaymentStatus::SapPending, PaymentStatus::SapFailed) => true,

            // Broker redelivery of a failed posting
            (PaymentStatus::SapFailed, PaymentStatus::SapPending) => true,

            // Operator retry re-runs the acknowledgment
            (from, PaymentStatus::Registered) if *from != PaymentStatus::Pending => true,

            _ => false,
        }
    }

    /// Statuses from which an operator may force a new acknowledgment.
    pub fn manual_retry_sources() -> Vec<PaymentStatus> {
        PaymentStatus::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(&PaymentStatus::Registered) && *s != PaymentStatus::Pending)
            .collect()
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Prepared,
    Registered,
    ReturnReceived,
    AckOk,
    AckFailed,
    AckAttemptFailed,
    /// ERP posting attempt started (`sap_pending`)
    SapPostStarted,
    SapPostOk,
    SapPostFailed,
    ManualRetry,
}

/// One entry of the append-only history kept on each payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentAction {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub details: JsonValue,
}

impl PaymentAction {
    pub fn new(action_type: ActionType, details: JsonValue) -> Self {
        Self {
            timestamp: Utc::now(),
            action_type,
            details,
        }
    }
}

/// Raw upstream answers, each retained verbatim in its own column.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    RegisterResponse(JsonValue),
    AckDetails(JsonValue),
    ErpResponse(JsonValue),
}

impl StagePayload {
    pub fn column(&self) -> &'static str {
        match self {
            StagePayload::RegisterResponse(_) => "gateway_register_response",
            StagePayload::AckDetails(_) => "gateway_ack_details",
            StagePayload::ErpResponse(_) => "erp_response",
        }
    }

    pub fn value(&self) -> &JsonValue {
        match self {
            StagePayload::RegisterResponse(v)
            | StagePayload::AckDetails(v)
            | StagePayload::ErpResponse(v) => v,
        }
    }
}

/// The persisted payment aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub order_id: String,
    pub gateway_order_number: String,
    pub order_number: String,
    pub account_id: Option<String>,
    /// Minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub retry_count: i32,
    pub sap_retry_count: i32,
    /// Single-use secret; never part of an API response
    #[serde(skip_serializing)]
    pub confirmation_token: Option<Uuid>,
    pub return_url: Option<String>,
    pub fail_url: Option<String>,
    pub gateway_register_response: Option<JsonValue>,
    pub gateway_ack_details: Option<JsonValue>,
    pub erp_response: Option<JsonValue>,
    pub last_error: Option<String>,
    pub actions: Vec<PaymentAction>,
    pub sap_last_try_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn has_action(&self, action_type: ActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }

    pub fn last_action(&self, action_type: ActionType) -> Option<&PaymentAction> {
        self.actions
            .iter()
            .rev()
            .find(|a| a.action_type == action_type)
    }

    pub fn major_amount(&self) -> Decimal {
        minor_to_major(self.amount)
    }
}

/// Fields of a payment about to be created in `pending`.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub gateway_order_number: String,
    pub order_number: String,
    pub account_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub confirmation_token: Uuid,
    pub return_url: Option<String>,
    pub fail_url: Option<String>,
    pub action: PaymentAction,
}

/// A guarded mutation. Only the fields that are `Some` are written; `action` is
/// always appended.
#[derive(Debug, Clone)]
pub struct PaymentUpdate {
    pub status: Option<PaymentStatus>,
    pub new_order_id: Option<String>,
    pub payload: Option<StagePayload>,
    pub last_error: Option<Option<String>>,
    pub clear_confirmation_token: bool,
    pub increment_retry: bool,
    pub increment_sap_retry: bool,
    pub touch_sap_last_try: bool,
    pub action: PaymentAction,
}

impl PaymentUpdate {
    pub fn new(action: PaymentAction) -> Self {
        Self {
            status: None,
            new_order_id: None,
            payload: None,
            last_error: None,
            clear_confirmation_token: false,
            increment_retry: false,
            increment_sap_retry: false,
            touch_sap_last_try: false,
            action,
        }
    }

    pub fn status(mut self, status: PaymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn rekey(mut self, order_id: impl Into<String>) -> Self {
        self.new_order_id = Some(order_id.into());
        self
    }

    pub fn payload(mut self, payload: StagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn last_error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(Some(message.into()));
        self
    }

    pub fn clear_last_error(mut self) -> Self {
        self.last_error = Some(None);
        self
    }

    pub fn consume_token(mut self) -> Self {
        self.clear_confirmation_token = true;
        self
    }

    pub fn increment_retry(mut self) -> Self {
        self.increment_retry = true;
        self
    }

    pub fn increment_sap_retry(mut self) -> Self {
        self.increment_sap_retry = true;
        self
    }

    pub fn touch_sap_last_try(mut self) -> Self {
        self.touch_sap_last_try = true;
        self
    }

    /// Apply this update to an in-memory copy. Used by the in-memory store and
    /// mirrors the SQL in the Postgres repository.
    pub fn apply_to(&self, payment: &mut Payment) {
        let now = Utc::now();
        if let Some(status) = self.status {
            payment.status = status;
        }
        if let Some(order_id) = &self.new_order_id {
            payment.order_id = order_id.clone();
        }
        if let Some(payload) = &self.payload {
            let value = Some(payload.value().clone());
            match payload {
                StagePayload::RegisterResponse(_) => payment.gateway_register_response = value,
                StagePayload::AckDetails(_) => payment.gateway_ack_details = value,
                StagePayload::ErpResponse(_) => payment.erp_response = value,
            }
        }
        if let Some(last_error) = &self.last_error {
            payment.last_error = last_error.clone();
        }
        if self.clear_confirmation_token {
            payment.confirmation_token = None;
        }
        if self.increment_retry {
            payment.retry_count += 1;
        }
        if self.increment_sap_retry {
            payment.sap_retry_count += 1;
        }
        if self.touch_sap_last_try {
            payment.sap_last_try_at = Some(now);
        }
        payment.actions.push(self.action.clone());
        payment.updated_at = now;
    }
}

/// Convert a major-unit amount to minor units (×100, midpoint away from zero).
pub fn major_to_minor(amount: Decimal) -> Result<i64, PaymentError> {
    let scaled = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(scaled).map_err(|_| {
        PaymentError::validation(format!("amount {} is out of range", amount), "amount")
    })
}

/// Convert minor units back to a two-decimal major-unit amount.
pub fn minor_to_major(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

/// Parse a major-unit decimal given as a string, e.g. `"500.00"` or `"1 234,50"`.
pub fn parse_major_amount(raw: &str) -> Result<Decimal, PaymentError> {
    let normalized: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    Decimal::from_str(&normalized)
        .map_err(|_| PaymentError::validation(format!("invalid decimal amount: {}", raw), "amount"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payment(status: PaymentStatus) -> Payment {
        let now = Utc::now();
        Payment {
            order_id: "2600000001".to_string(),
            gateway_order_number: "2600000001".to_string(),
            order_number: "INV1001".to_string(),
            account_id: Some("C42".to_string()),
            amount: 50000,
            currency: "012".to_string(),
            status,
            retry_count: 0,
            sap_retry_count: 0,
            confirmation_token: Some(Uuid::new_v4()),
            return_url: None,
            fail_url: None,
            gateway_register_response: None,
            gateway_ack_details: None,
            erp_response: None,
            last_error: Some("old".to_string()),
            actions: vec![],
            sap_last_try_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in PaymentStatus::ALL {
            assert_eq!(PaymentStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_str("settled"), None);
    }

    #[test]
    fn test_forward_transitions() {
        assert!(PaymentStatus::Pending.can_transition_to(&PaymentStatus::Registered));
        assert!(PaymentStatus::Registered.can_transition_to(&PaymentStatus::Paid));
        assert!(PaymentStatus::Paid.can_transition_to(&PaymentStatus::SapPending));
        assert!(PaymentStatus::SapFailed.can_transition_to(&PaymentStatus::SapPending));

        assert!(!PaymentStatus::Pending.can_transition_to(&PaymentStatus::Paid));
        assert!(!PaymentStatus::SapSynced.can_transition_to(&PaymentStatus::SapPending));
        assert!(!PaymentStatus::Error.can_transition_to(&PaymentStatus::Paid));
    }

    #[test]
    fn test_manual_retry_excludes_pending() {
        let sources = PaymentStatus::manual_retry_sources();
        assert!(!sources.contains(&PaymentStatus::Pending));
        assert!(sources.contains(&PaymentStatus::Error));
        assert!(sources.contains(&PaymentStatus::SapFailed));
        assert!(sources.contains(&PaymentStatus::Registered));
    }

    #[test]
    fn test_minor_unit_conversion() {
        assert_eq!(major_to_minor(Decimal::new(500, 0)).unwrap(), 50000);
        assert_eq!(major_to_minor(Decimal::new(12345, 3)).unwrap(), 1235);
        assert_eq!(major_to_minor(Decimal::new(-12345, 3)).unwrap(), -1235);
        assert_eq!(minor_to_major(50000).to_string(), "500.00");
    }

    #[test]
    fn test_parse_major_amount_accepts_comma_decimal() {
        assert_eq!(
            parse_major_amount("1 234,50").unwrap(),
            Decimal::new(123450, 2)
        );
        assert!(parse_major_amount("abc").is_err());
    }

    #[test]
    fn test_action_serializes_type_field() {
        let action = PaymentAction::new(ActionType::AckOk, json!({"rule": "action_code"}));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "ACK_OK");
        assert_eq!(value["details"]["rule"], "action_code");
    }

    #[test]
    fn test_update_applies_fields_and_appends_action() {
        let mut p = payment(PaymentStatus::Registered);
        let update = PaymentUpdate::new(PaymentAction::new(ActionType::AckOk, json!({})))
            .status(PaymentStatus::Paid)
            .payload(StagePayload::AckDetails(json!({"actionCode": 0})))
            .clear_last_error();

        update.apply_to(&mut p);

        assert_eq!(p.status, PaymentStatus::Paid);
        assert_eq!(p.gateway_ack_details, Some(json!({"actionCode": 0})));
        assert_eq!(p.last_error, None);
        assert_eq!(p.actions.len(), 1);
        assert!(p.has_action(ActionType::AckOk));
    }

    #[test]
    fn test_rekey_and_consume_token() {
        let mut p = payment(PaymentStatus::Pending);
        PaymentUpdate::new(PaymentAction::new(ActionType::Registered, json!({})))
            .status(PaymentStatus::Registered)
            .rekey("gw-abc")
            .consume_token()
            .apply_to(&mut p);

        assert_eq!(p.order_id, "gw-abc");
        assert_eq!(p.confirmation_token, None);
    }

    #[test]
    fn test_confirmation_token_is_not_serialized() {
        let pending = payment(PaymentStatus::Pending);
        let token = pending.confirmation_token.unwrap().to_string();

        let value = serde_json::to_value(&pending).unwrap();
        assert!(value.get("confirmationToken").is_none());
        assert!(!value.to_string().contains(&token));
        assert_eq!(value["orderNumber"], "INV1001");
    }
}
