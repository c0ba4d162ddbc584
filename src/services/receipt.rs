//! Payment receipts
//!
//! A receipt exists only for payments whose history contains an `ACK_OK` action.
//! Document layout is pluggable through [`ReceiptRenderer`].

use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::types::{ActionType, Payment};
use chrono::{DateTime, Utc};

/// A rendered receipt ready to be served.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptDocument {
    pub content_type: &'static str,
    pub filename: String,
    pub body: Vec<u8>,
}

pub trait ReceiptRenderer: Send + Sync {
    fn render(&self, receipt: &ReceiptData) -> ReceiptDocument;
}

/// Fields printed on a receipt, extracted from a confirmed payment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptData {
    pub order_id: String,
    pub operation_number: String,
    pub order_number: String,
    pub account_id: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub amount: String,
    pub currency: String,
    pub approval_code: Option<String>,
}

impl ReceiptData {
    /// Build receipt data, or `ReceiptUnavailable` if the payment was never
    /// acknowledged as successful.
    pub fn from_payment(payment: &Payment) -> Result<Self, AppError> {
        let Some(ack) = payment.last_action(ActionType::AckOk) else {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::ReceiptUnavailable {
                    order_id: payment.order_id.clone(),
                },
            ))
            .with_order_id(payment.order_id.clone()));
        };

        let details = payment.gateway_ack_details.as_ref();
        let text_field = |key: &str| {
            details
                .and_then(|d| d.get(key))
                .and_then(|v| match v {
                    serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };

        Ok(Self {
            order_id: payment.order_id.clone(),
            operation_number: text_field("OrderNumber")
                .unwrap_or_else(|| payment.gateway_order_number.clone()),
            order_number: payment.order_number.clone(),
            account_id: payment.account_id.clone(),
            paid_at: ack.timestamp,
            amount: payment.major_amount().to_string(),
            currency: payment.currency.clone(),
            approval_code: text_field("approvalCode"),
        })
    }
}

/// Renders a fixed-width plain-text receipt.
#[derive(Debug, Clone, Default)]
pub struct PlainTextReceiptRenderer {
    /// Issuer line printed under the title
    pub issuer: Option<String>,
}

impl PlainTextReceiptRenderer {
    pub fn new(issuer: Option<String>) -> Self {
        Self { issuer }
    }
}

impl ReceiptRenderer for PlainTextReceiptRenderer {
    fn render(&self, receipt: &ReceiptData) -> ReceiptDocument {
        let rule = "-".repeat(48);
        let mut lines = vec!["ELECTRONIC PAYMENT RECEIPT".to_string()];
        if let Some(issuer) = &self.issuer {
            lines.push(issuer.clone());
        }
        lines.push(rule.clone());

        let rows = [
            ("Status", "Payment completed".to_string()),
            ("Operation number", receipt.operation_number.clone()),
            ("Invoice number", receipt.order_number.clone()),
            (
                "Client number",
                receipt.account_id.clone().unwrap_or_else(|| "-".to_string()),
            ),
            (
                "Date / time",
                receipt.paid_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            ),
            (
                "Amount paid",
                format!("{} ({})", receipt.amount, receipt.currency),
            ),
            (
                "Authorization code",
                receipt.approval_code.clone().unwrap_or_else(|| "-".to_string()),
            ),
            ("Transaction id", receipt.order_id.clone()),
        ];
        for (label, value) in rows {
            lines.push(format!("{:<20}{}", label, value));
        }

        lines.push(rule);
        lines.push("This receipt is proof of an electronic payment.".to_string());
        lines.push("Keep it for any later claim.".to_string());

        ReceiptDocument {
            content_type: "text/plain; charset=utf-8",
            filename: format!("receipt_{}.txt", receipt.order_number),
            body: (lines.join("\n") + "\n").into_bytes(),
        }
    }
}
