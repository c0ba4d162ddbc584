use crate::payments::error::PaymentResult;
use crate::payments::types::Payment;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outstanding amount of an invoice as reported by the ERP.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAmount {
    /// Major units
    pub amount: Decimal,
    pub currency: String,
}

/// Payment-lot document posted to the ERP.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErpPaymentDocument {
    #[serde(rename = "IvFbnum")]
    pub invoice_number: String,
    /// Major-unit decimal string, e.g. `"500.00"`
    #[serde(rename = "IvAmount")]
    pub amount: String,
    /// `YYYY-MM-DDT00:00:00`
    #[serde(rename = "IvDate")]
    pub date: String,
}

impl ErpPaymentDocument {
    pub fn for_payment(payment: &Payment, date: NaiveDate) -> Self {
        Self {
            invoice_number: payment.order_number.clone(),
            amount: payment.major_amount().to_string(),
            date: format!("{}T00:00:00", date.format("%Y-%m-%d")),
        }
    }
}

#[async_trait]
pub trait ErpClient: Send + Sync {
    async fn fetch_pending_amount(&self, order_number: &str) -> PaymentResult<PendingAmount>;

    /// Post a payment lot. Returns the ERP's raw answer.
    async fn post_payment(&self, document: &ErpPaymentDocument) -> PaymentResult<JsonValue>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentStatus;
    use chrono::Utc;

    #[test]
    fn test_document_from_payment() {
        let now = Utc::now();
        let payment = Payment {
            order_id: "gw-1".to_string(),
            gateway_order_number: "2600000001".to_string(),
            order_number: "INV1001".to_string(),
            account_id: None,
            amount: 50000,
            currency: "012".to_string(),
            status: PaymentStatus::Paid,
            retry_count: 0,
            sap_retry_count: 0,
            confirmation_token: None,
            return_url: None,
            fail_url: None,
            gateway_register_response: None,
            gateway_ack_details: None,
            erp_response: None,
            last_error: None,
            actions: vec![],
            sap_last_try_at: None,
            created_at: now,
            updated_at: now,
        };

        let date = NaiveDate::from_ymd_opt(2026, 3, 7).unwrap();
        let document = ErpPaymentDocument::for_payment(&payment, date);
        let value = serde_json::to_value(&document).unwrap();

        assert_eq!(value["IvFbnum"], "INV1001");
        assert_eq!(value["IvAmount"], "500.00");
        assert_eq!(value["IvDate"], "2026-03-07T00:00:00");
    }
}
