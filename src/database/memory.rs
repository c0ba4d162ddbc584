use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::repository::{format_gateway_order_number, PaymentStore};
use crate::payments::types::{NewPayment, Payment, PaymentStatus, PaymentUpdate};
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A thread-safe in-memory payment store.
///
/// Holds the same guarded-update semantics as the Postgres repository; the write
/// lock makes each `apply` atomic.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<String, Payment>>>,
    sequence: Arc<AtomicI64>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built payment, replacing any payment with the same id.
    pub async fn insert(&self, payment: Payment) {
        let mut payments = self.payments.write().await;
        payments.insert(payment.order_id.clone(), payment);
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.gateway_order_number) {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payments_pkey".to_string(),
            }));
        }

        let now = Utc::now();
        let created = Payment {
            order_id: payment.gateway_order_number.clone(),
            gateway_order_number: payment.gateway_order_number,
            order_number: payment.order_number,
            account_id: payment.account_id,
            amount: payment.amount,
            currency: payment.currency,
            status: PaymentStatus::Pending,
            retry_count: 0,
            sap_retry_count: 0,
            confirmation_token: Some(payment.confirmation_token),
            return_url: payment.return_url,
            fail_url: payment.fail_url,
            gateway_register_response: None,
            gateway_ack_details: None,
            erp_response: None,
            last_error: None,
            actions: vec![payment.action],
            sap_last_try_at: None,
            created_at: now,
            updated_at: now,
        };
        payments.insert(created.order_id.clone(), created.clone());
        Ok(created)
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        Ok(payments.get(order_id).cloned())
    }

    async fn find_by_token(&self, token: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        Ok(payments
            .values()
            .find(|p| p.confirmation_token == Some(token))
            .cloned())
    }

    async fn list(&self, limit: i64) -> Result<Vec<Payment>, DatabaseError> {
        let payments = self.payments.read().await;
        let mut all: Vec<Payment> = payments.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn apply(
        &self,
        order_id: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, DatabaseError> {
        let mut payments = self.payments.write().await;
        let matches = payments
            .get(order_id)
            .map(|p| expected.contains(&p.status))
            .unwrap_or(false);
        if !matches {
            return Ok(None);
        }
        if let Some(new_id) = &update.new_order_id {
            if new_id != order_id && payments.contains_key(new_id) {
                return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                    constraint: "payments_pkey".to_string(),
                }));
            }
        }

        let Some(mut payment) = payments.remove(order_id) else {
            return Ok(None);
        };
        update.apply_to(&mut payment);
        payments.insert(payment.order_id.clone(), payment.clone());
        Ok(Some(payment))
    }

    async fn next_gateway_order_number(&self) -> Result<String, DatabaseError> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format_gateway_order_number(Utc::now().year(), sequence))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{ActionType, PaymentAction};
    use serde_json::json;

    fn new_payment(number: &str) -> NewPayment {
        NewPayment {
            gateway_order_number: number.to_string(),
            order_number: "INV1001".to_string(),
            account_id: Some("C42".to_string()),
            amount: 50000,
            currency: "012".to_string(),
            confirmation_token: Uuid::new_v4(),
            return_url: Some("https://shop.test/ok".to_string()),
            fail_url: Some("https://shop.test/ko".to_string()),
            action: PaymentAction::new(ActionType::Prepared, json!({})),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_token() {
        let store = InMemoryPaymentStore::new();
        let created = store.create(new_payment("2600000001")).await.unwrap();
        let token = created.confirmation_token.unwrap();

        let found = store.find_by_token(token).await.unwrap().unwrap();
        assert_eq!(found.order_id, "2600000001");
        assert_eq!(found.status, PaymentStatus::Pending);
        assert_eq!(found.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_rejected() {
        let store = InMemoryPaymentStore::new();
        store.create(new_payment("2600000001")).await.unwrap();
        let err = store.create(new_payment("2600000001")).await.unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_guarded_apply_rekeys_and_rejects_wrong_status() {
        let store = InMemoryPaymentStore::new();
        store.create(new_payment("2600000001")).await.unwrap();

        let update = PaymentUpdate::new(PaymentAction::new(ActionType::Registered, json!({})))
            .status(PaymentStatus::Registered)
            .rekey("gw-1");
        let updated = store
            .apply("2600000001", &[PaymentStatus::Pending], update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.order_id, "gw-1");
        assert!(store.find_by_order_id("2600000001").await.unwrap().is_none());

        let second = store
            .apply(
                "gw-1",
                &[PaymentStatus::Pending],
                PaymentUpdate::new(PaymentAction::new(ActionType::Registered, json!({}))),
            )
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(
            store.find_by_order_id("gw-1").await.unwrap().unwrap().actions.len(),
            2
        );
    }

    #[tokio::test]
    async fn test_sequence_is_monotonic() {
        let store = InMemoryPaymentStore::new();
        let first = store.next_gateway_order_number().await.unwrap();
        let second = store.next_gateway_order_number().await.unwrap();
        assert!(first.ends_with("00000001"));
        assert!(second.ends_with("00000002"));
        assert_eq!(first.len(), 10);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_limits() {
        let store = InMemoryPaymentStore::new();
        store.create(new_payment("2600000001")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create(new_payment("2600000002")).await.unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed[0].order_id, "2600000002");
        assert_eq!(store.list(1).await.unwrap().len(), 1);
    }
}
