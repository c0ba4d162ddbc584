use crate::database::error::DatabaseError;
use crate::payments::types::{NewPayment, Payment, PaymentStatus, PaymentUpdate};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence port for the payment aggregate.
///
/// Every mutation goes through [`PaymentStore::apply`], which only touches the row
/// when its current status is one of `expected`. Concurrent workers therefore race
/// on the status column instead of on locks; the loser gets `Ok(None)`.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a new `pending` payment keyed by its gateway order number.
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError>;

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, DatabaseError>;

    async fn find_by_token(&self, token: Uuid) -> Result<Option<Payment>, DatabaseError>;

    /// Most recent first.
    async fn list(&self, limit: i64) -> Result<Vec<Payment>, DatabaseError>;

    /// Guarded update. Returns the updated payment, or `None` when the payment does
    /// not exist or its status is not in `expected`.
    async fn apply(
        &self,
        order_id: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, DatabaseError>;

    /// Next merchant order number: two-digit year followed by an 8-digit sequence.
    async fn next_gateway_order_number(&self) -> Result<String, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

/// Format a sequence value as a gateway order number (max 10 characters).
pub fn format_gateway_order_number(year: i32, sequence: i64) -> String {
    format!("{:02}{:08}", year.rem_euclid(100), sequence.rem_euclid(100_000_000))
}
