use crate::database::error::DatabaseError;
use crate::database::repository::{format_gateway_order_number, PaymentStore};
use crate::payments::types::{
    NewPayment, Payment, PaymentAction, PaymentStatus, PaymentUpdate, StagePayload,
};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

const PAYMENT_COLUMNS: &str = "order_id, gateway_order_number, order_number, account_id, amount, \
     currency, status, retry_count, sap_retry_count, confirmation_token, return_url, fail_url, \
     gateway_register_response, gateway_ack_details, erp_response, last_error, actions, \
     sap_last_try_at, created_at, updated_at";

/// Row shape of the `payments` table
#[derive(Debug, Clone, FromRow)]
struct PaymentRow {
    order_id: String,
    gateway_order_number: String,
    order_number: String,
    account_id: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    retry_count: i32,
    sap_retry_count: i32,
    confirmation_token: Option<Uuid>,
    return_url: Option<String>,
    fail_url: Option<String>,
    gateway_register_response: Option<JsonValue>,
    gateway_ack_details: Option<JsonValue>,
    erp_response: Option<JsonValue>,
    last_error: Option<String>,
    actions: JsonValue,
    sap_last_try_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = PaymentStatus::from_str(&row.status).ok_or_else(|| {
            DatabaseError::decode(format!(
                "unknown status '{}' for payment {}",
                row.status, row.order_id
            ))
        })?;
        let actions: Vec<PaymentAction> = serde_json::from_value(row.actions).map_err(|e| {
            DatabaseError::decode(format!("actions of payment {}: {}", row.order_id, e))
        })?;

        Ok(Payment {
            order_id: row.order_id,
            gateway_order_number: row.gateway_order_number,
            order_number: row.order_number,
            account_id: row.account_id,
            amount: row.amount,
            currency: row.currency,
            status,
            retry_count: row.retry_count,
            sap_retry_count: row.sap_retry_count,
            confirmation_token: row.confirmation_token,
            return_url: row.return_url,
            fail_url: row.fail_url,
            gateway_register_response: row.gateway_register_response,
            gateway_ack_details: row.gateway_ack_details,
            erp_response: row.erp_response,
            last_error: row.last_error,
            actions,
            sap_last_try_at: row.sap_last_try_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn action_json(action: &PaymentAction) -> Result<JsonValue, DatabaseError> {
    serde_json::to_value(action)
        .map_err(|e| DatabaseError::decode(format!("action serialization failed: {}", e)))
}

/// Postgres-backed payment store
#[derive(Clone)]
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn create(&self, payment: NewPayment) -> Result<Payment, DatabaseError> {
        let actions = JsonValue::Array(vec![action_json(&payment.action)?]);
        let sql = format!(
            "INSERT INTO payments (order_id, gateway_order_number, order_number, account_id, amount, \
             currency, status, confirmation_token, return_url, fail_url, actions) \
             VALUES ($1, $1, $2, $3, $4, $5, 'pending', $6, $7, $8, $9) \
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(&payment.gateway_order_number)
            .bind(&payment.order_number)
            .bind(&payment.account_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.confirmation_token)
            .bind(&payment.return_url)
            .bind(&payment.fail_url)
            .bind(actions)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        row.try_into()
    }

    async fn find_by_order_id(&self, order_id: &str) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!("SELECT {} FROM payments WHERE order_id = $1", PAYMENT_COLUMNS);
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn find_by_token(&self, token: Uuid) -> Result<Option<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE confirmation_token = $1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(Payment::try_from)
            .transpose()
    }

    async fn list(&self, limit: i64) -> Result<Vec<Payment>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payments ORDER BY created_at DESC LIMIT $1",
            PAYMENT_COLUMNS
        );
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(Payment::try_from)
            .collect()
    }

    async fn apply(
        &self,
        order_id: &str,
        expected: &[PaymentStatus],
        update: PaymentUpdate,
    ) -> Result<Option<Payment>, DatabaseError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let (register_response, ack_details, erp_response) = match update.payload {
            Some(StagePayload::RegisterResponse(v)) => (Some(v), None, None),
            Some(StagePayload::AckDetails(v)) => (None, Some(v), None),
            Some(StagePayload::ErpResponse(v)) => (None, None, Some(v)),
            None => (None, None, None),
        };
        let (set_last_error, last_error) = match update.last_error {
            Some(value) => (true, value),
            None => (false, None),
        };

        let sql = format!(
            "UPDATE payments SET \
                order_id = COALESCE($3, order_id), \
                status = COALESCE($4, status), \
                gateway_register_response = COALESCE($5, gateway_register_response), \
                gateway_ack_details = COALESCE($6, gateway_ack_details), \
                erp_response = COALESCE($7, erp_response), \
                last_error = CASE WHEN $8 THEN $9 ELSE last_error END, \
                confirmation_token = CASE WHEN $10 THEN NULL ELSE confirmation_token END, \
                retry_count = retry_count + $11, \
                sap_retry_count = sap_retry_count + $12, \
                sap_last_try_at = CASE WHEN $13 THEN NOW() ELSE sap_last_try_at END, \
                actions = actions || jsonb_build_array($14::jsonb), \
                updated_at = NOW() \
             WHERE order_id = $1 AND status = ANY($2) \
             RETURNING {}",
            PAYMENT_COLUMNS
        );

        let row = sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(order_id)
            .bind(&expected)
            .bind(&update.new_order_id)
            .bind(update.status.map(|s| s.as_str()))
            .bind(register_response)
            .bind(ack_details)
            .bind(erp_response)
            .bind(set_last_error)
            .bind(last_error)
            .bind(update.clear_confirmation_token)
            .bind(i32::from(update.increment_retry))
            .bind(i32::from(update.increment_sap_retry))
            .bind(update.touch_sap_last_try)
            .bind(action_json(&update.action)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if row.is_none() {
            debug!(order_id, expected = ?expected, "guarded update matched no row");
        }

        row.map(Payment::try_from).transpose()
    }

    async fn next_gateway_order_number(&self) -> Result<String, DatabaseError> {
        let (sequence,): (i64,) = sqlx::query_as("SELECT nextval('gateway_order_seq')")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        Ok(format_gateway_order_number(Utc::now().year(), sequence))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        crate::database::health_check(&self.pool).await
    }
}
