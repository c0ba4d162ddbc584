//! Acknowledgment Worker
//!
//! Confirms a card session with the gateway after the customer returns, moves the
//! payment to `paid` or `error`, and hands paid orders to the ERP posting queue.

use crate::database::repository::PaymentStore;
use crate::payments::ack_rules;
use crate::payments::gateway::CardGateway;
use crate::payments::types::{ActionType, PaymentAction, PaymentStatus, PaymentUpdate, StagePayload};
use crate::queue::{EnqueueOutcome, Job, JobKind, JobQueue};
use crate::workers::{JobHandler, WorkerError};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub const ACK_REJECTED_MESSAGE: &str = "gateway acknowledgment rejected";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// Gateway confirmed the charge; the ERP job was enqueued
    Paid { rule: &'static str },
    /// Gateway reported the charge as failed
    Rejected,
    /// Payment was not in `registered`; nothing was called or written
    Skipped { status: PaymentStatus },
}

pub struct AckWorker {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn CardGateway>,
    queue: Arc<dyn JobQueue>,
}

impl AckWorker {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn CardGateway>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
        }
    }

    #[instrument(skip(self))]
    pub async fn acknowledge(&self, order_id: &str) -> Result<AckOutcome, WorkerError> {
        let payment = self
            .store
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| WorkerError::PaymentNotFound {
                order_id: order_id.to_string(),
            })?;

        match payment.status {
            PaymentStatus::Registered => {}
            PaymentStatus::Paid => {
                // The ERP enqueue may have been lost after the paid transition.
                self.enqueue_erp(order_id).await?;
                return Ok(AckOutcome::Skipped {
                    status: payment.status,
                });
            }
            status => {
                info!(order_id, status = %status, "Skipping acknowledgment, payment not registered");
                return Ok(AckOutcome::Skipped { status });
            }
        }

        let payload = match self.gateway.acknowledge(order_id).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(order_id, error = %e, "Gateway acknowledgment attempt failed");
                let update = PaymentUpdate::new(PaymentAction::new(
                    ActionType::AckAttemptFailed,
                    json!({ "error": e.to_string(), "retryable": e.is_retryable() }),
                ))
                .increment_retry()
                .last_error(e.to_string());
                self.store
                    .apply(order_id, &[PaymentStatus::Registered], update)
                    .await?;
                return Err(e.into());
            }
        };

        match ack_rules::evaluate(&payload) {
            Some(rule) => {
                let update = PaymentUpdate::new(PaymentAction::new(
                    ActionType::AckOk,
                    json!({ "rule": rule.name(), "payload": payload }),
                ))
                .status(PaymentStatus::Paid)
                .payload(StagePayload::AckDetails(payload))
                .clear_last_error();

                let applied = self
                    .store
                    .apply(order_id, &[PaymentStatus::Registered], update)
                    .await?;
                if applied.is_none() {
                    debug!(order_id, "Payment left registered concurrently, not marking paid");
                    return Ok(AckOutcome::Skipped {
                        status: PaymentStatus::Registered,
                    });
                }

                info!(order_id, rule = rule.name(), "✅ Payment confirmed by gateway");
                self.enqueue_erp(order_id).await?;
                Ok(AckOutcome::Paid { rule: rule.name() })
            }
            None => {
                let update = PaymentUpdate::new(PaymentAction::new(
                    ActionType::AckFailed,
                    payload.clone(),
                ))
                .status(PaymentStatus::Error)
                .payload(StagePayload::AckDetails(payload))
                .last_error(ACK_REJECTED_MESSAGE);

                self.store
                    .apply(order_id, &[PaymentStatus::Registered], update)
                    .await?;
                warn!(order_id, "❌ Gateway rejected the payment");
                Ok(AckOutcome::Rejected)
            }
        }
    }

    async fn enqueue_erp(&self, order_id: &str) -> Result<(), WorkerError> {
        match self.queue.enqueue(JobKind::ErpPost, order_id).await? {
            EnqueueOutcome::Enqueued => info!(order_id, "ERP posting job enqueued"),
            EnqueueOutcome::Duplicate => debug!(order_id, "ERP posting job already active"),
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for AckWorker {
    fn kind(&self) -> JobKind {
        JobKind::Acknowledge
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        self.acknowledge(&job.order_id).await.map(|_| ())
    }
}
