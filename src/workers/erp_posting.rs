//! ERP Posting Worker
//!
//! Posts a paid payment into the ERP as a payment-lot document. A redelivered job
//! whose payment ended in `sap_failed` posts again; `sap_synced` is never re-posted.

use crate::database::repository::PaymentStore;
use crate::payments::erp::{ErpClient, ErpPaymentDocument};
use crate::payments::types::{ActionType, PaymentAction, PaymentStatus, PaymentUpdate, StagePayload};
use crate::queue::{Job, JobKind};
use crate::workers::{JobHandler, WorkerError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// Statuses an ERP posting attempt may start from.
const POSTABLE: [PaymentStatus; 2] = [PaymentStatus::Paid, PaymentStatus::SapFailed];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostingOutcome {
    Synced,
    Skipped { status: PaymentStatus },
}

pub struct ErpPostingWorker {
    store: Arc<dyn PaymentStore>,
    erp: Arc<dyn ErpClient>,
}

impl ErpPostingWorker {
    pub fn new(store: Arc<dyn PaymentStore>, erp: Arc<dyn ErpClient>) -> Self {
        Self { store, erp }
    }

    #[instrument(skip(self))]
    pub async fn post(&self, order_id: &str) -> Result<PostingOutcome, WorkerError> {
        let payment = self
            .store
            .find_by_order_id(order_id)
            .await?
            .ok_or_else(|| WorkerError::PaymentNotFound {
                order_id: order_id.to_string(),
            })?;

        if !POSTABLE.contains(&payment.status) {
            info!(order_id, status = %payment.status, "Skipping ERP posting");
            return Ok(PostingOutcome::Skipped {
                status: payment.status,
            });
        }

        let document = ErpPaymentDocument::for_payment(&payment, Utc::now().date_naive());
        let started = PaymentUpdate::new(PaymentAction::new(
            ActionType::SapPostStarted,
            json!({ "document": document, "previousStatus": payment.status }),
        ))
        .status(PaymentStatus::SapPending)
        .touch_sap_last_try();

        let Some(_) = self.store.apply(order_id, &POSTABLE, started).await? else {
            info!(order_id, "Payment left a postable status concurrently");
            return Ok(PostingOutcome::Skipped {
                status: payment.status,
            });
        };

        match self.erp.post_payment(&document).await {
            Ok(response) => {
                let update = PaymentUpdate::new(PaymentAction::new(
                    ActionType::SapPostOk,
                    response.clone(),
                ))
                .status(PaymentStatus::SapSynced)
                .payload(StagePayload::ErpResponse(response))
                .increment_sap_retry()
                .clear_last_error();
                self.store
                    .apply(order_id, &[PaymentStatus::SapPending], update)
                    .await?;

                info!(
                    order_id,
                    invoice = %document.invoice_number,
                    amount = %document.amount,
                    erp = self.erp.name(),
                    "✅ Payment posted to ERP"
                );
                Ok(PostingOutcome::Synced)
            }
            Err(e) => {
                let update = PaymentUpdate::new(PaymentAction::new(
                    ActionType::SapPostFailed,
                    json!({ "error": e.to_string(), "retryable": e.is_retryable() }),
                ))
                .status(PaymentStatus::SapFailed)
                .increment_sap_retry()
                .last_error(e.to_string());
                self.store
                    .apply(order_id, &[PaymentStatus::SapPending], update)
                    .await?;

                error!(order_id, error = %e, "❌ ERP posting failed");
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl JobHandler for ErpPostingWorker {
    fn kind(&self) -> JobKind {
        JobKind::ErpPost
    }

    async fn handle(&self, job: &Job) -> Result<(), WorkerError> {
        self.post(&job.order_id).await.map(|_| ())
    }
}
