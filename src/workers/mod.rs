//! Background workers consuming the job broker
//!
//! Each pool runs a [`runner::JobRunner`] around a [`JobHandler`]:
//! - [`ack_worker::AckWorker`] confirms card sessions with the gateway (`gateway-ack`)
//! - [`erp_posting::ErpPostingWorker`] posts confirmed payments to the ERP (`erp-post`)

pub mod ack_worker;
pub mod erp_posting;
pub mod runner;

use crate::database::error::DatabaseError;
use crate::payments::error::PaymentError;
use crate::queue::{Job, JobKind, QueueError};
use async_trait::async_trait;
use std::time::Duration;

/// Failures that send a job back to the broker for another attempt.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The job references a payment that does not exist (yet).
    #[error("payment {order_id} not found")]
    PaymentNotFound { order_id: String },

    #[error("{0}")]
    Payment(#[from] PaymentError),

    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("job timed out after {0:?}")]
    Timeout(Duration),
}

/// Work performed for one job. Returning `Ok` completes the job; an error is
/// recorded on the job and retried with backoff.
#[async_trait]
pub trait JobHandler: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn handle(&self, job: &Job) -> Result<(), WorkerError>;
}
