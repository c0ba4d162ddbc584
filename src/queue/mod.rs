//! Durable at-least-once job broker
//!
//! Two queues feed the worker pools: `gateway-ack` (acknowledgment jobs created by
//! the return handler and by operator retries) and `erp-post` (ERP posting jobs
//! created by a successful acknowledgment). A job id is `{stage}:{orderId}`, so a
//! second enqueue while the job is still queued, delayed or running collapses into
//! the existing job.

pub mod error;
pub mod memory;
#[cfg(feature = "cache")]
pub mod redis;

pub use error::{QueueError, QueueResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pipeline stage a job belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Acknowledge,
    ErpPost,
}

impl JobKind {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::Acknowledge => "gateway-ack",
            JobKind::ErpPost => "erp-post",
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            JobKind::Acknowledge => "ack",
            JobKind::ErpPost => "erp",
        }
    }

    /// Deterministic job id used as the dedup key.
    pub fn job_id(&self, order_id: &str) -> String {
        format!("{}:{}", self.stage(), order_id)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub order_id: String,
    /// Attempts started so far, including the current one once dequeued
    pub attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    pub fn new(kind: JobKind, order_id: impl Into<String>) -> Self {
        let order_id = order_id.into();
        let now = Utc::now();
        Self {
            id: kind.job_id(&order_id),
            kind,
            order_id,
            attempts: 0,
            enqueued_at: now,
            run_at: now,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id is already queued, delayed or running
    Duplicate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailOutcome {
    /// Scheduled for another attempt
    Retrying { attempt: u32, run_at: DateTime<Utc> },
    /// Attempts exhausted; moved to the dead set
    Dead { attempts: u32 },
}

/// Per-job retry schedule: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: config.backoff_base,
            backoff_max: config.backoff_max,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: u64,
    pub delayed: u64,
    pub processing: u64,
    pub dead: u64,
}

/// Broker port shared by the HTTP surface and the worker pools.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue the job for `(kind, order_id)` unless one is already active.
    async fn enqueue(&self, kind: JobKind, order_id: &str) -> QueueResult<EnqueueOutcome>;

    /// Take the next ready job, waiting up to `wait` for one to appear.
    async fn dequeue(&self, kind: JobKind, wait: Duration) -> QueueResult<Option<Job>>;

    /// Acknowledge a finished job and release its dedup key.
    async fn complete(&self, job: &Job) -> QueueResult<()>;

    /// Record a failed attempt; reschedules with backoff or dead-letters.
    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome>;

    /// Return jobs stuck in processing for longer than `older_than` to the ready set.
    async fn recover_stale(&self, kind: JobKind, older_than: Duration) -> QueueResult<usize>;

    async fn stats(&self, kind: JobKind) -> QueueResult<QueueStats>;

    async fn health_check(&self) -> QueueResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_ids_are_stage_scoped() {
        assert_eq!(JobKind::Acknowledge.job_id("gw-1"), "ack:gw-1");
        assert_eq!(JobKind::ErpPost.job_id("gw-1"), "erp:gw-1");
        assert_eq!(JobKind::Acknowledge.queue_name(), "gateway-ack");
        assert_eq!(JobKind::ErpPost.queue_name(), "erp-post");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(2), Duration::from_secs(120));
        assert_eq!(policy.delay_after(4), Duration::from_secs(480));
        assert_eq!(policy.delay_after(7), Duration::from_secs(3600));
        assert_eq!(policy.delay_after(40), Duration::from_secs(3600));
    }

    #[test]
    fn test_should_retry_until_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(4));
        assert!(!policy.should_retry(5));
    }
}
