use crate::config::WorkerConfig;
use crate::queue::{FailOutcome, Job, JobQueue, QueueResult};
use crate::workers::{JobHandler, WorkerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

const IDLE_PAUSE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub concurrency: usize,
    /// Upper bound on one handler invocation
    pub job_timeout: Duration,
    /// How long a single dequeue blocks waiting for work
    pub dequeue_wait: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            job_timeout: Duration::from_secs(60),
            dequeue_wait: Duration::from_secs(5),
        }
    }
}

impl RunnerConfig {
    pub fn from_worker_config(config: &WorkerConfig, concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            job_timeout: config.job_timeout,
            dequeue_wait: config.dequeue_wait,
        }
    }
}

/// What happened to a job after one handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed,
    Retrying { attempt: u32 },
    Dead { attempts: u32 },
}

/// Consumer loop shared by both worker pools.
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: RunnerConfig,
}

impl JobRunner {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: RunnerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Dequeue one job (waiting up to `dequeue_wait`) and run it.
    pub async fn process_next(&self) -> QueueResult<Option<JobOutcome>> {
        match self
            .queue
            .dequeue(self.handler.kind(), self.config.dequeue_wait)
            .await?
        {
            Some(job) => self.execute(job).await.map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, job: Job) -> QueueResult<JobOutcome> {
        let span = tracing::info_span!(
            "job",
            queue = %job.kind,
            job_id = %job.id,
            order_id = %job.order_id,
            attempt = job.attempts
        );

        async {
            let result =
                match tokio::time::timeout(self.config.job_timeout, self.handler.handle(&job)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::Timeout(self.config.job_timeout)),
                };

            match result {
                Ok(()) => {
                    self.queue.complete(&job).await?;
                    Ok(JobOutcome::Completed)
                }
                Err(e) => match self.queue.fail(&job, &e.to_string()).await? {
                    FailOutcome::Retrying { attempt, run_at } => {
                        warn!(error = %e, attempt, retry_at = %run_at, "Job failed, will retry");
                        Ok(JobOutcome::Retrying { attempt })
                    }
                    FailOutcome::Dead { attempts } => {
                        error!(error = %e, attempts, "❌ Job exhausted its attempts, moved to dead set");
                        Ok(JobOutcome::Dead { attempts })
                    }
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Run `concurrency` consumers until `shutdown` flips to `true`. In-flight
    /// jobs finish before the consumer exits.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        let kind = self.handler.kind();
        match self
            .queue
            .recover_stale(kind, self.config.job_timeout)
            .await
        {
            Ok(0) => {}
            Ok(recovered) => info!(queue = %kind, recovered, "Returned stale jobs to the queue"),
            Err(e) => warn!(queue = %kind, error = %e, "Failed to recover stale jobs"),
        }

        info!(
            queue = %kind,
            concurrency = self.config.concurrency,
            job_timeout_secs = self.config.job_timeout.as_secs(),
            "🚀 Worker pool started"
        );

        let runner = Arc::new(self);
        let consumers: Vec<_> = (0..runner.config.concurrency)
            .map(|slot| {
                let runner = runner.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move { runner.consume(slot, shutdown_rx).await })
            })
            .collect();

        for result in futures::future::join_all(consumers).await {
            if let Err(e) = result {
                error!(queue = %kind, error = %e, "Worker task panicked");
            }
        }

        info!(queue = %kind, "Worker pool stopped");
    }

    async fn consume(&self, slot: usize, mut shutdown_rx: watch::Receiver<bool>) {
        let kind = self.handler.kind();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Never cancelled: a broker call dropped halfway can strand a job.
            // Shutdown is observed between polls, at most `dequeue_wait` late.
            match self.queue.dequeue(kind, self.config.dequeue_wait).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.execute(job).await {
                        error!(queue = %kind, slot, error = %e, "Failed to settle job with broker");
                    }
                }
                Ok(None) if self.config.dequeue_wait.is_zero() => {
                    tokio::select! {
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(IDLE_PAUSE) => {}
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(queue = %kind, slot, error = %e, "Dequeue failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}
