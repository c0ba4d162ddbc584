use crate::queue::{
    EnqueueOutcome, FailOutcome, Job, JobKind, JobQueue, QueueResult, QueueStats, RetryPolicy,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
struct QueueState {
    /// Every job that still holds its dedup key, by id
    active: HashMap<String, Job>,
    ready: VecDeque<String>,
    delayed: Vec<(DateTime<Utc>, String)>,
    processing: HashMap<String, DateTime<Utc>>,
    dead: Vec<Job>,
}

impl QueueState {
    fn promote_due(&mut self, now: DateTime<Utc>) {
        let (due, later): (Vec<_>, Vec<_>) =
            self.delayed.drain(..).partition(|(run_at, _)| *run_at <= now);
        self.delayed = later;
        let mut due = due;
        due.sort_by_key(|(run_at, _)| *run_at);
        self.ready.extend(due.into_iter().map(|(_, id)| id));
    }
}

/// In-process broker with the same dedup and retry semantics as the Redis broker.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    queues: Arc<Mutex<HashMap<JobKind, QueueState>>>,
    notify: Arc<Notify>,
    policy: RetryPolicy,
}

impl InMemoryJobQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
            policy,
        }
    }

    /// Ids of jobs currently holding their dedup key, in no particular order.
    pub async fn active_ids(&self, kind: JobKind) -> Vec<String> {
        let queues = self.queues.lock().await;
        queues
            .get(&kind)
            .map(|q| q.active.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn dead_jobs(&self, kind: JobKind) -> Vec<Job> {
        let queues = self.queues.lock().await;
        queues
            .get(&kind)
            .map(|q| q.dead.clone())
            .unwrap_or_default()
    }

    async fn try_take(&self, kind: JobKind) -> Option<Job> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(kind).or_default();
        let now = Utc::now();
        state.promote_due(now);

        while let Some(id) = state.ready.pop_front() {
            if let Some(job) = state.active.get_mut(&id) {
                job.attempts += 1;
                state.processing.insert(id, now);
                return Some(job.clone());
            }
        }
        None
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, kind: JobKind, order_id: &str) -> QueueResult<EnqueueOutcome> {
        let job = Job::new(kind, order_id);
        {
            let mut queues = self.queues.lock().await;
            let state = queues.entry(kind).or_default();
            if state.active.contains_key(&job.id) {
                return Ok(EnqueueOutcome::Duplicate);
            }
            state.ready.push_back(job.id.clone());
            state.active.insert(job.id.clone(), job);
        }
        self.notify.notify_waiters();
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, kind: JobKind, wait: Duration) -> QueueResult<Option<Job>> {
        // Register interest before looking so an enqueue in between is not missed.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(job) = self.try_take(kind).await {
            return Ok(Some(job));
        }
        if wait.is_zero() {
            return Ok(None);
        }
        let _ = tokio::time::timeout(wait, notified).await;
        Ok(self.try_take(kind).await)
    }

    async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(job.kind).or_default();
        state.processing.remove(&job.id);
        state.active.remove(&job.id);
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(job.kind).or_default();
        state.processing.remove(&job.id);

        let Some(stored) = state.active.get_mut(&job.id) else {
            return Ok(FailOutcome::Dead {
                attempts: job.attempts,
            });
        };
        stored.last_error = Some(error.to_string());

        if self.policy.should_retry(stored.attempts) {
            let delay = self.policy.delay_after(stored.attempts);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
            stored.run_at = run_at;
            let attempt = stored.attempts;
            state.delayed.push((run_at, job.id.clone()));
            Ok(FailOutcome::Retrying { attempt, run_at })
        } else {
            let attempts = stored.attempts;
            if let Some(dead) = state.active.remove(&job.id) {
                state.dead.push(dead);
            }
            Ok(FailOutcome::Dead { attempts })
        }
    }

    async fn recover_stale(&self, kind: JobKind, older_than: Duration) -> QueueResult<usize> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(kind).or_default();
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let stale: Vec<String> = state
            .processing
            .iter()
            .filter(|(_, started)| **started <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            state.processing.remove(id);
            state.ready.push_back(id.clone());
        }
        Ok(stale.len())
    }

    async fn stats(&self, kind: JobKind) -> QueueResult<QueueStats> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(&kind)
            .map(|q| QueueStats {
                ready: q.ready.len() as u64,
                delayed: q.delayed.len() as u64,
                processing: q.processing.len() as u64,
                dead: q.dead.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn health_check(&self) -> QueueResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate_retries(max_attempts: u32) -> InMemoryJobQueue {
        InMemoryJobQueue::new(RetryPolicy {
            max_attempts,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        })
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_collapses() {
        let queue = InMemoryJobQueue::default();
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        // Different stage, different key
        assert_eq!(
            queue.enqueue(JobKind::ErpPost, "gw-1").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
    }

    #[tokio::test]
    async fn test_complete_releases_key() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap();
        let job = queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.id, "ack:gw-1");

        // Still active while processing
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        queue.complete(&job).await.unwrap();
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
    }

    #[tokio::test]
    async fn test_fail_retries_then_dead_letters() {
        let queue = immediate_retries(2);
        queue.enqueue(JobKind::ErpPost, "gw-1").await.unwrap();

        let job = queue
            .dequeue(JobKind::ErpPost, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let outcome = queue.fail(&job, "timeout").await.unwrap();
        assert!(matches!(outcome, FailOutcome::Retrying { attempt: 1, .. }));

        let job = queue
            .dequeue(JobKind::ErpPost, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("timeout"));

        let outcome = queue.fail(&job, "timeout again").await.unwrap();
        assert_eq!(outcome, FailOutcome::Dead { attempts: 2 });

        let dead = queue.dead_jobs(JobKind::ErpPost).await;
        assert_eq!(dead.len(), 1);
        assert!(queue.active_ids(JobKind::ErpPost).await.is_empty());
    }

    #[tokio::test]
    async fn test_delayed_job_is_not_ready_early() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap();
        let job = queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        queue.fail(&job, "boom").await.unwrap();

        assert!(queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
        assert_eq!(queue.stats(JobKind::Acknowledge).await.unwrap().delayed, 1);
    }

    #[tokio::test]
    async fn test_recover_stale_requeues_processing_jobs() {
        let queue = InMemoryJobQueue::default();
        queue.enqueue(JobKind::Acknowledge, "gw-1").await.unwrap();
        queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();

        let recovered = queue
            .recover_stale(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(recovered, 1);

        let again = queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = InMemoryJobQueue::default();
        let producer = queue.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.enqueue(JobKind::Acknowledge, "gw-9").await.unwrap();
        });

        let job = queue
            .dequeue(JobKind::Acknowledge, Duration::from_secs(2))
            .await
            .unwrap();
        handle.await.unwrap();
        assert_eq!(job.map(|j| j.order_id), Some("gw-9".to_string()));
    }
}
