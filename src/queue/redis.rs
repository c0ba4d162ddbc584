//! Redis-backed job broker
//!
//! Layout per queue (see [`crate::cache::keys::queue`]):
//! - `job:{id}`: JSON record, written with `SET NX` so it doubles as the dedup key
//! - `ready`: job ids runnable now, scored by enqueue time
//! - `delayed`: job ids waiting for a retry, scored by `run_at`
//! - `processing`: job ids handed to a worker, scored by start time
//! - `dead`: hash of exhausted jobs
//!
//! The job record lives until the job completes or is dead-lettered, so a second
//! enqueue during that window reports [`EnqueueOutcome::Duplicate`].

use crate::cache::keys::queue::{JobKey, QueueSet, SetKey};
use crate::cache::RedisPool;
use crate::queue::{
    EnqueueOutcome, FailOutcome, Job, JobKind, JobQueue, QueueError, QueueResult, QueueStats,
    RetryPolicy,
};
use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone)]
pub struct RedisJobQueue {
    pool: RedisPool,
    prefix: String,
    policy: RetryPolicy,
}

impl RedisJobQueue {
    pub fn new(pool: RedisPool, prefix: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
            policy,
        }
    }

    fn job_key(&self, kind: JobKind, job_id: &str) -> String {
        JobKey::new(&self.prefix, kind.queue_name(), job_id).to_string()
    }

    fn set_key(&self, kind: JobKind, set: QueueSet) -> String {
        SetKey::new(&self.prefix, kind.queue_name(), set).to_string()
    }

    fn encode(job: &Job) -> QueueResult<String> {
        serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))
    }

    fn decode(raw: &str) -> QueueResult<Job> {
        serde_json::from_str(raw).map_err(|e| QueueError::Deserialization(e.to_string()))
    }

    /// Move delayed jobs whose `run_at` has passed into the ready set.
    async fn promote_due(&self, kind: JobKind) -> QueueResult<()> {
        let delayed_key = self.set_key(kind, QueueSet::Delayed);
        let ready_key = self.set_key(kind, QueueSet::Ready);
        let now = Utc::now().timestamp_millis();
        let mut conn = self.pool.get().await?;

        let due: Vec<String> = conn.zrangebyscore(&delayed_key, "-inf", now).await?;
        for id in due {
            // Only the caller that removes the entry promotes it.
            let removed: i64 = conn.zrem(&delayed_key, &id).await?;
            if removed == 1 {
                let _: () = conn.zadd(&ready_key, &id, now).await?;
            }
        }
        Ok(())
    }

    async fn try_take(&self, kind: JobKind) -> QueueResult<Option<Job>> {
        self.promote_due(kind).await?;

        let processing_key = self.set_key(kind, QueueSet::Processing);
        let mut conn = self.pool.get().await?;

        loop {
            // Pop and mark as processing in one step so a dropped caller or a crash
            // leaves the id in `processing`, where `recover_stale` finds it.
            let taken: Option<String> = take_script()
                .key(self.set_key(kind, QueueSet::Ready))
                .key(&processing_key)
                .arg(Utc::now().timestamp_millis())
                .invoke_async(&mut *conn)
                .await?;
            let Some(id) = taken else {
                return Ok(None);
            };

            let job_key = self.job_key(kind, &id);
            let raw: Option<String> = conn.get(&job_key).await?;
            let Some(raw) = raw else {
                warn!(job_id = %id, queue = %kind, "Dropping ready entry without a job record");
                let _: () = conn.zrem(&processing_key, &id).await?;
                continue;
            };

            let mut job = match Self::decode(&raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!(job_id = %id, queue = %kind, error = %e, "Dead-lettering undecodable job");
                    let _: () = redis::pipe()
                        .atomic()
                        .hset(self.set_key(kind, QueueSet::Dead), &id, &raw)
                        .ignore()
                        .del(&job_key)
                        .ignore()
                        .zrem(&processing_key, &id)
                        .ignore()
                        .query_async(&mut *conn)
                        .await?;
                    continue;
                }
            };
            job.attempts += 1;
            let _: () = conn.set(&job_key, Self::encode(&job)?).await?;
            return Ok(Some(job));
        }
    }

    /// Job records that sit in none of the ready, delayed or processing sets.
    ///
    /// A record outlives its set membership only when an enqueue stopped between
    /// `SET NX` and `ZADD`, and such a record would otherwise hold its dedup key
    /// forever.
    async fn orphaned_ids(&self, kind: JobKind) -> QueueResult<Vec<String>> {
        let record_prefix = self.job_key(kind, "");
        let pattern = format!("{}*", record_prefix);
        let sets = [
            self.set_key(kind, QueueSet::Ready),
            self.set_key(kind, QueueSet::Delayed),
            self.set_key(kind, QueueSet::Processing),
        ];
        let mut conn = self.pool.get().await?;

        let mut orphaned = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut *conn)
                .await?;

            for key in keys {
                let Some(id) = key.strip_prefix(&record_prefix) else {
                    continue;
                };
                let mut tracked = false;
                for set in &sets {
                    let score: Option<f64> = conn.zscore(set, id).await?;
                    if score.is_some() {
                        tracked = true;
                        break;
                    }
                }
                if !tracked {
                    orphaned.push(id.to_string());
                }
            }

            if next == 0 {
                return Ok(orphaned);
            }
            cursor = next;
        }
    }
}

fn take_script() -> &'static Script {
    static SCRIPT: OnceLock<Script> = OnceLock::new();
    SCRIPT.get_or_init(|| {
        Script::new(
            r"
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[1], popped[1])
return popped[1]
",
        )
    })
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, kind: JobKind, order_id: &str) -> QueueResult<EnqueueOutcome> {
        let job = Job::new(kind, order_id);
        let job_key = self.job_key(kind, &job.id);
        let mut conn = self.pool.get().await?;

        let created: Option<String> = redis::cmd("SET")
            .arg(&job_key)
            .arg(Self::encode(&job)?)
            .arg("NX")
            .query_async(&mut *conn)
            .await?;
        if created.is_none() {
            debug!(job_id = %job.id, queue = %kind, "Job already active");
            return Ok(EnqueueOutcome::Duplicate);
        }

        let _: () = conn
            .zadd(
                self.set_key(kind, QueueSet::Ready),
                &job.id,
                job.enqueued_at.timestamp_millis(),
            )
            .await?;
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn dequeue(&self, kind: JobKind, wait: Duration) -> QueueResult<Option<Job>> {
        let started = Instant::now();
        loop {
            if let Some(job) = self.try_take(kind).await? {
                return Ok(Some(job));
            }
            let elapsed = started.elapsed();
            if elapsed >= wait {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(wait - elapsed)).await;
        }
    }

    async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.pool.get().await?;
        let _: () = redis::pipe()
            .atomic()
            .del(self.job_key(job.kind, &job.id))
            .ignore()
            .zrem(self.set_key(job.kind, QueueSet::Processing), &job.id)
            .ignore()
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> QueueResult<FailOutcome> {
        let job_key = self.job_key(job.kind, &job.id);
        let processing_key = self.set_key(job.kind, QueueSet::Processing);
        let mut conn = self.pool.get().await?;

        let raw: Option<String> = conn.get(&job_key).await?;
        let mut stored = match raw {
            Some(raw) => Self::decode(&raw)?,
            None => {
                let _: () = conn.zrem(&processing_key, &job.id).await?;
                return Ok(FailOutcome::Dead {
                    attempts: job.attempts,
                });
            }
        };
        stored.last_error = Some(error.to_string());

        if self.policy.should_retry(stored.attempts) {
            let delay = self.policy.delay_after(stored.attempts);
            let run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::hours(1));
            stored.run_at = run_at;
            let _: () = redis::pipe()
                .atomic()
                .set(&job_key, Self::encode(&stored)?)
                .ignore()
                .zrem(&processing_key, &stored.id)
                .ignore()
                .zadd(
                    self.set_key(job.kind, QueueSet::Delayed),
                    &stored.id,
                    run_at.timestamp_millis(),
                )
                .ignore()
                .query_async(&mut *conn)
                .await?;
            Ok(FailOutcome::Retrying {
                attempt: stored.attempts,
                run_at,
            })
        } else {
            let _: () = redis::pipe()
                .atomic()
                .hset(
                    self.set_key(job.kind, QueueSet::Dead),
                    &stored.id,
                    Self::encode(&stored)?,
                )
                .ignore()
                .del(&job_key)
                .ignore()
                .zrem(&processing_key, &stored.id)
                .ignore()
                .query_async(&mut *conn)
                .await?;
            Ok(FailOutcome::Dead {
                attempts: stored.attempts,
            })
        }
    }

    async fn recover_stale(&self, kind: JobKind, older_than: Duration) -> QueueResult<usize> {
        let processing_key = self.set_key(kind, QueueSet::Processing);
        let ready_key = self.set_key(kind, QueueSet::Ready);
        let now = Utc::now().timestamp_millis();
        let cutoff = now - older_than.as_millis().min(i64::MAX as u128) as i64;
        let mut conn = self.pool.get().await?;

        let stale: Vec<String> = conn.zrangebyscore(&processing_key, "-inf", cutoff).await?;
        let mut recovered = 0;
        for id in stale {
            let removed: i64 = conn.zrem(&processing_key, &id).await?;
            if removed == 1 {
                let _: () = conn.zadd(&ready_key, &id, now).await?;
                recovered += 1;
            }
        }

        for id in self.orphaned_ids(kind).await? {
            // NX keeps a concurrent enqueue's own ZADD authoritative.
            let added: i64 = redis::cmd("ZADD")
                .arg(&ready_key)
                .arg("NX")
                .arg(now)
                .arg(&id)
                .query_async(&mut *conn)
                .await?;
            if added == 1 {
                warn!(job_id = %id, queue = %kind, "Requeued job record missing from every set");
                recovered += 1;
            }
        }

        if recovered > 0 {
            info!(queue = %kind, recovered, "Recovered stale jobs");
        }
        Ok(recovered)
    }

    async fn stats(&self, kind: JobKind) -> QueueResult<QueueStats> {
        let mut conn = self.pool.get().await?;
        Ok(QueueStats {
            ready: conn.zcard(self.set_key(kind, QueueSet::Ready)).await?,
            delayed: conn.zcard(self.set_key(kind, QueueSet::Delayed)).await?,
            processing: conn.zcard(self.set_key(kind, QueueSet::Processing)).await?,
            dead: conn.hlen(self.set_key(kind, QueueSet::Dead)).await?,
        })
    }

    async fn health_check(&self) -> QueueResult<()> {
        crate::cache::health_check(&self.pool)
            .await
            .map_err(|e| QueueError::Pool(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{init_cache_pool, CacheConfig};

    async fn queue() -> RedisJobQueue {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let pool = init_cache_pool(CacheConfig {
            redis_url,
            ..Default::default()
        })
        .await
        .expect("redis pool");
        let prefix = format!("settlement-test-{}", uuid::Uuid::new_v4());
        RedisJobQueue::new(
            pool,
            prefix,
            RetryPolicy {
                max_attempts: 2,
                backoff_base: Duration::ZERO,
                backoff_max: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_queue_dedup_retry_and_dead_letter() {
        let queue = queue().await;

        assert_eq!(
            queue.enqueue(JobKind::ErpPost, "gw-1").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            queue.enqueue(JobKind::ErpPost, "gw-1").await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        let job = queue
            .dequeue(JobKind::ErpPost, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 1);
        assert!(matches!(
            queue.fail(&job, "timeout").await.unwrap(),
            FailOutcome::Retrying { attempt: 1, .. }
        ));

        let job = queue
            .dequeue(JobKind::ErpPost, Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(
            queue.fail(&job, "timeout").await.unwrap(),
            FailOutcome::Dead { attempts: 2 }
        );

        let stats = queue.stats(JobKind::ErpPost).await.unwrap();
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.processing, 0);

        // Dead-lettering releases the dedup key
        assert_eq!(
            queue.enqueue(JobKind::ErpPost, "gw-1").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_queue_complete_and_recover() {
        let queue = queue().await;
        queue.enqueue(JobKind::Acknowledge, "gw-2").await.unwrap();

        queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            queue
                .recover_stale(JobKind::Acknowledge, Duration::ZERO)
                .await
                .unwrap(),
            1
        );

        let job = queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        queue.complete(&job).await.unwrap();
        assert_eq!(
            queue.stats(JobKind::Acknowledge).await.unwrap(),
            QueueStats::default()
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_recover_requeues_record_outside_every_set() {
        let queue = queue().await;
        let job = Job::new(JobKind::Acknowledge, "gw-3");
        let mut conn = queue.pool.get().await.unwrap();
        let _: () = conn
            .set(
                queue.job_key(JobKind::Acknowledge, &job.id),
                RedisJobQueue::encode(&job).unwrap(),
            )
            .await
            .unwrap();
        drop(conn);

        // The record alone holds the dedup key
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-3").await.unwrap(),
            EnqueueOutcome::Duplicate
        );
        assert!(queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        assert_eq!(
            queue
                .recover_stale(JobKind::Acknowledge, Duration::from_secs(60))
                .await
                .unwrap(),
            1
        );
        let taken = queue
            .dequeue(JobKind::Acknowledge, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(taken.order_id, "gw-3");
        assert_eq!(taken.attempts, 1);

        // A taken job sits in processing and is not treated as orphaned
        assert_eq!(
            queue
                .recover_stale(JobKind::Acknowledge, Duration::from_secs(60))
                .await
                .unwrap(),
            0
        );
        queue.complete(&taken).await.unwrap();
        assert_eq!(
            queue.enqueue(JobKind::Acknowledge, "gw-3").await.unwrap(),
            EnqueueOutcome::Enqueued
        );
    }
}
