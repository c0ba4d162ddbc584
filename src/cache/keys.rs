//! Type-safe Redis key builders for the job broker

use std::fmt;

pub const VERSION: &str = "v1";

pub mod queue {
    use super::*;

    pub const NAMESPACE: &str = "queue";

    /// JSON record of a job. Its existence is the job's dedup key.
    #[derive(Debug, Clone)]
    pub struct JobKey {
        pub prefix: String,
        pub queue: String,
        pub job_id: String,
    }

    impl JobKey {
        pub fn new(
            prefix: impl Into<String>,
            queue: impl Into<String>,
            job_id: impl Into<String>,
        ) -> Self {
            Self {
                prefix: prefix.into(),
                queue: queue.into(),
                job_id: job_id.into(),
            }
        }
    }

    impl fmt::Display for JobKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}:job:{}",
                self.prefix, VERSION, NAMESPACE, self.queue, self.job_id
            )
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum QueueSet {
        /// Sorted set of runnable job ids, scored by enqueue time
        Ready,
        /// Sorted set of job ids waiting for a retry, scored by run time
        Delayed,
        /// Sorted set of job ids being handled, scored by start time
        Processing,
        /// Hash of job id to final job record
        Dead,
    }

    impl QueueSet {
        fn as_str(&self) -> &'static str {
            match self {
                QueueSet::Ready => "ready",
                QueueSet::Delayed => "delayed",
                QueueSet::Processing => "processing",
                QueueSet::Dead => "dead",
            }
        }
    }

    #[derive(Debug, Clone)]
    pub struct SetKey {
        pub prefix: String,
        pub queue: String,
        pub set: QueueSet,
    }

    impl SetKey {
        pub fn new(prefix: impl Into<String>, queue: impl Into<String>, set: QueueSet) -> Self {
            Self {
                prefix: prefix.into(),
                queue: queue.into(),
                set,
            }
        }
    }

    impl fmt::Display for SetKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{}:{}:{}:{}:{}",
                self.prefix,
                VERSION,
                NAMESPACE,
                self.queue,
                self.set.as_str()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::queue::*;

    #[test]
    fn test_job_key_format() {
        let key = JobKey::new("settlement", "gateway-ack", "ack:gw-1");
        assert_eq!(
            key.to_string(),
            "settlement:v1:queue:gateway-ack:job:ack:gw-1"
        );
    }

    #[test]
    fn test_set_key_format() {
        assert_eq!(
            SetKey::new("settlement", "erp-post", QueueSet::Delayed).to_string(),
            "settlement:v1:queue:erp-post:delayed"
        );
        assert_eq!(
            SetKey::new("settlement", "erp-post", QueueSet::Dead).to_string(),
            "settlement:v1:queue:erp-post:dead"
        );
    }
}
