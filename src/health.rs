//! Health check module
//! Reports the status of the Order Store and the Job Broker

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info};

use crate::database::repository::PaymentStore;
use crate::queue::{JobKind, JobQueue};

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub ok: bool,
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Overall health state
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Individual component health status
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub status: ComponentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Down,
}

impl ComponentHealth {
    pub fn up(response_time_ms: u128) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms: Some(response_time_ms),
            details: None,
        }
    }

    pub fn down(details: impl Into<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details: Some(serde_json::Value::String(details.into())),
        }
    }
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.ok
    }
}

/// Health checker for the application
#[derive(Clone)]
pub struct HealthChecker {
    store: Arc<dyn PaymentStore>,
    queue: Arc<dyn JobQueue>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn PaymentStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    /// Check every component; the process is healthy only if all are up.
    pub async fn check_health(&self) -> HealthStatus {
        let mut checks = HashMap::new();

        let database = probe("database", async {
            self.store.health_check().await.map_err(|e| e.to_string())
        })
        .await;
        checks.insert("database".to_string(), database);

        let mut broker = probe("broker", async {
            self.queue.health_check().await.map_err(|e| e.to_string())
        })
        .await;
        if broker.status == ComponentState::Up {
            broker.details = Some(self.queue_depths().await);
        }
        checks.insert("broker".to_string(), broker);

        let ok = checks.values().all(|c| c.status == ComponentState::Up);
        HealthStatus {
            ok,
            status: if ok {
                HealthState::Healthy
            } else {
                HealthState::Unhealthy
            },
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    async fn queue_depths(&self) -> serde_json::Value {
        let mut depths = serde_json::Map::new();
        for kind in [JobKind::Acknowledge, JobKind::ErpPost] {
            if let Ok(Ok(stats)) = timeout(CHECK_TIMEOUT, self.queue.stats(kind)).await {
                depths.insert(
                    kind.queue_name().to_string(),
                    serde_json::to_value(stats).unwrap_or_default(),
                );
            }
        }
        serde_json::Value::Object(depths)
    }
}

async fn probe<F>(component: &str, check: F) -> ComponentHealth
where
    F: Future<Output = Result<(), String>>,
{
    let start = Instant::now();
    match timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(())) => {
            let elapsed = start.elapsed().as_millis();
            info!("{} health check: OK ({}ms)", component, elapsed);
            ComponentHealth::up(elapsed)
        }
        Ok(Err(e)) => {
            error!("{} health check failed: {}", component, e);
            ComponentHealth::down(e)
        }
        Err(_) => {
            error!("{} health check timed out", component);
            ComponentHealth::down("Timeout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemoryPaymentStore;
    use crate::queue::memory::InMemoryJobQueue;

    #[tokio::test]
    async fn test_in_memory_components_are_healthy() {
        let checker = HealthChecker::new(
            Arc::new(InMemoryPaymentStore::new()),
            Arc::new(InMemoryJobQueue::default()),
        );
        let health = checker.check_health().await;
        assert!(health.is_healthy());
        assert_eq!(health.status, HealthState::Healthy);
        assert_eq!(health.checks.len(), 2);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["checks"]["broker"]["status"], "up");
        assert!(json["checks"]["broker"]["details"]["gateway-ack"].is_object());
    }
}
