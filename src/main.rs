use settlement_bridge::api::{self, AppState};
use settlement_bridge::cache::{get_cache_stats, init_cache_pool, CacheConfig};
use settlement_bridge::config::AppConfig;
use settlement_bridge::database::payment_repository::PaymentRepository;
use settlement_bridge::database::repository::PaymentStore;
use settlement_bridge::database::{get_pool_stats, init_pool_from_config};
use settlement_bridge::health::HealthChecker;
use settlement_bridge::logging::init_tracing;
use settlement_bridge::payments::erp::ErpClient;
use settlement_bridge::payments::gateway::CardGateway;
use settlement_bridge::payments::providers::{CardGatewayClient, SapODataClient};
use settlement_bridge::queue::redis::RedisJobQueue;
use settlement_bridge::queue::{JobQueue, RetryPolicy};
use settlement_bridge::services::{PlainTextReceiptRenderer, RegistrationService};
use settlement_bridge::workers::ack_worker::AckWorker;
use settlement_bridge::workers::erp_posting::ErpPostingWorker;
use settlement_bridge::workers::runner::{JobRunner, RunnerConfig};

use dotenv::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    init_tracing();

    let config = AppConfig::from_env().map_err(|e| {
        error!("❌ Failed to load configuration: {}", e);
        e
    })?;
    config.validate().map_err(|e| {
        error!("❌ Invalid configuration: {}", e);
        e
    })?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting invoice settlement bridge"
    );
    info!(gateway = ?config.gateway, erp = ?config.erp, "Upstream configuration loaded");

    // Order Store
    info!("📊 Initializing database connection pool...");
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    let pool_stats = get_pool_stats(&db_pool);
    info!(
        size = pool_stats.size,
        idle = pool_stats.num_idle,
        "✅ Database ready, migrations applied"
    );
    let store: Arc<dyn PaymentStore> = Arc::new(PaymentRepository::new(db_pool));

    // Job Broker
    info!("🔄 Initializing Redis broker connection pool...");
    let redis_pool = init_cache_pool(CacheConfig::from(&config.cache))
        .await
        .map_err(|e| {
            error!("Failed to initialize Redis pool: {}", e);
            e
        })?;
    let stats = get_cache_stats(&redis_pool);
    info!(
        connections = stats.connections,
        idle_connections = stats.idle_connections,
        key_prefix = %config.cache.key_prefix,
        "✅ Broker connection pool initialized"
    );
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::new(
        redis_pool,
        config.cache.key_prefix.clone(),
        RetryPolicy::from_config(&config.workers),
    ));

    // Adapters
    let gateway_client = CardGatewayClient::new(config.gateway.clone())?;
    let default_currency = gateway_client.default_currency().to_string();
    let language = gateway_client.default_language().to_string();
    let gateway: Arc<dyn CardGateway> = Arc::new(gateway_client);
    let erp: Arc<dyn ErpClient> = Arc::new(SapODataClient::new(config.erp.clone())?);
    info!(gateway = gateway.name(), erp = erp.name(), "✅ Upstream adapters initialized");

    // Worker pools
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);

    let ack_runner = JobRunner::new(
        queue.clone(),
        Arc::new(AckWorker::new(store.clone(), gateway.clone(), queue.clone())),
        RunnerConfig::from_worker_config(&config.workers, config.workers.ack_concurrency),
    );
    let erp_runner = JobRunner::new(
        queue.clone(),
        Arc::new(ErpPostingWorker::new(store.clone(), erp.clone())),
        RunnerConfig::from_worker_config(&config.workers, config.workers.erp_concurrency),
    );
    let worker_handles = vec![
        tokio::spawn(ack_runner.run(worker_shutdown_rx.clone())),
        tokio::spawn(erp_runner.run(worker_shutdown_rx)),
    ];

    // HTTP surface
    let registration = Arc::new(RegistrationService::new(
        store.clone(),
        gateway,
        erp,
        default_currency,
        language,
    ));
    let state = AppState {
        store: store.clone(),
        queue: queue.clone(),
        registration,
        receipts: Arc::new(PlainTextReceiptRenderer::new(
            std::env::var("RECEIPT_ISSUER").ok(),
        )),
        health_checker: HealthChecker::new(store, queue),
        frontend_url: config.server.frontend_url.clone(),
    };
    let app = api::router(state);
    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(
        address = %addr,
        frontend_url = %config.server.frontend_url,
        "🚀 Server listening on http://{}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    let drain = config.workers.job_timeout + Duration::from_secs(5);
    for handle in worker_handles {
        match tokio::time::timeout(drain, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Worker pool task failed"),
            Err(_) => error!("Timed out waiting for worker pool shutdown"),
        }
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
