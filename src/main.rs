use anyhow::Context;
use loan_servicing_backend::api::{self, AppState};
use loan_servicing_backend::config::AppConfig;
use loan_servicing_backend::database::{InMemoryLoanStore, LoanStore};
use loan_servicing_backend::events::{EventBus, InMemoryEventBus};
use loan_servicing_backend::logging::init_tracing;
use loan_servicing_backend::payments::GatewayRouter;
use loan_servicing_backend::services::TransactionCoordinator;
use loan_servicing_backend::workers::{
    OutboxPublisher, OutboxPublisherConfig, OverdueMonitorConfig, OverdueMonitorWorker,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn LoanStore>> {
    if config.skip_externals {
        info!("⏭️  Using in-memory loan store (SKIP_EXTERNALS=true)");
        return Ok(Arc::new(InMemoryLoanStore::new()));
    }

    #[cfg(feature = "database")]
    {
        use loan_servicing_backend::database::{
            health_check, init_pool_from_config, run_migrations, PgLoanStore,
        };

        info!("📊 Initializing database connection pool...");
        let pool = init_pool_from_config(&config.database)
            .await
            .context("failed to initialize database pool")?;
        run_migrations(&pool)
            .await
            .context("failed to run database migrations")?;
        health_check(&pool)
            .await
            .context("database health check failed")?;
        info!(
            max_connections = config.database.max_connections,
            "✅ Database connection pool initialized"
        );
        Ok(Arc::new(PgLoanStore::new(pool)))
    }

    #[cfg(not(feature = "database"))]
    {
        anyhow::bail!("built without the `database` feature; set SKIP_EXTERNALS=true")
    }
}

async fn build_event_bus(config: &AppConfig) -> anyhow::Result<Arc<dyn EventBus>> {
    let redis_url = if config.skip_externals {
        None
    } else {
        config.event_bus.redis_url.as_deref()
    };

    let Some(redis_url) = redis_url else {
        info!("⏭️  Delivering lifecycle events to the in-memory bus");
        return Ok(Arc::new(InMemoryEventBus::new()));
    };

    #[cfg(feature = "cache")]
    {
        use loan_servicing_backend::events::redis_bus::{init_redis_pool, RedisStreamBus};

        info!("🔄 Initializing Redis event bus...");
        let pool = init_redis_pool(&config.event_bus)
            .await
            .context("failed to initialize Redis pool")?;
        info!(
            redis_url = %redis_url,
            stream_prefix = %config.event_bus.stream_prefix,
            "✅ Redis event bus initialized"
        );
        Ok(Arc::new(RedisStreamBus::new(pool, &config.event_bus)))
    }

    #[cfg(not(feature = "cache"))]
    {
        warn!(redis_url = %redis_url, "built without the `cache` feature; using the in-memory bus");
        Ok(Arc::new(InMemoryEventBus::new()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "🚀 Starting loan servicing backend"
    );

    let store = build_store(&config).await?;
    let bus = build_event_bus(&config).await?;
    let gateways =
        GatewayRouter::from_config(&config.gateway).context("failed to configure gateways")?;
    if gateways.available_channels().is_empty() {
        warn!("No payment channel configured; payment requests will be rejected");
    }

    let coordinator = Arc::new(TransactionCoordinator::new(store));
    let state = AppState::new(coordinator.clone(), gateways, bus.clone());

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let publisher = OutboxPublisher::new(
        coordinator.clone(),
        bus,
        OutboxPublisherConfig::from(&config.outbox),
    );
    let overdue = OverdueMonitorWorker::new(
        state.repayments.clone(),
        OverdueMonitorConfig::from(&config.overdue),
    );
    let worker_handles = vec![
        tokio::spawn(publisher.run(worker_shutdown_rx.clone())),
        tokio::spawn(overdue.run(worker_shutdown_rx)),
    ];

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!("Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
