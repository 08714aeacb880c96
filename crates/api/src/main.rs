//! API server entry point.

use std::time::Duration;

use api::config::{Config, LogFormat};
use api::provisioning::InMemoryProvisioner;
use metrics_exporter_prometheus::PrometheusHandle;
use operation_store::{
    InMemoryOperationRepository, OperationRepository, PostgresOperationRepository,
};
use orchestrator::StallMonitor;
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the repository and run the server
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await?;
            let repo = PostgresOperationRepository::new(pool);
            repo.run_migrations().await?;
            tracing::info!("using PostgreSQL operation repository");
            serve(repo, config, metrics_handle).await
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory operation repository");
            serve(InMemoryOperationRepository::new(), config, metrics_handle).await
        }
    }
}

async fn serve<R: OperationRepository + 'static>(
    repo: R,
    config: Config,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError> {
    let provisioner = InMemoryProvisioner::default();
    let state = api::create_state(repo, &config, provisioner.task_catalog());

    // 4. Report work left behind by a previous process
    let incomplete = state.service.list_incomplete_operations().await?;
    for operation in &incomplete {
        tracing::warn!(
            operation_id = %operation.id(),
            r#type = %operation.operation_type(),
            status = %operation.status(),
            "operation has no live task in this process"
        );
    }
    if !incomplete.is_empty() {
        tracing::warn!(
            count = incomplete.len(),
            "found incomplete operations from a previous run; cancel or let the stall monitor report them"
        );
    }

    // 5. Start the stall monitor
    let monitor_shutdown = CancellationToken::new();
    let monitor = StallMonitor::new(state.service.clone(), config.stall_monitor_config())
        .spawn(monitor_shutdown.clone());

    // 6. Start server
    let app = api::create_app(state.clone(), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop background work
    monitor_shutdown.cancel();
    let executor = state.dispatcher.executor();
    executor.shutdown();

    let drain_deadline = tokio::time::Instant::now() + config.cancel_grace + Duration::from_secs(1);
    while executor.live_tasks() > 0 && tokio::time::Instant::now() < drain_deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if executor.live_tasks() > 0 {
        tracing::warn!(
            live_tasks = executor.live_tasks(),
            "exiting with tasks still registered"
        );
    }
    if let Err(e) = monitor.await {
        tracing::warn!(error = %e, "stall monitor did not stop cleanly");
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
