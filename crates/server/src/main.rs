//! Server entry point.

use std::process::ExitCode;
use std::sync::Arc;

use ports::InMemoryQueue;
use server::config::{Config, LogFormat};
use server::{AppState, build_services, create_app};
use sqlx::postgres::PgPoolOptions;
use store::{Database, PgDatabase};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow::{BridgeConfig, HandlerRegistry, OutboxPoller, QueueBridge};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("failed to install Prometheus recorder: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to connect to the database: {0}")]
    Connect(#[from] sqlx::Error),

    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
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

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    // Metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // Database
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url())
        .await?;
    let pg = PgDatabase::new(pool);
    pg.run_migrations().await?;
    let db: Arc<dyn Database> = Arc::new(pg);

    tokio::fs::create_dir_all(&config.storage.object_store_root).await?;
    tokio::fs::create_dir_all(&config.templates.templates_folder).await?;

    // Background workers
    let services = Arc::new(build_services(&config, db.clone()));
    let shutdown = CancellationToken::new();
    let abort = CancellationToken::new();

    let poller = OutboxPoller::new(services.clone(), HandlerRegistry::standard(), config.poller())
        .with_abort(abort.clone());
    let poller_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { poller.run(shutdown).await }
    });

    let template_changes = config.queue_enabled.then(InMemoryQueue::new);
    let bridge_task = template_changes.clone().map(|queue| {
        let bridge = QueueBridge::new(Arc::new(queue), services.clone(), BridgeConfig::default())
            .with_abort(abort.clone());
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bridge.run(shutdown).await })
    });

    // Shutdown: stop claiming work, then abort whatever outlives the grace period.
    tokio::spawn({
        let shutdown = shutdown.clone();
        let abort = abort.clone();
        let grace = config.shutdown_grace;
        async move {
            shutdown_signal().await;
            shutdown.cancel();
            tokio::time::sleep(grace).await;
            tracing::warn!(?grace, "grace period elapsed, aborting in-flight work");
            abort.cancel();
        }
    });

    // HTTP
    let state = Arc::new(AppState::new(db, template_changes));
    let app = create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, queue_enabled = config.queue_enabled, "starting server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    if let Err(e) = poller_task.await {
        tracing::error!(error = %e, "outbox poller task failed");
    }
    if let Some(task) = bridge_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "queue bridge task failed");
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}
