use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dexflow::adapters::{MemoryStore, OrderStore, PostgresStore};
use dexflow::api::{create_router, AppState};
use dexflow::config::AppConfig;
use dexflow::error::{EngineError, Result};
use dexflow::queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
use dexflow::router::DexRouter;
use dexflow::services::{ConnectionRegistry, WorkerPool};

#[derive(Parser)]
#[command(name = "dexflow", about = "Mock DEX order execution engine")]
struct Cli {
    /// Config directory or TOML file
    #[arg(long, default_value = "config")]
    config: String,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Run against in-memory store and queue (no Postgres/Redis needed)
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("startup failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config).unwrap_or_else(|e| {
        warn!("Failed to load config: {}, using defaults", e);
        AppConfig::default()
    });
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    init_logging(&config);

    if let Err(errors) = config.validate() {
        for problem in &errors {
            error!("config: {}", problem);
        }
        return Err(EngineError::Validation(errors.join("; ")));
    }

    let limits = config.queue.limits();

    let mut pg_handle: Option<PostgresStore> = None;
    let store: Arc<dyn OrderStore> = if cli.ephemeral {
        info!("Using in-memory order store");
        Arc::new(MemoryStore::new())
    } else {
        let store = PostgresStore::new(&config.database.url(), config.database.max_connections)
            .await?;
        store.migrate().await?;
        pg_handle = Some(store.clone());
        Arc::new(store)
    };

    let queue: Arc<dyn JobQueue> = if cli.ephemeral || config.queue.backend == "memory" {
        info!("Using in-memory job queue");
        Arc::new(MemoryJobQueue::new(limits))
    } else {
        Arc::new(RedisJobQueue::new(&config.redis.url(), limits).await?)
    };

    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(DexRouter::new(config.router.clone()));

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        router,
        Arc::clone(&registry),
        config.worker.settings(&config.queue),
    );
    let worker_handles = pool.spawn();
    info!(workers = config.queue.concurrency, "worker pool started");

    let state = AppState::new(Arc::clone(&store), Arc::clone(&queue), registry);
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| EngineError::Internal(format!("server error: {e}")))?;

    // Stop reserving; in-flight workers run to disposition and close their
    // streams on the way out.
    info!("Shutting down: draining workers");
    queue.shutdown();
    for handle in worker_handles {
        let _ = handle.await;
    }
    if let Some(pg) = pg_handle.take() {
        pg.close().await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},sqlx=warn", config.logging.level))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
