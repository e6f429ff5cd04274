//! Mark-attendance service (fras-ma) - Main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fras_common::config::StorageMode;
use fras_common::events::EventBus;
use fras_common::storage::{
    GrantedDirectory, PartitionStore, PrivateStorage, StorageHost, StudentDirectory,
};
use fras_ma::api::{create_router, AppState};
use fras_ma::config::{Args, Config};
use fras_ma::engine::{
    CaptureControl, Collaborators, HttpCapture, HttpRoster, LocalCapture, ModelFileGate,
    ReconciliationEngine, RosterSource, StoreRoster, StoreSink,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args).context("Failed to load configuration")?;

    init_tracing(&config)?;

    info!("Starting FRAS mark-attendance service on port {}", config.port);
    info!("Root folder: {}", config.root_folder.display());

    let host: Arc<dyn StorageHost> = match config.storage_mode {
        StorageMode::Private => Arc::new(PrivateStorage::new(&config.root_folder)),
        StorageMode::Granted => Arc::new(GrantedDirectory::new(&config.root_folder)),
    };
    let store = Arc::new(PartitionStore::open(host));
    store
        .resolver()
        .acquire_root()
        .await
        .context("Failed to open storage root")?;

    let roster: Arc<dyn RosterSource>;
    let capture: Arc<dyn CaptureControl>;
    match &config.backend_url {
        Some(url) => {
            info!("Using recognition backend at {}", url);
            roster = Arc::new(HttpRoster::new(url.as_str()).context("Failed to create roster client")?);
            capture = Arc::new(HttpCapture::new(url.as_str()).context("Failed to create capture client")?);
        }
        None => {
            info!("No backend configured; using local roster and capture");
            let directory = Arc::new(StudentDirectory::new(Arc::clone(&store)));
            roster = Arc::new(StoreRoster::new(directory));
            capture = Arc::new(LocalCapture::new());
        }
    }

    let collaborators = Collaborators {
        roster,
        gate: Arc::new(ModelFileGate::new(&config.model_path)),
        capture,
        sink: Arc::new(StoreSink::new(Arc::clone(&store))),
    };
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&store),
        collaborators,
        EventBus::new(256),
        config.notice_ttl,
    ));
    info!("Reconciliation engine initialized");

    let app = create_router(AppState {
        engine: Arc::clone(&engine),
        store,
        port: config.port,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    engine.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` wins; otherwise the configured level applies to this
/// service and the common library.
fn init_tracing(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "fras_ma={level},fras_common={level},tower_http=debug",
            level = config.log_level
        )
        .into()
    });

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            )
        }
        None => None,
    };
    let stderr_layer = config
        .log_file
        .is_none()
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
