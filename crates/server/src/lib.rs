//! Telemetry server: ingest/query plane over a pluggable metric store.
//!
//! `run` selects the store backend, optionally restores it, and drives
//! the HTTP and gRPC transports as sibling tasks joined at the end,
//! with the in-memory persistence loop alongside.

pub mod api;
pub mod grpc;
pub mod middleware;
pub mod persist;
pub mod state;

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use pulse_core::shutdown::Shutdown;
use pulse_core::{PulseError, ServerConfig};
use pulse_storage::memory::MemStorage;
use pulse_storage::postgres::PgStorage;
use pulse_storage::retry::Retrier;
use pulse_storage::MetricStore;
use pulse_wire::crypt::Decryptor;

use crate::state::AppState;

/// Run the server until shutdown.
pub async fn run(cfg: ServerConfig, shutdown: Shutdown) -> Result<(), PulseError> {
    cfg.validate()?;
    cfg.log_summary();

    let retrier = Retrier::new();
    let decryptor = match &cfg.priv_key_file {
        Some(path) => Some(Decryptor::from_pem_file(path)?),
        None => None,
    };

    // Store selection: a non-empty DSN means PostgreSQL, otherwise the
    // in-memory store with optional file persistence.
    let mut mem_for_dump: Option<Arc<MemStorage>> = None;
    let store: Arc<dyn MetricStore> = match cfg.database_dsn.as_deref() {
        Some(dsn) if !dsn.is_empty() => {
            let pg = PgStorage::connect(dsn).await?;
            retrier.populate(|| pg.populate()).await?;
            info!("postgres store ready");
            Arc::new(pg)
        }
        _ => {
            let mem = Arc::new(MemStorage::new());
            if cfg.restore {
                if let Some(path) = &cfg.file_storage_path {
                    retrier.populate(|| mem.read_from_file(path)).await?;
                }
            }
            if cfg.file_storage_path.is_some() {
                mem_for_dump = Some(mem.clone());
            }
            info!("in-memory store ready");
            mem
        }
    };

    let state = Arc::new(AppState {
        store,
        retrier,
        sign_key: cfg.key_enc.clone(),
        decryptor,
    });

    let dump_task = match (mem_for_dump, cfg.file_storage_path.clone()) {
        (Some(mem), Some(path)) => Some(tokio::spawn(persist::run_dump_loop(
            mem,
            path,
            cfg.store_interval,
            shutdown.clone(),
        ))),
        _ => None,
    };

    // HTTP transport.
    let listener = TcpListener::bind(&cfg.server_addr)
        .await
        .map_err(|e| PulseError::Config(format!("bind {}: {}", cfg.server_addr, e)))?;
    info!("http listening on {}", cfg.server_addr);
    let app = api::router(state.clone());
    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
            .map_err(|e| PulseError::Transport(e.to_string()))
    });

    // Optional gRPC transport.
    let grpc_task = match cfg.grpc_addr.clone() {
        Some(addr) => {
            let service = grpc::MonitoringService::new(state.clone(), cfg.trusted_subnet.as_deref())?;
            Some(tokio::spawn(grpc::serve(addr, service, shutdown.clone())))
        }
        None => None,
    };

    // Scatter/gather: both servers wind down on cancellation, then the
    // final dump runs.
    http_task
        .await
        .map_err(|e| PulseError::Transport(format!("http task: {}", e)))??;
    if let Some(task) = grpc_task {
        task.await
            .map_err(|e| PulseError::Transport(format!("grpc task: {}", e)))??;
    }
    if let Some(task) = dump_task {
        let _ = task.await;
    }

    info!("server stopped");
    Ok(())
}
