//! Spatia Server
//!
//! Geospatial object server with a serialized write path:
//! - Commands execute against an in-memory store
//! - Every change is appended to a durable AOF and replayed on startup
//! - Live queries stream changes over WebSockets
//! - Geofence hooks POST enter/exit/cross triggers to webhooks

use parking_lot::Mutex;
use spatia_core::{Result, ServiceRuntime, SpatiaError, SpatiaService};
use spatia_pipeline::aof::{self, AofFile, AofFlusher};
use spatia_pipeline::{MemoryStore, Pipeline};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod config;
mod error;
mod massinsert;
mod webhook;

pub use config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    spatia_telemetry::init("spatia-server").map_err(|e| SpatiaError::Config(e.to_string()))?;

    info!("Starting Spatia server");

    let runtime = ServiceRuntime::new()?;
    let config = ServerConfig::from_env(runtime.config())?;
    let service = Arc::new(SpatiaServer::new(config).await?);
    runtime.run(service).await
}

pub struct SpatiaServer {
    config: ServerConfig,
    state: api::AppState,
    shutdown_tx: watch::Sender<bool>,
    flusher: Mutex<Option<JoinHandle<aof::FlushStats>>>,
}

impl SpatiaServer {
    /// Replay the AOF into a fresh store and start the background flusher
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let aof_config = &config.pipeline.aof;

        let mut store = MemoryStore::from_config(&config.pipeline);
        let report = aof::replay_file(&aof_config.path, &mut store)
            .await
            .map_err(|e| SpatiaError::Storage(format!("AOF replay failed: {e}")))?;

        let mut file = AofFile::open(&aof_config.path, aof_config.fsync)
            .await
            .map_err(|e| SpatiaError::Storage(format!("Cannot open AOF: {e}")))?;
        if report.truncated_tail {
            file.truncate(report.valid_len)
                .await
                .map_err(|e| SpatiaError::Storage(format!("Cannot truncate AOF: {e}")))?;
        }

        let pipeline = Arc::new(Pipeline::new(store, &config.pipeline).starting_at(report.last_seq()));
        let flusher = AofFlusher::new(Arc::clone(&pipeline), file, aof_config);
        let flush_metrics = flusher.metrics();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flusher = tokio::spawn(flusher.run(shutdown_rx));

        let hooks = Arc::new(webhook::HookManager::new(
            Arc::clone(pipeline.fences()),
            config.hook_channel_capacity,
            config.hook_timeout(),
        ));
        let state = api::AppState::new(pipeline, hooks, flush_metrics, config.live_channel_capacity);

        info!(
            replayed = report.applied,
            last_seq = report.last_seq(),
            aof = %aof_config.path.display(),
            fsync = ?aof_config.fsync,
            "Spatia server initialized"
        );

        Ok(Self {
            config,
            state,
            shutdown_tx,
            flusher: Mutex::new(Some(flusher)),
        })
    }
}

#[async_trait::async_trait]
impl SpatiaService for SpatiaServer {
    fn service_id(&self) -> &'static str {
        "spatia-server"
    }

    async fn shutdown(&self) -> Result<()> {
        info!("Shutting down Spatia server");
        self.state.stop_accepting();
        self.state.hooks.shutdown();

        // the flusher writes whatever is still buffered before it exits
        let _ = self.shutdown_tx.send(true);
        let handle = self.flusher.lock().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(stats) if stats.failures > 0 => {
                    warn!(failures = stats.failures, "AOF had flush failures during this run")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "AOF flusher task failed"),
            }
        }

        let pending = self.state.pipeline.pending_log_bytes();
        if pending > 0 {
            error!(pending, "Unflushed AOF bytes lost at shutdown");
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        info!(http = %self.config.http_bind, "Starting Spatia HTTP server");

        let app = api::create_router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(&self.config.http_bind)
            .await
            .map_err(|e| SpatiaError::Network(format!("Cannot bind {}: {e}", self.config.http_bind)))?;

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopping| *stopping).await;
            })
            .await
            .map_err(|e| SpatiaError::Network(e.to_string()))?;

        Ok(())
    }
}
