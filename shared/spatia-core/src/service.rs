//! Service infrastructure for Spatia binaries

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::Result;

/// Health status for liveness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub service_id: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Readiness status for readiness probes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessStatus {
    pub ready: bool,
    pub dependencies: Vec<DependencyStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub name: String,
    pub available: bool,
    pub latency_ms: Option<u64>,
}

#[async_trait]
pub trait SpatiaService: Send + Sync + 'static {
    fn service_id(&self) -> &'static str;

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Stop accepting work and persist whatever is pending
    async fn shutdown(&self) -> Result<()>;

    /// Serve until shut down
    async fn start(&self) -> Result<()>;
}

/// Standard lifecycle: start, wait for SIGINT/SIGTERM, shut down
pub struct ServiceRuntime {
    config: ServiceConfig,
    start_time: Instant,
}

impl ServiceRuntime {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: ServiceConfig::from_env()?,
            start_time: Instant::now(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub async fn run<S: SpatiaService>(self, service: Arc<S>) -> Result<()> {
        info!(
            service_id = service.service_id(),
            service_name = %self.config.service_name,
            version = service.version(),
            "Starting service"
        );

        let service_clone = Arc::clone(&service);
        let mut service_handle = tokio::spawn(async move { service_clone.start().await });

        let exited_early = tokio::select! {
            _ = Self::wait_for_shutdown() => {
                info!("Shutdown signal received, gracefully stopping...");
                false
            }
            result = &mut service_handle => {
                match result {
                    Ok(Ok(())) => warn!("Service stopped on its own"),
                    Ok(Err(e)) => error!(error = %e, "Service error"),
                    Err(e) => error!(error = %e, "Service task failed"),
                }
                true
            }
        };

        if let Err(e) = service.shutdown().await {
            warn!(error = %e, "Error during shutdown");
        }

        if !exited_early {
            let grace = Duration::from_millis(self.config.shutdown_timeout_ms);
            if tokio::time::timeout(grace, &mut service_handle).await.is_err() {
                warn!(grace_ms = self.config.shutdown_timeout_ms, "Service did not stop in time");
                service_handle.abort();
            }
        }

        info!(
            uptime_seconds = self.start_time.elapsed().as_secs(),
            "Service stopped"
        );

        Ok(())
    }

    async fn wait_for_shutdown() {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
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
                    error!(error = %e, "Failed to listen for SIGTERM");
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
    }
}
