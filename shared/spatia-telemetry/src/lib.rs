//! Spatia Telemetry
//!
//! Structured logging setup and the in-process metric primitives the
//! write pipeline and server report through.

mod config;
mod metrics;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use metrics::{Counter, Gauge, Histogram, HistogramSummary};
pub use tracing_setup::init_tracing;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),
}

/// Read [`TelemetryConfig`] from the environment and install logging
pub fn init(service_name: &str) -> Result<TelemetryConfig, TelemetryError> {
    let config = TelemetryConfig::from_env(service_name);
    init_tracing(&config)?;
    Ok(config)
}
