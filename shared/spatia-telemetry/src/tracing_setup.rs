//! Subscriber setup

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber. `RUST_LOG` directives win over
/// `config.log_level`; exactly one of the JSON or plain layers is active.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::TracingInit(format!("bad log filter '{}': {e}", config.log_level)))?;

    let json = config
        .json_logs
        .then(|| fmt::layer().json().with_current_span(false).with_thread_ids(true));
    let plain = (!config.json_logs).then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        filter = %config.log_level,
        json = config.json_logs,
        "Logging ready"
    );
    Ok(())
}
