//! Logging configuration

use std::env;

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Fallback filter directive when `RUST_LOG` is unset
    pub log_level: String,
    pub json_logs: bool,
}

impl TelemetryConfig {
    /// `SERVICE_NAME` overrides `default_name`, `LOG_LEVEL` sets the
    /// fallback filter and `JSON_LOGS=false` switches to compact text
    pub fn from_env(default_name: &str) -> Self {
        Self {
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| default_name.to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            json_logs: env::var("JSON_LOGS").map(|v| flag(&v)).unwrap_or(true),
        }
    }
}

fn flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
