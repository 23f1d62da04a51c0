//! Configuration management for services

use crate::error::{Result, SpatiaError};
use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub service_name: String,
    pub http_bind: String,
    /// Grace period for in-flight work on shutdown
    pub shutdown_timeout_ms: u64,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            service_name: env_or("SERVICE_NAME", "spatia"),
            http_bind: env_or("HTTP_BIND", "0.0.0.0:9851"),
            shutdown_timeout_ms: env_parse("SHUTDOWN_TIMEOUT_MS", 10_000)?,
        })
    }
}

/// Variable value or `default` when unset
pub fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse a variable, falling back to `default` when unset. A set but
/// unparsable value is a configuration error.
pub fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| SpatiaError::Config(format!("Invalid {name}: {e}"))),
        Err(_) => Ok(default),
    }
}
