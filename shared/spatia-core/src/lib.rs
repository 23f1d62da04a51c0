//! Spatia Core - service infrastructure shared by Spatia binaries
//!
//! This crate provides:
//! - The service trait and runtime every binary runs under
//! - Service-level error type with HTTP status mapping
//! - Environment configuration helpers

pub mod config;
pub mod error;
pub mod service;

pub use config::{env_or, env_parse, ServiceConfig};
pub use error::{Result, SpatiaError};
pub use service::{DependencyStatus, HealthStatus, ReadinessStatus, ServiceRuntime, SpatiaService};
