//! Server Configuration

use spatia_core::{env_or, env_parse, Result, ServiceConfig, SpatiaError};
use spatia_pipeline::{AofConfig, FlushFailurePolicy, FsyncPolicy, PipelineConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_bind: String,
    pub pipeline: PipelineConfig,
    /// Per-subscriber queue depth for live queries
    pub live_channel_capacity: usize,
    /// Per-hook queue depth for webhook triggers
    pub hook_channel_capacity: usize,
    pub hook_timeout_ms: u64,
}

impl ServerConfig {
    /// Server settings on top of the common service settings
    pub fn from_env(service: &ServiceConfig) -> Result<Self> {
        let defaults = AofConfig::default();

        let fsync = env_or("AOF_FSYNC", "everysec")
            .parse::<FsyncPolicy>()
            .map_err(|e| SpatiaError::Config(format!("Invalid AOF_FSYNC: {e}")))?;
        let failure_policy = env_or("AOF_FLUSH_FAILURE_POLICY", "retain")
            .parse::<FlushFailurePolicy>()
            .map_err(|e| SpatiaError::Config(format!("Invalid AOF_FLUSH_FAILURE_POLICY: {e}")))?;

        let max_objects = match env_parse("MAX_OBJECTS", 0usize)? {
            0 => None,
            n => Some(n),
        };

        Ok(Self {
            http_bind: service.http_bind.clone(),
            pipeline: PipelineConfig {
                max_objects,
                slow_command_threshold_ms: env_parse("SLOW_COMMAND_MS", 5)?,
                aof: AofConfig {
                    path: PathBuf::from(env_or("AOF_PATH", &defaults.path.to_string_lossy())),
                    fsync,
                    flush_interval_ms: env_parse("AOF_FLUSH_INTERVAL_MS", defaults.flush_interval_ms)?,
                    flush_threshold_bytes: env_parse("AOF_FLUSH_THRESHOLD_BYTES", defaults.flush_threshold_bytes)?,
                    failure_policy,
                },
            },
            live_channel_capacity: env_parse("LIVE_CHANNEL_CAPACITY", 256)?,
            hook_channel_capacity: env_parse("HOOK_CHANNEL_CAPACITY", 1024)?,
            hook_timeout_ms: env_parse("HOOK_TIMEOUT_MS", 5_000)?,
        })
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.hook_timeout_ms)
    }
}
