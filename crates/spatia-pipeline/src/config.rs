//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on stored objects, unbounded when `None`
    pub max_objects: Option<usize>,
    /// Invocations slower than this are logged at warn level
    pub slow_command_threshold_ms: u64,
    pub aof: AofConfig,
}

/// Durable log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AofConfig {
    pub path: PathBuf,
    pub fsync: FsyncPolicy,
    /// Background flush period
    pub flush_interval_ms: u64,
    /// Buffered bytes that wake the flusher early
    pub flush_threshold_bytes: usize,
    pub failure_policy: FlushFailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsyncPolicy {
    /// fsync after every flush
    Always,
    /// fsync at most once per second
    EverySec,
    /// leave it to the OS
    No,
}

/// What the flusher does with bytes it failed to write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFailurePolicy {
    /// Put the bytes back in front of the buffer and retry on the next flush
    Retain,
    /// Drop them; memory stays ahead of disk until the next rewrite
    Discard,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_objects: None,
            slow_command_threshold_ms: 5,
            aof: AofConfig::default(),
        }
    }
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/appendonly.aof"),
            fsync: FsyncPolicy::EverySec,
            flush_interval_ms: 100,
            flush_threshold_bytes: 1 << 20,
            failure_policy: FlushFailurePolicy::Retain,
        }
    }
}

impl PipelineConfig {
    pub fn slow_command_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_command_threshold_ms)
    }
}

impl AofConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }
}

impl FromStr for FsyncPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "everysec" => Ok(Self::EverySec),
            "no" | "never" => Ok(Self::No),
            other => Err(format!("unknown fsync policy '{other}'")),
        }
    }
}

impl FromStr for FlushFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "retain" => Ok(Self::Retain),
            "discard" => Ok(Self::Discard),
            other => Err(format!("unknown flush failure policy '{other}'")),
        }
    }
}
