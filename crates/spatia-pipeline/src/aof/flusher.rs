//! Background AOF flusher
//!
//! Drains the pipeline's log buffer on a fixed interval, or earlier when the
//! pipeline signals, and writes it with no lock held. A failed write is
//! reported loudly: the in-memory state is then ahead of the file.

use serde::Serialize;
use spatia_telemetry::{Counter, Histogram, HistogramSummary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::file::AofFile;
use crate::config::{AofConfig, FlushFailurePolicy};
use crate::coordinator::{millis, Pipeline};
use crate::errors::AofError;
use crate::store::ObjectStore;

/// Shared handles to the flusher's metrics, usable after it is spawned
#[derive(Clone)]
pub struct FlushMetrics {
    flushes: Counter,
    flushed_bytes: Counter,
    failures: Counter,
    latency: Histogram,
    failing: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlushStats {
    pub flushes: u64,
    pub flushed_bytes: u64,
    pub failures: u64,
    /// The most recent write failed and nothing has reached the file since
    pub failing: bool,
    pub latency_ms: HistogramSummary,
}

impl FlushMetrics {
    fn new() -> Self {
        Self {
            flushes: Counter::new("aof_flushes"),
            flushed_bytes: Counter::new("aof_flushed_bytes"),
            failures: Counter::new("aof_flush_failures"),
            latency: Histogram::new("aof_flush_latency_ms"),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn record_flush(&self, bytes: usize, elapsed_ms: f64) {
        self.flushes.inc();
        self.flushed_bytes.add(bytes as u64);
        self.latency.record(elapsed_ms);
        self.failing.store(false, Ordering::Release);
    }

    fn record_failure(&self) {
        self.failures.inc();
        self.failing.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> FlushStats {
        FlushStats {
            flushes: self.flushes.get(),
            flushed_bytes: self.flushed_bytes.get(),
            failures: self.failures.get(),
            failing: self.failing.load(Ordering::Acquire),
            latency_ms: self.latency.summary(),
        }
    }
}

pub struct AofFlusher<S: ObjectStore> {
    pipeline: Arc<Pipeline<S>>,
    file: AofFile,
    interval: Duration,
    policy: FlushFailurePolicy,
    metrics: FlushMetrics,
}

impl<S: ObjectStore + 'static> AofFlusher<S> {
    pub fn new(pipeline: Arc<Pipeline<S>>, file: AofFile, config: &AofConfig) -> Self {
        Self {
            pipeline,
            file,
            interval: config.flush_interval(),
            policy: config.failure_policy,
            metrics: FlushMetrics::new(),
        }
    }

    pub fn metrics(&self) -> FlushMetrics {
        self.metrics.clone()
    }

    /// Write whatever is buffered, returning the byte count
    pub async fn flush(&mut self) -> Result<usize, AofError> {
        let bytes = self.pipeline.take_log_bytes();
        if bytes.is_empty() {
            self.file.sync_if_due().await?;
            return Ok(0);
        }

        let started = Instant::now();
        match self.file.append(&bytes).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.metrics.record_flush(bytes.len(), millis(elapsed));
                debug!(bytes = bytes.len(), flush_ms = millis(elapsed), "AOF flushed");
                Ok(bytes.len())
            }
            Err(e) => {
                self.metrics.record_failure();
                error!(
                    error = %e,
                    bytes = bytes.len(),
                    policy = ?self.policy,
                    path = %self.file.path().display(),
                    "AOF flush failed, memory is ahead of the log"
                );
                if self.policy == FlushFailurePolicy::Retain {
                    self.pipeline.restore_log_bytes(bytes);
                }
                Err(e)
            }
        }
    }

    /// Flush until `shutdown` flips to true or its sender is dropped, then
    /// flush and sync one last time
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> FlushStats {
        let signal = self.pipeline.flush_signal();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            path = %self.file.path().display(),
            interval_ms = self.interval.as_millis() as u64,
            "AOF flusher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = signal.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            // failures are logged and counted inside
            self.flush().await.ok();
        }

        if let Err(e) = self.flush().await {
            error!(error = %e, pending = self.pipeline.pending_log_bytes(), "Final AOF flush failed");
        }
        if let Err(e) = self.file.sync().await {
            error!(error = %e, "Final AOF sync failed");
        }

        let stats = self.metrics.snapshot();
        info!(flushes = stats.flushes, bytes = stats.flushed_bytes, failures = stats.failures, "AOF flusher stopped");
        stats
    }
}
