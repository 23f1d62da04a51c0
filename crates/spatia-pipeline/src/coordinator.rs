//! Pipeline Coordinator
//!
//! Runs one write command through every stage under a single exclusive
//! section:
//! - execute against the store
//! - append the command to the AOF buffer
//! - dispatch to matching live queries
//! - evaluate registered geofences
//!
//! Holding the section across all four stages means log order, sequence
//! order and delivery order are the same order. Nothing inside the section
//! awaits or blocks on I/O: the log is buffered and sinks are bounded
//! non-blocking queues.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use spatia_telemetry::{Counter, Histogram, HistogramSummary};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::aof::{codec, AofBuffer, FlushHint, LogAppend};
use crate::config::{FsyncPolicy, PipelineConfig};
use crate::errors::Result;
use crate::executor;
use crate::fence::{FenceRegistry, FenceReport};
use crate::live::{DispatchReport, LiveRegistry};
use crate::model::{Command, CommandDetail};
use crate::store::{MemoryStore, ObjectStore};

/// Where an invocation is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Received,
    Executing,
    Logging,
    Notifying,
    Geofencing,
    Completed,
    Failed,
}

/// Per-stage wall time of one invocation, serialized in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    #[serde(rename = "exec_ms", serialize_with = "as_millis")]
    pub exec: Duration,
    #[serde(rename = "log_ms", serialize_with = "as_millis")]
    pub log_buffer: Duration,
    #[serde(rename = "notify_ms", serialize_with = "as_millis")]
    pub notify: Duration,
    #[serde(rename = "fence_ms", serialize_with = "as_millis")]
    pub geofence: Duration,
    #[serde(rename = "total_ms", serialize_with = "as_millis")]
    pub total: Duration,
}

pub fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn as_millis<S: Serializer>(d: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(millis(*d))
}

/// Result of a successful invocation
#[derive(Debug, Clone, Serialize)]
pub struct Invocation {
    pub stage: Stage,
    pub detail: Arc<CommandDetail>,
    pub timings: StageTimings,
    pub notifications: DispatchReport,
    pub triggers: FenceReport,
}

impl Invocation {
    pub fn is_noop(&self) -> bool {
        !self.detail.kind.is_change()
    }
}

struct Section<S> {
    store: S,
    log: AofBuffer,
    seq: u64,
}

#[derive(Clone)]
struct PipelineMetrics {
    commands: Counter,
    failures: Counter,
    noops: Counter,
    slow: Counter,
    logged_bytes: Counter,
    latency: Histogram,
}

impl PipelineMetrics {
    fn new() -> Self {
        Self {
            commands: Counter::new("pipeline_commands"),
            failures: Counter::new("pipeline_failures"),
            noops: Counter::new("pipeline_noops"),
            slow: Counter::new("pipeline_slow_commands"),
            logged_bytes: Counter::new("pipeline_logged_bytes"),
            latency: Histogram::new("pipeline_latency_ms"),
        }
    }
}

/// Point-in-time pipeline statistics
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub commands: u64,
    pub failures: u64,
    pub noops: u64,
    pub slow_commands: u64,
    pub logged_bytes: u64,
    pub pending_log_bytes: usize,
    pub last_seq: u64,
    pub objects: usize,
    pub live_subscriptions: usize,
    pub live_delivered: u64,
    pub live_dropped: u64,
    pub hooks: usize,
    pub triggers_delivered: u64,
    pub triggers_dropped: u64,
    pub latency_ms: HistogramSummary,
}

pub struct Pipeline<S: ObjectStore = MemoryStore> {
    section: Mutex<Section<S>>,
    live: Arc<LiveRegistry>,
    fences: Arc<FenceRegistry>,
    flush_signal: Arc<Notify>,
    log_hint: FlushHint,
    slow_threshold: Duration,
    metrics: PipelineMetrics,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: S, config: &PipelineConfig) -> Self {
        let log_hint = match config.aof.fsync {
            FsyncPolicy::Always => FlushHint::Now,
            FsyncPolicy::EverySec | FsyncPolicy::No => FlushHint::Deferred,
        };

        Self {
            section: Mutex::new(Section {
                store,
                log: AofBuffer::new(config.aof.flush_threshold_bytes),
                seq: 0,
            }),
            live: Arc::new(LiveRegistry::new()),
            fences: Arc::new(FenceRegistry::new()),
            flush_signal: Arc::new(Notify::new()),
            log_hint,
            slow_threshold: config.slow_command_threshold(),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Continue numbering after `seq`, e.g. the last change replayed from the log
    pub fn starting_at(self, seq: u64) -> Self {
        self.section.lock().seq = seq;
        self
    }

    pub fn live(&self) -> &Arc<LiveRegistry> {
        &self.live
    }

    pub fn fences(&self) -> &Arc<FenceRegistry> {
        &self.fences
    }

    /// Notified when the log buffer asks to be flushed
    pub fn flush_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.flush_signal)
    }

    /// Run one command through all stages.
    ///
    /// On error the store, the log and every subscriber are untouched. A
    /// noop completes after execution without being logged or delivered.
    pub fn execute(&self, command: &Command) -> Result<Invocation> {
        let started = Instant::now();
        self.metrics.commands.inc();
        trace!(stage = ?Stage::Received, args = command.len(), "Command received");

        // parsing needs no store state
        let parse_started = Instant::now();
        let operation = executor::parse(command);
        let parse_time = parse_started.elapsed();

        let mut section = self.section.lock();

        trace!(stage = ?Stage::Executing, "Exclusive section acquired");
        let exec_started = Instant::now();
        let applied = operation.and_then(|op| executor::apply(&mut section.store, &op));
        let exec = parse_time + exec_started.elapsed();

        let mut detail = match applied {
            Ok(detail) => detail,
            Err(e) => {
                drop(section);
                self.metrics.failures.inc();
                debug!(stage = ?Stage::Failed, error = %e, command = %command, "Command rejected");
                return Err(e);
            }
        };

        if !detail.kind.is_change() {
            drop(section);
            self.metrics.noops.inc();
            let timings = StageTimings {
                exec,
                total: started.elapsed(),
                ..Default::default()
            };
            trace!(stage = ?Stage::Completed, key = %detail.key, id = %detail.id, "Command was a noop");
            return Ok(Invocation {
                stage: Stage::Completed,
                detail: Arc::new(detail),
                timings,
                notifications: DispatchReport::default(),
                triggers: FenceReport::default(),
            });
        }

        section.seq += 1;
        detail.seq = section.seq;
        let detail = Arc::new(detail);

        trace!(stage = ?Stage::Logging, seq = detail.seq);
        let log_started = Instant::now();
        let payload = codec::encode_command(command);
        section.log.append(&payload, self.log_hint);
        let wants_flush = section.log.wants_flush();
        let log_buffer = log_started.elapsed();

        trace!(stage = ?Stage::Notifying, seq = detail.seq);
        let notify_started = Instant::now();
        let notifications = self.live.dispatch(&detail);
        let notify = notify_started.elapsed();

        trace!(stage = ?Stage::Geofencing, seq = detail.seq);
        let fence_started = Instant::now();
        let triggers = self.fences.evaluate_detail(&detail);
        let geofence = fence_started.elapsed();

        drop(section);

        if wants_flush {
            self.flush_signal.notify_one();
        }
        self.metrics.logged_bytes.add(payload.len() as u64);

        let timings = StageTimings {
            exec,
            log_buffer,
            notify,
            geofence,
            total: started.elapsed(),
        };
        self.observe(command, &detail, &timings);

        Ok(Invocation {
            stage: Stage::Completed,
            detail,
            timings,
            notifications,
            triggers,
        })
    }

    fn observe(&self, command: &Command, detail: &CommandDetail, timings: &StageTimings) {
        self.metrics.latency.record(millis(timings.total));

        if timings.total > self.slow_threshold {
            self.metrics.slow.inc();
            warn!(
                args = command.len(),
                seq = detail.seq,
                key = %detail.key,
                id = %detail.id,
                exec_ms = millis(timings.exec),
                log_ms = millis(timings.log_buffer),
                notify_ms = millis(timings.notify),
                fence_ms = millis(timings.geofence),
                total_ms = millis(timings.total),
                "Slow command"
            );
        } else {
            trace!(
                stage = ?Stage::Completed,
                seq = detail.seq,
                kind = ?detail.kind,
                total_ms = millis(timings.total),
                "Command completed"
            );
        }
    }

    /// Drain the log buffer for writing outside the section
    pub fn take_log_bytes(&self) -> Bytes {
        self.section.lock().log.take()
    }

    /// Return bytes that failed to reach disk, ahead of newer entries
    pub fn restore_log_bytes(&self, bytes: Bytes) {
        self.section.lock().log.restore(bytes);
    }

    pub fn pending_log_bytes(&self) -> usize {
        self.section.lock().log.len()
    }

    pub fn last_seq(&self) -> u64 {
        self.section.lock().seq
    }

    /// Read the store under the section
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let section = self.section.lock();
        f(&section.store)
    }

    pub fn stats(&self) -> PipelineStats {
        let (pending_log_bytes, last_seq, objects) = {
            let section = self.section.lock();
            (section.log.len(), section.seq, section.store.len())
        };

        PipelineStats {
            commands: self.metrics.commands.get(),
            failures: self.metrics.failures.get(),
            noops: self.metrics.noops.get(),
            slow_commands: self.metrics.slow.get(),
            logged_bytes: self.metrics.logged_bytes.get(),
            pending_log_bytes,
            last_seq,
            objects,
            live_subscriptions: self.live.len(),
            live_delivered: self.live.delivered_total(),
            live_dropped: self.live.dropped_total(),
            hooks: self.fences.len(),
            triggers_delivered: self.fences.delivered_total(),
            triggers_dropped: self.fences.dropped_total(),
            latency_ms: self.metrics.latency.summary(),
        }
    }
}
