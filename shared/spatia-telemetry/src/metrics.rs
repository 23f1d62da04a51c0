//! Metrics primitives

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter; clones share the same value
#[derive(Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
    name: String,
}

impl Counter {
    pub fn new(name: &str) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
            name: name.to_string(),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        if n > 0 {
            self.value.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicU64>,
    name: String,
}

impl Gauge {
    pub fn new(name: &str) -> Self {
        Self {
            value: Arc::new(AtomicU64::new(0)),
            name: name.to_string(),
        }
    }

    pub fn set(&self, val: u64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero
    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sliding-window histogram over the most recent samples
#[derive(Clone)]
pub struct Histogram {
    inner: Arc<Mutex<Window>>,
    name: String,
}

struct Window {
    samples: VecDeque<f64>,
    capacity: usize,
    count: u64,
    max: f64,
}

/// Point-in-time view of a [`Histogram`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramSummary {
    /// Samples ever recorded, not just those in the window
    pub count: u64,
    pub mean: f64,
    pub p50: f64,
    pub p99: f64,
    /// Largest sample ever recorded
    pub max: f64,
}

impl Histogram {
    pub fn new(name: &str) -> Self {
        Self::with_window(name, 10_000)
    }

    pub fn with_window(name: &str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(Window {
                samples: VecDeque::with_capacity(capacity.min(1024)),
                capacity,
                count: 0,
                max: 0.0,
            })),
            name: name.to_string(),
        }
    }

    pub fn record(&self, value: f64) {
        let mut window = self.inner.lock();
        if window.samples.len() >= window.capacity {
            window.samples.pop_front();
        }
        window.samples.push_back(value);
        window.count += 1;
        if value > window.max {
            window.max = value;
        }
    }

    pub fn percentile(&self, p: f64) -> f64 {
        let sorted = self.sorted();
        percentile_of(&sorted, p)
    }

    pub fn mean(&self) -> f64 {
        let window = self.inner.lock();
        if window.samples.is_empty() {
            return 0.0;
        }
        window.samples.iter().sum::<f64>() / window.samples.len() as f64
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().count
    }

    pub fn summary(&self) -> HistogramSummary {
        let (sorted, count, max) = {
            let window = self.inner.lock();
            let mut sorted: Vec<f64> = window.samples.iter().copied().collect();
            sorted.sort_by(f64::total_cmp);
            (sorted, window.count, window.max)
        };
        let mean = if sorted.is_empty() {
            0.0
        } else {
            sorted.iter().sum::<f64>() / sorted.len() as f64
        };
        HistogramSummary {
            count,
            mean,
            p50: percentile_of(&sorted, 50.0),
            p99: percentile_of(&sorted, 99.0),
            max,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn sorted(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.inner.lock().samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }
}

fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}
