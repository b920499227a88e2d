//! Internal metrics collection for the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Histogram for latency tracking.
#[derive(Debug)]
pub struct Histogram {
    buckets: [AtomicU64; 9],
    sum: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// Bucket upper bounds in milliseconds.
    const BUCKET_BOUNDS: [u64; 9] = [1, 2, 5, 10, 25, 50, 100, 250, 1000];

    pub fn new() -> Self {
        Self {
            buckets: Default::default(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Records a value in milliseconds.
    pub fn observe(&self, ms: u64) {
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for (i, &bound) in Self::BUCKET_BOUNDS.iter().enumerate() {
            if ms <= bound {
                self.buckets[i].fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        self.buckets[Self::BUCKET_BOUNDS.len() - 1].fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn mean(&self) -> f64 {
        let count = self.count();
        if count == 0 {
            0.0
        } else {
            self.sum() as f64 / count as f64
        }
    }
}

/// Collected metrics for the broker.
#[derive(Debug, Default)]
pub struct Metrics {
    // Ingress
    pub messages_published: Counter,
    pub messages_written: Counter,

    // Storage engine
    pub messages_flushed: Counter,
    pub flush_errors: Counter,
    pub read_errors: Counter,

    // Delivery
    pub messages_delivered: Counter,
    pub rebalances: Counter,

    // Latency histograms
    pub flush_latency_ms: Histogram,
    pub read_latency_ms: Histogram,

    // Gauges
    pub topics_active: Gauge,
    pub consumers_active: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            messages_published: self.messages_published.get(),
            messages_written: self.messages_written.get(),
            messages_flushed: self.messages_flushed.get(),
            flush_errors: self.flush_errors.get(),
            read_errors: self.read_errors.get(),
            messages_delivered: self.messages_delivered.get(),
            rebalances: self.rebalances.get(),
            flush_latency_mean_ms: self.flush_latency_ms.mean(),
            read_latency_mean_ms: self.read_latency_ms.mean(),
            topics_active: self.topics_active.get(),
            consumers_active: self.consumers_active.get(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub messages_published: u64,
    pub messages_written: u64,
    pub messages_flushed: u64,
    pub flush_errors: u64,
    pub read_errors: u64,
    pub messages_delivered: u64,
    pub rebalances: u64,
    pub flush_latency_mean_ms: f64,
    pub read_latency_mean_ms: f64,
    pub topics_active: u64,
    pub consumers_active: u64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
