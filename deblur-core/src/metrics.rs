//! Prometheus-style pipeline metrics
//!
//! Counters, gauges and histograms exported as Prometheus text. The
//! [`standard`] statics are updated by the pipeline stages themselves.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Latency buckets for per-record decode, in seconds
pub const DECODE_BUCKETS: [f64; 10] = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 1.0];

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

/// Counter metric (monotonically increasing)
pub struct Counter {
    value: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus text
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        header(&mut out, self.name, self.help, "counter");
        let _ = writeln!(out, "{} {}", self.name, self.get());
        out
    }
}

/// Gauge metric (can go up or down)
pub struct Gauge {
    value: AtomicI64,
    name: &'static str,
    help: &'static str,
}

impl Gauge {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            value: AtomicI64::new(0),
            name,
            help,
        }
    }

    pub fn set(&self, val: i64) {
        self.value.store(val, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.add(1);
    }

    pub fn dec(&self) {
        self.add(-1);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Format as Prometheus text
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        header(&mut out, self.name, self.help, "gauge");
        let _ = writeln!(out, "{} {}", self.name, self.get());
        out
    }
}

/// Cumulative histogram of durations in seconds
///
/// The sum is kept in whole microseconds.
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    pub fn new(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
            name,
            help,
        }
    }

    pub fn observe(&self, seconds: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1_000_000.0) as u64, Ordering::Relaxed);
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Time a closure and record the duration
    pub fn time<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.observe(start.elapsed().as_secs_f64());
        result
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum_seconds(&self) -> f64 {
        self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    /// Mean observation, 0 before the first one
    pub fn mean_seconds(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.sum_seconds() / n as f64,
        }
    }

    /// Format as Prometheus text, including the `+Inf` bucket
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();
        header(&mut out, self.name, self.help, "histogram");
        for (bound, bucket) in self.bounds.iter().zip(&self.buckets) {
            let _ = writeln!(
                out,
                "{}_bucket{{le=\"{}\"}} {}",
                self.name,
                bound,
                bucket.load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, self.count());
        let _ = writeln!(out, "{}_sum {}", self.name, self.sum_seconds());
        let _ = writeln!(out, "{}_count {}", self.name, self.count());
        out
    }
}

/// Standard pipeline metrics
pub mod standard {
    use super::*;
    use std::sync::LazyLock;

    pub static SHARDS_LISTED: Counter =
        Counter::new("deblur_shards_listed_total", "Total number of shards listed");

    pub static BYTES_READ: Counter =
        Counter::new("deblur_bytes_read_total", "Total bytes read from storage");

    pub static RECORDS_DECODED: Counter =
        Counter::new("deblur_records_decoded_total", "Total image pairs decoded");

    pub static BATCHES_PRODUCED: Counter = Counter::new(
        "deblur_batches_produced_total",
        "Total batches handed to prefetch channels",
    );

    pub static PREFETCH_PENDING: Gauge =
        Gauge::new("deblur_prefetch_pending", "Batches waiting in prefetch channels");

    pub static DECODE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
        Histogram::new(
            "deblur_decode_duration_seconds",
            "Per-record decode latency",
            &DECODE_BUCKETS,
        )
    });
}

/// Render every standard metric
pub fn gather_pipeline_metrics() -> String {
    let mut output = String::new();

    // Counters
    output.push_str(&standard::SHARDS_LISTED.to_prometheus());
    output.push_str(&standard::BYTES_READ.to_prometheus());
    output.push_str(&standard::RECORDS_DECODED.to_prometheus());
    output.push_str(&standard::BATCHES_PRODUCED.to_prometheus());

    // Gauges
    output.push_str(&standard::PREFETCH_PENDING.to_prometheus());

    // Histograms
    output.push_str(&standard::DECODE_DURATION.to_prometheus());

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().ends_with("test_counter 6\n"));
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.set(10);
        gauge.dec();
        gauge.add(-4);
        assert_eq!(gauge.get(), 5);
    }

    #[test]
    fn test_histogram() {
        static BOUNDS: [f64; 3] = [0.001, 0.01, 0.1];
        let histogram = Histogram::new("test_histogram", "Test histogram", &BOUNDS);

        histogram.observe(0.001);
        histogram.observe(0.01);
        histogram.observe(0.5);

        let prometheus = histogram.to_prometheus();
        assert!(prometheus.contains("test_histogram_bucket{le=\"0.001\"} 1"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"0.1\"} 2"));
        assert!(prometheus.contains("test_histogram_bucket{le=\"+Inf\"} 3"));
        assert!(prometheus.contains("test_histogram_count 3"));
        assert!((histogram.mean_seconds() - 0.511 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_gather_lists_standard_metrics() {
        standard::RECORDS_DECODED.inc();
        let output = gather_pipeline_metrics();
        for name in [
            "deblur_shards_listed_total",
            "deblur_bytes_read_total",
            "deblur_records_decoded_total",
            "deblur_batches_produced_total",
            "deblur_prefetch_pending",
            "deblur_decode_duration_seconds_count",
        ] {
            assert!(output.contains(name), "missing {}", name);
        }
    }
}
