//! Pipeline metrics
//!
//! Lock-free counters and latency histograms with Prometheus text export.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic counter
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
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// Value that goes up and down
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

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} gauge\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

const NUM_BUCKETS: usize = 10;
const LATENCY_BOUNDS: [f64; NUM_BUCKETS] = [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Latency histogram in seconds with fixed buckets
pub struct Histogram {
    buckets: [AtomicU64; NUM_BUCKETS],
    sum_micros: AtomicU64,
    count: AtomicU64,
    name: &'static str,
    help: &'static str,
}

impl Histogram {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            buckets: [ZERO; NUM_BUCKETS],
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
        for (bound, bucket) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            if seconds <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record the time since `start`
    pub fn observe_since(&self, start: Instant) {
        self.observe(start.elapsed().as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn to_prometheus(&self) -> String {
        let mut out = format!(
            "# HELP {} {}\n# TYPE {} histogram\n",
            self.name, self.help, self.name
        );
        for (bound, bucket) in LATENCY_BOUNDS.iter().zip(&self.buckets) {
            out.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                self.name,
                bound,
                bucket.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, self.count()));
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        out.push_str(&format!("{}_sum {}\n", self.name, sum));
        out.push_str(&format!("{}_count {}\n", self.name, self.count()));
        out
    }
}

/// Process-wide loader metrics
pub mod standard {
    use super::{Counter, Gauge, Histogram};

    pub static RECORDS_FETCHED: Counter =
        Counter::new("slabs_records_fetched_total", "Shard records returned by the store");

    pub static PAYLOAD_BYTES: Counter =
        Counter::new("slabs_payload_bytes_total", "Encoded payload bytes decoded");

    pub static BATCHES_COLLATED: Counter =
        Counter::new("slabs_batches_collated_total", "Batches assembled successfully");

    pub static BATCH_FAILURES: Counter =
        Counter::new("slabs_batch_failures_total", "Batches that failed in any stage");

    pub static CONNECTED_WORKERS: Gauge =
        Gauge::new("slabs_connected_workers", "Workers holding a store connection");

    pub static FETCH_DURATION: Histogram =
        Histogram::new("slabs_fetch_duration_seconds", "Store query latency per batch");

    pub static COLLATE_DURATION: Histogram = Histogram::new(
        "slabs_collate_duration_seconds",
        "Decode, assembly and crop latency per batch",
    );
}

/// Render all standard metrics
pub fn gather() -> String {
    use standard::*;

    let mut out = String::new();
    out.push_str(&RECORDS_FETCHED.to_prometheus());
    out.push_str(&PAYLOAD_BYTES.to_prometheus());
    out.push_str(&BATCHES_COLLATED.to_prometheus());
    out.push_str(&BATCH_FAILURES.to_prometheus());
    out.push_str(&CONNECTED_WORKERS.to_prometheus());
    out.push_str(&FETCH_DURATION.to_prometheus());
    out.push_str(&COLLATE_DURATION.to_prometheus());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("test_counter", "Test counter");
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert!(counter.to_prometheus().contains("test_counter 6"));
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new("test_gauge", "Test gauge");
        gauge.inc();
        gauge.inc();
        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new("test_histogram", "Test histogram");
        histogram.observe(0.02);
        histogram.observe(0.3);
        histogram.observe(60.0);

        let text = histogram.to_prometheus();
        assert!(text.contains("test_histogram_bucket{le=\"0.05\"} 1"));
        assert!(text.contains("test_histogram_bucket{le=\"0.5\"} 2"));
        assert!(text.contains("test_histogram_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("test_histogram_count 3"));
    }

    #[test]
    fn test_gather_lists_standard_metrics() {
        let text = gather();
        assert!(text.contains("slabs_records_fetched_total"));
        assert!(text.contains("slabs_collate_duration_seconds_count"));
    }
}
