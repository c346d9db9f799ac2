use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared between one sample source and whoever reports on it.
///
/// A source is either the hardware producer or the TCP receiver. All counters
/// are monotonic and updated with relaxed ordering.
pub struct StreamMetrics {
    source_id: String,
    samples_received: AtomicU64,
    batches_received: AtomicU64,
    bytes_received: AtomicU64,
    errors_count: AtomicU64,
    total_cycle_us: AtomicU64,
    cycle_samples: AtomicU64,
}

impl StreamMetrics {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            samples_received: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            errors_count: AtomicU64::new(0),
            total_cycle_us: AtomicU64::new(0),
            cycle_samples: AtomicU64::new(0),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    pub fn batches_received(&self) -> u64 {
        self.batches_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn errors_count(&self) -> u64 {
        self.errors_count.load(Ordering::Relaxed)
    }

    /// One batch of `points` samples handed to the buffer
    pub fn record_batch(&self, points: usize) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.samples_received.fetch_add(points as u64, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn start_cycle(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_cycle(&self, start: Instant) {
        let cycle_us = start.elapsed().as_micros() as u64;
        self.total_cycle_us.fetch_add(cycle_us, Ordering::Relaxed);
        self.cycle_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean duration of a read cycle (refill or socket read) in microseconds
    pub fn avg_cycle_us(&self) -> u64 {
        let cycles = self.cycle_samples.load(Ordering::Relaxed);
        if cycles == 0 {
            return 0;
        }
        self.total_cycle_us.load(Ordering::Relaxed) / cycles
    }
}
