//! Latency histogram with fixed buckets.

use parking_lot::Mutex;

/// Default bucket upper bounds in seconds.
const DEFAULT_BUCKETS: [f64; 10] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

#[derive(Debug)]
struct Inner {
    counts: Vec<u64>,
    sum: f64,
    count: u64,
}

/// Snapshot of a histogram's state.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// `(upper_bound, count_in_bucket)` pairs in ascending bound order.
    pub buckets: Vec<(f64, u64)>,
    pub sum: f64,
    pub count: u64,
}

/// A distribution of observed values (typically durations in seconds).
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    inner: Mutex<Inner>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::with_buckets(&DEFAULT_BUCKETS)
    }
}

impl Histogram {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a histogram with custom bucket upper bounds.
    #[must_use]
    pub fn with_buckets(bounds: &[f64]) -> Self {
        Self {
            bounds: bounds.to_vec(),
            inner: Mutex::new(Inner {
                counts: vec![0; bounds.len()],
                sum: 0.0,
                count: 0,
            }),
        }
    }

    /// Record one observation.
    pub fn observe(&self, value: f64) {
        let mut inner = self.inner.lock();
        for (i, bound) in self.bounds.iter().enumerate() {
            if value <= *bound {
                inner.counts[i] += 1;
                break;
            }
        }
        inner.sum += value;
        inner.count += 1;
    }

    /// Snapshot the current state.
    #[must_use]
    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.lock();
        HistogramSnapshot {
            buckets: self
                .bounds
                .iter()
                .copied()
                .zip(inner.counts.iter().copied())
                .collect(),
            sum: inner.sum,
            count: inner.count,
        }
    }
}
