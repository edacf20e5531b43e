//! # Service Telemetry
//!
//! Lightweight metrics for the coordination plane: counters, gauges, and
//! histograms keyed by name + label pairs, with a Prometheus text-format
//! encoder backing `GET /metrics`, and an append-only JSONL event log feeding
//! the continuous-learning pipeline.
//!
//! ## Example
//!
//! ```
//! use coordinator_core::telemetry::Telemetry;
//!
//! let telemetry = Telemetry::new("hybrid-coordinator");
//! telemetry
//!     .counter("requests_total", &[("route", "/query"), ("status", "200")])
//!     .increment();
//! telemetry.gauge("queue_depth", &[]).set(3.0);
//! telemetry
//!     .histogram("request_latency_seconds", &[("route", "/query")])
//!     .observe(0.042);
//!
//! let text = telemetry.encode_prometheus();
//! assert!(text.contains("requests_total"));
//! ```

mod counter;
mod events;
mod gauge;
mod histogram;

pub use counter::Counter;
pub use events::EventLog;
pub use gauge::Gauge;
pub use histogram::Histogram;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;

type MetricKey = (String, Vec<(String, String)>);

/// Telemetry registry for one service.
pub struct Telemetry {
    service: String,
    counters: RwLock<HashMap<MetricKey, Arc<Counter>>>,
    gauges: RwLock<HashMap<MetricKey, Arc<Gauge>>>,
    histograms: RwLock<HashMap<MetricKey, Arc<Histogram>>>,
}

impl Telemetry {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
        }
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> MetricKey {
        (
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    /// Get or register a counter.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Counter> {
        let key = Self::key(name, labels);
        if let Some(counter) = self.counters.read().get(&key) {
            return Arc::clone(counter);
        }
        Arc::clone(
            self.counters
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Counter::new())),
        )
    }

    /// Get or register a gauge.
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Gauge> {
        let key = Self::key(name, labels);
        if let Some(gauge) = self.gauges.read().get(&key) {
            return Arc::clone(gauge);
        }
        Arc::clone(
            self.gauges
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Gauge::new())),
        )
    }

    /// Get or register a histogram with default latency buckets.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Histogram> {
        let key = Self::key(name, labels);
        if let Some(histogram) = self.histograms.read().get(&key) {
            return Arc::clone(histogram);
        }
        Arc::clone(
            self.histograms
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Histogram::new())),
        )
    }

    fn format_labels(service: &str, labels: &[(String, String)]) -> String {
        let mut parts = vec![format!("service=\"{service}\"")];
        for (k, v) in labels {
            parts.push(format!("{k}=\"{}\"", v.replace('"', "\\\"")));
        }
        format!("{{{}}}", parts.join(","))
    }

    /// Render every registered metric in Prometheus text exposition format.
    #[must_use]
    pub fn encode_prometheus(&self) -> String {
        let mut out = String::new();

        let mut counters: Vec<(MetricKey, u64)> = self
            .counters
            .read()
            .iter()
            .map(|(k, c)| (k.clone(), c.get()))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));
        for ((name, labels), value) in counters {
            let _ = writeln!(
                out,
                "{name}{} {value}",
                Self::format_labels(&self.service, &labels)
            );
        }

        let mut gauges: Vec<(MetricKey, f64)> = self
            .gauges
            .read()
            .iter()
            .map(|(k, g)| (k.clone(), g.get()))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));
        for ((name, labels), value) in gauges {
            let _ = writeln!(
                out,
                "{name}{} {value}",
                Self::format_labels(&self.service, &labels)
            );
        }

        let mut histograms: Vec<(MetricKey, Arc<Histogram>)> = self
            .histograms
            .read()
            .iter()
            .map(|(k, h)| (k.clone(), Arc::clone(h)))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(&b.0));
        for ((name, labels), histogram) in histograms {
            let snapshot = histogram.snapshot();
            let mut cumulative = 0u64;
            for (bound, count) in snapshot.buckets {
                cumulative += count;
                let mut bucket_labels = labels.clone();
                bucket_labels.push(("le".to_string(), format!("{bound}")));
                let _ = writeln!(
                    out,
                    "{name}_bucket{} {cumulative}",
                    Self::format_labels(&self.service, &bucket_labels)
                );
            }
            let mut inf_labels = labels.clone();
            inf_labels.push(("le".to_string(), "+Inf".to_string()));
            let _ = writeln!(
                out,
                "{name}_bucket{} {}",
                Self::format_labels(&self.service, &inf_labels),
                snapshot.count
            );
            let _ = writeln!(
                out,
                "{name}_sum{} {}",
                Self::format_labels(&self.service, &labels),
                snapshot.sum
            );
            let _ = writeln!(
                out,
                "{name}_count{} {}",
                Self::format_labels(&self.service, &labels),
                snapshot.count
            );
        }

        out
    }
}
