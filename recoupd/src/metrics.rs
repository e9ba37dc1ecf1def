//! Injected observability capability.
//!
//! Consumers and workers take an `Arc<dyn Metrics>` instead of reaching
//! for a global registry, so tests can assert on counters and the daemon
//! can swap backends without touching business code.

use prometheus::{IntCounterVec, Opts, Registry};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Fire-and-forget counter surface.
pub trait Metrics: Send + Sync {
    /// Increment a named counter. Labels are `(key, value)` pairs; a
    /// counter's label keys are fixed by its first use.
    fn increment(&self, name: &str, labels: &[(&str, &str)]);
}

// =============================================================================
// Prometheus-backed implementation
// =============================================================================

/// Metrics backed by a prometheus registry, registering counters lazily.
pub struct PrometheusMetrics {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// The registry, for exposition (e.g. a /metrics endpoint upstream).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics for PrometheusMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.lock().unwrap();

        let counter = match counters.get(name) {
            Some(counter) => counter.clone(),
            None => {
                let label_keys: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
                let counter = match IntCounterVec::new(
                    Opts::new(name, format!("recoupd counter: {name}")),
                    &label_keys,
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(counter = name, error = %e, "Failed to create counter");
                        return;
                    }
                };
                if let Err(e) = self.registry.register(Box::new(counter.clone())) {
                    warn!(counter = name, error = %e, "Failed to register counter");
                }
                counters.insert(name.to_string(), counter.clone());
                counter
            }
        };

        let values: Vec<&str> = labels.iter().map(|(_, v)| *v).collect();
        match counter.get_metric_with_label_values(&values) {
            Ok(metric) => metric.inc(),
            Err(e) => warn!(counter = name, error = %e, "Label cardinality mismatch"),
        }
    }
}

// =============================================================================
// Test / no-op implementations
// =============================================================================

/// Discards everything.
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}
}

/// Records every increment for assertions in tests.
pub struct CapturingMetrics {
    counts: Mutex<HashMap<(String, Vec<(String, String)>), u64>>,
}

impl CapturingMetrics {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Total increments of `name`, across all label sets.
    pub fn count(&self, name: &str) -> u64 {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|((n, _), _)| n == name)
            .map(|(_, c)| *c)
            .sum()
    }

    /// Increments of `name` with exactly these labels.
    pub fn count_labeled(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = (
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.counts.lock().unwrap().get(&key).copied().unwrap_or(0)
    }
}

impl Default for CapturingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics for CapturingMetrics {
    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = (
            name.to_string(),
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        *self.counts.lock().unwrap().entry(key).or_insert(0) += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================
