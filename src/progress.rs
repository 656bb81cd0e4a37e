//! Scan progress tracking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use serde_json::Value;

/// Anything that can report how far along a scan is, in percent.
pub trait PercentSource: Send + Sync {
    fn percent(&self) -> f64;
}

/// Progress statistics the engine updates while a scan executes.
pub trait ProgressTracker: PercentSource {
    /// Size the scan before execution starts.
    fn init(&self, hosts: u64, templates: usize, total_requests: u64);

    fn increment_requests(&self);

    fn increment_matched(&self);

    fn increment_errors(&self);

    /// Snapshot of every counter, keyed by metric name.
    fn metrics(&self) -> BTreeMap<String, Value>;
}

/// Counter-based tracker. Never prints on its own; callers read `metrics()`.
#[derive(Debug, Default)]
pub struct StatsTracker {
    hosts: AtomicU64,
    templates: AtomicU64,
    total: AtomicU64,
    requests: AtomicU64,
    matched: AtomicU64,
    errors: AtomicU64,
    started: Mutex<Option<Instant>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PercentSource for StatsTracker {
    fn percent(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let done = self.requests.load(Ordering::Relaxed) + self.errors.load(Ordering::Relaxed);
        (done as f64 / total as f64 * 100.0).min(100.0)
    }
}

impl ProgressTracker for StatsTracker {
    fn init(&self, hosts: u64, templates: usize, total_requests: u64) {
        self.hosts.store(hosts, Ordering::Relaxed);
        self.templates.store(templates as u64, Ordering::Relaxed);
        self.total.store(total_requests, Ordering::Relaxed);
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    fn increment_requests(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_matched(&self) {
        self.matched.fetch_add(1, Ordering::Relaxed);
    }

    fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn metrics(&self) -> BTreeMap<String, Value> {
        let elapsed = self
            .started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map(|start| start.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let mut metrics = BTreeMap::new();
        metrics.insert("hosts".to_string(), self.hosts.load(Ordering::Relaxed).into());
        metrics.insert(
            "templates".to_string(),
            self.templates.load(Ordering::Relaxed).into(),
        );
        metrics.insert("total".to_string(), self.total.load(Ordering::Relaxed).into());
        metrics.insert(
            "requests".to_string(),
            self.requests.load(Ordering::Relaxed).into(),
        );
        metrics.insert("matched".to_string(), self.matched.load(Ordering::Relaxed).into());
        metrics.insert("errors".to_string(), self.errors.load(Ordering::Relaxed).into());
        metrics.insert("percent".to_string(), self.percent().into());
        metrics.insert("duration_secs".to_string(), elapsed.into());
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_zero_before_init() {
        let tracker = StatsTracker::new();
        tracker.increment_requests();
        assert_eq!(tracker.percent(), 0.0);
    }

    #[test]
    fn percent_counts_requests_and_errors() {
        let tracker = StatsTracker::new();
        tracker.init(2, 2, 4);
        tracker.increment_requests();
        tracker.increment_errors();
        assert_eq!(tracker.percent(), 50.0);

        tracker.increment_requests();
        tracker.increment_requests();
        tracker.increment_requests();
        assert_eq!(tracker.percent(), 100.0);
    }

    #[test]
    fn metrics_reflect_init() {
        let tracker = StatsTracker::new();
        tracker.init(3, 2, 6);
        tracker.increment_matched();

        let metrics = tracker.metrics();
        assert_eq!(metrics["hosts"], 3);
        assert_eq!(metrics["templates"], 2);
        assert_eq!(metrics["total"], 6);
        assert_eq!(metrics["matched"], 1);
        assert!(metrics.contains_key("duration_secs"));
    }
}
