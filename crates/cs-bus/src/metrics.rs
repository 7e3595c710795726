//! In-process bus metrics
//!
//! Counters are atomics; latency and lag samples sit behind a mutex and
//! are summarized on snapshot (p50/p95/p99 latency, max lag).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct BusMetrics {
    pub published: AtomicU64,
    pub consumed: AtomicU64,
    pub acked: AtomicU64,
    pub naked: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub redeliveries: AtomicU64,
    latencies: Mutex<Vec<f64>>,
    lag_samples: Mutex<Vec<u64>>,
}

/// Serializable point-in-time view of the metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub consumed: u64,
    pub acked: u64,
    pub naked: u64,
    pub dead_lettered: u64,
    pub redeliveries: u64,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub max_lag: u64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_latency(&self, elapsed: Duration) {
        self.latencies
            .lock()
            .expect("latency lock poisoned")
            .push(elapsed.as_secs_f64());
    }

    pub fn record_lag(&self, pending: u64) {
        self.lag_samples
            .lock()
            .expect("lag lock poisoned")
            .push(pending);
    }

    fn percentile(sorted: &[f64], pct: f64) -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let idx = ((sorted.len() as f64) * pct / 100.0) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut latencies = self
            .latencies
            .lock()
            .expect("latency lock poisoned")
            .clone();
        latencies.sort_by(|a, b| a.partial_cmp(b).expect("latency is finite"));
        let max_lag = self
            .lag_samples
            .lock()
            .expect("lag lock poisoned")
            .iter()
            .copied()
            .max()
            .unwrap_or(0);

        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            naked: self.naked.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            redeliveries: self.redeliveries.load(Ordering::Relaxed),
            latency_p50_ms: (Self::percentile(&latencies, 50.0) * 1000.0 * 100.0).round() / 100.0,
            latency_p95_ms: (Self::percentile(&latencies, 95.0) * 1000.0 * 100.0).round() / 100.0,
            latency_p99_ms: (Self::percentile(&latencies, 99.0) * 1000.0 * 100.0).round() / 100.0,
            max_lag,
        }
    }

    pub fn reset(&self) {
        self.published.store(0, Ordering::Relaxed);
        self.consumed.store(0, Ordering::Relaxed);
        self.acked.store(0, Ordering::Relaxed);
        self.naked.store(0, Ordering::Relaxed);
        self.dead_lettered.store(0, Ordering::Relaxed);
        self.redeliveries.store(0, Ordering::Relaxed);
        self.latencies.lock().expect("latency lock poisoned").clear();
        self.lag_samples.lock().expect("lag lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_is_zeroed() {
        let m = BusMetrics::new();
        let snap = m.snapshot();
        assert_eq!(snap.published, 0);
        assert_eq!(snap.latency_p50_ms, 0.0);
        assert_eq!(snap.max_lag, 0);
    }

    #[test]
    fn latency_percentiles() {
        let m = BusMetrics::new();
        for i in 1..=100 {
            m.record_latency(Duration::from_millis(i));
        }
        let snap = m.snapshot();
        assert!((snap.latency_p50_ms - 50.0).abs() <= 2.0);
        assert!((snap.latency_p95_ms - 95.0).abs() <= 2.0);
        assert!((snap.latency_p99_ms - 99.0).abs() <= 2.0);
    }

    #[test]
    fn lag_tracks_max() {
        let m = BusMetrics::new();
        m.record_lag(10);
        m.record_lag(50);
        m.record_lag(30);
        assert_eq!(m.snapshot().max_lag, 50);
    }

    #[test]
    fn reset_clears_everything() {
        let m = BusMetrics::new();
        m.published.fetch_add(42, Ordering::Relaxed);
        m.record_latency(Duration::from_millis(500));
        m.reset();
        let snap = m.snapshot();
        assert_eq!(snap.published, 0);
        assert_eq!(snap.latency_p50_ms, 0.0);
    }
}
