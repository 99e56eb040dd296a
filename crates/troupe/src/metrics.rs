use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide invocation counters. Observability only: nothing in the
/// runtime makes decisions based on these values.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    invocations: AtomicU64,
    faults: AtomicU64,
    backpressure_events: AtomicU64,
    activations: AtomicU64,
    deactivations: AtomicU64,
    local_dispatches: AtomicU64,
    remote_dispatches: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub faults: u64,
    pub backpressure_events: u64,
    pub activations: u64,
    pub deactivations: u64,
    pub local_dispatches: u64,
    pub remote_dispatches: u64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_invocation(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_activation(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deactivation(&self) {
        self.deactivations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_dispatch(&self) {
        self.local_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_remote_dispatch(&self) {
        self.remote_dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn backpressure_events(&self) -> u64 {
        self.backpressure_events.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            backpressure_events: self.backpressure_events.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            deactivations: self.deactivations.load(Ordering::Relaxed),
            local_dispatches: self.local_dispatches.load(Ordering::Relaxed),
            remote_dispatches: self.remote_dispatches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = RuntimeMetrics::new();
        metrics.record_invocation();
        metrics.record_invocation();
        metrics.record_backpressure();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.invocations, 2);
        assert_eq!(snapshot.backpressure_events, 1);
        assert_eq!(snapshot.faults, 0);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["invocations"], 2);
    }
}
