//! Lock-free runtime counters.
//!
//! Scenario loops and connections update these via atomic operations: no
//! locks, no allocations, never blocking a loop. `/metrics` reads them at its
//! own pace.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::Instant;

use crate::event_bus::RunOutcome;

pub struct Metrics {
    // Monotonic counters
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    runs_cancelled: AtomicU64,
    runs_failed: AtomicU64,
    steps_total: AtomicU64,
    broadcasts_total: AtomicU64,

    // Gauges
    clients_connected: AtomicU64,

    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            runs_started: AtomicU64::new(0),
            runs_completed: AtomicU64::new(0),
            runs_cancelled: AtomicU64::new(0),
            runs_failed: AtomicU64::new(0),
            steps_total: AtomicU64::new(0),
            broadcasts_total: AtomicU64::new(0),
            clients_connected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Relaxed);
    }

    pub fn run_finished(&self, outcome: RunOutcome) {
        let counter = match outcome {
            RunOutcome::Completed => &self.runs_completed,
            RunOutcome::Cancelled => &self.runs_cancelled,
            RunOutcome::Failed => &self.runs_failed,
        };
        counter.fetch_add(1, Relaxed);
    }

    pub fn record_step(&self) {
        self.steps_total.fetch_add(1, Relaxed);
    }

    pub fn record_broadcast(&self) {
        self.broadcasts_total.fetch_add(1, Relaxed);
    }

    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.clients_connected.fetch_sub(1, Relaxed);
    }

    /// Read all counters into a serializable snapshot.
    pub fn snapshot(&self, active_runs: usize, scenarios: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            runs_started: self.runs_started.load(Relaxed),
            runs_completed: self.runs_completed.load(Relaxed),
            runs_cancelled: self.runs_cancelled.load(Relaxed),
            runs_failed: self.runs_failed.load(Relaxed),
            steps_total: self.steps_total.load(Relaxed),
            broadcasts_total: self.broadcasts_total.load(Relaxed),
            clients: self.clients_connected.load(Relaxed),
            active_runs: active_runs as u64,
            scenarios: scenarios as u64,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable snapshot of all metrics at a point in time.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub runs_started: u64,
    pub runs_completed: u64,
    pub runs_cancelled: u64,
    pub runs_failed: u64,
    pub steps_total: u64,
    pub broadcasts_total: u64,
    pub clients: u64,
    pub active_runs: u64,
    pub scenarios: u64,
}
