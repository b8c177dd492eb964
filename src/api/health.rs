//! Shared health state for the /health endpoint.
//! Updated by the orchestrator and the ingestion cycle.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Shared ingestion metrics. Updated by scanner components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while an ingestion cycle is running.
    pub cycle_running: AtomicBool,
    /// Unix seconds when the last cycle finished (0 = never).
    pub last_cycle_at: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub tasks_ok: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub rows_written: AtomicU64,
    pub rows_purged: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub cycle_running: bool,
    pub last_cycle_at: Option<u64>,
    pub cycles_completed: u64,
    pub tasks_ok: u64,
    pub tasks_failed: u64,
    pub rows_written: u64,
    pub rows_purged: u64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cycle_running(&self, v: bool) {
        self.cycle_running.store(v, Ordering::Relaxed);
    }

    pub fn record_task(&self, failed: bool) {
        let counter = if failed { &self.tasks_failed } else { &self.tasks_ok };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows_written(&self, n: u64) {
        self.rows_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_rows_purged(&self, n: u64) {
        self.rows_purged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn finish_cycle(&self, at_secs: u64) {
        self.last_cycle_at.store(at_secs, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.set_cycle_running(false);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_cycle_at.load(Ordering::Relaxed);
        HealthSnapshot {
            cycle_running: self.cycle_running.load(Ordering::Relaxed),
            last_cycle_at: (last != 0).then_some(last),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
            tasks_ok: self.tasks_ok.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_purged: self.rows_purged.load(Ordering::Relaxed),
        }
    }
}
