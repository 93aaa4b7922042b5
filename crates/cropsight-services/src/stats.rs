//! Pipeline counters, reported by the status endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineStats {
    requests: AtomicU64,
    primary_hits: AtomicU64,
    fallback_runs: AtomicU64,
    failures: AtomicU64,
    persisted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub requests: u64,
    pub primary_hits: u64,
    pub fallback_runs: u64,
    pub failures: u64,
    pub persisted: u64,
}

impl PipelineStats {
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_primary_hit(&self) {
        self.primary_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_run(&self) {
        self.fallback_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self) {
        self.persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            primary_hits: self.primary_hits.load(Ordering::Relaxed),
            fallback_runs: self.fallback_runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
        }
    }
}
