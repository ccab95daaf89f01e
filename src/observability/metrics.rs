//! Counters for the coordination layer
//!
//! - Counters only, monotonic, reset only on process start
//! - Relaxed atomics; counters are observational and order nothing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

/// Operational counters
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    coordinators_created: AtomicU64,
    handles_opened: AtomicU64,
    handles_reused: AtomicU64,
    config_conflicts: AtomicU64,
    commit_notifications: AtomicU64,
    update_cycles: AtomicU64,
    handovers_exported: AtomicU64,
    deliveries_run: AtomicU64,
    deliveries_skipped: AtomicU64,
    stale_batches: AtomicU64,
    query_errors: AtomicU64,
}

static GLOBAL: OnceLock<MetricsRegistry> = OnceLock::new();

/// The process-wide registry the coordination layer reports into
pub fn metrics() -> &'static MetricsRegistry {
    GLOBAL.get_or_init(MetricsRegistry::new)
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_coordinators_created(&self) {
        self.coordinators_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_handles_opened(&self) {
        self.handles_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_handles_reused(&self) {
        self.handles_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_config_conflicts(&self) {
        self.config_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_commit_notifications(&self) {
        self.commit_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_update_cycles(&self) {
        self.update_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_handovers_exported(&self) {
        self.handovers_exported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deliveries_run(&self) {
        self.deliveries_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deliveries_skipped(&self) {
        self.deliveries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_batches(&self) {
        self.stale_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_query_errors(&self) {
        self.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            coordinators_created: self.coordinators_created.load(Ordering::Relaxed),
            handles_opened: self.handles_opened.load(Ordering::Relaxed),
            handles_reused: self.handles_reused.load(Ordering::Relaxed),
            config_conflicts: self.config_conflicts.load(Ordering::Relaxed),
            commit_notifications: self.commit_notifications.load(Ordering::Relaxed),
            update_cycles: self.update_cycles.load(Ordering::Relaxed),
            handovers_exported: self.handovers_exported.load(Ordering::Relaxed),
            deliveries_run: self.deliveries_run.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            stale_batches: self.stale_batches.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
        }
    }

    /// Current counters as a JSON object
    pub fn to_json(&self) -> String {
        // A struct of plain integers always serializes
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| String::from("{}"))
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub coordinators_created: u64,
    pub handles_opened: u64,
    pub handles_reused: u64,
    pub config_conflicts: u64,
    pub commit_notifications: u64,
    pub update_cycles: u64,
    pub handovers_exported: u64,
    pub deliveries_run: u64,
    pub deliveries_skipped: u64,
    pub stale_batches: u64,
    pub query_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zeroed() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.coordinators_created, 0);
        assert_eq!(snapshot.handovers_exported, 0);
        assert_eq!(snapshot.query_errors, 0);
    }

    #[test]
    fn test_counters_increment_independently() {
        let registry = MetricsRegistry::new();
        registry.increment_handles_opened();
        registry.increment_handles_opened();
        registry.increment_handles_reused();
        registry.increment_stale_batches();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.handles_opened, 2);
        assert_eq!(snapshot.handles_reused, 1);
        assert_eq!(snapshot.stale_batches, 1);
        assert_eq!(snapshot.deliveries_run, 0);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_update_cycles();
        registry.increment_deliveries_skipped();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["update_cycles"], 1);
        assert_eq!(parsed["deliveries_skipped"], 1);
        assert_eq!(parsed["config_conflicts"], 0);
    }

    #[test]
    fn test_concurrent_increments() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..250 {
                        registry.increment_handovers_exported();
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.snapshot().handovers_exported, 2000);
    }

    #[test]
    fn test_global_registry_is_shared() {
        let before = metrics().snapshot().commit_notifications;
        metrics().increment_commit_notifications();
        assert!(metrics().snapshot().commit_notifications > before);
    }
}
