//! Coordinator registry
//!
//! One live coordinator per path under concurrent lookups, and cache
//! clearing that cuts earlier callers off.

use std::sync::{Arc, Barrier};
use std::thread;

use aerodb_coordinator::{Coordinator, CoordinatorRegistry, StoreConfig};
use tempfile::TempDir;

#[test]
fn test_concurrent_lookups_share_one_coordinator() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shared.aero");
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            thread::spawn(move || {
                barrier.wait();
                Coordinator::get_coordinator(&path)
            })
        })
        .collect();

    let coordinators: Vec<Arc<Coordinator>> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(coordinators.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

    let existing = Coordinator::get_existing_coordinator(&path).unwrap();
    assert!(Arc::ptr_eq(&existing, &coordinators[0]));
}

#[test]
fn test_released_coordinator_is_not_found() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("released.aero");

    let coordinator = Coordinator::get_coordinator(&path);
    assert!(Coordinator::get_existing_coordinator(&path).is_some());
    drop(coordinator);
    assert!(Coordinator::get_existing_coordinator(&path).is_none());
}

#[test]
fn test_handles_keep_their_coordinator_alive() {
    let registry = CoordinatorRegistry::new();
    let handle = registry
        .get_coordinator("registry-keepalive")
        .get_store_handle(StoreConfig::new("registry-keepalive").in_memory(true))
        .unwrap();

    let found = registry.get_existing_coordinator("registry-keepalive").unwrap();
    assert!(Arc::ptr_eq(&found, &handle.coordinator().unwrap()));
}

#[test]
fn test_cache_clear_isolates_callers() {
    let registry = CoordinatorRegistry::new();
    let before = registry.get_coordinator("registry-clear");
    let config = StoreConfig::new("registry-clear").in_memory(true);
    let first = before.get_store_handle(config.clone()).unwrap();
    let second = registry
        .get_coordinator("other-path")
        .get_store_handle(StoreConfig::new("other-path").in_memory(true))
        .unwrap();

    registry.clear_cache();

    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(first.coordinator().is_err());

    let after = registry.get_coordinator("registry-clear");
    assert!(!Arc::ptr_eq(&before, &after));

    let reopened = after.get_store_handle(config).unwrap();
    assert!(!reopened.is_closed());
    assert_ne!(reopened.id(), first.id());
}

#[test]
fn test_cache_clear_suspends_async_queries() {
    use aerodb_coordinator::{CallbackObserver, ColumnKind, Query, Schema, SortOrder, TableSchema};

    let registry = CoordinatorRegistry::new();
    let coordinator = registry.get_coordinator("registry-suspend");
    let config = StoreConfig::new("registry-suspend")
        .in_memory(true)
        .schema(Schema::new().table(TableSchema::new("dogs").column("name", ColumnKind::String)));
    let handle = coordinator.get_store_handle(config.clone()).unwrap();

    let query = handle.async_query(Query::table("dogs"), SortOrder::new()).unwrap();
    let _token = query.observe(CallbackObserver::new(|_| {}, |_| {}).into_arc());
    coordinator.run_async_queries();
    assert!(query.is_attached());

    registry.clear_cache();
    assert!(!query.is_attached());
    assert!(!query.has_error());

    // The coordinator survives through the query and picks it up again
    let handle = coordinator.get_store_handle(config).unwrap();
    coordinator.run_async_queries();
    assert!(query.is_attached());
    assert_eq!(handle.deliver_ready(), 1);
}
