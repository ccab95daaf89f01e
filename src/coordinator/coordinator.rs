//! Coordinator - per-path owner of configuration, cached handles, the
//! commit notifier and the async query cycle
//!
//! Ownership edges:
//!
//! - registry -> coordinator: weak
//! - coordinator -> cached handles, async queries: weak
//! - handle -> coordinator, async query -> coordinator: strong
//!
//! Locks, never nested except where noted:
//!
//! - `state`: configuration, database, cached handles, notifier. Never
//!   held while waiting for the database writer slot.
//! - `queries`: registered async queries and the background session
//! - `cycle`: serializes update cycles and suspension; taken before
//!   `queries`
//!
//! A `StoreHandle` or `Coordinator` can run its `Drop` (which takes locks)
//! wherever its last `Arc` goes away, so no `Arc` of either is released
//! while `state` is held.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::cached_handle::CachedHandle;
use super::config::StoreConfig;
use super::errors::{CoordinatorError, CoordinatorResult};
use super::registry::CoordinatorRegistry;
use crate::engine::{Database, Schema, Session, TableSchema};
use crate::handle::{HandleId, StoreHandle};
use crate::notifier::CommitNotifier;
use crate::observability::{
    event_enabled, log_event_with_fields, metrics, Event, ObservationScope, Severity,
};
use crate::query::{AsyncQuery, DeliveryAction};

struct CoordinatorState {
    /// Authoritative configuration, set by the first successful opener
    config: Option<StoreConfig>,
    database: Option<Arc<Database>>,
    cached_handles: Vec<CachedHandle>,
    notifier: Option<CommitNotifier>,
}

struct QueryRegistry {
    /// Registered but not yet attached to the background session
    new_queries: Vec<Weak<AsyncQuery>>,
    queries: Vec<Weak<AsyncQuery>>,
    /// Read-only session the update cycle evaluates queries on
    session: Option<Arc<Session>>,
}

/// Per-path coordinator
pub struct Coordinator {
    path: PathBuf,
    registry: Weak<CoordinatorRegistry>,
    state: Mutex<CoordinatorState>,
    queries: Mutex<QueryRegistry>,
    cycle: Mutex<()>,
}

impl Coordinator {
    pub(crate) fn new(path: PathBuf, registry: Weak<CoordinatorRegistry>) -> Arc<Self> {
        metrics().increment_coordinators_created();
        let display = path.display().to_string();
        log_event_with_fields(Event::CoordinatorCreated, &[("path", display.as_str())]);

        Arc::new(Self {
            path,
            registry,
            state: Mutex::new(CoordinatorState {
                config: None,
                database: None,
                cached_handles: Vec::new(),
                notifier: None,
            }),
            queries: Mutex::new(QueryRegistry {
                new_queries: Vec::new(),
                queries: Vec::new(),
                session: None,
            }),
            cycle: Mutex::new(()),
        })
    }

    /// The live coordinator for `path`, created if there is none
    pub fn get_coordinator(path: impl AsRef<Path>) -> Arc<Coordinator> {
        CoordinatorRegistry::global().get_coordinator(path)
    }

    /// The live coordinator for `path`, if any
    pub fn get_existing_coordinator(path: impl AsRef<Path>) -> Option<Arc<Coordinator>> {
        CoordinatorRegistry::global().get_existing_coordinator(path)
    }

    /// Close every cached handle of every path and forget all coordinators
    pub fn clear_cache() {
        CoordinatorRegistry::global().clear_cache();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn path_field(&self) -> String {
        self.path.display().to_string()
    }

    /// The authoritative configuration, once a handle has been opened
    pub fn config(&self) -> Option<StoreConfig> {
        self.state.lock().config.clone()
    }

    /// The merged schema of every opener so far
    pub fn get_schema(&self) -> Option<Schema> {
        self.state.lock().config.as_ref().and_then(|c| c.schema.clone())
    }

    pub fn schema_version(&self) -> Option<u64> {
        self.state.lock().config.as_ref().map(|c| c.schema_version)
    }

    /// Open a handle on this path.
    ///
    /// The first opener fixes the configuration; later ones must match it.
    /// With `config.cache`, a live handle this thread opened before is
    /// returned instead of a new one.
    pub fn get_store_handle(self: &Arc<Self>, config: StoreConfig) -> CoordinatorResult<Arc<StoreHandle>> {
        // Handles upgraded under the lock are released only after it
        let mut released = Vec::new();
        let result = self.get_store_handle_locked(config, &mut released);
        drop(released);
        result
    }

    fn get_store_handle_locked(
        self: &Arc<Self>,
        config: StoreConfig,
        released: &mut Vec<Arc<StoreHandle>>,
    ) -> CoordinatorResult<Arc<StoreHandle>> {
        let mut state = self.state.lock();

        let database = match state.database.clone() {
            Some(database) => {
                let added = self.check_opener(&state, &config)?;
                if !added.is_empty() {
                    // Creating tables waits for the writer slot, and a writer
                    // may need this lock before it lets go of the slot
                    let read_only = state.config.as_ref().is_some_and(|c| c.read_only);
                    drop(state);
                    if !read_only {
                        database.ensure_tables(&added)?;
                    }
                    state = self.state.lock();
                    self.merge_schema(&mut state, &config)?;
                }
                database
            }
            None => self.establish(&mut state, &config)?,
        };

        if config.cache {
            for slot in &state.cached_handles {
                if !slot.is_cached_for_current_thread() {
                    continue;
                }
                let Some(handle) = slot.handle() else {
                    continue;
                };
                if handle.is_closed() {
                    released.push(handle);
                    continue;
                }
                metrics().increment_handles_reused();
                if event_enabled(Event::HandleReused) {
                    let path = self.path_field();
                    log_event_with_fields(Event::HandleReused, &[("path", path.as_str())]);
                }
                return Ok(handle);
            }
        }

        let handle = StoreHandle::open(config, Arc::clone(self), database)?;
        if let Some(notifier) = &state.notifier {
            notifier.add_handle(&handle);
        }
        if handle.config().cache {
            state.cached_handles.push(CachedHandle::new(&handle));
        }
        Ok(handle)
    }

    /// First opener: open the database, create its tables, start the
    /// notifier, then record the configuration.
    ///
    /// No handle exists yet, so nothing else can hold the writer slot.
    fn establish(
        self: &Arc<Self>,
        state: &mut CoordinatorState,
        config: &StoreConfig,
    ) -> CoordinatorResult<Arc<Database>> {
        let database = Database::open(&self.path, config.in_memory)?;
        if !config.read_only {
            if let Some(schema) = &config.schema {
                database.ensure_tables(schema.tables())?;
            }
        }

        let notifier = if config.read_only {
            None
        } else {
            Some(CommitNotifier::start(Arc::downgrade(self)).map_err(CoordinatorError::Notifier)?)
        };

        state.database = Some(Arc::clone(&database));
        state.notifier = notifier;
        state.config = Some(config.clone());

        let path = self.path_field();
        log_event_with_fields(
            Event::ConfigEstablished,
            &[
                ("path", path.as_str()),
                ("read_only", if config.read_only { "true" } else { "false" }),
                ("in_memory", if config.in_memory { "true" } else { "false" }),
            ],
        );
        Ok(database)
    }

    /// Later opener: validate against the authoritative configuration.
    ///
    /// Returns the tables the opener's schema would add.
    fn check_opener(
        &self,
        state: &CoordinatorState,
        config: &StoreConfig,
    ) -> CoordinatorResult<Vec<TableSchema>> {
        let Some(established) = state.config.as_ref() else {
            return Ok(Vec::new());
        };

        if let Err(field) = established.check_compatible(config) {
            metrics().increment_config_conflicts();
            let path = self.path_field();
            log_event_with_fields(
                Event::ConfigConflict,
                &[("path", path.as_str()), ("field", field.as_str())],
            );
            return Err(CoordinatorError::ConfigMismatch {
                field,
                path: self.path.clone(),
            });
        }

        let Some(schema) = &config.schema else {
            return Ok(Vec::new());
        };
        let mut merged = established.schema.clone().unwrap_or_default();
        merged.merge(schema).map_err(|table| self.schema_mismatch(table))
    }

    /// Record the opener's tables in the authoritative schema. Another
    /// opener may have merged in the meantime, so the merge is redone.
    fn merge_schema(&self, state: &mut CoordinatorState, config: &StoreConfig) -> CoordinatorResult<()> {
        let (Some(established), Some(schema)) = (state.config.as_mut(), config.schema.as_ref()) else {
            return Ok(());
        };
        let mut merged = established.schema.clone().unwrap_or_default();
        let added = merged.merge(schema).map_err(|table| self.schema_mismatch(table))?;
        if added.is_empty() {
            return Ok(());
        }
        established.schema = Some(merged);

        let path = self.path_field();
        let tables = table_names(&added);
        log_event_with_fields(
            Event::SchemaMerged,
            &[("path", path.as_str()), ("tables", tables.as_str())],
        );
        Ok(())
    }

    fn schema_mismatch(&self, table: String) -> CoordinatorError {
        CoordinatorError::SchemaMismatch {
            table,
            path: self.path.clone(),
        }
    }

    /// Forget a handle that is going away
    pub(crate) fn unregister_handle(&self, id: HandleId) {
        let mut state = self.state.lock();
        if let Some(notifier) = &state.notifier {
            notifier.remove_handle(id);
        }

        let cached = &mut state.cached_handles;
        let mut index = 0;
        while index < cached.len() {
            if cached[index].id() == id || cached[index].expired() {
                cached.swap_remove(index);
            } else {
                index += 1;
            }
        }
    }

    /// Live cached handles; taken by the registry when clearing the cache
    pub(crate) fn cached_handles(&self) -> Vec<Arc<StoreHandle>> {
        self.state.lock()
            .cached_handles
            .iter()
            .filter_map(CachedHandle::handle)
            .collect()
    }

    /// Announce a commit to every other handle of this path.
    ///
    /// # Panics
    ///
    /// On a read-only configuration, which never has a notifier.
    pub fn send_commit_notifications(&self) {
        let state = self.state.lock();
        let read_only = state.config.as_ref().is_some_and(|c| c.read_only);
        assert!(
            !read_only,
            "commit notifications sent for read-only store {}",
            self.path.display()
        );
        let Some(notifier) = &state.notifier else {
            panic!("no commit notifier for {}", self.path.display());
        };
        notifier.notify_others();
    }

    /// Tell every handle registered with the notifier that new results
    /// may be waiting
    pub fn notify_all_handles(&self) {
        let handles = match &self.state.lock().notifier {
            Some(notifier) => notifier.registered_handles(),
            None => Vec::new(),
        };
        for handle in handles {
            handle.notify();
        }
    }

    /// Queue a new async query for the next update cycle
    pub fn register_query(&self, query: &Arc<AsyncQuery>) {
        self.queries.lock().new_queries.push(Arc::downgrade(query));
        let path = self.path_field();
        log_event_with_fields(Event::QueryRegistered, &[("path", path.as_str())]);
    }

    /// Get a new query evaluated soon: through the pump when there is one,
    /// otherwise right away on this thread
    pub fn request_update(&self) {
        let notified = match &self.state.lock().notifier {
            Some(notifier) => {
                notifier.notify_others();
                true
            }
            None => false,
        };
        if !notified {
            self.run_async_queries();
        }
    }

    /// One update cycle: attach new queries, move the background session
    /// to the latest version, recompute every query unlocked, then export
    /// handovers to their observers
    pub fn run_async_queries(&self) {
        let _cycle = self.cycle.lock();
        let Some(database) = self.state.lock().database.clone() else {
            return;
        };

        let scope = ObservationScope::with_fields(
            "ASYNC_QUERY_CYCLE",
            Severity::Trace,
            vec![("path", self.path_field())],
        );
        metrics().increment_update_cycles();

        let (session, new_queries) = {
            let mut registry = self.queries.lock();
            let session = Arc::clone(
                registry
                    .session
                    .get_or_insert_with(|| Arc::new(Session::new(database, true))),
            );
            (session, std::mem::take(&mut registry.new_queries))
        };

        let advanced = match session.current_version() {
            Some(_) => session.advance_read(),
            None => session.begin_read(),
        };
        if let Err(err) = advanced {
            // Queries stay queued for the next cycle
            self.queries.lock().new_queries.extend(new_queries);
            scope.fail(&err.to_string());
            return;
        }

        let mut attached = Vec::with_capacity(new_queries.len());
        for weak in new_queries {
            let Some(query) = weak.upgrade() else {
                continue;
            };
            if !query.is_attached() {
                if let Err(err) = query.attach_to(&session) {
                    query.set_error(err.into());
                }
            }
            attached.push(weak);
        }

        // Pin every live query for the rest of the cycle
        let queries: Vec<Arc<AsyncQuery>> = {
            let mut registry = self.queries.lock();
            registry.queries.extend(attached);
            registry.queries.retain(|q| q.strong_count() > 0);
            registry.queries.iter().filter_map(Weak::upgrade).collect()
        };

        for query in &queries {
            if query.has_error() || !query.is_attached() {
                continue;
            }
            if let Err(err) = query.prepare_update() {
                query.set_error(err);
            }
        }
        for query in &queries {
            query.prepare_handover();
        }

        let count = queries.len().to_string();
        scope.complete_with_fields(&[("queries", count.as_str())]);
    }

    /// Deliveries owed to observers of the calling thread, imported into
    /// `handle`'s transaction
    pub fn collect_ready_actions(&self, handle: &Arc<StoreHandle>) -> Vec<DeliveryAction> {
        let queries: Vec<Arc<AsyncQuery>> = {
            let registry = self.queries.lock();
            registry
                .queries
                .iter()
                .chain(registry.new_queries.iter())
                .filter_map(Weak::upgrade)
                .collect()
        };

        let mut actions = Vec::new();
        for query in &queries {
            query.collect_ready_actions(handle, &mut actions);
        }
        actions
    }

    /// Detach every query from the background session and drop it. The
    /// queries are re-attached by the next cycle.
    pub fn suspend_async_queries(&self) {
        let _cycle = self.cycle.lock();
        let (queries, session) = {
            let mut registry = self.queries.lock();
            (std::mem::take(&mut registry.queries), registry.session.take())
        };

        let mut suspended = Vec::with_capacity(queries.len());
        for weak in queries {
            let Some(query) = weak.upgrade() else {
                continue;
            };
            if query.is_attached() {
                if let Err(err) = query.detach() {
                    query.set_error(err.into());
                }
            }
            suspended.push(weak);
        }
        if let Some(session) = session {
            session.close();
        }

        self.queries.lock().new_queries.extend(suspended);
    }

    /// Number of live async queries, attached or not
    pub fn query_count(&self) -> usize {
        let registry = self.queries.lock();
        registry
            .queries
            .iter()
            .chain(registry.new_queries.iter())
            .filter(|q| q.strong_count() > 0)
            .count()
    }
}

fn table_names(tables: &[TableSchema]) -> String {
    tables
        .iter()
        .map(|t| t.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        let path = self.path_field();
        log_event_with_fields(Event::CoordinatorDropped, &[("path", path.as_str())]);
        if let Some(registry) = self.registry.upgrade() {
            registry.sweep_expired();
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ConfigField;
    use crate::engine::{ColumnKind, TableSchema};

    fn dogs() -> Schema {
        Schema::new().table(TableSchema::new("dogs").column("name", ColumnKind::String))
    }

    #[test]
    fn test_first_opener_establishes_config() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-establish");
        assert!(coordinator.config().is_none());

        let _handle = coordinator
            .get_store_handle(StoreConfig::new("coord-establish").in_memory(true).schema(dogs()))
            .unwrap();
        let config = coordinator.config().unwrap();
        assert!(config.in_memory);
        assert_eq!(coordinator.get_schema(), Some(dogs()));
    }

    #[test]
    fn test_in_memory_mismatch() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-in-memory");
        let _first = coordinator
            .get_store_handle(StoreConfig::new("coord-in-memory").in_memory(true))
            .unwrap();

        let err = coordinator
            .get_store_handle(StoreConfig::new("coord-in-memory"))
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::ConfigMismatch { field: ConfigField::InMemory, .. }
        ));
    }

    #[test]
    fn test_schema_merge_adds_tables() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-merge");
        let first = coordinator
            .get_store_handle(StoreConfig::new("coord-merge").in_memory(true).schema(dogs()))
            .unwrap();

        let cats = Schema::new().table(TableSchema::new("cats").column("name", ColumnKind::String));
        let second = coordinator
            .get_store_handle(
                StoreConfig::new("coord-merge")
                    .in_memory(true)
                    .cache(false)
                    .schema(cats),
            )
            .unwrap();

        let schema = coordinator.get_schema().unwrap();
        assert!(schema.get("dogs").is_some());
        assert!(schema.get("cats").is_some());
        assert!(!Arc::ptr_eq(&first, &second));
        second.refresh().unwrap();
        assert!(second.session().read_table("cats", |t| t.len()).is_ok());
    }

    #[test]
    fn test_schema_merge_waits_for_writer_without_blocking_it() {
        use crossbeam::channel;
        use std::thread;
        use std::time::Duration;

        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-merge-writer");
        let base = StoreConfig::new("coord-merge-writer").in_memory(true);
        let _first = coordinator.get_store_handle(base.clone().schema(dogs())).unwrap();

        let (writing_tx, writing_rx) = channel::bounded::<()>(1);
        let (done_tx, done_rx) = channel::unbounded();

        let writer_coordinator = Arc::clone(&coordinator);
        let writer_config = base.clone();
        let writer_done = done_tx.clone();
        thread::spawn(move || {
            let handle = writer_coordinator.get_store_handle(writer_config).unwrap();
            let result = handle.write(|_| {
                let _ = writing_tx.send(());
                // Let the opener reach the writer slot first
                thread::sleep(Duration::from_millis(200));
                Ok(writer_coordinator.get_schema())
            });
            let _ = writer_done.send(("writer", result.is_ok()));
        });

        let opener_coordinator = Arc::clone(&coordinator);
        let cats = Schema::new().table(TableSchema::new("cats").column("name", ColumnKind::String));
        let opener_config = base.schema(cats);
        thread::spawn(move || {
            writing_rx.recv().unwrap();
            let result = opener_coordinator.get_store_handle(opener_config);
            let _ = done_tx.send(("opener", result.is_ok()));
        });

        for _ in 0..2 {
            let (who, ok) = done_rx
                .recv_timeout(Duration::from_secs(5))
                .expect("writer and schema-adding opener deadlocked");
            assert!(ok, "{who} failed");
        }
        let schema = coordinator.get_schema().unwrap();
        assert!(schema.get("cats").is_some());
    }

    #[test]
    fn test_schema_conflict() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-schema-conflict");
        let _first = coordinator
            .get_store_handle(
                StoreConfig::new("coord-schema-conflict")
                    .in_memory(true)
                    .schema(dogs()),
            )
            .unwrap();

        let other = Schema::new().table(TableSchema::new("dogs").column("name", ColumnKind::Any));
        let err = coordinator
            .get_store_handle(
                StoreConfig::new("coord-schema-conflict")
                    .in_memory(true)
                    .schema(other),
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::SchemaMismatch { ref table, .. } if table == "dogs"));
    }

    #[test]
    fn test_uncached_handles_are_distinct() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-uncached");
        let config = StoreConfig::new("coord-uncached").in_memory(true).cache(false);
        let a = coordinator.get_store_handle(config.clone()).unwrap();
        let b = coordinator.get_store_handle(config).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_dropped_handle_leaves_cache() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-drop-handle");
        let config = StoreConfig::new("coord-drop-handle").in_memory(true);
        let handle = coordinator.get_store_handle(config.clone()).unwrap();
        let first_id = handle.id();
        assert_eq!(coordinator.cached_handles().len(), 1);

        drop(handle);
        assert!(coordinator.cached_handles().is_empty());
        let again = coordinator.get_store_handle(config).unwrap();
        assert_ne!(again.id(), first_id);
    }

    #[test]
    #[should_panic(expected = "read-only")]
    fn test_notifications_on_read_only_store_panic() {
        let registry = CoordinatorRegistry::new();
        let coordinator = registry.get_coordinator("coord-read-only");
        let _handle = coordinator
            .get_store_handle(StoreConfig::new("coord-read-only").in_memory(true).read_only(true))
            .unwrap();
        coordinator.send_commit_notifications();
    }
}
