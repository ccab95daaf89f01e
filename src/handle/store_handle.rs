//! StoreHandle - one thread's view of a store path
//!
//! A handle owns a session that is normally inside a read transaction
//! pinned at some version. `refresh` moves it to the latest version;
//! `write` runs a write transaction and announces the commit. All
//! transaction work belongs to the thread that opened the handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::{Coordinator, CoordinatorError, CoordinatorResult, StoreConfig};
use crate::engine::{Database, EngineResult, Query, Row, Session, SortOrder, Table};
use crate::mvcc::{SourcePayload, VersionId};
use crate::observability::{log_event_with_fields, metrics, Event};
use crate::query::{AsyncQuery, DeliveryAction, ObserverToken, QueryObserver};

/// Identity of a store handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandleId(Uuid);

impl HandleId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type Waker = Box<dyn Fn() + Send + Sync>;

/// A per-thread handle on a store path
pub struct StoreHandle {
    id: HandleId,
    config: StoreConfig,
    thread_id: ThreadId,
    session: Arc<Session>,
    /// Taken on close
    coordinator: Mutex<Option<Arc<Coordinator>>>,
    closed: AtomicBool,
    pending_notification: AtomicBool,
    waker: Mutex<Option<Waker>>,
}

impl StoreHandle {
    pub(crate) fn open(
        config: StoreConfig,
        coordinator: Arc<Coordinator>,
        database: Arc<Database>,
    ) -> EngineResult<Arc<Self>> {
        let session = Arc::new(Session::new(database, config.read_only));
        let version = session.begin_read()?;

        let handle = Arc::new(Self {
            id: HandleId::new(),
            config,
            thread_id: thread::current().id(),
            session,
            coordinator: Mutex::new(Some(coordinator)),
            closed: AtomicBool::new(false),
            pending_notification: AtomicBool::new(false),
            waker: Mutex::new(None),
        });

        metrics().increment_handles_opened();
        let id = handle.id.to_string();
        let path = handle.config.path.display().to_string();
        let version = version.to_string();
        log_event_with_fields(
            Event::HandleOpened,
            &[
                ("handle", id.as_str()),
                ("path", path.as_str()),
                ("version", version.as_str()),
            ],
        );
        Ok(handle)
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Configuration this handle was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Thread that opened the handle
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Version of the handle's current transaction; `None` once closed
    pub fn current_version(&self) -> Option<VersionId> {
        self.session.current_version()
    }

    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// The path's coordinator; fails once the handle is closed
    pub fn coordinator(&self) -> CoordinatorResult<Arc<Coordinator>> {
        self.coordinator.lock()
            .clone()
            .ok_or(CoordinatorError::HandleClosed)
    }

    /// Move the read transaction to the latest committed version
    pub fn refresh(&self) -> CoordinatorResult<VersionId> {
        Ok(self.session.advance_read()?)
    }

    /// Read a table at the handle's current version
    pub fn read<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> CoordinatorResult<R> {
        Ok(self.session.read_table(table, f)?)
    }

    /// Run `f` in a write transaction, commit, and notify the other
    /// handles of this path. An error from `f` rolls back.
    pub fn write<F, R>(&self, f: F) -> CoordinatorResult<R>
    where
        F: FnOnce(&WriteTransaction<'_>) -> EngineResult<R>,
    {
        let coordinator = self.coordinator()?;
        self.session.begin_write()?;

        let txn = WriteTransaction {
            session: &self.session,
        };
        let value = match f(&txn) {
            Ok(value) => value,
            Err(err) => {
                self.session.rollback();
                return Err(err.into());
            }
        };
        self.session.commit()?;

        coordinator.send_commit_notifications();
        Ok(value)
    }

    /// Called by the notifier pump after an update cycle
    pub fn notify(&self) {
        self.pending_notification.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().as_ref() {
            waker();
        }
    }

    /// Run `waker` whenever the pump notifies this handle. It runs on the
    /// pump thread and should only schedule work for the owning thread.
    pub fn set_waker<F>(&self, waker: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.waker.lock() = Some(Box::new(waker));
    }

    /// Whether the pump notified this handle since the last call
    pub fn take_pending_notification(&self) -> bool {
        self.pending_notification.swap(false, Ordering::AcqRel)
    }

    /// Register an async query for `query` with this path's coordinator
    pub fn async_query(&self, query: Query, sort: SortOrder) -> CoordinatorResult<Arc<AsyncQuery>> {
        let coordinator = self.coordinator()?;
        let handover = self.session.export_for_handover(SourcePayload::Move(query))?;
        let async_query = AsyncQuery::new(sort, handover, Arc::clone(&coordinator));
        coordinator.register_query(&async_query);
        Ok(async_query)
    }

    /// Register an async query with one observer and get it evaluated
    pub fn observe(
        &self,
        query: Query,
        sort: SortOrder,
        observer: Arc<dyn QueryObserver>,
    ) -> CoordinatorResult<ObserverToken> {
        let async_query = self.async_query(query, sort)?;
        let token = async_query.observe(observer);
        async_query.parent().request_update();
        Ok(token)
    }

    /// Deliveries owed to this thread's observers, without running them
    pub fn ready_actions(self: &Arc<Self>) -> Vec<DeliveryAction> {
        match self.coordinator() {
            Ok(coordinator) => coordinator.collect_ready_actions(self),
            Err(_) => Vec::new(),
        }
    }

    /// Run every delivery owed to this thread's observers; returns how many
    /// actions ran
    pub fn deliver_ready(self: &Arc<Self>) -> usize {
        let actions = self.ready_actions();
        let count = actions.len();
        for action in actions {
            action.run();
        }
        count
    }

    /// Close the session and leave the coordinator. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session.close();
        let coordinator = self.coordinator.lock().take();
        if let Some(coordinator) = coordinator {
            coordinator.unregister_handle(self.id);
        }

        let id = self.id.to_string();
        log_event_with_fields(Event::HandleClosed, &[("handle", id.as_str())]);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", &self.id)
            .field("path", &self.config.path)
            .field("thread_id", &self.thread_id)
            .field("version", &self.current_version())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// The write side of `StoreHandle::write`
pub struct WriteTransaction<'a> {
    session: &'a Session,
}

impl WriteTransaction<'_> {
    /// Append a row; returns its index
    pub fn insert(&self, table: &str, row: Row) -> EngineResult<usize> {
        self.session.insert(table, row)
    }

    pub fn update(&self, table: &str, index: usize, row: Row) -> EngineResult<()> {
        self.session.update(table, index, row)
    }

    pub fn delete(&self, table: &str, index: usize) -> EngineResult<Row> {
        self.session.delete(table, index)
    }

    /// Read a table including this transaction's uncommitted writes
    pub fn read_table<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> EngineResult<R> {
        self.session.read_table(table, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::CoordinatorRegistry;
    use crate::engine::{ColumnKind, EngineError, Schema, TableSchema};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn open(name: &str) -> (Arc<CoordinatorRegistry>, Arc<StoreHandle>) {
        let registry = CoordinatorRegistry::new();
        let config = StoreConfig::new(name).in_memory(true).schema(
            Schema::new().table(TableSchema::new("dogs").column("name", ColumnKind::String)),
        );
        let handle = registry
            .get_coordinator(&config.path)
            .get_store_handle(config)
            .unwrap();
        (registry, handle)
    }

    #[test]
    fn test_write_commits_and_advances() {
        let (_registry, handle) = open("handle-write");
        let before = handle.current_version().unwrap();

        let index = handle
            .write(|txn| txn.insert("dogs", vec![json!("rex")]))
            .unwrap();
        assert_eq!(index, 0);
        assert!(handle.current_version().unwrap() > before);
        assert_eq!(handle.read("dogs", |t| t.len()).unwrap(), 1);
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let (_registry, handle) = open("handle-rollback");
        let before = handle.current_version();

        let err = handle
            .write(|txn| {
                txn.insert("dogs", vec![json!("rex")])?;
                txn.insert("dogs", vec![json!(1)])
            })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Engine(EngineError::TypeMismatch { .. })));
        assert_eq!(handle.current_version(), before);
        assert_eq!(handle.read("dogs", |t| t.len()).unwrap(), 0);

        // The writer slot was released
        handle.write(|txn| txn.insert("dogs", vec![json!("fido")])).unwrap();
    }

    #[test]
    fn test_read_only_handle_cannot_write() {
        let registry = CoordinatorRegistry::new();
        let config = StoreConfig::new("handle-read-only").in_memory(true).read_only(true);
        let handle = registry
            .get_coordinator(&config.path)
            .get_store_handle(config)
            .unwrap();
        assert!(matches!(
            handle.write(|_| Ok(())),
            Err(CoordinatorError::Engine(EngineError::ReadOnly))
        ));
    }

    #[test]
    fn test_notify_sets_flag_and_wakes() {
        let (_registry, handle) = open("handle-notify");
        let woken = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&woken);
        handle.set_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handle.notify();
        assert_eq!(woken.load(Ordering::SeqCst), 1);
        assert!(handle.take_pending_notification());
        assert!(!handle.take_pending_notification());
    }

    #[test]
    fn test_closed_handle() {
        let (_registry, handle) = open("handle-close");
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert_eq!(handle.current_version(), None);
        assert!(matches!(handle.coordinator(), Err(CoordinatorError::HandleClosed)));
        assert!(handle.ready_actions().is_empty());
    }
}
