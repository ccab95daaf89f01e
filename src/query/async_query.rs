//! AsyncQuery - background recomputation with per-observer handovers
//!
//! One async query is shared by three kinds of threads:
//!
//! - the worker (the pump, or whoever runs the coordinator's update
//!   cycle) recomputes the live view in `prepare_update`, then exports a
//!   capsule per observer in `prepare_handover`
//! - any thread may add or remove observers
//! - each observer's owning thread collects deferred delivery actions in
//!   `collect_ready_actions` and runs them itself
//!
//! State is split over two locks. The worker lock guards the live query,
//! its session and view; the observer lock guards the observer slots and
//! their pending capsules. `prepare_update` takes only the worker lock, so
//! a slow evaluation never blocks consumers draining already-published
//! results. Lock order is worker, then observers.
//!
//! Delivery invariants:
//!
//! - a capsule is only imported at exactly its own version; one behind
//!   or ahead of the consumer stays in place and ends the batch
//! - a deferred action re-checks the consumer's version when it runs
//! - an observer stays owed a delivery until one actually runs, so a
//!   skipped action leads to a fresh capsule on a later cycle
//! - an error is delivered at most once per observer and ends all result
//!   delivery

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::errors::QueryError;
use super::observer::{same_observer, ObserverToken, QueryObserver};
use crate::coordinator::Coordinator;
use crate::engine::{EngineResult, Query, Session, SortOrder, TableView};
use crate::handle::{Results, StoreHandle};
use crate::mvcc::{SnapshotHandover, SourcePayload, VersionId};
use crate::observability::{event_enabled, log_event_with_fields, metrics, Event};

/// What a deferred action delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    Results,
    Error,
}

/// A delivery to run on the observer's own thread
pub struct DeliveryAction {
    kind: DeliveryKind,
    run: Box<dyn FnOnce() + Send>,
}

impl DeliveryAction {
    fn results(
        observer: Weak<dyn QueryObserver>,
        handle: Arc<StoreHandle>,
        sort: SortOrder,
        view: TableView,
        version: VersionId,
        owed: Arc<AtomicBool>,
    ) -> Self {
        let run = move || {
            // The consumer may have advanced since the action was built
            if handle.current_version() != Some(version) {
                metrics().increment_deliveries_skipped();
                if event_enabled(Event::DeliverySkipped) {
                    let version = version.to_string();
                    log_event_with_fields(Event::DeliverySkipped, &[("version", version.as_str())]);
                }
                return;
            }
            let Some(observer) = observer.upgrade() else {
                return;
            };
            owed.store(false, Ordering::Release);
            metrics().increment_deliveries_run();
            observer.deliver(Results::new(handle, sort, view));
        };
        Self {
            kind: DeliveryKind::Results,
            run: Box::new(run),
        }
    }

    fn error(observer: Arc<dyn QueryObserver>, err: QueryError) -> Self {
        let run = move || {
            metrics().increment_deliveries_run();
            observer.error(err);
        };
        Self {
            kind: DeliveryKind::Error,
            run: Box::new(run),
        }
    }

    pub fn kind(&self) -> DeliveryKind {
        self.kind
    }

    /// Deliver. Must be called on the observer's thread.
    pub fn run(self) {
        (self.run)()
    }
}

impl fmt::Debug for DeliveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryAction")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

struct WorkerState {
    /// Portable plan; present until attached and again after detach
    query_handover: Option<SnapshotHandover<Query>>,
    query: Option<Query>,
    session: Option<Arc<Session>>,
    view: Option<TableView>,
    did_update: bool,
}

struct ObserverSlot {
    /// Taken when an error is queued for delivery
    observer: Option<Arc<dyn QueryObserver>>,
    handover: Option<SnapshotHandover<TableView>>,
    /// Set until a results delivery runs; shared with deferred actions
    owed: Arc<AtomicBool>,
}

struct ObserverState {
    slots: Vec<ObserverSlot>,
    /// Observers added after the error was set; each is owed the error once
    late: Vec<Arc<dyn QueryObserver>>,
    version: Option<VersionId>,
    error: Option<QueryError>,
}

/// A query recomputed in the background and delivered to observers on
/// their own threads
pub struct AsyncQuery {
    sort: SortOrder,
    parent: Arc<Coordinator>,
    worker: Mutex<WorkerState>,
    observers: Mutex<ObserverState>,
}

impl AsyncQuery {
    pub(crate) fn new(
        sort: SortOrder,
        handover: SnapshotHandover<Query>,
        parent: Arc<Coordinator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sort,
            parent,
            worker: Mutex::new(WorkerState {
                query_handover: Some(handover),
                query: None,
                session: None,
                view: None,
                did_update: false,
            }),
            observers: Mutex::new(ObserverState {
                slots: Vec::new(),
                late: Vec::new(),
                version: None,
                error: None,
            }),
        })
    }

    /// Register an observer.
    ///
    /// A query that already failed does not keep the observer: it is only
    /// signalled so that its next collection picks up the error.
    pub fn add_observer(&self, observer: Arc<dyn QueryObserver>) {
        let mut state = self.observers.lock();
        if state.error.is_some() {
            state.late.push(Arc::clone(&observer));
            drop(state);
            observer.update_ready();
            return;
        }
        state.slots.push(ObserverSlot {
            observer: Some(observer),
            handover: None,
            owed: Arc::new(AtomicBool::new(true)),
        });
    }

    /// Register an observer for as long as the returned token lives
    pub fn observe(self: &Arc<Self>, observer: Arc<dyn QueryObserver>) -> ObserverToken {
        self.add_observer(Arc::clone(&observer));
        ObserverToken::new(Arc::clone(self), observer)
    }

    /// Unregister an observer together with its pending capsule.
    ///
    /// Returns whether any observers remain.
    ///
    /// # Panics
    ///
    /// If the observer is unknown while no error is set.
    pub fn remove_observer(&self, observer: &Arc<dyn QueryObserver>) -> bool {
        let mut state = self.observers.lock();
        let position = state.slots.iter().position(|slot| {
            slot.observer
                .as_ref()
                .is_some_and(|o| same_observer(o, observer))
        });

        let removed = match position {
            Some(index) => Some(state.slots.swap_remove(index)),
            None => {
                state.late.retain(|o| !same_observer(o, observer));
                None
            }
        };
        let errored = state.error.is_some();
        let remaining = !state.slots.is_empty();
        drop(state);
        drop(removed);

        assert!(
            position.is_some() || errored,
            "removing an observer that is not registered with this query"
        );
        remaining
    }

    /// Recompute the live view. Takes only the worker lock.
    ///
    /// # Panics
    ///
    /// If the query is not attached.
    pub fn prepare_update(&self) -> Result<(), QueryError> {
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        let (Some(session), Some(query)) = (worker.session.as_ref(), worker.query.as_ref()) else {
            panic!("prepare_update on an async query that is not attached");
        };

        match worker.view.as_mut() {
            None => {
                let mut view = query.find_all(session)?;
                view.sort(&self.sort);
                worker.view = Some(view);
                worker.did_update = true;
            }
            Some(view) => {
                worker.did_update = view.sync_if_needed(session)?;
            }
        }
        Ok(())
    }

    /// Export a fresh capsule to every observer that needs one, then stamp
    /// the query's version. Runs after `prepare_update`.
    pub fn prepare_handover(&self) {
        let mut ready = Vec::new();
        {
            let worker = self.worker.lock();
            let (Some(session), Some(view)) = (worker.session.as_ref(), worker.view.as_ref())
            else {
                return;
            };
            let Some(current) = session.current_version() else {
                return;
            };

            let mut state = self.observers.lock();
            if state.error.is_some() {
                return;
            }
            for slot in state.slots.iter_mut() {
                if worker.did_update {
                    slot.owed.store(true, Ordering::Release);
                }
                let owed = slot.owed.load(Ordering::Acquire);
                let moved_on = slot
                    .handover
                    .as_ref()
                    .is_some_and(|h| h.version() != current);
                // A taken capsule whose action was skipped leaves the slot
                // empty but still owed
                let missing = owed && slot.handover.is_none();
                if !(worker.did_update || moved_on || missing) {
                    continue;
                }

                match session.export_for_handover(SourcePayload::Copy(view)) {
                    Ok(capsule) => slot.handover = Some(capsule),
                    Err(_) => break,
                }
                metrics().increment_handovers_exported();

                if owed {
                    if let Some(observer) = &slot.observer {
                        ready.push(Arc::clone(observer));
                    }
                }
            }
            state.version = Some(current);

            if event_enabled(Event::QueryUpdated) {
                let version = current.to_string();
                let signalled = ready.len().to_string();
                log_event_with_fields(
                    Event::QueryUpdated,
                    &[
                        ("version", version.as_str()),
                        ("changed", if worker.did_update { "true" } else { "false" }),
                        ("signalled", signalled.as_str()),
                    ],
                );
            }
        }

        for observer in ready {
            observer.update_ready();
        }
    }

    /// Gather deliveries owed to observers of the calling thread.
    ///
    /// Capsules are imported into `handle`'s transaction. A capsule from
    /// another version stops the scan; actions already gathered are kept
    /// and the capsule stays in place. A stale one waits for the next cycle
    /// to replace it, one ahead of the handle for the handle to refresh.
    pub fn collect_ready_actions(&self, handle: &Arc<StoreHandle>, sink: &mut Vec<DeliveryAction>) {
        let Some(current) = handle.current_version() else {
            return;
        };

        let mut guard = self.observers.lock();
        let state = &mut *guard;

        if let Some(err) = state.error.clone() {
            for slot in state.slots.iter_mut() {
                if !slot.observer.as_ref().is_some_and(|o| o.is_for_current_thread()) {
                    continue;
                }
                if let Some(observer) = slot.observer.take() {
                    slot.handover = None;
                    sink.push(DeliveryAction::error(observer, err.clone()));
                }
            }
            let (mine, others): (Vec<_>, Vec<_>) = std::mem::take(&mut state.late)
                .into_iter()
                .partition(|o| o.is_for_current_thread());
            state.late = others;
            sink.extend(mine.into_iter().map(|o| DeliveryAction::error(o, err.clone())));

            // Observers of other threads are kept until their own thread
            // collects the error
            state.slots.retain(|slot| slot.observer.is_some());
            return;
        }

        for slot in state.slots.iter_mut() {
            let Some(observer) = slot.observer.as_ref() else {
                continue;
            };
            if !observer.is_for_current_thread() {
                continue;
            }
            let Some(capsule) = slot.handover.as_ref() else {
                continue;
            };
            if capsule.is_stale_for(current) {
                metrics().increment_stale_batches();
                if event_enabled(Event::StaleHandover) {
                    let capsule_version = capsule.version().to_string();
                    let handle_version = current.to_string();
                    log_event_with_fields(
                        Event::StaleHandover,
                        &[
                            ("capsule_version", capsule_version.as_str()),
                            ("handle_version", handle_version.as_str()),
                        ],
                    );
                }
                return;
            }
            if capsule.version() > current {
                if event_enabled(Event::HandoverAhead) {
                    let capsule_version = capsule.version().to_string();
                    let handle_version = current.to_string();
                    log_event_with_fields(
                        Event::HandoverAhead,
                        &[
                            ("capsule_version", capsule_version.as_str()),
                            ("handle_version", handle_version.as_str()),
                        ],
                    );
                }
                return;
            }

            let Some(capsule) = slot.handover.take() else {
                continue;
            };
            let view = match handle.session().import_from_handover(capsule) {
                Ok(view) => view,
                Err(_) => return,
            };
            sink.push(DeliveryAction::results(
                Arc::downgrade(observer),
                Arc::clone(handle),
                self.sort.clone(),
                view,
                current,
                Arc::clone(&slot.owed),
            ));
        }
    }

    /// Record the terminal error. First error wins; every registered
    /// observer is told to collect it.
    pub fn set_error(&self, err: QueryError) {
        let code = err.code();
        let observers: Vec<_> = {
            let mut state = self.observers.lock();
            if state.error.is_some() {
                return;
            }
            state.error = Some(err);
            state.slots.iter().filter_map(|s| s.observer.clone()).collect()
        };

        metrics().increment_query_errors();
        let path = self.path_field();
        log_event_with_fields(Event::QueryErrored, &[("code", code), ("path", path.as_str())]);
        for observer in observers {
            observer.update_ready();
        }
    }

    /// Bind the query to `session`, consuming the portable plan.
    ///
    /// # Panics
    ///
    /// If the query is already attached.
    pub fn attach_to(&self, session: &Arc<Session>) -> EngineResult<()> {
        let mut worker = self.worker.lock();
        assert!(worker.session.is_none(), "async query is already attached");
        // Fail before the plan is consumed
        session.snapshot()?;

        let Some(capsule) = worker.query_handover.take() else {
            panic!("async query has no plan to attach");
        };
        // The plan may come from a handle behind the background session
        let query = session.import_carried_forward(capsule)?;
        worker.query = Some(query);
        worker.session = Some(Arc::clone(session));
        drop(worker);

        let path = self.path_field();
        log_event_with_fields(Event::QueryAttached, &[("path", path.as_str())]);
        Ok(())
    }

    /// Move the live plan back into portable form and release the session.
    ///
    /// # Panics
    ///
    /// If the query is not attached.
    pub fn detach(&self) -> EngineResult<()> {
        let mut worker = self.worker.lock();
        let Some(session) = worker.session.clone() else {
            panic!("detaching an async query that is not attached");
        };
        session.snapshot()?;

        let Some(query) = worker.query.take() else {
            panic!("attached async query has no live plan");
        };
        worker.query_handover = Some(session.export_for_handover(SourcePayload::Move(query))?);
        worker.session = None;
        drop(worker);

        let path = self.path_field();
        log_event_with_fields(Event::QueryDetached, &[("path", path.as_str())]);
        Ok(())
    }

    /// Version of the most recent handover round
    pub fn version(&self) -> Option<VersionId> {
        self.observers.lock().version
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().slots.len()
    }

    pub fn has_error(&self) -> bool {
        self.observers.lock().error.is_some()
    }

    pub fn error(&self) -> Option<QueryError> {
        self.observers.lock().error.clone()
    }

    pub fn sort(&self) -> &SortOrder {
        &self.sort
    }

    pub fn is_attached(&self) -> bool {
        self.worker.lock().session.is_some()
    }

    pub fn parent(&self) -> &Arc<Coordinator> {
        &self.parent
    }

    fn path_field(&self) -> String {
        self.parent.path().display().to_string()
    }
}

impl fmt::Debug for AsyncQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncQuery")
            .field("path", &self.parent.path())
            .field("version", &self.version())
            .field("observers", &self.observer_count())
            .field("error", &self.error())
            .finish()
    }
}
