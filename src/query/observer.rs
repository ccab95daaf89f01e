//! Observers of async query results
//!
//! An observer is bound to one thread. The coordination layer never calls
//! `deliver` or `error` itself: it builds deferred actions that the owning
//! thread runs (see `StoreHandle::deliver_ready`). Only `update_ready` may
//! be called from any thread, to tell the owner there is something to
//! collect.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use super::async_query::AsyncQuery;
use super::errors::QueryError;
use crate::handle::Results;

/// A thread-bound recipient of one async query's results
pub trait QueryObserver: Send + Sync {
    /// New results for this observer's thread
    fn deliver(&self, results: Results);

    /// The query failed; nothing is delivered after this
    fn error(&self, err: QueryError);

    /// Results or an error are waiting to be collected. Called from any
    /// thread, usually the pump's.
    fn update_ready(&self);

    /// Whether the calling thread owns this observer
    fn is_for_current_thread(&self) -> bool;
}

/// Observer identity is `Arc` identity
pub(crate) fn same_observer(a: &Arc<dyn QueryObserver>, b: &Arc<dyn QueryObserver>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

type ResultsFn = Box<dyn Fn(Results) + Send + Sync>;
type ErrorFn = Box<dyn Fn(QueryError) + Send + Sync>;
type ReadyFn = Box<dyn Fn() + Send + Sync>;

/// Observer built from closures, bound to the thread that created it
pub struct CallbackObserver {
    thread_id: ThreadId,
    on_results: ResultsFn,
    on_error: ErrorFn,
    on_ready: Option<ReadyFn>,
}

impl CallbackObserver {
    pub fn new<R, E>(on_results: R, on_error: E) -> Self
    where
        R: Fn(Results) + Send + Sync + 'static,
        E: Fn(QueryError) + Send + Sync + 'static,
    {
        Self {
            thread_id: thread::current().id(),
            on_results: Box::new(on_results),
            on_error: Box::new(on_error),
            on_ready: None,
        }
    }

    /// Also run `on_ready` whenever there is something to collect
    pub fn with_ready<F>(mut self, on_ready: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_ready = Some(Box::new(on_ready));
        self
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn into_arc(self) -> Arc<dyn QueryObserver> {
        Arc::new(self)
    }
}

impl QueryObserver for CallbackObserver {
    fn deliver(&self, results: Results) {
        (self.on_results)(results);
    }

    fn error(&self, err: QueryError) {
        (self.on_error)(err);
    }

    fn update_ready(&self) {
        if let Some(on_ready) = &self.on_ready {
            on_ready();
        }
    }

    fn is_for_current_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }
}

impl fmt::Debug for CallbackObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackObserver")
            .field("thread_id", &self.thread_id)
            .field("has_ready", &self.on_ready.is_some())
            .finish()
    }
}

/// Keeps an observer registered; removes it when dropped
#[must_use = "dropping the token unregisters the observer"]
pub struct ObserverToken {
    query: Arc<AsyncQuery>,
    observer: Arc<dyn QueryObserver>,
}

impl ObserverToken {
    pub(crate) fn new(query: Arc<AsyncQuery>, observer: Arc<dyn QueryObserver>) -> Self {
        Self { query, observer }
    }

    pub fn query(&self) -> &Arc<AsyncQuery> {
        &self.query
    }

    pub fn observer(&self) -> &Arc<dyn QueryObserver> {
        &self.observer
    }
}

impl Drop for ObserverToken {
    fn drop(&mut self) {
        self.query.remove_observer(&self.observer);
    }
}

impl fmt::Debug for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverToken")
            .field("query_version", &self.query.version())
            .finish_non_exhaustive()
    }
}
