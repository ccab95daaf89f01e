//! Weak cache slot for a per-thread store handle

use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crate::handle::{HandleId, StoreHandle};

/// A cached handle. Holding the slot never keeps the handle alive.
pub(crate) struct CachedHandle {
    id: HandleId,
    handle: Weak<StoreHandle>,
    thread_id: ThreadId,
}

impl CachedHandle {
    pub(crate) fn new(handle: &Arc<StoreHandle>) -> Self {
        Self {
            id: handle.id(),
            handle: Arc::downgrade(handle),
            thread_id: handle.thread_id(),
        }
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }

    pub(crate) fn is_cached_for_current_thread(&self) -> bool {
        self.thread_id == thread::current().id()
    }

    pub(crate) fn expired(&self) -> bool {
        self.handle.strong_count() == 0
    }

    /// The handle, if anyone still holds it
    pub(crate) fn handle(&self) -> Option<Arc<StoreHandle>> {
        self.handle.upgrade()
    }
}
