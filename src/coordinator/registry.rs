//! Process-wide map from store path to its coordinator
//!
//! Entries are weak: the registry never keeps a coordinator alive. A slot
//! whose coordinator is gone stays until the next sweep, and lookups always
//! try to upgrade before creating, so a path never has two live
//! coordinators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use super::coordinator::Coordinator;
use crate::handle::StoreHandle;
use crate::observability::{log_event_with_fields, Event, ObservationScope, Severity};

static GLOBAL: OnceLock<Arc<CoordinatorRegistry>> = OnceLock::new();

/// Path -> coordinator map
pub struct CoordinatorRegistry {
    coordinators: Mutex<HashMap<PathBuf, Weak<Coordinator>>>,
}

impl CoordinatorRegistry {
    /// A registry of its own, independent of the process-wide one
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            coordinators: Mutex::new(HashMap::new()),
        })
    }

    /// The process-wide registry
    pub fn global() -> &'static Arc<CoordinatorRegistry> {
        GLOBAL.get_or_init(CoordinatorRegistry::new)
    }

    /// The live coordinator for `path`, created if there is none
    pub fn get_coordinator(self: &Arc<Self>, path: impl AsRef<Path>) -> Arc<Coordinator> {
        let path = path.as_ref();
        let mut coordinators = self.coordinators.lock();
        if let Some(existing) = coordinators.get(path).and_then(Weak::upgrade) {
            return existing;
        }

        let coordinator = Coordinator::new(path.to_path_buf(), Arc::downgrade(self));
        coordinators.insert(path.to_path_buf(), Arc::downgrade(&coordinator));
        coordinator
    }

    /// The live coordinator for `path`, if any
    pub fn get_existing_coordinator(&self, path: impl AsRef<Path>) -> Option<Arc<Coordinator>> {
        self.coordinators.lock()
            .get(path.as_ref())
            .and_then(Weak::upgrade)
    }

    /// Drop slots whose coordinator is gone
    pub fn sweep_expired(&self) {
        self.coordinators.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Number of slots, expired ones included until swept
    pub fn len(&self) -> usize {
        self.coordinators.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every cached handle of every coordinator and forget them all.
    ///
    /// Handles and coordinators are gathered under the registry lock and
    /// acted on only after it is released: closing a handle takes its
    /// coordinator's lock, and dropping a coordinator takes this one.
    pub fn clear_cache(&self) {
        let scope = ObservationScope::new("CACHE_CLEAR", Severity::Info);

        let coordinators: Vec<Arc<Coordinator>> = {
            let mut map = self.coordinators.lock();
            let live = map.values().filter_map(Weak::upgrade).collect();
            map.clear();
            live
        };

        let handles: Vec<Arc<StoreHandle>> = coordinators
            .iter()
            .flat_map(|coordinator| coordinator.cached_handles())
            .collect();

        for coordinator in &coordinators {
            coordinator.suspend_async_queries();
        }
        for handle in &handles {
            handle.close();
        }

        let closed = handles.len().to_string();
        let paths = coordinators.len().to_string();
        drop(handles);
        drop(coordinators);

        log_event_with_fields(
            Event::CacheCleared,
            &[("handles", closed.as_str()), ("coordinators", paths.as_str())],
        );
        scope.complete_with_fields(&[("handles", closed.as_str())]);
    }
}

impl std::fmt::Debug for CoordinatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinatorRegistry")
            .field("slots", &self.len())
            .finish()
    }
}
