//! Results - what an observer receives

use std::sync::Arc;

use super::store_handle::StoreHandle;
use crate::engine::{Row, SortOrder, TableView};
use crate::mvcc::VersionId;

/// Query results delivered to one observer, bound to the receiving handle
#[derive(Debug)]
pub struct Results {
    handle: Arc<StoreHandle>,
    sort: SortOrder,
    view: TableView,
}

impl Results {
    pub(crate) fn new(handle: Arc<StoreHandle>, sort: SortOrder, view: TableView) -> Self {
        Self { handle, sort, view }
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        self.view.rows()
    }

    pub fn get(&self, index: usize) -> Option<&Row> {
        self.view.get(index)
    }

    /// Version the rows were computed at
    pub fn version(&self) -> Option<VersionId> {
        self.view.version()
    }

    pub fn sort(&self) -> &SortOrder {
        &self.sort
    }

    /// Handle the results were delivered to
    pub fn handle(&self) -> &Arc<StoreHandle> {
        &self.handle
    }

    /// Whether the receiving handle is still open
    pub fn is_valid(&self) -> bool {
        !self.handle.is_closed()
    }

    pub fn into_view(self) -> TableView {
        self.view
    }
}
