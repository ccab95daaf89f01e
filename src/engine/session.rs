//! Session - one transaction context over a `Database`
//!
//! A session is idle, reading (pinned to one committed state), writing
//! (holding the database's writer slot plus a private working copy), or
//! closed. A session belongs to one thread for its transaction work; the
//! mutex inside only makes it shareable behind an `Arc`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::database::{Database, DbState, Row, Table};
use super::errors::{EngineError, EngineResult};
use crate::mvcc::{SnapshotHandover, SourcePayload, VersionId};

enum TxnState {
    Idle,
    Reading(Arc<DbState>),
    Writing {
        base: Arc<DbState>,
        working: BTreeMap<String, Table>,
    },
    Closed,
}

impl TxnState {
    fn kind(&self) -> &'static str {
        match self {
            TxnState::Idle => "idle",
            TxnState::Reading(_) => "read",
            TxnState::Writing { .. } => "write",
            TxnState::Closed => "closed",
        }
    }

    fn version(&self) -> EngineResult<VersionId> {
        match self {
            TxnState::Reading(state) => Ok(state.version()),
            TxnState::Writing { base, .. } => Ok(base.version()),
            TxnState::Idle => Err(EngineError::NoActiveTransaction),
            TxnState::Closed => Err(EngineError::Closed),
        }
    }
}

/// A transaction context bound to one database
pub struct Session {
    db: Arc<Database>,
    read_only: bool,
    state: Mutex<TxnState>,
}

impl Session {
    pub fn new(db: Arc<Database>, read_only: bool) -> Self {
        Self {
            db,
            read_only,
            state: Mutex::new(TxnState::Idle),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), TxnState::Closed)
    }

    /// Version of the current transaction, if one is active
    pub fn current_version(&self) -> Option<VersionId> {
        self.state.lock().version().ok()
    }

    /// The committed state the current transaction reads from
    pub fn snapshot(&self) -> EngineResult<Arc<DbState>> {
        match &*self.state.lock() {
            TxnState::Reading(state) => Ok(Arc::clone(state)),
            TxnState::Writing { base, .. } => Ok(Arc::clone(base)),
            TxnState::Idle => Err(EngineError::NoActiveTransaction),
            TxnState::Closed => Err(EngineError::Closed),
        }
    }

    /// Start a read transaction at the latest committed version
    pub fn begin_read(&self) -> EngineResult<VersionId> {
        let mut state = self.state.lock();
        match &*state {
            TxnState::Idle => {
                let latest = self.db.latest();
                let version = latest.version();
                *state = TxnState::Reading(latest);
                Ok(version)
            }
            TxnState::Closed => Err(EngineError::Closed),
            other => Err(EngineError::TransactionInProgress(other.kind())),
        }
    }

    /// Move the read transaction to the latest committed version
    pub fn advance_read(&self) -> EngineResult<VersionId> {
        let mut state = self.state.lock();
        match &*state {
            TxnState::Reading(_) => {
                let latest = self.db.latest();
                let version = latest.version();
                *state = TxnState::Reading(latest);
                Ok(version)
            }
            TxnState::Writing { .. } => Err(EngineError::TransactionInProgress("write")),
            TxnState::Idle => Err(EngineError::NoActiveTransaction),
            TxnState::Closed => Err(EngineError::Closed),
        }
    }

    /// Leave the read transaction
    pub fn end_read(&self) {
        let mut state = self.state.lock();
        if matches!(*state, TxnState::Reading(_)) {
            *state = TxnState::Idle;
        }
    }

    /// Start a write transaction at the latest committed version.
    ///
    /// Blocks while another session of the same database is writing.
    pub fn begin_write(&self) -> EngineResult<VersionId> {
        if self.read_only {
            return Err(EngineError::ReadOnly);
        }
        match &*self.state.lock() {
            TxnState::Writing { .. } => return Err(EngineError::TransactionInProgress("write")),
            TxnState::Closed => return Err(EngineError::Closed),
            _ => {}
        }

        // Wait for the slot without holding our own state lock
        self.db.acquire_writer();

        let mut state = self.state.lock();
        if matches!(*state, TxnState::Closed) {
            self.db.release_writer();
            return Err(EngineError::Closed);
        }
        let base = self.db.latest();
        let version = base.version();
        let working = base.clone_tables();
        *state = TxnState::Writing { base, working };
        Ok(version)
    }

    fn with_working<R>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Table>) -> EngineResult<R>,
    ) -> EngineResult<R> {
        match &mut *self.state.lock() {
            TxnState::Writing { working, .. } => f(working),
            TxnState::Closed => Err(EngineError::Closed),
            _ => Err(EngineError::NoActiveTransaction),
        }
    }

    /// Append a row; returns its index
    pub fn insert(&self, table: &str, row: Row) -> EngineResult<usize> {
        self.with_working(|tables| table_mut(tables, table)?.insert(row))
    }

    /// Replace the row at `index`
    pub fn update(&self, table: &str, index: usize, row: Row) -> EngineResult<()> {
        self.with_working(|tables| table_mut(tables, table)?.update(index, row))
    }

    /// Remove the row at `index`; later rows shift down
    pub fn delete(&self, table: &str, index: usize) -> EngineResult<Row> {
        self.with_working(|tables| table_mut(tables, table)?.delete(index))
    }

    /// Read a table as the current transaction sees it, uncommitted
    /// writes included
    pub fn read_table<R>(&self, table: &str, f: impl FnOnce(&Table) -> R) -> EngineResult<R> {
        match &*self.state.lock() {
            TxnState::Writing { working, .. } => working
                .get(table)
                .map(f)
                .ok_or_else(|| EngineError::NoSuchTable(table.to_string())),
            TxnState::Reading(state) => state.table(table).map(f),
            TxnState::Idle => Err(EngineError::NoActiveTransaction),
            TxnState::Closed => Err(EngineError::Closed),
        }
    }

    /// Publish the write transaction; the session continues reading at the
    /// new version. On failure it continues reading at the old one.
    pub fn commit(&self) -> EngineResult<VersionId> {
        let mut state = self.state.lock();
        let (base, working) = match std::mem::replace(&mut *state, TxnState::Idle) {
            TxnState::Writing { base, working } => (base, working),
            other => {
                let err = match other {
                    TxnState::Closed => EngineError::Closed,
                    _ => EngineError::NoActiveTransaction,
                };
                *state = other;
                return Err(err);
            }
        };

        let result = self.db.publish(&base, working);
        self.db.release_writer();
        match result {
            Ok(version) => {
                *state = TxnState::Reading(self.db.latest());
                Ok(version)
            }
            Err(err) => {
                *state = TxnState::Reading(base);
                Err(err)
            }
        }
    }

    /// Abandon the write transaction; the session continues reading at the
    /// version the write started from
    pub fn rollback(&self) {
        let mut state = self.state.lock();
        if let TxnState::Writing { base, .. } = &*state {
            let base = Arc::clone(base);
            self.db.release_writer();
            *state = TxnState::Reading(base);
        }
    }

    /// Close the session; every later operation fails with `Closed`
    pub fn close(&self) {
        let mut state = self.state.lock();
        if let TxnState::Writing { .. } = *state {
            self.db.release_writer();
        }
        *state = TxnState::Closed;
    }

    /// Package a value for another thread, stamped with this transaction's
    /// version. With `SourcePayload::Move` the value is given up even if
    /// export fails, so callers check for an active transaction first.
    pub fn export_for_handover<T: Clone>(
        &self,
        payload: SourcePayload<'_, T>,
    ) -> EngineResult<SnapshotHandover<T>> {
        let version = self.state.lock().version()?;
        Ok(SnapshotHandover::new(version, payload.into_owned()))
    }

    /// Take ownership of a handed-over value inside this session's
    /// transaction, which must be at the capsule's version. The capsule is
    /// consumed either way.
    pub fn import_from_handover<T>(&self, capsule: SnapshotHandover<T>) -> EngineResult<T> {
        let current = self.state.lock().version()?;
        if capsule.version() != current {
            return Err(EngineError::VersionMismatch {
                capsule: capsule.version(),
                current,
            });
        }
        Ok(capsule.into_payload())
    }

    /// Like `import_from_handover`, but also accepts a capsule from an
    /// earlier version. For values that do not depend on table contents,
    /// such as a query plan, which a read transaction carries forward.
    pub(crate) fn import_carried_forward<T>(&self, capsule: SnapshotHandover<T>) -> EngineResult<T> {
        let current = self.state.lock().version()?;
        if capsule.version() > current {
            return Err(EngineError::VersionMismatch {
                capsule: capsule.version(),
                current,
            });
        }
        Ok(capsule.into_payload())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let TxnState::Writing { .. } = self.state.get_mut() {
            self.db.release_writer();
        }
    }
}

fn table_mut<'a>(tables: &'a mut BTreeMap<String, Table>, name: &str) -> EngineResult<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| EngineError::NoSuchTable(name.to_string()))
}
