//! Database - the committed states of one store path
//!
//! Every commit publishes a complete, immutable `DbState` stamped with the
//! successor of the version it was based on. Readers pin a state by holding
//! its `Arc`; nothing a reader holds is ever mutated.
//!
//! Writers are serialized: at most one write transaction per database at a
//! time, waited for with a condition variable.
//!
//! Unless the store is in-memory, each publish is persisted before it becomes
//! visible: the whole state is written as JSON with a CRC32 over the table
//! payload, to a temporary file that is fsynced and renamed over the store
//! file.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use crc32fast::Hasher;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{EngineError, EngineResult};
use super::schema::TableSchema;
use crate::mvcc::VersionId;

/// A positional row; values line up with the table's columns
pub type Row = Vec<Value>;

const FORMAT_VERSION: u8 = 1;

/// A table at one committed version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    schema: TableSchema,
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: Vec::new(),
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub(crate) fn insert(&mut self, row: Row) -> EngineResult<usize> {
        self.schema.validate_row(&row)?;
        self.rows.push(row);
        Ok(self.rows.len() - 1)
    }

    pub(crate) fn update(&mut self, index: usize, row: Row) -> EngineResult<()> {
        self.schema.validate_row(&row)?;
        let slot = self.rows.get_mut(index).ok_or_else(|| EngineError::RowOutOfRange {
            table: self.schema.name.clone(),
            index,
        })?;
        *slot = row;
        Ok(())
    }

    pub(crate) fn delete(&mut self, index: usize) -> EngineResult<Row> {
        if index >= self.rows.len() {
            return Err(EngineError::RowOutOfRange {
                table: self.schema.name.clone(),
                index,
            });
        }
        Ok(self.rows.remove(index))
    }
}

/// One committed state of the store
#[derive(Debug, Clone)]
pub struct DbState {
    version: VersionId,
    tables: BTreeMap<String, Table>,
}

impl DbState {
    fn empty() -> Self {
        Self {
            version: VersionId::INITIAL,
            tables: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn table(&self, name: &str) -> EngineResult<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| EngineError::NoSuchTable(name.to_string()))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub(crate) fn clone_tables(&self) -> BTreeMap<String, Table> {
        self.tables.clone()
    }
}

/// On-disk form of a committed state
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    format_version: u8,
    version: VersionId,
    written_at: String,
    checksum: u32,
    tables: BTreeMap<String, Table>,
}

fn tables_checksum(tables: &BTreeMap<String, Table>) -> EngineResult<u32> {
    let bytes = serde_json::to_vec(tables)?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize())
}

/// The committed history head of one store path
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    in_memory: bool,
    latest: RwLock<Arc<DbState>>,
    writer_active: Mutex<bool>,
    writer_released: Condvar,
}

impl Database {
    /// Open the store at `path`.
    ///
    /// An in-memory store never touches the filesystem. Otherwise an existing
    /// store file is loaded and validated; a missing one means an empty store
    /// that is created on first commit.
    pub fn open(path: &Path, in_memory: bool) -> EngineResult<Arc<Self>> {
        let state = if !in_memory && path.exists() {
            Self::load(path)?
        } else {
            DbState::empty()
        };

        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            in_memory,
            latest: RwLock::new(Arc::new(state)),
            writer_active: Mutex::new(false),
            writer_released: Condvar::new(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_in_memory(&self) -> bool {
        self.in_memory
    }

    /// The most recently committed state
    pub fn latest(&self) -> Arc<DbState> {
        Arc::clone(&self.latest.read())
    }

    pub fn latest_version(&self) -> VersionId {
        self.latest.read().version
    }

    /// Create every table in `tables` that does not exist yet.
    ///
    /// Returns the version published, or `None` when nothing was missing.
    /// A table that exists with different columns is a conflict.
    pub fn ensure_tables(&self, tables: &[TableSchema]) -> EngineResult<Option<VersionId>> {
        let _writer = WriterGuard::acquire(self);
        let base = self.latest();

        let mut next = base.tables.clone();
        let mut changed = false;
        for schema in tables {
            match next.get(&schema.name) {
                Some(existing) if existing.schema() != schema => {
                    return Err(EngineError::TableConflict(schema.name.clone()));
                }
                Some(_) => {}
                None => {
                    next.insert(schema.name.clone(), Table::new(schema.clone()));
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(None);
        }
        self.publish(&base, next).map(Some)
    }

    /// Block until no other write transaction is running, then claim the slot.
    pub(crate) fn acquire_writer(&self) {
        let mut active = self.writer_active.lock();
        while *active {
            self.writer_released.wait(&mut active);
        }
        *active = true;
    }

    pub(crate) fn release_writer(&self) {
        *self.writer_active.lock() = false;
        self.writer_released.notify_one();
    }

    /// Publish `tables` as the successor of `base`. Caller holds the writer slot.
    pub(crate) fn publish(
        &self,
        base: &DbState,
        tables: BTreeMap<String, Table>,
    ) -> EngineResult<VersionId> {
        let state = DbState {
            version: base.version.successor(),
            tables,
        };
        if !self.in_memory {
            self.persist(&state)?;
        }

        let version = state.version;
        *self.latest.write() = Arc::new(state);
        Ok(version)
    }

    fn persist(&self, state: &DbState) -> EngineResult<()> {
        let file = StoreFile {
            format_version: FORMAT_VERSION,
            version: state.version,
            written_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            checksum: tables_checksum(&state.tables)?,
            tables: state.tables.clone(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
            }
        }

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut out = File::create(&tmp_path).map_err(|e| EngineError::io(&tmp_path, e))?;
        out.write_all(&json).map_err(|e| EngineError::io(&tmp_path, e))?;
        out.sync_all().map_err(|e| EngineError::io(&tmp_path, e))?;
        drop(out);

        fs::rename(&tmp_path, &self.path).map_err(|e| EngineError::io(&self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let dir = OpenOptions::new()
                .read(true)
                .open(parent)
                .map_err(|e| EngineError::io(parent, e))?;
            dir.sync_all().map_err(|e| EngineError::io(parent, e))?;
        }
        Ok(())
    }

    fn load(path: &Path) -> EngineResult<DbState> {
        let bytes = fs::read(path).map_err(|e| EngineError::io(path, e))?;
        let file: StoreFile = serde_json::from_slice(&bytes)?;

        if file.format_version != FORMAT_VERSION {
            return Err(EngineError::Corruption(format!(
                "unsupported format version {} in {}",
                file.format_version,
                path.display()
            )));
        }
        if tables_checksum(&file.tables)? != file.checksum {
            return Err(EngineError::Corruption(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        Ok(DbState {
            version: file.version,
            tables: file.tables,
        })
    }
}

/// Holds the writer slot for the duration of a scope
struct WriterGuard<'a>(&'a Database);

impl<'a> WriterGuard<'a> {
    fn acquire(db: &'a Database) -> Self {
        db.acquire_writer();
        Self(db)
    }
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.0.release_writer();
    }
}
