//! In-process MVCC storage engine
//!
//! The engine the coordination layer drives:
//!
//! - `Database` - the committed history head of one path, persisted as a
//!   checksummed JSON file unless in-memory
//! - `Session` - one transaction context; read transactions pin a version,
//!   write transactions are serialized per database
//! - `Query` / `TableView` - predicate filters and their materialized,
//!   version-bound results
//!
//! Every committed state is immutable once published, so readers never
//! block writers.

mod database;
mod errors;
mod query;
mod schema;
mod session;
mod table_view;

pub use database::{Database, DbState, Row, Table};
pub use errors::{EngineError, EngineResult};
pub use query::{FilterOp, Predicate, Query, SortOrder};
pub use schema::{ColumnKind, ColumnSchema, Schema, TableSchema};
pub use session::Session;
pub use table_view::TableView;
