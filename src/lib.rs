//! aerodb-coordinator - Per-path coordination for multi-threaded AeroDB stores
//!
//! A store file may be opened independently by many threads of one process.
//! This crate keeps those openers consistent:
//!
//! - `coordinator` - one `Coordinator` per path, weakly registered process-wide,
//!   validating configuration and caching one handle per thread
//! - `query` - `AsyncQuery`, which recomputes results off the owning thread and
//!   hands them over as version-stamped capsules
//! - `notifier` - the commit notifier and its background pump
//! - `handle` - per-thread `StoreHandle` and delivered `Results`
//! - `engine` - the in-process MVCC engine the coordination layer drives
//! - `mvcc` - `VersionId` and `SnapshotHandover`
//! - `observability` - structured JSON logging and counters

pub mod coordinator;
pub mod engine;
pub mod handle;
pub mod mvcc;
pub mod notifier;
pub mod observability;
pub mod query;

pub use coordinator::{
    ConfigField, Coordinator, CoordinatorError, CoordinatorRegistry, CoordinatorResult,
    StoreConfig, NOT_VERSIONED,
};
pub use engine::{
    ColumnKind, ColumnSchema, EngineError, EngineResult, FilterOp, Query, Row, Schema,
    SortOrder, TableSchema, TableView,
};
pub use handle::{HandleId, Results, StoreHandle, WriteTransaction};
pub use mvcc::{SnapshotHandover, SourcePayload, VersionId};
pub use query::{
    AsyncQuery, CallbackObserver, DeliveryAction, DeliveryKind, ObserverToken, QueryError,
    QueryObserver,
};
