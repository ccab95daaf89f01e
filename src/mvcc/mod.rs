//! MVCC vocabulary shared by the engine and the coordination layer
//!
//! - `VersionId` - totally ordered identity of a committed state
//! - `SnapshotHandover` - one-shot, version-stamped capsule for moving a
//!   value from one thread's transaction to another's
//! - `SourcePayload` - whether export copies or moves the producer's value

mod handover;
mod version_id;

pub use handover::{SnapshotHandover, SourcePayload};
pub use version_id::VersionId;
