//! VersionId - identity of a committed state of a store
//!
//! - Totally ordered, never reused
//! - Non-decreasing as observed by any one transaction
//! - Compared, never computed with, outside the engine

use std::fmt;

use serde::{Deserialize, Serialize};

/// A totally ordered, opaque identifier of a committed store state.
///
/// The empty store is version 0; every commit publishes the successor of the
/// version it was based on.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    /// Version of a store nothing has been committed to
    pub const INITIAL: VersionId = VersionId(0);

    /// Creates a VersionId with the given value.
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying value.
    ///
    /// For persistence and log fields only.
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The version a commit based on `self` publishes.
    #[inline]
    pub(crate) fn successor(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}
