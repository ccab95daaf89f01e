//! SnapshotHandover - one-shot capsule for moving a value between threads
//!
//! A capsule is produced inside a live transaction on the source thread and
//! stamped with that transaction's version. The destination consumes it by
//! value inside its own transaction, so a capsule can never be imported
//! twice. Deciding whether a capsule is still usable is the consumer's job:
//! a capsule behind the consumer's version is stale and must be dropped
//! without importing it.

use super::VersionId;

/// How a value leaves the producing transaction.
#[derive(Debug)]
pub enum SourcePayload<'a, T> {
    /// The producer keeps its value; the capsule gets a copy.
    Copy(&'a T),
    /// The producer gives its value up entirely.
    Move(T),
}

impl<T: Clone> SourcePayload<'_, T> {
    pub(crate) fn into_owned(self) -> T {
        match self {
            SourcePayload::Copy(value) => value.clone(),
            SourcePayload::Move(value) => value,
        }
    }
}

/// A value bound to the version at which it was produced.
///
/// Owned by exactly one side at a time; `Send` whenever `T` is.
#[derive(Debug)]
#[must_use = "a handover that is never imported is silently discarded"]
pub struct SnapshotHandover<T> {
    version: VersionId,
    payload: T,
}

impl<T> SnapshotHandover<T> {
    pub(crate) fn new(version: VersionId, payload: T) -> Self {
        Self { version, payload }
    }

    /// Version of the producing transaction
    #[inline]
    pub fn version(&self) -> VersionId {
        self.version
    }

    /// Whether a consumer whose transaction is at `current` must discard this
    /// capsule instead of importing it.
    #[inline]
    pub fn is_stale_for(&self, current: VersionId) -> bool {
        self.version < current
    }

    /// Consume the capsule. Only the engine's import path calls this.
    pub(crate) fn into_payload(self) -> T {
        self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_keeps_source() {
        let source = vec![1, 2, 3];
        let capsule = SnapshotHandover::new(
            VersionId::new(3),
            SourcePayload::Copy(&source).into_owned(),
        );
        assert_eq!(source.len(), 3);
        assert_eq!(capsule.into_payload(), vec![1, 2, 3]);
    }

    #[test]
    fn test_move_takes_source() {
        let source = String::from("plan");
        let capsule = SnapshotHandover::new(VersionId::new(1), SourcePayload::Move(source).into_owned());
        assert_eq!(capsule.into_payload(), "plan");
    }

    #[test]
    fn test_staleness_is_strictly_behind() {
        let capsule = SnapshotHandover::new(VersionId::new(5), ());
        assert!(!capsule.is_stale_for(VersionId::new(4)));
        assert!(!capsule.is_stale_for(VersionId::new(5)));
        assert!(capsule.is_stale_for(VersionId::new(6)));
    }

    #[test]
    fn test_capsule_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<SnapshotHandover<Vec<String>>>();
    }
}
