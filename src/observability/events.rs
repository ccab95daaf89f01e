//! Observable events of the coordination layer
//!
//! Events are explicit and typed; the string form is what lands in the
//! `event` field of a log line.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Coordinator lifecycle
    /// A coordinator was constructed for a path
    CoordinatorCreated,
    /// A coordinator was dropped
    CoordinatorDropped,
    /// The authoritative configuration of a path was established
    ConfigEstablished,
    /// An opener's configuration disagreed with the authoritative one
    ConfigConflict,
    /// Tables from a later opener's schema were merged in
    SchemaMerged,
    /// Every cached handle of every path was closed
    CacheCleared,

    // Handles
    /// A store handle was opened
    HandleOpened,
    /// A cached handle was returned to its thread again
    HandleReused,
    /// A store handle was closed
    HandleClosed,

    // Commit notification
    /// A commit was announced to the other handles of a path
    CommitNotified,
    /// The background pump started
    PumpStarted,
    /// The background pump stopped
    PumpStopped,

    // Async queries
    /// An async query was registered with its coordinator
    QueryRegistered,
    /// An async query was attached to the background session
    QueryAttached,
    /// An async query was detached from the background session
    QueryDetached,
    /// A query's result set changed during an update cycle
    QueryUpdated,
    /// A query's terminal error was recorded
    QueryErrored,
    /// A handover older than the consumer's version was discarded
    StaleHandover,
    /// A handover newer than the consumer's version was left for later
    HandoverAhead,
    /// A deferred delivery was skipped because the consumer advanced
    DeliverySkipped,
}

impl Event {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::CoordinatorCreated => "COORDINATOR_CREATED",
            Event::CoordinatorDropped => "COORDINATOR_DROPPED",
            Event::ConfigEstablished => "CONFIG_ESTABLISHED",
            Event::ConfigConflict => "CONFIG_CONFLICT",
            Event::SchemaMerged => "SCHEMA_MERGED",
            Event::CacheCleared => "CACHE_CLEARED",
            Event::HandleOpened => "HANDLE_OPENED",
            Event::HandleReused => "HANDLE_REUSED",
            Event::HandleClosed => "HANDLE_CLOSED",
            Event::CommitNotified => "COMMIT_NOTIFIED",
            Event::PumpStarted => "PUMP_STARTED",
            Event::PumpStopped => "PUMP_STOPPED",
            Event::QueryRegistered => "QUERY_REGISTERED",
            Event::QueryAttached => "QUERY_ATTACHED",
            Event::QueryDetached => "QUERY_DETACHED",
            Event::QueryUpdated => "QUERY_UPDATED",
            Event::QueryErrored => "QUERY_ERRORED",
            Event::StaleHandover => "STALE_HANDOVER",
            Event::HandoverAhead => "HANDOVER_AHEAD",
            Event::DeliverySkipped => "DELIVERY_SKIPPED",
        }
    }

    /// Severity this event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::QueryUpdated
            | Event::CommitNotified
            | Event::HandleReused
            | Event::StaleHandover
            | Event::HandoverAhead
            | Event::DeliverySkipped => Severity::Trace,
            Event::ConfigConflict => Severity::Warn,
            Event::QueryErrored => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_screaming_snake() {
        for event in [
            Event::CoordinatorCreated,
            Event::CacheCleared,
            Event::StaleHandover,
            Event::HandoverAhead,
            Event::DeliverySkipped,
        ] {
            let name = event.as_str();
            assert!(name.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
            assert_eq!(event.to_string(), name);
        }
    }

    #[test]
    fn test_query_error_logs_at_error() {
        assert_eq!(Event::QueryErrored.severity(), Severity::Error);
        assert_eq!(Event::StaleHandover.severity(), Severity::Trace);
        assert_eq!(Event::ConfigConflict.severity(), Severity::Warn);
        assert_eq!(Event::HandleOpened.severity(), Severity::Info);
    }
}
