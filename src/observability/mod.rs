//! Observability for the coordination layer
//!
//! - Structured logging (JSON lines, see `Logger`)
//! - Typed lifecycle events (`Event`)
//! - Process-wide counters (`metrics()`)
//! - Begin/complete scopes around multi-step operations
//!
//! Observability never changes behavior: logging failures are swallowed and
//! nothing here takes a lock that the coordination layer also takes.
//!
//! ```ignore
//! use aerodb_coordinator::observability::{log_event_with_fields, Event, Logger, Severity};
//!
//! Logger::set_min_severity(Severity::Info);
//! log_event_with_fields(Event::HandleOpened, &[("path", "/tmp/a.aero")]);
//! ```

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{metrics, MetricsRegistry, MetricsSnapshot};
pub use scope::{ObservationScope, Timer};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

/// Whether `event` would currently be written; lets callers skip building
/// expensive fields
pub fn event_enabled(event: Event) -> bool {
    Logger::enabled(event.severity())
}
