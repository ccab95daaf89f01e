//! ObservationScope for begin/complete logging around multi-step operations
//!
//! - `{NAME}_BEGIN` on creation
//! - `{NAME}_COMPLETE` with `duration_ms` on `complete()`
//! - `{NAME}_FAILED` on `fail()`
//! - `{NAME}_INCOMPLETE` if dropped without either (a panic unwound through it)

use std::time::Instant;

use super::logger::{Logger, Severity};

/// A scope that logs the start and end of an operation
///
/// ```ignore
/// let scope = ObservationScope::new("ASYNC_QUERY_CYCLE", Severity::Trace);
/// // ... do work ...
/// scope.complete_with_fields(&[("queries", "3")]);
/// ```
pub struct ObservationScope {
    name: &'static str,
    severity: Severity,
    fields: Vec<(&'static str, String)>,
    timer: Timer,
    finished: bool,
}

impl ObservationScope {
    /// Open a scope; logs `{name}_BEGIN` at `severity`
    pub fn new(name: &'static str, severity: Severity) -> Self {
        Self::with_fields(name, severity, Vec::new())
    }

    /// Open a scope whose fields are repeated on every line it logs
    pub fn with_fields(
        name: &'static str,
        severity: Severity,
        fields: Vec<(&'static str, String)>,
    ) -> Self {
        let scope = Self {
            name,
            severity,
            fields,
            timer: Timer::new(),
            finished: false,
        };
        scope.emit(severity, "BEGIN", &[]);
        scope
    }

    /// Close the scope successfully
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    /// Close the scope successfully with extra fields
    pub fn complete_with_fields(mut self, extra: &[(&str, &str)]) {
        self.finished = true;
        let elapsed = self.timer.elapsed_ms();
        let mut fields: Vec<(&str, &str)> = vec![("duration_ms", elapsed.as_str())];
        fields.extend_from_slice(extra);
        self.emit(self.severity, "COMPLETE", &fields);
    }

    /// Close the scope as failed; always logged at ERROR
    pub fn fail(mut self, reason: &str) {
        self.finished = true;
        self.emit(Severity::Error, "FAILED", &[("reason", reason)]);
    }

    fn emit(&self, severity: Severity, suffix: &str, extra: &[(&str, &str)]) {
        if !Logger::enabled(severity) {
            return;
        }
        let event = format!("{}_{}", self.name, suffix);
        let mut fields: Vec<(&str, &str)> =
            self.fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        fields.extend_from_slice(extra);
        Logger::log(severity, &event, &fields);
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.finished {
            self.emit(
                Severity::Warn,
                "INCOMPLETE",
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}

/// Wall-clock duration timer
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds as a string, ready to be a log field
    pub fn elapsed_ms(&self) -> String {
        self.start.elapsed().as_millis().to_string()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
