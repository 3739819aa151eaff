//! Event logging for the control-flow deobfuscation pipeline.
//!
//! Every transformation the engine applies is recorded as an [`Event`], together with
//! diagnostics such as the warning emitted when a method has to be left untouched. The log is
//! append-only and can be shared between threads, so a batch over a whole module records into
//! a single log from all workers.
//!
//! # Architecture
//!
//! - [`Event`] - A single recorded event
//! - [`EventLog`] - Collection of events with query and summary capabilities
//! - [`EventBuilder`] - Fluent API for creating events
//! - [`DerivedStats`] - Statistics computed from a log
//!
//! # Example
//!
//! ```rust
//! use dotscope_cflow::{compiler::{EventKind, EventLog}, metadata::token::Token};
//!
//! let log = EventLog::new();
//! log.record(EventKind::BranchSimplified)
//!     .at(Token::new(0x0600_0001), 3)
//!     .message("brtrue -> br");
//! log.info("pass ConstantFolder finished");
//!
//! assert_eq!(log.count_kind(EventKind::BranchSimplified), 1);
//! assert_eq!(log.summary(), "1 branch simplified");
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use crate::metadata::token::Token;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A `call; brtrue/brfalse; pop` site was rewritten by the equation simplifier.
    EquationSimplified,
    /// A conditional branch or switch was decided statically.
    BranchSimplified,
    /// A literal computation was folded into a single load.
    ConstantFolded,
    /// A method call was inlined.
    MethodInlined,
    /// A basic block was removed.
    BlockRemoved,
    /// Two blocks were merged into one.
    BlocksMerged,
    /// An exception handler clause was dropped with its blocks.
    HandlerRemoved,
    /// A method body was rebuilt and written back.
    CodeRegenerated,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::EquationSimplified => "equation simplified",
            Self::BranchSimplified => "branch simplified",
            Self::ConstantFolded => "constant folded",
            Self::MethodInlined => "method inlined",
            Self::BlockRemoved => "block removed",
            Self::BlocksMerged => "blocks merged",
            Self::HandlerRemoved => "handler removed",
            Self::CodeRegenerated => "code regenerated",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns true if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        !self.is_diagnostic()
    }

    /// Returns true if this is a diagnostic event.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Info | Self::Warning | Self::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred (if applicable).
    pub method: Option<Token>,
    /// Location within the method (instruction index or block id).
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Associated pass name (if from a pass).
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.method {
            Some(method) => write!(f, "[{}] {}: {}", self.kind, method, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder is
/// dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<Token>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and location where the event occurred.
    pub fn at(mut self, method: Token, location: usize) -> Self {
        self.method = Some(method);
        self.location = Some(location);
        self
    }

    /// Sets only the method (for method-level events without specific location).
    pub fn method(mut self, method: Token) -> Self {
        self.method = Some(method);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a specific pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Collection of events from deobfuscation.
///
/// Statistics are derived from the events rather than tracked separately. Events can be
/// appended concurrently through shared references.
#[derive(Debug)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let new_log = Self::new();
        new_log.merge(self);
        new_log
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning message.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error message.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends clones of all events of another log.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events for a specific method.
    pub fn filter_method(&self, method: Token) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.method == Some(method))
    }

    /// Returns an iterator over warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Returns the number of unique methods with transformation events.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.iter()
            .filter(|e| e.kind.is_transformation())
            .filter_map(|e| e.method)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Generates a human-readable summary of the transformations.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl Extend<Event> for EventLog {
    fn extend<T: IntoIterator<Item = Event>>(&mut self, iter: T) {
        for event in iter {
            self.events.push(event);
        }
    }
}

/// Statistics derived from an [`EventLog`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedStats {
    /// Number of methods that had any transformations.
    pub methods_transformed: usize,
    /// Number of equation sites rewritten.
    pub equations_simplified: usize,
    /// Number of branches simplified.
    pub branches_simplified: usize,
    /// Number of constants folded.
    pub constants_folded: usize,
    /// Number of calls inlined.
    pub methods_inlined: usize,
    /// Number of blocks removed.
    pub blocks_removed: usize,
    /// Number of block merges.
    pub blocks_merged: usize,
    /// Number of exception handlers dropped.
    pub handlers_removed: usize,
    /// Number of methods with code regenerated.
    pub methods_regenerated: usize,
    /// Number of warnings.
    pub warnings: usize,
    /// Number of errors.
    pub errors: usize,
    /// Processing time.
    pub total_time: Duration,
}

impl DerivedStats {
    /// Computes statistics from an event log.
    #[must_use]
    pub fn from_log(log: &EventLog) -> Self {
        let counts = log.count_by_kind();
        let get = |kind: EventKind| counts.get(&kind).copied().unwrap_or(0);

        Self {
            methods_transformed: log.methods_affected(),
            equations_simplified: get(EventKind::EquationSimplified),
            branches_simplified: get(EventKind::BranchSimplified),
            constants_folded: get(EventKind::ConstantFolded),
            methods_inlined: get(EventKind::MethodInlined),
            blocks_removed: get(EventKind::BlockRemoved),
            blocks_merged: get(EventKind::BlocksMerged),
            handlers_removed: get(EventKind::HandlerRemoved),
            methods_regenerated: get(EventKind::CodeRegenerated),
            warnings: get(EventKind::Warning),
            errors: get(EventKind::Error),
            total_time: Duration::ZERO,
        }
    }

    /// Sets the total processing time.
    #[must_use]
    pub fn with_time(mut self, time: Duration) -> Self {
        self.total_time = time;
        self
    }

    /// Generates a human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();

        if self.methods_transformed > 0 {
            parts.push(format!("{} methods", self.methods_transformed));
        }
        if self.equations_simplified > 0 {
            parts.push(format!("{} equations", self.equations_simplified));
        }
        if self.branches_simplified > 0 {
            parts.push(format!("{} branches simplified", self.branches_simplified));
        }
        if self.constants_folded > 0 {
            parts.push(format!("{} constants folded", self.constants_folded));
        }
        if self.methods_inlined > 0 {
            parts.push(format!("{} inlined", self.methods_inlined));
        }
        if self.blocks_removed > 0 {
            parts.push(format!("{} blocks removed", self.blocks_removed));
        }
        if self.blocks_merged > 0 {
            parts.push(format!("{} blocks merged", self.blocks_merged));
        }
        if self.handlers_removed > 0 {
            parts.push(format!("{} handlers removed", self.handlers_removed));
        }
        if self.methods_regenerated > 0 {
            parts.push(format!("{} regenerated", self.methods_regenerated));
        }
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }

        let stats = if parts.is_empty() {
            "no transformations".to_string()
        } else {
            parts.join(", ")
        };

        if self.total_time.as_millis() > 0 {
            format!("{} in {:?}", stats, self.total_time)
        } else {
            stats
        }
    }
}

impl fmt::Display for DerivedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        assert_eq!(log.summary(), "no events");
        assert!(!log.has(EventKind::BlockRemoved));
    }

    #[test]
    fn test_record_event() {
        let log = EventLog::new();
        let method = Token::new(0x0600_0001);

        log.record(EventKind::EquationSimplified)
            .at(method, 4)
            .pass("equations")
            .message("brtrue -> nop");

        assert_eq!(log.len(), 1);
        let event = log.iter().next().unwrap();
        assert_eq!(event.method, Some(method));
        assert_eq!(event.location, Some(4));
        assert_eq!(event.pass.as_deref(), Some("equations"));
        assert_eq!(event.message, "brtrue -> nop");
    }

    #[test]
    fn test_default_message_and_diagnostics() {
        let log = EventLog::new();
        log.record(EventKind::BlockRemoved).method(Token::new(0x0600_0002));
        log.warn("skipped");
        log.warn("skipped again");

        assert_eq!(log.iter().next().unwrap().message, "block removed");
        assert_eq!(log.warnings().count(), 2);
        assert_eq!(log.summary(), "1 block removed");
    }

    #[test]
    fn test_derived_stats() {
        let log = EventLog::new();
        let a = Token::new(0x0600_0001);
        let b = Token::new(0x0600_0002);
        log.record(EventKind::MethodInlined).method(a);
        log.record(EventKind::BlockRemoved).method(a);
        log.record(EventKind::BlockRemoved).method(b);
        log.record(EventKind::Warning).method(b);

        let stats = DerivedStats::from_log(&log);
        assert_eq!(stats.methods_transformed, 2);
        assert_eq!(stats.blocks_removed, 2);
        assert_eq!(stats.methods_inlined, 1);
        assert_eq!(stats.warnings, 1);
        assert_eq!(stats.summary(), "2 methods, 1 inlined, 2 blocks removed, 1 warnings");
    }

    #[test]
    fn test_clone_and_merge() {
        let log = EventLog::new();
        log.record(EventKind::ConstantFolded);
        let copy = log.clone();
        copy.merge(&log);
        assert_eq!(copy.count_kind(EventKind::ConstantFolded), 2);
        assert_eq!(log.len(), 1);
    }
}
