//! Event protocol between the reconciliation worker and its caller.
//!
//! The worker emits events in the order the work happens; the caller drains
//! them from a channel (or any other [`RunObserver`]) and renders them.

use std::sync::mpsc::Sender;

/// Severity of a run log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Aborted,
    Errored(String),
}

/// What the caller gets back when the worker stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// True once at least one UPDATE has executed successfully.
    pub database_modified: bool,
    /// Progress units completed out of `total_operations`.
    pub operations: u64,
    pub total_operations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Overall progress in percent, emitted only when the value changes.
    Progress(u8),
    Log { level: LogLevel, text: String },
    Finished(RunOutcome),
}

/// Receives run events synchronously, in emission order.
pub trait RunObserver {
    fn on_event(&mut self, event: RunEvent);
}

// A caller that stopped listening must not break the run.
impl RunObserver for Sender<RunEvent> {
    fn on_event(&mut self, event: RunEvent) {
        let _ = self.send(event);
    }
}

impl RunObserver for Vec<RunEvent> {
    fn on_event(&mut self, event: RunEvent) {
        self.push(event);
    }
}
