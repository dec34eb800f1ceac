//! Per-run progress, cancellation and error bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::error::TweakError;
use crate::protocol::{LogLevel, RunEvent, RunObserver};

/// Marker returned through `?` once the abort flag has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

/// State shared by every phase of one run. Dropped when the run ends.
pub struct RunContext<'a> {
    observer: &'a mut dyn RunObserver,
    abort: Arc<AtomicBool>,
    operation_count: u64,
    total_operations: Option<u64>,
    current_progress: Option<u8>,
    last_error: Option<String>,
    database_modified: bool,
}

impl<'a> RunContext<'a> {
    pub fn new(observer: &'a mut dyn RunObserver, abort: Arc<AtomicBool>) -> Self {
        Self {
            observer,
            abort,
            operation_count: 0,
            total_operations: None,
            current_progress: None,
            last_error: None,
            database_modified: false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<(), Aborted> {
        if self.is_aborted() {
            Err(Aborted)
        } else {
            Ok(())
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.log(LogLevel::Info, text.into());
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.log(LogLevel::Warning, text.into());
    }

    fn log(&mut self, level: LogLevel, text: String) {
        self.observer.on_event(RunEvent::Log { level, text });
    }

    /// Fixes the progress denominator. Later calls are ignored.
    pub fn set_total_operations(&mut self, total: u64) {
        if self.total_operations.is_none() {
            self.total_operations = Some(total);
        } else {
            debug!("ignoring second progress denominator {}", total);
        }
    }

    pub fn total_operations(&self) -> u64 {
        self.total_operations.unwrap_or(0)
    }

    pub fn operation_count(&self) -> u64 {
        self.operation_count
    }

    /// Counts one finished unit of work and reports progress if the percent moved.
    pub fn advance(&mut self) {
        self.operation_count += 1;
        let total = self.total_operations();
        if total == 0 {
            return;
        }
        let percent = (self.operation_count.saturating_mul(100) / total).min(100) as u8;
        self.report_progress(percent);
    }

    /// Emits `percent` unless it equals or falls behind the last reported value.
    pub fn report_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if self.current_progress.is_some_and(|current| current >= percent) {
            return;
        }
        self.current_progress = Some(percent);
        self.observer.on_event(RunEvent::Progress(percent));
    }

    /// Stores `error` as the most recent failure, replacing any earlier one.
    pub fn record_error(&mut self, error: &TweakError) {
        let message = error.to_string();
        self.warn(message.clone());
        self.last_error = Some(message);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn mark_database_modified(&mut self) {
        self.database_modified = true;
    }

    pub fn database_modified(&self) -> bool {
        self.database_modified
    }

    pub fn emit(&mut self, event: RunEvent) {
        self.observer.on_event(event);
    }
}
