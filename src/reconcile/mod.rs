//! The reconciliation run: count, generate, then apply.
//!
//! A run is strictly sequential. Every phase receives the same [`RunContext`],
//! which owns the progress counters, the last error and the abort flag. The
//! flag is polled before each row or operation and between phases; once it is
//! seen the run stops issuing writes and finishes as [`RunStatus::Aborted`].

mod appliers;
mod counter;
mod generators;
mod operations;
mod run_context;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::debug;

use crate::config::ProcessConfig;
use crate::db_manager::DbManager;
use crate::protocol::{RunEvent, RunObserver, RunOutcome, RunStatus};

use operations::GeneratedOperations;
use run_context::{Aborted, RunContext};

pub fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "non-string panic payload".to_string()
}

/// Owns the database connection for the duration of one run.
pub struct Reconciler {
    db: DbManager,
    config: ProcessConfig,
    abort: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(db: DbManager, config: ProcessConfig) -> Self {
        Self {
            db,
            config,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run when set; safe to share with any thread.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    /// Runs every phase on the calling thread and emits `Finished` last.
    pub fn run(&self, observer: &mut dyn RunObserver) -> RunOutcome {
        let mut ctx = RunContext::new(observer, self.abort.clone());
        let result = catch_unwind(AssertUnwindSafe(|| self.run_phases(&mut ctx)));

        let status = match result {
            Ok(Ok(())) => match ctx.last_error() {
                Some(message) => RunStatus::Errored(message.to_string()),
                None => RunStatus::Completed,
            },
            Ok(Err(Aborted)) => {
                ctx.warn("Aborted operation.");
                RunStatus::Aborted
            }
            Err(payload) => RunStatus::Errored(format!(
                "Exception: {}",
                panic_payload_to_string(payload.as_ref())
            )),
        };

        let outcome = RunOutcome {
            status,
            database_modified: ctx.database_modified(),
            operations: ctx.operation_count(),
            total_operations: ctx.total_operations(),
        };
        ctx.emit(RunEvent::Finished(outcome.clone()));
        outcome
    }

    fn run_phases(&self, ctx: &mut RunContext<'_>) -> Result<(), Aborted> {
        let config = &self.config;
        let db = &self.db;
        ctx.report_progress(0);

        let total = counter::count_operations(db, ctx, config);
        ctx.set_total_operations(total);
        ctx.checkpoint()?;
        if total == 0 {
            ctx.info("No update operations to perform.");
            ctx.report_progress(100);
            return Ok(());
        }

        ctx.info("Generating UPDATE data...");
        let playlist_images = generators::generate_playlist_image_operations(db, ctx, config);
        ctx.checkpoint()?;
        let playlist_tracklists = generators::generate_playlist_tracklist_operations(db, ctx, config);
        ctx.checkpoint()?;
        let track_numbers = generators::generate_track_number_operations(db, ctx, config);
        ctx.checkpoint()?;
        let albums = generators::generate_album_operations(db, ctx, config, &playlist_images);
        ctx.checkpoint()?;
        let generated = GeneratedOperations {
            playlist_images,
            playlist_tracklists,
            track_numbers,
            albums,
        };
        debug!("generated {} operations", generated.total());

        ctx.info("Finished generating data, updating database. Please wait...");
        appliers::apply_playlist_image_operations(db, ctx, config, &generated.playlist_images);
        ctx.checkpoint()?;
        appliers::apply_album_operations(db, ctx, config, &generated.albums);
        ctx.checkpoint()?;
        appliers::apply_track_number_operations(db, ctx, &generated.track_numbers);
        ctx.checkpoint()?;
        appliers::apply_playlist_tracklist_operations(db, ctx, &generated.playlist_tracklists);
        ctx.checkpoint()?;

        ctx.info("Finished!");
        ctx.report_progress(100);
        Ok(())
    }

    /// Moves the run onto a worker thread. Events arrive on the returned
    /// receiver in emission order, ending with `Finished`.
    pub fn spawn(self) -> std::io::Result<(ReconcileHandle, Receiver<RunEvent>)> {
        let (sender, receiver) = mpsc::channel();
        let abort = self.abort_flag();
        let thread = thread::Builder::new()
            .name("reconcile".to_string())
            .spawn(move || {
                let mut sender = sender;
                self.run(&mut sender)
            })?;
        Ok((ReconcileHandle { abort, thread }, receiver))
    }
}

pub struct ReconcileHandle {
    abort: Arc<AtomicBool>,
    thread: JoinHandle<RunOutcome>,
}

impl ReconcileHandle {
    /// Requests cooperative cancellation; the worker stops at its next poll.
    pub fn stop(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> RunOutcome {
        match self.thread.join() {
            Ok(outcome) => outcome,
            Err(payload) => RunOutcome {
                status: RunStatus::Errored(format!(
                    "Exception: {}",
                    panic_payload_to_string(payload.as_ref())
                )),
                database_modified: false,
                operations: 0,
                total_operations: 0,
            },
        }
    }
}

#[cfg(test)]
impl Reconciler {
    fn database(&self) -> &DbManager {
        &self.db
    }
}
