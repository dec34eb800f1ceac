mod blurhash;
mod config;
mod db_manager;
mod error;
mod image_pipeline;
mod media_file_discovery;
mod name_parser;
mod protocol;
mod reconcile;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use config::{default_config_path, load_config_file, sanitize_config, Config};
use db_manager::DbManager;
use log::{debug, error, info, warn};
use protocol::{LogLevel, RunEvent, RunOutcome, RunStatus};
use reconcile::Reconciler;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Repairs that can be switched off from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Repair {
    PlaylistImages,
    PlaylistTracklist,
    TrackArtists,
    TrackNumbers,
    Albums,
}

#[derive(Parser, Debug)]
#[command(name = "mediadb-tweaker")]
#[command(about = "Fill in missing music metadata in a Jellyfin library database")]
struct CliArgs {
    /// Library database to repair
    #[arg(long)]
    db: PathBuf,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text the cover image file name must contain
    #[arg(long)]
    image_name: Option<String>,

    /// Repair to leave out; may be repeated
    #[arg(long, value_enum)]
    skip: Vec<Repair>,

    #[arg(long, short = 'v')]
    verbose: bool,
}

fn resolve_config(args: &CliArgs) -> Config {
    let mut config = match args.config.clone().or_else(default_config_path) {
        Some(path) => load_config_file(&path),
        None => Config::default(),
    };

    if let Some(image_name) = &args.image_name {
        config.repair.image_name = image_name.clone();
    }
    for repair in &args.skip {
        let toggle = match repair {
            Repair::PlaylistImages => &mut config.repair.playlist_images,
            Repair::PlaylistTracklist => &mut config.repair.playlist_tracklist,
            Repair::TrackArtists => &mut config.repair.track_artists,
            Repair::TrackNumbers => &mut config.repair.track_numbers,
            Repair::Albums => &mut config.repair.albums,
        };
        *toggle = false;
    }
    sanitize_config(config)
}

fn report_outcome(outcome: &RunOutcome) -> ExitCode {
    if outcome.database_modified && outcome.status != RunStatus::Completed {
        warn!("The database was partially updated before the run stopped.");
    }
    match &outcome.status {
        RunStatus::Completed => {
            info!(
                "Run completed ({} of {} operations).",
                outcome.operations, outcome.total_operations
            );
            ExitCode::SUCCESS
        }
        RunStatus::Aborted => {
            warn!(
                "Run aborted after {} of {} operations.",
                outcome.operations, outcome.total_operations
            );
            ExitCode::from(2)
        }
        RunStatus::Errored(message) => {
            error!("Run failed: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config = resolve_config(&args);
    debug!("Effective config: {:?}", config.repair);
    if !config.repair.any_enabled() {
        warn!("Every repair is disabled, nothing will be written.");
    }

    let db = match DbManager::open(&args.db) {
        Ok(db) => db,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    info!("Opened {}", args.db.display());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            info!("Received Ctrl+C, stopping after the current row...");
            flag.store(true, Ordering::SeqCst);
        }) {
            warn!("Unable to install the Ctrl+C handler: {}", err);
        }
    }

    let (handle, receiver) = match Reconciler::new(db, config.repair).spawn() {
        Ok(spawned) => spawned,
        Err(err) => {
            error!("Unable to start the worker thread: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let mut progress = 0u8;
    let mut render = |event: RunEvent| match event {
        RunEvent::Progress(value) => {
            progress = value;
            debug!("progress {}%", value);
        }
        RunEvent::Log {
            level: LogLevel::Info,
            text,
        } => info!("[{:>3}%] {}", progress, text),
        RunEvent::Log {
            level: LogLevel::Warning,
            text,
        } => warn!("[{:>3}%] {}", progress, text),
        RunEvent::Finished(outcome) => debug!("worker finished: {:?}", outcome.status),
    };

    let mut stop_requested = false;
    loop {
        if !stop_requested && interrupted.load(Ordering::SeqCst) {
            handle.stop();
            stop_requested = true;
        }
        match receiver.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => render(event),
            Err(RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    receiver.try_iter().for_each(&mut render);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    report_outcome(&handle.join())
}
