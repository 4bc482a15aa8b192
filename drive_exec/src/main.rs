//! Main drive executable entry point.
//!
//! # Architecture
//!
//! The executable serves a single simulator connection and runs in one of two modes:
//!
//!     - Fixed: steer with the configured gains until stopped
//!     - Tune: run the twiddle tuner, one simulator episode per gain evaluation, and report the
//!       best gains found
//!
//! All processing happens on the main thread, in the order the simulator's frames arrive.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::info;
use std::path::PathBuf;
use structopt::StructOpt;

// Internal
use comms_if::net::SimServer;
use drive_lib::{
    driver::{self, CancelToken, DriveMode, FixedDriver, TuningDriver},
    episode::EpisodeRunner,
    params::DriveExecParams,
    twiddle::Twiddle,
};
use util::{
    host,
    logger::{logger_init, LevelFilter, LogLevels},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Parameter file loaded when none is given on the command line.
const DEFAULT_PARAMS_FILE: &str = "drive_exec.toml";

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "drive_exec", about = "PID steering and gain tuning for the driving simulator")]
struct Opts {
    /// Path to the parameter file. If not given `params/drive_exec.toml` under the software root
    /// is used.
    #[structopt(short, long, parse(from_os_str))]
    params: Option<PathBuf>,

    /// Operating mode, `fixed` or `tune`. Overrides the mode in the parameter file.
    #[structopt(short, long)]
    mode: Option<DriveMode>,

    /// Terminal log level: `info`, `debug` or `trace`. The session log file always records at
    /// least `debug`.
    #[structopt(short, long, default_value = "info")]
    log_level: LevelFilter,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("drive_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LogLevels::new(opts.log_level), &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("PID Drive Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: DriveExecParams = match opts.params {
        Some(ref path) => util::params::load_path(path),
        None => util::params::load(DEFAULT_PARAMS_FILE),
    }
    .wrap_err("Could not load the drive parameters")?;

    if let Some(mode) = opts.mode {
        params.mode = mode;
    }

    params.validate().wrap_err("Invalid drive parameters")?;

    info!("Exec parameters loaded, mode: {:?}", params.mode);

    // ---- INITIALISE NETWORK ----

    let server = SimServer::bind(&params.net).wrap_err("Failed to initialise the SimServer")?;
    info!(
        "SimServer listening on {}",
        server.local_addr().wrap_err("Failed to get the SimServer address")?
    );

    // ---- RUN ----

    let cancel = CancelToken::new();
    let max_run_time = params.max_run_time();

    let report = match params.mode {
        DriveMode::Fixed => {
            let runner = EpisodeRunner::new(params.runner_init(params.steer), Some(&session))
                .wrap_err("Failed to initialise the EpisodeRunner")?;

            driver::run(&mut FixedDriver::new(runner), &server, &cancel, max_run_time)
        }
        DriveMode::Tune => {
            let runner = EpisodeRunner::new(
                params.runner_init(params.tuning.initial_gains),
                Some(&session),
            )
            .wrap_err("Failed to initialise the EpisodeRunner")?;
            let twiddle = Twiddle::new(params.tuning.initial_gains, params.tuning.params.clone())
                .wrap_err("Failed to initialise the tuner")?;

            driver::run(
                &mut TuningDriver::new(runner, twiddle),
                &server,
                &cancel,
                max_run_time,
            )
        }
    }
    .wrap_err("Error while driving")?;

    // ---- SHUTDOWN ----

    info!("Run stopped: {:?}", report.reason);

    if let Some(outcome) = report.tuning {
        info!(
            "Best gains: {} (mean error {}, {} episodes)",
            outcome.best_gains, outcome.best_error, outcome.episodes
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).wrap_err("Could not serialise the outcome")?
        );
    }

    info!("End of execution");

    Ok(())
}
