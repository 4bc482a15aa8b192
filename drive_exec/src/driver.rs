//! # Driver
//!
//! Connects the control core to the simulator. A [`Driver`] reacts to simulator events, and
//! [`run`] is the single consumer loop which accepts the simulator connection and delivers events
//! to the driver strictly in the order they arrive.
//!
//! Two drivers are provided:
//! - [`FixedDriver`] steers with fixed gains indefinitely, reporting the mean error of every
//!   window of ticks.
//! - [`TuningDriver`] runs the twiddle tuner, resetting the simulator between episodes.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

// Internal
use crate::{
    episode::{EpisodeError, EpisodeRunner, EpisodeStatus},
    pid::PidGains,
    sim_link::SimLink,
    twiddle::{
        Phase, StopReason, TuningOutcome, Twiddle, TwiddleAction, TwiddleError, TwiddleEvent,
    },
};
use comms_if::{
    net::{NetError, SimServer, SimSocket},
    sim::{SimEvent, Telemetry},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Shared flag used to stop [`run`] from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunReport {
    pub reason: StopReason,

    /// Result of tuning, if the driver was tuning.
    pub tuning: Option<TuningOutcome>,
}

/// Drives the simulator with fixed gains.
pub struct FixedDriver {
    runner: EpisodeRunner,
}

/// Tunes the steering gains with twiddle.
pub struct TuningDriver {
    runner: EpisodeRunner,
    twiddle: Twiddle,
    started: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Operating mode of the executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Steer with the configured gains
    Fixed,

    /// Tune the steering gains
    Tune,
}

/// Driver state after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Running,
    Finished(StopReason),
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Episode error: {0}")]
    EpisodeError(#[from] EpisodeError),

    #[error("Tuning error: {0}")]
    TwiddleError(#[from] TwiddleError),

    #[error("Unknown drive mode \"{0}\", expected \"fixed\" or \"tune\"")]
    UnknownMode(String),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Reacts to simulator events.
pub trait Driver {
    /// Called each time the simulator connects.
    fn on_connect(&mut self, link: &mut dyn SimLink) -> Result<(), DriverError>;

    /// Called for every telemetry tick.
    fn on_telemetry(
        &mut self,
        telemetry: &Telemetry,
        link: &mut dyn SimLink,
    ) -> Result<DriverStatus, DriverError>;

    /// Called when the simulator is in manual mode. The controller is not updated.
    fn on_manual(&mut self, link: &mut dyn SimLink) {
        link.send_manual_ack();
    }

    /// Stop the driver and report the result.
    fn stop(&mut self, reason: StopReason) -> RunReport;
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Run the driver against the simulator until it finishes, is cancelled, or runs out of time.
///
/// Only one simulator is served at a time. When it disconnects the loop waits for it to connect
/// again.
pub fn run<D: Driver>(
    driver: &mut D,
    server: &SimServer,
    cancel: &CancelToken,
    max_run_time: Option<Duration>,
) -> Result<RunReport, DriverError> {
    let start = Instant::now();
    let mut socket: Option<SimSocket> = None;

    info!("Waiting for the simulator to connect");

    loop {
        if cancel.is_cancelled() {
            info!("Run cancelled");
            return Ok(driver.stop(StopReason::Cancelled));
        }

        if let Some(max) = max_run_time {
            if start.elapsed() >= max {
                info!("Maximum run time of {:.1} s reached", max.as_secs_f64());
                return Ok(driver.stop(StopReason::TimeBudgetExhausted));
            }
        }

        // ---- CONNECTION ----

        if socket.is_none() {
            match server.accept() {
                Ok(Some(mut s)) => {
                    info!("Simulator connected from {}", s.peer_addr());
                    driver.on_connect(&mut s)?;
                    socket = Some(s);
                }
                Ok(None) => (),
                Err(e) => warn!("Could not accept the simulator: {}", e),
            }
            continue;
        }

        let sock = match socket.as_mut() {
            Some(s) => s,
            None => continue,
        };

        // ---- EVENT HANDLING ----

        let mut disconnected = false;

        match sock.recv_event() {
            Ok(Some(SimEvent::Telemetry(t))) => {
                if let DriverStatus::Finished(reason) = driver.on_telemetry(&t, sock)? {
                    return Ok(driver.stop(reason));
                }
            }
            Ok(Some(SimEvent::Manual)) => driver.on_manual(sock),
            Ok(Some(SimEvent::Ignored)) | Ok(None) => (),
            Err(NetError::Disconnected) => {
                info!("Simulator disconnected, waiting for it to reconnect");
                disconnected = true;
            }
            Err(e) => {
                warn!("Dropping the simulator connection: {}", e);
                disconnected = true;
            }
        }

        if disconnected {
            socket = None;
        }
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run stops. Takes effect within one receive timeout.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl FromStr for DriveMode {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(DriveMode::Fixed),
            "tune" => Ok(DriveMode::Tune),
            _ => Err(DriverError::UnknownMode(s.to_string())),
        }
    }
}

impl FixedDriver {
    pub fn new(runner: EpisodeRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &EpisodeRunner {
        &self.runner
    }
}

impl Driver for FixedDriver {
    fn on_connect(&mut self, _link: &mut dyn SimLink) -> Result<(), DriverError> {
        info!(
            "Driving with fixed gains {}",
            self.runner.controller().gains()
        );
        Ok(())
    }

    fn on_telemetry(
        &mut self,
        telemetry: &Telemetry,
        link: &mut dyn SimLink,
    ) -> Result<DriverStatus, DriverError> {
        let (cmd, status) = self.runner.on_tick(telemetry)?;
        link.send_command(&cmd);

        if let EpisodeStatus::Complete { mean_error } = status {
            info!(
                "Window {} mean error: {}",
                self.runner.episode_index(),
                mean_error
            );
            self.runner.roll_window();
        }

        Ok(DriverStatus::Running)
    }

    fn stop(&mut self, reason: StopReason) -> RunReport {
        RunReport {
            reason,
            tuning: None,
        }
    }
}

impl TuningDriver {
    pub fn new(runner: EpisodeRunner, twiddle: Twiddle) -> Self {
        Self {
            runner,
            twiddle,
            started: false,
        }
    }

    pub fn twiddle(&self) -> &Twiddle {
        &self.twiddle
    }

    pub fn runner(&self) -> &EpisodeRunner {
        &self.runner
    }

    /// Act on the tuner's request. Returns `Some(reason)` if tuning has finished.
    fn apply(
        &mut self,
        action: TwiddleAction,
        link: &mut dyn SimLink,
        restart: bool,
    ) -> Option<StopReason> {
        match action {
            TwiddleAction::RunEpisode(gains) => {
                self.start_episode(gains, link, restart);
                None
            }
            TwiddleAction::Finished(outcome) => Some(outcome.reason),
        }
    }

    fn start_episode(&mut self, gains: PidGains, link: &mut dyn SimLink, restart: bool) {
        self.runner.reinit_controller(gains);

        match restart {
            true => self.runner.restart_episode(link),
            false => self.runner.begin_episode(link),
        }
    }
}

impl Driver for TuningDriver {
    /// Start tuning on the first connection. On later connections the episode in progress is
    /// restarted from scratch.
    fn on_connect(&mut self, link: &mut dyn SimLink) -> Result<(), DriverError> {
        if self.twiddle.is_terminated() {
            return Ok(());
        }

        if !self.started {
            self.started = true;
            let action = self.twiddle.step_once(TwiddleEvent::Start)?;
            self.apply(action, link, true);
        }
        else {
            debug!(
                "Restarting episode {} after reconnection",
                self.runner.episode_index()
            );
            let gains = self.twiddle.gains();
            self.start_episode(gains, link, true);
        }

        Ok(())
    }

    fn on_telemetry(
        &mut self,
        telemetry: &Telemetry,
        link: &mut dyn SimLink,
    ) -> Result<DriverStatus, DriverError> {
        if let Phase::Terminated(reason) = self.twiddle.state().phase {
            return Ok(DriverStatus::Finished(reason));
        }

        let (cmd, status) = self.runner.on_tick(telemetry)?;
        link.send_command(&cmd);

        if let EpisodeStatus::Complete { mean_error } = status {
            info!(
                "Episode {} with gains {} complete, mean error: {}",
                self.runner.episode_index(),
                self.runner.controller().gains(),
                mean_error
            );

            let action = self
                .twiddle
                .step_once(TwiddleEvent::EpisodeComplete(mean_error))?;

            if let Some(reason) = self.apply(action, link, false) {
                return Ok(DriverStatus::Finished(reason));
            }
        }

        Ok(DriverStatus::Running)
    }

    fn stop(&mut self, reason: StopReason) -> RunReport {
        let outcome = self.twiddle.stop(reason);

        info!(
            "Tuning finished ({:?}) after {} episodes: best gains {}, mean error {}",
            outcome.reason, outcome.episodes, outcome.best_gains, outcome.best_error
        );

        RunReport {
            reason: outcome.reason,
            tuning: Some(outcome),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        episode::{EpisodeParams, RunnerInit},
        sim_link::{LinkMessage, RecordingLink},
        throttle::{ThrottleMode, ThrottleParams},
        twiddle::TuningParams,
    };

    fn runner(gains: PidGains, total_ticks: u64, horizon: u64) -> EpisodeRunner {
        EpisodeRunner::new(
            RunnerInit {
                episode: EpisodeParams {
                    total_ticks,
                    horizon,
                    ..Default::default()
                },
                steer_gains: gains,
                throttle: ThrottleParams {
                    mode: ThrottleMode::Constant,
                    ..Default::default()
                },
                ..Default::default()
            },
            None,
        )
        .unwrap()
    }

    fn tel(cte: f64) -> Telemetry {
        Telemetry {
            cte,
            speed: 20.0,
            heading_angle: 0.0,
        }
    }

    #[test]
    fn test_drive_mode_from_str() {
        assert_eq!("fixed".parse::<DriveMode>().unwrap(), DriveMode::Fixed);
        assert_eq!("Tune".parse::<DriveMode>().unwrap(), DriveMode::Tune);
        assert!("drift".parse::<DriveMode>().is_err());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!token.is_cancelled());
        other.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_fixed_driver_rolls_windows() {
        let mut link = RecordingLink::new();
        let mut d = FixedDriver::new(runner(PidGains::new(0.2, 0.0, 3.31), 4, 2));

        d.on_connect(&mut link).unwrap();
        assert!(link.sent.is_empty());

        // Two full windows and a bit, never fails with AlreadyComplete
        for _ in 0..10 {
            assert_eq!(
                d.on_telemetry(&tel(0.5), &mut link).unwrap(),
                DriverStatus::Running
            );
        }

        assert_eq!(link.commands().len(), 10);
        assert_eq!(link.num_resets(), 0);
        assert_eq!(d.runner().episode_index(), 3);
        assert_eq!(d.runner().metrics().tick_count, 2);

        let report = d.stop(StopReason::Cancelled);
        assert_eq!(report.reason, StopReason::Cancelled);
        assert!(report.tuning.is_none());
    }

    #[test]
    fn test_manual_is_acknowledged() {
        let mut link = RecordingLink::new();
        let mut d = FixedDriver::new(runner(PidGains::new(1.0, 0.0, 0.0), 4, 2));

        d.on_manual(&mut link);

        assert_eq!(link.sent, vec![LinkMessage::ManualAck]);
        assert_eq!(d.runner().metrics().tick_count, 0);
    }

    #[test]
    fn test_tuning_driver_episodes() {
        let mut link = RecordingLink::new();
        let twiddle = Twiddle::new(
            PidGains::new(1.0, 0.0, 0.0),
            TuningParams {
                max_episodes: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
        let mut d = TuningDriver::new(runner(PidGains::default(), 3, 1), twiddle);

        // Baseline starts on connection
        d.on_connect(&mut link).unwrap();
        assert_eq!(link.sent, vec![LinkMessage::EpisodeReset]);
        assert_eq!(d.runner().controller().gains(), PidGains::new(1.0, 0.0, 0.0));

        // Baseline episode
        for _ in 0..3 {
            assert_eq!(
                d.on_telemetry(&tel(1.0), &mut link).unwrap(),
                DriverStatus::Running
            );
        }

        // Up step on k_p started with a fresh controller
        assert_eq!(link.last(), Some(LinkMessage::EpisodeReset));
        assert_eq!(link.num_resets(), 2);
        assert_eq!(d.runner().controller().gains(), PidGains::new(2.0, 0.0, 0.0));
        assert_eq!(d.runner().controller().cumulative_error(), 0.0);
        assert_eq!(d.twiddle().state().best_error, 1.0);

        // Worse, so the down step runs
        for _ in 0..3 {
            d.on_telemetry(&tel(2.0), &mut link).unwrap();
        }
        assert_eq!(d.runner().controller().gains(), PidGains::new(0.0, 0.0, 0.0));
        assert_eq!(link.num_resets(), 3);

        // Better, the budget is then spent
        let mut status = DriverStatus::Running;
        for _ in 0..3 {
            status = d.on_telemetry(&tel(0.5), &mut link).unwrap();
        }
        assert_eq!(status, DriverStatus::Finished(StopReason::EpisodeBudgetExhausted));

        // Telemetry after the end does nothing
        let sent = link.sent.len();
        assert_eq!(
            d.on_telemetry(&tel(0.5), &mut link).unwrap(),
            DriverStatus::Finished(StopReason::EpisodeBudgetExhausted)
        );
        assert_eq!(link.sent.len(), sent);

        let report = d.stop(StopReason::Cancelled);
        assert_eq!(report.reason, StopReason::EpisodeBudgetExhausted);
        let outcome = report.tuning.unwrap();
        assert_eq!(outcome.best_gains, PidGains::new(0.0, 0.0, 0.0));
        assert_eq!(outcome.best_error, 0.5);
        assert_eq!(outcome.episodes, 3);
    }

    #[test]
    fn test_fixed_driver_survives_non_finite_telemetry() {
        // A "nan" cte never reaches the driver as telemetry
        let frame = r#"42["telemetry",{"cte":"nan","speed":"20","steering_angle":"0"}]"#;
        assert!(comms_if::sim::decode_frame(frame).is_err());

        let pid_runner = || {
            EpisodeRunner::new(
                RunnerInit {
                    episode: EpisodeParams {
                        total_ticks: 100,
                        horizon: 10,
                        ..Default::default()
                    },
                    steer_gains: PidGains::new(0.2, 0.01, 3.31),
                    throttle: ThrottleParams {
                        mode: ThrottleMode::Pid,
                        ..Default::default()
                    },
                    ..Default::default()
                },
                None,
            )
            .unwrap()
        };

        // Should one arrive anyway, the driver recovers rather than steering with NaN forever
        let mut link = RecordingLink::new();
        let mut d = FixedDriver::new(pid_runner());
        d.on_telemetry(&tel(f64::NAN), &mut link).unwrap();
        for _ in 0..20 {
            d.on_telemetry(&tel(1.0), &mut link).unwrap();
        }

        let mut fresh_link = RecordingLink::new();
        let mut fresh = FixedDriver::new(pid_runner());
        for _ in 0..20 {
            fresh.on_telemetry(&tel(1.0), &mut fresh_link).unwrap();
        }

        let cmds = link.commands();
        assert_eq!(cmds.len(), 21);
        assert_eq!(cmds[0].steering, 0.0);
        assert!(cmds.iter().all(|c| c.steering.is_finite() && c.throttle.is_finite()));

        let steering: Vec<f64> = cmds[1..].iter().map(|c| c.steering).collect();
        let fresh_steering: Vec<f64> = fresh_link.commands().iter().map(|c| c.steering).collect();
        assert_eq!(steering, fresh_steering);
    }

    #[test]
    fn test_tuning_driver_reconnect_restarts_episode() {
        let mut link = RecordingLink::new();
        let twiddle = Twiddle::new(PidGains::new(1.0, 0.0, 0.0), TuningParams::default()).unwrap();
        let mut d = TuningDriver::new(runner(PidGains::default(), 5, 1), twiddle);

        d.on_connect(&mut link).unwrap();
        d.on_telemetry(&tel(1.0), &mut link).unwrap();
        d.on_telemetry(&tel(1.0), &mut link).unwrap();

        d.on_connect(&mut link).unwrap();

        assert_eq!(link.num_resets(), 2);
        assert_eq!(d.runner().metrics().tick_count, 0);
        assert_eq!(d.runner().episode_index(), 1);
        assert_eq!(d.runner().controller().cumulative_error(), 0.0);
        assert_eq!(d.twiddle().state().episodes, 1);
    }
}
