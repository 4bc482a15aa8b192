//! # Episode runner
//!
//! An episode is a fixed number of telemetry ticks driven from a simulator reset. The runner
//! owns the steering controller and the throttle policy, produces one [`ControlCommand`] per tick
//! and accumulates the tracking error once the warm-up horizon has passed. When the last tick of
//! the episode arrives the mean error is available and a new episode must be started before any
//! more ticks are accepted.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, warn};
use serde::{Deserialize, Serialize};

// Internal
use crate::{
    pid::{PidController, PidGains},
    sim_link::{ControlCommand, SimLink},
    throttle::{ThrottleParams, ThrottlePolicy},
    trace::{Trace, TraceParams, TraceRecord},
};
use comms_if::sim::Telemetry;
use util::{
    archive::{ArchiveError, Archived},
    maths::clamp,
    module::CyclicModule,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Steering demands are limited to this magnitude before being sent.
pub const STEERING_LIMIT: f64 = 1.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters of an episode
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default)]
pub struct EpisodeParams {
    /// Length of the episode in ticks
    pub total_ticks: u64,

    /// Number of ticks at the start of the episode which are not scored
    pub horizon: u64,

    /// How each tick's error is scored
    pub metric: ErrorMetric,
}

/// Error accumulation for the episode in progress.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EpisodeMetrics {
    pub tick_count: u64,
    pub accumulated_error: f64,
    pub horizon: u64,
    pub total_ticks: u64,
}

/// Initialisation data for the runner.
#[derive(Debug, Clone, Default)]
pub struct RunnerInit {
    pub episode: EpisodeParams,
    pub steer_gains: PidGains,
    pub throttle: ThrottleParams,
    pub trace: TraceParams,
}

/// Episode runner state
pub struct EpisodeRunner {
    params: EpisodeParams,

    steer_ctrl: PidController,
    throttle: ThrottlePolicy,

    metrics: EpisodeMetrics,

    /// Index of the current episode, starting at 1
    episode: u64,

    trace: Option<Trace>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The quantity accumulated each scored tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMetric {
    /// `|cte|`
    MeanAbsolute,

    /// `cte^2`
    MeanSquared,
}

/// Status of the episode after a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EpisodeStatus {
    Running,

    /// This tick was the last of the episode.
    Complete { mean_error: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    #[error(
        "Invalid episode length: expected 0 < horizon < total_ticks, found horizon = {horizon}, \
        total_ticks = {total_ticks}"
    )]
    InvalidLength { total_ticks: u64, horizon: u64 },

    #[error("The episode is already complete after {0} ticks, a new episode must be started")]
    AlreadyComplete(u64),

    #[error("Could not initialise the trace: {0}")]
    TraceInitError(ArchiveError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for EpisodeParams {
    fn default() -> Self {
        Self {
            total_ticks: 2000,
            horizon: 1000,
            metric: ErrorMetric::MeanAbsolute,
        }
    }
}

impl EpisodeParams {
    /// Check the episode is long enough to score at least one tick.
    pub fn validate(&self) -> Result<(), EpisodeError> {
        if self.horizon == 0 || self.total_ticks <= self.horizon {
            return Err(EpisodeError::InvalidLength {
                total_ticks: self.total_ticks,
                horizon: self.horizon,
            });
        }

        Ok(())
    }
}

impl ErrorMetric {
    /// Score a single cross track error sample.
    pub fn sample(&self, cte: f64) -> f64 {
        match self {
            ErrorMetric::MeanAbsolute => cte.abs(),
            ErrorMetric::MeanSquared => cte * cte,
        }
    }
}

impl EpisodeMetrics {
    pub fn new(params: &EpisodeParams) -> Self {
        Self {
            tick_count: 0,
            accumulated_error: 0.0,
            horizon: params.horizon,
            total_ticks: params.total_ticks,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tick_count >= self.total_ticks
    }

    /// Mean error over the scored ticks, only available once the episode is complete.
    pub fn mean_error(&self) -> Option<f64> {
        match self.is_complete() {
            true => Some(self.accumulated_error / (self.total_ticks - self.horizon) as f64),
            false => None,
        }
    }
}

impl Default for EpisodeRunner {
    fn default() -> Self {
        let params = EpisodeParams::default();

        Self {
            params,
            steer_ctrl: PidController::default(),
            throttle: ThrottlePolicy::new(ThrottleParams::default()),
            metrics: EpisodeMetrics::new(&params),
            episode: 1,
            trace: None,
        }
    }
}

impl EpisodeRunner {
    /// Create and initialise a new runner.
    pub fn new(init: RunnerInit, session: Option<&Session>) -> Result<Self, EpisodeError> {
        let mut runner = Self::default();
        runner.init(init, session)?;
        Ok(runner)
    }

    /// Start a new episode.
    ///
    /// Metrics and the throttle policy are reset and the simulator is asked to restart. The
    /// steering controller is left untouched, use [`EpisodeRunner::reinit_controller`] to change
    /// its gains.
    pub fn begin_episode(&mut self, link: &mut dyn SimLink) {
        self.episode += 1;
        self.restart_episode(link);
    }

    /// Restart the current episode from its first tick, keeping the episode index.
    pub fn restart_episode(&mut self, link: &mut dyn SimLink) {
        self.metrics = EpisodeMetrics::new(&self.params);
        self.throttle.reset();

        link.send_episode_reset();

        debug!("Episode {} started", self.episode);
    }

    /// Start a new scoring window without restarting the simulator.
    pub fn roll_window(&mut self) {
        self.metrics = EpisodeMetrics::new(&self.params);
        self.episode += 1;
    }

    /// Re-initialise the steering controller with new gains.
    pub fn reinit_controller(&mut self, gains: PidGains) {
        self.steer_ctrl.init(gains);
    }

    /// Process one telemetry tick.
    pub fn on_tick(
        &mut self,
        telemetry: &Telemetry,
    ) -> Result<(ControlCommand, EpisodeStatus), EpisodeError> {
        if self.metrics.is_complete() {
            return Err(EpisodeError::AlreadyComplete(self.metrics.tick_count));
        }

        let cte = telemetry.cte;

        // Steering
        let raw_steering = self.steer_ctrl.get(cte);
        let steering = if !raw_steering.is_finite() {
            warn!(
                "Steering output is {}, holding the wheel straight and resetting the controller",
                raw_steering
            );
            self.steer_ctrl.init(self.steer_ctrl.gains());
            0.0
        }
        else {
            clamp(raw_steering, -STEERING_LIMIT, STEERING_LIMIT)
        };

        let cmd = ControlCommand {
            steering,
            throttle: self.throttle.get(cte, telemetry.speed),
        };

        // Scoring
        self.metrics.tick_count += 1;
        if self.metrics.tick_count > self.metrics.horizon {
            self.metrics.accumulated_error += self.params.metric.sample(cte);
        }

        debug!(
            "Episode {} tick {}: CTE: {} Steering Value: {} Throttle: {}",
            self.episode,
            self.metrics.tick_count,
            cte,
            cmd.steering,
            cmd.throttle
        );

        if let Some(ref mut t) = self.trace {
            t.set(TraceRecord {
                episode: self.episode,
                tick: self.metrics.tick_count,
                cte,
                speed: telemetry.speed,
                heading_angle: telemetry.heading_angle,
                steering: cmd.steering,
                throttle: cmd.throttle,
            });

            if let Err(e) = t.write() {
                warn!("Could not write the trace: {}", e);
            }
        }

        let status = match self.metrics.mean_error() {
            Some(mean_error) => EpisodeStatus::Complete { mean_error },
            None => EpisodeStatus::Running,
        };

        Ok((cmd, status))
    }

    /// Mean error of the episode, `None` until the episode is complete.
    pub fn mean_error(&self) -> Option<f64> {
        self.metrics.mean_error()
    }

    pub fn metrics(&self) -> &EpisodeMetrics {
        &self.metrics
    }

    pub fn episode_index(&self) -> u64 {
        self.episode
    }

    pub fn params(&self) -> &EpisodeParams {
        &self.params
    }

    pub fn controller(&self) -> &PidController {
        &self.steer_ctrl
    }
}

impl CyclicModule for EpisodeRunner {
    type InitData = RunnerInit;
    type InitError = EpisodeError;

    type InputData = Telemetry;
    type OutputData = ControlCommand;
    type StatusReport = EpisodeStatus;
    type ProcError = EpisodeError;

    /// Initialise the runner, ready for the first episode.
    ///
    /// The trace is only opened if it is enabled and a session is provided.
    fn init(
        &mut self,
        init_data: Self::InitData,
        session: Option<&Session>,
    ) -> Result<(), Self::InitError> {
        init_data.episode.validate()?;

        self.params = init_data.episode;
        self.steer_ctrl = PidController::new(init_data.steer_gains);
        self.throttle = ThrottlePolicy::new(init_data.throttle);
        self.metrics = EpisodeMetrics::new(&self.params);
        self.episode = 1;

        self.trace = match (init_data.trace.enabled, session) {
            (true, Some(s)) => Some(Trace::new(s).map_err(EpisodeError::TraceInitError)?),
            (true, None) => {
                warn!("Trace requested but there is no session to write it to");
                None
            }
            _ => None,
        };

        Ok(())
    }

    fn proc(
        &mut self,
        input_data: &Self::InputData,
    ) -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError> {
        self.on_tick(input_data)
    }
}
