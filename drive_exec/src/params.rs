//! # Drive Executable Parameters
//!
//! This module provides parameters for the drive executable, loaded from a single TOML file. All
//! sections are optional and fall back to their defaults.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Deserialize;
use std::time::Duration;

use comms_if::net::NetParams;

use crate::{
    driver::DriveMode,
    episode::{EpisodeError, EpisodeParams, RunnerInit},
    pid::PidGains,
    throttle::ThrottleParams,
    trace::TraceParams,
    twiddle::{TuningParams, TwiddleError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriveExecParams {
    /// Whether to drive with fixed gains or tune them
    pub mode: DriveMode,

    pub net: NetParams,

    /// Steering gains used in fixed mode
    pub steer: PidGains,

    pub throttle: ThrottleParams,

    pub episode: EpisodeParams,

    pub tuning: TuningSection,

    pub run: RunParams,

    pub trace: TraceParams,
}

/// Limits which apply to the whole run, in either mode.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RunParams {
    /// Maximum wall clock time for the run, unlimited if not set
    ///
    /// Units: seconds
    pub max_run_time_s: Option<f64>,
}

/// Tuning parameters plus the gains tuning starts from.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningSection {
    pub initial_gains: PidGains,

    #[serde(flatten)]
    pub params: TuningParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DriveParamsError {
    #[error("Invalid episode parameters: {0}")]
    InvalidEpisode(#[from] EpisodeError),

    #[error("Invalid tuning parameters: {0}")]
    InvalidTuning(#[from] TwiddleError),

    #[error("The {0} gains must be finite, found {1}")]
    NonFiniteGains(&'static str, PidGains),

    #[error("The throttle maximum must be finite, found {0}")]
    InvalidThrottleMax(f64),

    #[error("The maximum run time must be positive and finite, found {0} s")]
    InvalidRunTime(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DriveExecParams {
    fn default() -> Self {
        Self {
            mode: DriveMode::Fixed,
            net: NetParams::default(),
            steer: PidGains::new(0.2, 0.0, 3.31),
            throttle: ThrottleParams::default(),
            episode: EpisodeParams::default(),
            tuning: TuningSection::default(),
            run: RunParams::default(),
            trace: TraceParams::default(),
        }
    }
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            initial_gains: PidGains::new(1.0, 0.0, 3.31),
            params: TuningParams::default(),
        }
    }
}

impl RunParams {
    /// The run time must fit in a `Duration`.
    pub fn validate(&self) -> Result<(), DriveParamsError> {
        match self.max_run_time_s {
            Some(t) if !(t.is_finite() && t > 0.0 && t < u64::MAX as f64) => {
                Err(DriveParamsError::InvalidRunTime(t))
            }
            _ => Ok(()),
        }
    }
}

impl DriveExecParams {
    /// Check the parameters are usable, all errors are fatal.
    pub fn validate(&self) -> Result<(), DriveParamsError> {
        self.episode.validate()?;
        self.tuning.params.validate()?;

        if !self.steer.is_finite() {
            return Err(DriveParamsError::NonFiniteGains("steering", self.steer));
        }
        if !self.tuning.initial_gains.is_finite() {
            return Err(DriveParamsError::NonFiniteGains(
                "initial tuning",
                self.tuning.initial_gains,
            ));
        }
        if !self.throttle.gains.is_finite() {
            return Err(DriveParamsError::NonFiniteGains("throttle", self.throttle.gains));
        }
        if !self.throttle.max.is_finite() {
            return Err(DriveParamsError::InvalidThrottleMax(self.throttle.max));
        }

        self.run.validate()?;

        if !(self.tuning.params.threshold > 0.0) {
            warn!(
                "Tuning threshold is {}, tuning will only stop on a budget or cancellation",
                self.tuning.params.threshold
            );
        }

        Ok(())
    }

    /// The wall clock budget for the run.
    pub fn max_run_time(&self) -> Option<Duration> {
        self.run.max_run_time_s.map(Duration::from_secs_f64)
    }

    /// Initialisation data for the episode runner, steering with `steer_gains`.
    pub fn runner_init(&self, steer_gains: PidGains) -> RunnerInit {
        RunnerInit {
            episode: self.episode,
            steer_gains,
            throttle: self.throttle.clone(),
            trace: self.trace.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{episode::ErrorMetric, throttle::ThrottleMode};

    #[test]
    fn test_defaults() {
        let p: DriveExecParams = util::params::from_str("").unwrap();

        assert_eq!(p.mode, DriveMode::Fixed);
        assert_eq!(p.net.sim_endpoint, "0.0.0.0:4567");
        assert_eq!(p.steer, PidGains::new(0.2, 0.0, 3.31));
        assert_eq!(p.tuning.initial_gains, PidGains::new(1.0, 0.0, 3.31));
        assert_eq!(p.tuning.params.initial_steps, [1.0, 1.0, 1.0]);
        assert_eq!(p.tuning.params.threshold, 0.01);
        assert_eq!(p.episode.total_ticks, 2000);
        assert_eq!(p.episode.horizon, 1000);
        assert!(!p.trace.enabled);
        assert_eq!(p.max_run_time(), None);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_load() {
        let p: DriveExecParams = util::params::from_str(
            r#"
            mode = "tune"

            [net]
            sim_endpoint = "127.0.0.1:4000"

            [steer]
            k_p = 0.3
            k_i = 0.001
            k_d = 2.5

            [throttle]
            mode = "speed_band"

            [episode]
            total_ticks = 600
            horizon = 100
            metric = "mean_squared"

            [tuning]
            threshold = 0.2
            max_episodes = 50

            [tuning.initial_gains]
            k_p = 0.5
            k_i = 0.0
            k_d = 1.0

            [run]
            max_run_time_s = 90.5

            [trace]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(p.mode, DriveMode::Tune);
        assert_eq!(p.net.sim_endpoint, "127.0.0.1:4000");
        assert_eq!(p.net.recv_timeout_ms, 100);
        assert_eq!(p.steer, PidGains::new(0.3, 0.001, 2.5));
        assert_eq!(p.throttle.mode, ThrottleMode::SpeedBand);
        assert_eq!(p.throttle.mean, 0.4);
        assert_eq!(p.episode.total_ticks, 600);
        assert_eq!(p.episode.metric, ErrorMetric::MeanSquared);
        assert_eq!(p.tuning.params.threshold, 0.2);
        assert_eq!(p.tuning.params.max_episodes, Some(50));
        assert_eq!(p.tuning.initial_gains, PidGains::new(0.5, 0.0, 1.0));
        assert_eq!(p.max_run_time(), Some(Duration::from_millis(90_500)));
        assert!(p.trace.enabled);
        assert!(p.validate().is_ok());

        let init = p.runner_init(p.tuning.initial_gains);
        assert_eq!(init.steer_gains, PidGains::new(0.5, 0.0, 1.0));
        assert_eq!(init.episode.horizon, 100);
    }

    #[test]
    fn test_shipped_params_file() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("params")
            .join("drive_exec.toml");
        let p: DriveExecParams = util::params::load_path(path).unwrap();

        assert!(p.validate().is_ok());
        assert_eq!(p.throttle.gains, PidGains::new(0.1, 0.0, 1.0));
        assert_eq!(p.tuning.params.max_episodes, None);
        assert_eq!(p.run.max_run_time_s, None);
    }

    #[test]
    fn test_invalid() {
        let mut p = DriveExecParams::default();
        p.episode.horizon = p.episode.total_ticks;
        match p.validate() {
            Err(DriveParamsError::InvalidEpisode(_)) => (),
            r => panic!("Expected InvalidEpisode, got {:?}", r),
        }

        let mut p = DriveExecParams::default();
        p.tuning.params.initial_steps[2] = 0.0;
        match p.validate() {
            Err(DriveParamsError::InvalidTuning(_)) => (),
            r => panic!("Expected InvalidTuning, got {:?}", r),
        }

        let mut p = DriveExecParams::default();
        p.steer.k_d = f64::NAN;
        match p.validate() {
            Err(DriveParamsError::NonFiniteGains("steering", _)) => (),
            r => panic!("Expected NonFiniteGains, got {:?}", r),
        }

        for t in [0.0, -1.0, f64::NAN, 1e30].iter() {
            let mut p = DriveExecParams::default();
            p.run.max_run_time_s = Some(*t);
            match p.validate() {
                Err(DriveParamsError::InvalidRunTime(_)) => (),
                r => panic!("Expected InvalidRunTime for {}, got {:?}", t, r),
            }
        }

        // Only warns
        for t in [0.0, f64::NAN].iter() {
            let mut p = DriveExecParams::default();
            p.tuning.params.threshold = *t;
            assert!(p.validate().is_ok());
        }
    }

    #[test]
    fn test_infinite_run_time_rejected() {
        let p: DriveExecParams =
            util::params::from_str("[run]\nmax_run_time_s = inf").unwrap();

        assert_eq!(p.run.max_run_time_s, Some(f64::INFINITY));
        match p.validate() {
            Err(DriveParamsError::InvalidRunTime(t)) => assert!(t.is_infinite()),
            r => panic!("Expected InvalidRunTime, got {:?}", r),
        }
    }
}
