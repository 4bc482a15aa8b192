//! # Throttle policy
//!
//! The throttle loop is secondary to steering. It holds the vehicle near a mean throttle, either
//! fixed, modulated by its own PID controller fed the cross track error, or nudged up and down to
//! keep the speed inside a band.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;
use serde::Deserialize;

// Internal
use crate::pid::{PidController, PidGains};
use util::maths::clamp_max;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the throttle policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleParams {
    /// How the throttle is computed
    pub mode: ThrottleMode,

    /// Throttle held when the vehicle is on track
    pub mean: f64,

    /// Maximum throttle demand
    pub max: f64,

    /// Gains of the throttle controller, used in `Pid` mode
    pub gains: PidGains,

    /// Below this speed the throttle is increased, used in `SpeedBand` mode
    pub speed_lower: f64,

    /// At or above this speed the throttle is decreased, used in `SpeedBand` mode
    pub speed_upper: f64,

    /// Throttle change per tick, used in `SpeedBand` mode
    pub step: f64,
}

/// Throttle policy state
#[derive(Debug, Clone)]
pub struct ThrottlePolicy {
    params: ThrottleParams,
    pid: PidController,
    throttle: f64,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// Throttle is always `mean`
    Constant,

    /// Throttle is `mean` minus the output of a PID controller fed the cross track error
    Pid,

    /// Throttle steps towards keeping the speed between `speed_lower` and `speed_upper`
    SpeedBand,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ThrottleParams {
    fn default() -> Self {
        Self {
            mode: ThrottleMode::Pid,
            mean: 0.4,
            max: 0.7,
            gains: PidGains::new(0.1, 0.0, 1.0),
            speed_lower: 48.0,
            speed_upper: 50.0,
            step: 0.1,
        }
    }
}

impl ThrottlePolicy {
    pub fn new(params: ThrottleParams) -> Self {
        Self {
            pid: PidController::new(params.gains),
            throttle: params.mean,
            params,
        }
    }

    /// Return the policy to its initial state, for the start of a new episode.
    pub fn reset(&mut self) {
        self.pid.init(self.params.gains);
        self.throttle = self.params.mean;
    }

    /// Compute the throttle demand for this tick.
    pub fn get(&mut self, cte: f64, speed: f64) -> f64 {
        let p = &self.params;

        let throttle = match p.mode {
            ThrottleMode::Constant => p.mean,
            ThrottleMode::Pid => p.mean - self.pid.get(cte),
            ThrottleMode::SpeedBand => {
                if self.throttle >= p.mean && speed >= p.speed_upper {
                    self.throttle - p.step
                }
                else if self.throttle <= p.mean && speed < p.speed_lower {
                    self.throttle + p.step
                }
                else {
                    self.throttle
                }
            }
        };

        // Non-finite demands restart the policy from the mean
        if !throttle.is_finite() {
            warn!("Throttle demand is {}, returning to the mean throttle", throttle);
            self.reset();
            return self.throttle;
        }

        self.throttle = clamp_max(throttle, p.max);
        self.throttle
    }

    pub fn params(&self) -> &ThrottleParams {
        &self.params
    }
}
