//! # PID controller module
//!
//! This module provides the discrete PID controller used for both the steering and throttle
//! loops. The controller is tick based rather than time based: the simulator delivers telemetry
//! at its own rate and every sample is one step of the integral and derivative terms.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Gains of a PID controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub k_p: f64,

    /// Integral gain
    pub k_i: f64,

    /// Derivative gain
    pub k_d: f64,
}

/// A PID controller
#[derive(Debug, Clone, Default, Serialize)]
pub struct PidController {
    gains: PidGains,

    /// The most recent error sample
    error: f64,

    /// Previous error, zero before the first update
    prev_error: f64,

    /// Change in error over the most recent update
    derivative: f64,

    /// The integral accumulation
    cumulative_error: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidGains {
    pub fn new(k_p: f64, k_i: f64, k_d: f64) -> Self {
        Self { k_p, k_i, k_d }
    }

    /// Gains as an index-addressable array, in `[k_p, k_i, k_d]` order.
    pub fn to_array(&self) -> [f64; 3] {
        [self.k_p, self.k_i, self.k_d]
    }

    /// Build gains from an array in `[k_p, k_i, k_d]` order.
    pub fn from_array(gains: [f64; 3]) -> Self {
        Self::new(gains[0], gains[1], gains[2])
    }

    /// Returns true if all gains are finite.
    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|g| g.is_finite())
    }
}

impl std::fmt::Display for PidGains {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}]", self.k_p, self.k_i, self.k_d)
    }
}

impl PidController {
    /// Create a new controller with the given gains.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            error: 0f64,
            prev_error: 0f64,
            derivative: 0f64,
            cumulative_error: 0f64,
        }
    }

    /// Re-initialise the controller with new gains, clearing all accumulated state.
    pub fn init(&mut self, gains: PidGains) {
        *self = Self::new(gains);
    }

    /// Feed a new error sample into the controller.
    pub fn update(&mut self, error: f64) {
        self.derivative = error - self.prev_error;
        self.cumulative_error += error;
        self.prev_error = error;
        self.error = error;
    }

    /// The control output for the most recent sample.
    ///
    /// The output is not limited, the caller must clamp it to the actuation range.
    pub fn output(&self) -> f64 {
        -(self.gains.k_p * self.error
            + self.gains.k_i * self.cumulative_error
            + self.gains.k_d * self.derivative)
    }

    /// Update the controller with `error` and return the new output.
    pub fn get(&mut self, error: f64) -> f64 {
        self.update(error);
        self.output()
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn cumulative_error(&self) -> f64 {
        self.cumulative_error
    }

    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }
}
