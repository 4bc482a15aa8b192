//! # Twiddle gain tuner
//!
//! Coordinate ascent over the three steering gains. Each round perturbs one gain up by its step
//! and runs an episode. If the mean error improves the step grows and the next gain is tried,
//! otherwise the gain is moved the same distance below its original value and a second episode is
//! run. If that also fails the gain is restored and its step shrinks. Tuning converges once the
//! sum of the steps falls to the threshold.
//!
//! The tuner is a state machine advanced by [`Twiddle::step_once`]. It never runs episodes
//! itself, it only says which gains the next episode should use and is told the resulting mean
//! error when the episode completes:
//!
//! | Phase          | Waiting for                                    |
//! |----------------|------------------------------------------------|
//! | `Init`         | `Start`                                        |
//! | `RunBaseline`  | Baseline episode with the initial gains        |
//! | `EvaluateUp`   | Episode with the active gain increased         |
//! | `EvaluateDown` | Episode with the active gain decreased         |
//! | `Terminated`   | Nothing, tuning is over                        |
//!
//! The termination check and the perturbations happen during the transition out of a phase.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

// Internal
use crate::pid::PidGains;
use util::maths::sum;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Number of gains being tuned.
pub const NUM_GAINS: usize = 3;

/// Step multiplier after an improvement.
pub const STEP_GROW: f64 = 1.2;

/// Step multiplier after a round with no improvement in either direction.
pub const STEP_SHRINK: f64 = 0.8;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TuningParams {
    /// Initial perturbation of each gain, in `[k_p, k_i, k_d]` order
    pub initial_steps: [f64; NUM_GAINS],

    /// Tuning converges once the sum of the steps is at or below this value
    pub threshold: f64,

    /// Maximum number of episodes to run, including the baseline
    pub max_episodes: Option<u64>,
}

/// Persistent tuning state.
#[derive(Debug, Clone, Serialize)]
pub struct TuningState {
    /// Gains under test
    pub gains: [f64; NUM_GAINS],

    /// Perturbation of each gain
    pub steps: [f64; NUM_GAINS],

    /// Best mean error found so far
    pub best_error: f64,

    /// Gains which produced `best_error`
    pub best_gains: [f64; NUM_GAINS],

    /// Index of the gain being perturbed
    pub active_index: usize,

    pub phase: Phase,

    /// Number of episodes requested so far, including the baseline
    pub episodes: u64,

    /// Number of completed rounds, one round being the evaluation of one gain
    pub rounds: u64,
}

/// Result of a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TuningOutcome {
    pub best_gains: PidGains,
    pub best_error: f64,
    pub episodes: u64,
    pub reason: StopReason,
}

/// The twiddle state machine.
#[derive(Debug, Clone)]
pub struct Twiddle {
    params: TuningParams,
    state: TuningState,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Phase of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Init,
    RunBaseline,
    EvaluateUp,
    EvaluateDown,
    Terminated(StopReason),
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The sum of the steps reached the threshold.
    Converged,

    /// The configured maximum number of episodes was reached.
    EpisodeBudgetExhausted,

    /// The configured maximum run time elapsed.
    TimeBudgetExhausted,

    /// Stopped on request.
    Cancelled,
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TwiddleEvent {
    /// Begin tuning.
    Start,

    /// The requested episode finished with the given mean error.
    EpisodeComplete(f64),
}

/// What the caller must do next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TwiddleAction {
    /// Re-initialise the controller with these gains and run an episode.
    RunEpisode(PidGains),

    /// Tuning is over.
    Finished(TuningOutcome),
}

#[derive(Debug, thiserror::Error)]
pub enum TwiddleError {
    #[error("Step {index} must be positive and finite, found {value}")]
    InvalidStep { index: usize, value: f64 },

    #[error("Initial gains must be finite, found {0}")]
    NonFiniteGains(PidGains),

    #[error("Event {event:?} is not valid in phase {phase:?}")]
    UnexpectedEvent { phase: Phase, event: TwiddleEvent },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            initial_steps: [1.0, 1.0, 1.0],
            threshold: 0.01,
            max_episodes: None,
        }
    }
}

impl TuningParams {
    /// Check the initial steps are usable.
    pub fn validate(&self) -> Result<(), TwiddleError> {
        for (index, value) in self.initial_steps.iter().enumerate() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(TwiddleError::InvalidStep {
                    index,
                    value: *value,
                });
            }
        }

        Ok(())
    }
}

impl Twiddle {
    /// Create a new tuner starting from the given gains.
    pub fn new(initial_gains: PidGains, params: TuningParams) -> Result<Self, TwiddleError> {
        params.validate()?;

        if !initial_gains.is_finite() {
            return Err(TwiddleError::NonFiniteGains(initial_gains));
        }

        if !(params.threshold > 0.0) {
            warn!(
                "Tuning threshold is {}, tuning will never converge and must be stopped externally",
                params.threshold
            );
        }

        let gains = initial_gains.to_array();

        Ok(Self {
            state: TuningState {
                gains,
                steps: params.initial_steps,
                best_error: f64::INFINITY,
                best_gains: gains,
                active_index: 0,
                phase: Phase::Init,
                episodes: 0,
                rounds: 0,
            },
            params,
        })
    }

    /// Advance the state machine by one event.
    pub fn step_once(&mut self, event: TwiddleEvent) -> Result<TwiddleAction, TwiddleError> {
        let action = match (self.state.phase, event) {
            (Phase::Init, TwiddleEvent::Start) => {
                info!("Starting tuning from {}", self.gains());
                self.run_episode(Phase::RunBaseline)
            }

            (Phase::RunBaseline, TwiddleEvent::EpisodeComplete(err)) => {
                self.state.best_error = match err.is_finite() {
                    true => err,
                    false => {
                        warn!("Baseline episode diverged (mean error {})", err);
                        f64::INFINITY
                    }
                };
                self.state.best_gains = self.state.gains;

                info!("Baseline mean error: {}", self.state.best_error);

                self.check_termination()
            }

            (Phase::EvaluateUp, TwiddleEvent::EpisodeComplete(err)) => {
                let i = self.state.active_index;

                if self.is_improvement(err) {
                    self.accept(err);
                    self.end_round()
                }
                else {
                    // Step the other side of the original value
                    self.state.gains[i] -= 2.0 * self.state.steps[i];
                    debug!(
                        "Gain {} not improved by increase (mean error {}), trying {}",
                        i, err, self.state.gains[i]
                    );
                    self.run_episode(Phase::EvaluateDown)
                }
            }

            (Phase::EvaluateDown, TwiddleEvent::EpisodeComplete(err)) => {
                let i = self.state.active_index;

                if self.is_improvement(err) {
                    self.accept(err);
                }
                else {
                    self.state.gains[i] += self.state.steps[i];
                    self.state.steps[i] *= STEP_SHRINK;
                    debug!(
                        "Gain {} not improved in either direction (mean error {}), step now {}",
                        i, err, self.state.steps[i]
                    );
                }

                self.end_round()
            }

            (phase, event) => return Err(TwiddleError::UnexpectedEvent { phase, event }),
        };

        Ok(action)
    }

    /// Stop tuning immediately, keeping the best result found so far.
    ///
    /// Stopping an already terminated tuner returns the original outcome.
    pub fn stop(&mut self, reason: StopReason) -> TuningOutcome {
        match self.state.phase {
            Phase::Terminated(r) => self.outcome(r),
            _ => {
                info!("Tuning stopped: {:?}", reason);
                self.finish(reason)
            }
        }
    }

    pub fn state(&self) -> &TuningState {
        &self.state
    }

    pub fn params(&self) -> &TuningParams {
        &self.params
    }

    /// Gains currently under test.
    pub fn gains(&self) -> PidGains {
        PidGains::from_array(self.state.gains)
    }

    pub fn best_gains(&self) -> PidGains {
        PidGains::from_array(self.state.best_gains)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.state.phase, Phase::Terminated(_))
    }

    /// Sum of the perturbation steps.
    pub fn step_sum(&self) -> f64 {
        sum(&self.state.steps)
    }

    /// Record the current gains as the best and grow the active step.
    fn accept(&mut self, err: f64) {
        let i = self.state.active_index;

        self.state.best_error = err;
        self.state.best_gains = self.state.gains;
        self.state.steps[i] *= STEP_GROW;

        info!(
            "New best mean error {} with gains {}",
            err,
            self.best_gains()
        );
    }

    /// Move on to the next gain and check for convergence.
    fn end_round(&mut self) -> TwiddleAction {
        self.state.active_index = (self.state.active_index + 1) % NUM_GAINS;
        self.state.rounds += 1;

        info!(
            "Round {}: p = {:?}, dp = {:?}, best_p = {:?}, best_err = {}",
            self.state.rounds,
            self.state.gains,
            self.state.steps,
            self.state.best_gains,
            self.state.best_error
        );

        self.check_termination()
    }

    fn check_termination(&mut self) -> TwiddleAction {
        if self.step_sum() <= self.params.threshold {
            info!(
                "Tuning converged after {} episodes: best gains {}, mean error {}",
                self.state.episodes,
                self.best_gains(),
                self.state.best_error
            );
            return TwiddleAction::Finished(self.finish(StopReason::Converged));
        }

        // Perturb the active gain up
        let i = self.state.active_index;
        self.state.gains[i] += self.state.steps[i];
        self.run_episode(Phase::EvaluateUp)
    }

    /// Request an episode with the current gains, unless the episode budget is spent.
    fn run_episode(&mut self, next: Phase) -> TwiddleAction {
        if let Some(max) = self.params.max_episodes {
            if self.state.episodes >= max {
                info!("Episode budget of {} spent", max);
                return TwiddleAction::Finished(self.finish(StopReason::EpisodeBudgetExhausted));
            }
        }

        self.state.episodes += 1;
        self.state.phase = next;

        debug!(
            "Episode {} ({:?}) with gains {}",
            self.state.episodes,
            next,
            self.gains()
        );

        TwiddleAction::RunEpisode(self.gains())
    }

    fn is_improvement(&self, err: f64) -> bool {
        err.is_finite() && err < self.state.best_error
    }

    fn finish(&mut self, reason: StopReason) -> TuningOutcome {
        self.state.phase = Phase::Terminated(reason);
        self.outcome(reason)
    }

    fn outcome(&self, reason: StopReason) -> TuningOutcome {
        TuningOutcome {
            best_gains: self.best_gains(),
            best_error: self.state.best_error,
            episodes: self.state.episodes,
            reason,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn twiddle(gains: [f64; 3], params: TuningParams) -> Twiddle {
        Twiddle::new(PidGains::from_array(gains), params).unwrap()
    }

    fn expect_episode(action: TwiddleAction) -> [f64; 3] {
        match action {
            TwiddleAction::RunEpisode(g) => g.to_array(),
            a => panic!("Expected an episode, got {:?}", a),
        }
    }

    /// Drive the tuner to completion with an error function of the gains.
    fn run<F: Fn([f64; 3]) -> f64>(t: &mut Twiddle, f: F) -> TuningOutcome {
        let mut action = t.step_once(TwiddleEvent::Start).unwrap();

        loop {
            match action {
                TwiddleAction::RunEpisode(g) => {
                    action = t
                        .step_once(TwiddleEvent::EpisodeComplete(f(g.to_array())))
                        .unwrap();
                }
                TwiddleAction::Finished(o) => return o,
            }
        }
    }

    #[test]
    fn test_baseline_then_up() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());

        assert_eq!(expect_episode(t.step_once(TwiddleEvent::Start).unwrap()), [1.0, 0.0, 3.31]);
        assert_eq!(t.state().phase, Phase::RunBaseline);

        let g = expect_episode(t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap());
        assert_eq!(g, [2.0, 0.0, 3.31]);
        assert_eq!(t.state().best_error, 0.8);
        assert_eq!(t.state().phase, Phase::EvaluateUp);
    }

    #[test]
    fn test_improve_on_up() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap();

        // Better: accept, grow step 0, move on to gain 1
        let g = expect_episode(t.step_once(TwiddleEvent::EpisodeComplete(0.5)).unwrap());

        assert_eq!(t.state().best_error, 0.5);
        assert_eq!(t.state().best_gains, [2.0, 0.0, 3.31]);
        assert_relative_eq!(t.state().steps[0], 1.2);
        assert_eq!(t.state().active_index, 1);
        assert_eq!(g, [2.0, 1.0, 3.31]);
    }

    #[test]
    fn test_improve_on_down() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap();

        // Worse going up, so try the other side
        let g = expect_episode(t.step_once(TwiddleEvent::EpisodeComplete(0.9)).unwrap());
        assert_eq!(g, [0.0, 0.0, 3.31]);
        assert_eq!(t.state().phase, Phase::EvaluateDown);

        // Better going down
        let g = expect_episode(t.step_once(TwiddleEvent::EpisodeComplete(0.3)).unwrap());
        assert_eq!(t.state().best_error, 0.3);
        assert_eq!(t.state().best_gains, [0.0, 0.0, 3.31]);
        assert_relative_eq!(t.state().steps[0], 1.2);
        assert_eq!(g, [0.0, 1.0, 3.31]);
    }

    #[test]
    fn test_no_improvement_restores_and_shrinks() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap();

        // Equal is not an improvement
        let g = expect_episode(t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap());

        assert_eq!(t.state().best_error, 0.8);
        assert_eq!(t.state().best_gains, [1.0, 0.0, 3.31]);
        assert_eq!(t.state().gains[0], 1.0);
        assert_relative_eq!(t.state().steps[0], 0.8);
        assert_eq!(g, [1.0, 1.0, 3.31]);
    }

    #[test]
    fn test_divergent_episode_not_improved() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(0.8)).unwrap();

        t.step_once(TwiddleEvent::EpisodeComplete(f64::NAN)).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(f64::INFINITY)).unwrap();

        assert_eq!(t.state().best_error, 0.8);
        assert_relative_eq!(t.state().steps[0], 0.8);
        assert!(!t.is_terminated());
    }

    #[test]
    fn test_divergent_baseline() {
        let mut t = twiddle([1.0, 0.0, 3.31], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(f64::NAN)).unwrap();
        assert_eq!(t.state().best_error, f64::INFINITY);

        // Any finite error is an improvement
        t.step_once(TwiddleEvent::EpisodeComplete(1e9)).unwrap();
        assert_eq!(t.state().best_error, 1e9);
    }

    #[test]
    fn test_converges_after_exact_number_of_passes() {
        let threshold = 0.01;
        let mut t = twiddle(
            [0.0, 0.0, 0.0],
            TuningParams {
                initial_steps: [1.0, 1.0, 1.0],
                threshold,
                ..Default::default()
            },
        );

        // Nothing ever improves on the baseline
        let outcome = run(&mut t, |_| 1.0);

        // Expected rounds: shrink one step at a time until the sum reaches the threshold
        let mut steps = [1.0f64; 3];
        let mut expected_rounds = 0u64;
        let mut i = 0;
        while steps.iter().sum::<f64>() > threshold {
            steps[i] *= STEP_SHRINK;
            i = (i + 1) % 3;
            expected_rounds += 1;
        }

        // 3 * 0.8^n <= 0.01 is first reached part way through pass 26
        let passes = (expected_rounds + 2) / 3;
        assert_eq!(passes, 26);
        assert_eq!(
            passes,
            ((threshold / 3.0).ln() / STEP_SHRINK.ln()).ceil() as u64
        );

        assert_eq!(outcome.reason, StopReason::Converged);
        assert_eq!(t.state().rounds, expected_rounds);
        assert_eq!(t.state().rounds, 77);

        // One baseline, then an up and a down episode every round
        assert_eq!(outcome.episodes, 1 + 2 * expected_rounds);
        assert_eq!(outcome.best_error, 1.0);
        assert_eq!(outcome.best_gains, PidGains::new(0.0, 0.0, 0.0));
        assert!(t.step_sum() <= threshold);
    }

    #[test]
    fn test_best_error_monotonic() {
        let mut t = twiddle([0.0, 0.0, 0.0], TuningParams::default());

        // A bowl with its minimum at [0.5, 0.01, 3.0], plus a deterministic wobble so that some
        // episodes get worse
        let target = [0.5, 0.01, 3.0];
        let mut action = t.step_once(TwiddleEvent::Start).unwrap();
        let mut best = f64::INFINITY;
        let mut n = 0u64;

        while let TwiddleAction::RunEpisode(g) = action {
            let g = g.to_array();
            let err: f64 = g
                .iter()
                .zip(target.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                + 0.01 * ((n as f64) * 1.7).sin().abs();
            n += 1;

            action = t.step_once(TwiddleEvent::EpisodeComplete(err)).unwrap();

            assert!(t.state().best_error <= best);
            best = t.state().best_error;

            // Steps are never negative
            assert!(t.state().steps.iter().all(|s| *s > 0.0));
        }

        match action {
            TwiddleAction::Finished(o) => {
                assert_eq!(o.reason, StopReason::Converged);
                assert!(o.best_error < 0.1);
                assert_relative_eq!(o.best_gains.k_p, 0.5, epsilon = 0.2);
                assert_relative_eq!(o.best_gains.k_d, 3.0, epsilon = 0.2);
            }
            a => panic!("Expected to finish, got {:?}", a),
        }
    }

    #[test]
    fn test_episode_budget() {
        let mut t = twiddle(
            [1.0, 0.0, 1.0],
            TuningParams {
                max_episodes: Some(4),
                ..Default::default()
            },
        );

        let outcome = run(&mut t, |g| g[0]);

        assert_eq!(outcome.reason, StopReason::EpisodeBudgetExhausted);
        assert_eq!(outcome.episodes, 4);
        assert!(t.is_terminated());
    }

    #[test]
    fn test_nan_threshold_never_converges() {
        let mut t = twiddle(
            [1.0, 0.0, 1.0],
            TuningParams {
                threshold: f64::NAN,
                max_episodes: Some(400),
                ..Default::default()
            },
        );

        // A threshold of 0.01 converges after 155 episodes here, NaN never does
        let outcome = run(&mut t, |_| 1.0);

        assert_eq!(outcome.reason, StopReason::EpisodeBudgetExhausted);
        assert_eq!(outcome.episodes, 400);
        assert!(t.step_sum() < 0.01);
    }

    #[test]
    fn test_stop() {
        let mut t = twiddle([1.0, 0.0, 1.0], TuningParams::default());
        t.step_once(TwiddleEvent::Start).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(2.0)).unwrap();
        t.step_once(TwiddleEvent::EpisodeComplete(1.0)).unwrap();

        let outcome = t.stop(StopReason::Cancelled);
        assert_eq!(outcome.reason, StopReason::Cancelled);
        assert_eq!(outcome.best_error, 1.0);
        assert_eq!(outcome.best_gains, PidGains::new(2.0, 0.0, 1.0));

        // Stopping again keeps the first reason
        assert_eq!(t.stop(StopReason::TimeBudgetExhausted).reason, StopReason::Cancelled);

        match t.step_once(TwiddleEvent::EpisodeComplete(0.1)) {
            Err(TwiddleError::UnexpectedEvent { .. }) => (),
            r => panic!("Expected UnexpectedEvent, got {:?}", r),
        }
    }

    #[test]
    fn test_unexpected_events() {
        let mut t = twiddle([1.0, 0.0, 1.0], TuningParams::default());

        match t.step_once(TwiddleEvent::EpisodeComplete(1.0)) {
            Err(TwiddleError::UnexpectedEvent { phase: Phase::Init, .. }) => (),
            r => panic!("Expected UnexpectedEvent, got {:?}", r),
        }

        t.step_once(TwiddleEvent::Start).unwrap();
        match t.step_once(TwiddleEvent::Start) {
            Err(TwiddleError::UnexpectedEvent { phase: Phase::RunBaseline, .. }) => (),
            r => panic!("Expected UnexpectedEvent, got {:?}", r),
        }
    }

    #[test]
    fn test_invalid_params() {
        for steps in [[0.0, 1.0, 1.0], [1.0, -1.0, 1.0], [1.0, 1.0, f64::NAN]].iter() {
            let res = Twiddle::new(
                PidGains::default(),
                TuningParams {
                    initial_steps: *steps,
                    ..Default::default()
                },
            );
            match res {
                Err(TwiddleError::InvalidStep { .. }) => (),
                r => panic!("Expected InvalidStep, got {:?}", r),
            }
        }

        match Twiddle::new(PidGains::new(f64::INFINITY, 0.0, 0.0), TuningParams::default()) {
            Err(TwiddleError::NonFiniteGains(_)) => (),
            r => panic!("Expected NonFiniteGains, got {:?}", r),
        }
    }
}
