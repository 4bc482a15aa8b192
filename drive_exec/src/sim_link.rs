//! # Simulator link
//!
//! The control core only ever talks to the simulator through [`SimLink`]. Sending is fire and
//! forget: transport failures are logged here and never reach the controller or the tuner.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::warn;
use serde::Serialize;

use comms_if::{net::SimSocket, sim};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A command sent to the simulator on every control tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ControlCommand {
    /// Normalised steering demand in `[-1, 1]`
    pub steering: f64,

    /// Throttle demand
    pub throttle: f64,
}

/// A link which records everything sent through it, for exercising the core without a
/// simulator.
#[derive(Debug, Default)]
pub struct RecordingLink {
    pub sent: Vec<LinkMessage>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A message sent through a [`RecordingLink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkMessage {
    Command(ControlCommand),
    EpisodeReset,
    ManualAck,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Outbound half of the simulator interface.
pub trait SimLink {
    /// Send a steering and throttle command.
    fn send_command(&mut self, cmd: &ControlCommand);

    /// Request the simulator restarts the episode. The next telemetry tick received is the first
    /// tick of the new episode.
    fn send_episode_reset(&mut self);

    /// Acknowledge a manual driving frame.
    fn send_manual_ack(&mut self);
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimLink for SimSocket {
    fn send_command(&mut self, cmd: &ControlCommand) {
        if let Err(e) = self.send_text(&sim::encode_steer(cmd.steering, cmd.throttle)) {
            warn!("Could not send the control command: {}", e);
        }
    }

    fn send_episode_reset(&mut self) {
        if let Err(e) = self.send_text(&sim::encode_reset()) {
            warn!("Could not send the episode reset: {}", e);
        }
    }

    fn send_manual_ack(&mut self) {
        if let Err(e) = self.send_text(&sim::encode_manual()) {
            warn!("Could not acknowledge manual driving: {}", e);
        }
    }
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of episode resets sent.
    pub fn num_resets(&self) -> usize {
        self.sent
            .iter()
            .filter(|m| **m == LinkMessage::EpisodeReset)
            .count()
    }

    /// All commands sent, in order.
    pub fn commands(&self) -> Vec<ControlCommand> {
        self.sent
            .iter()
            .filter_map(|m| match m {
                LinkMessage::Command(c) => Some(*c),
                _ => None,
            })
            .collect()
    }

    /// The most recent message, if any.
    pub fn last(&self) -> Option<LinkMessage> {
        self.sent.last().copied()
    }
}

impl SimLink for RecordingLink {
    fn send_command(&mut self, cmd: &ControlCommand) {
        self.sent.push(LinkMessage::Command(*cmd));
    }

    fn send_episode_reset(&mut self) {
        self.sent.push(LinkMessage::EpisodeReset);
    }

    fn send_manual_ack(&mut self) {
        self.sent.push(LinkMessage::ManualAck);
    }
}
