//! # Simulator interface
//!
//! The simulator talks Socket.IO over a websocket. Every event frame is a text message starting
//! with `42` (`4` for a message, `2` for an event) followed by a JSON array of the event name and
//! its data, for example:
//!
//! ```text
//! 42["telemetry",{"cte":"0.7598","speed":"0.4380","steering_angle":"0.0000"}]
//! ```
//!
//! A frame whose data is `null` indicates the simulator is in manual driving mode, which must be
//! acknowledged with an empty `manual` event.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Prefix of all Socket.IO event frames.
pub const EVENT_PREFIX: &str = "42";

/// Name of the inbound telemetry event.
pub const TELEMETRY_EVENT: &str = "telemetry";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single telemetry sample from the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Cross track error, the signed lateral distance to the reference path.
    pub cte: f64,

    /// Vehicle speed.
    ///
    /// Units: miles/hour, as reported by the simulator
    pub speed: f64,

    /// The current steering angle of the vehicle.
    ///
    /// Units: degrees
    pub heading_angle: f64,
}

/// Data carried by an outbound `steer` event.
#[derive(Debug, Serialize)]
struct SteerData {
    steering_angle: f64,
    throttle: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A decoded inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimEvent {
    /// A new telemetry sample, one control tick.
    Telemetry(Telemetry),

    /// The simulator is being driven manually and expects a `manual` acknowledgement.
    Manual,

    /// The frame carries no event the controller cares about.
    Ignored,
}

/// Errors raised while decoding a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame payload is not valid JSON: {0}")]
    InvalidJson(serde_json::Error),

    #[error("Expected the frame payload to be an array of [event, data]")]
    NotAnEvent,

    #[error("Telemetry is missing the \"{0}\" field")]
    MissingField(&'static str),

    #[error("Telemetry field \"{field}\" is not a number (found {value})")]
    InvalidNumber {
        field: &'static str,
        value: String,
    },
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode a raw text frame from the simulator.
pub fn decode_frame(frame: &str) -> Result<SimEvent, FrameError> {
    // Anything other than an event frame (handshakes, pings) is of no interest
    if frame.len() <= EVENT_PREFIX.len() || !frame.starts_with(EVENT_PREFIX) {
        return Ok(SimEvent::Ignored);
    }

    let payload = match event_payload(frame) {
        Some(p) => p,
        None => return Ok(SimEvent::Manual),
    };

    let val: Value = serde_json::from_str(payload).map_err(FrameError::InvalidJson)?;

    let event = match val.get(0).and_then(Value::as_str) {
        Some(e) => e,
        None => return Err(FrameError::NotAnEvent),
    };

    if event != TELEMETRY_EVENT {
        return Ok(SimEvent::Ignored);
    }

    let data = match val.get(1) {
        Some(d) if d.is_object() => d,
        _ => return Err(FrameError::NotAnEvent),
    };

    Ok(SimEvent::Telemetry(Telemetry {
        cte: number_field(data, "cte")?,
        speed: number_field(data, "speed")?,
        heading_angle: number_field(data, "steering_angle")?,
    }))
}

/// Encode a control command as a `steer` event frame.
pub fn encode_steer(steering: f64, throttle: f64) -> String {
    let data = SteerData {
        steering_angle: steering,
        throttle,
    };

    // Serialising a struct of two floats cannot fail, non-finite values become null
    let data_str = serde_json::to_string(&data).unwrap_or_else(|_| String::from("{}"));

    format!("{}[\"steer\",{}]", EVENT_PREFIX, data_str)
}

/// Encode an episode reset request.
pub fn encode_reset() -> String {
    format!("{}[\"reset\",{{}}]", EVENT_PREFIX)
}

/// Encode the acknowledgement of a manual driving frame.
pub fn encode_manual() -> String {
    format!("{}[\"manual\",{{}}]", EVENT_PREFIX)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Extract the JSON array from an event frame.
///
/// Returns `None` if the frame has no data, which the simulator uses to signal manual mode.
fn event_payload(frame: &str) -> Option<&str> {
    if frame.contains("null") {
        return None;
    }

    let start = frame.find('[')?;
    let end = frame.rfind(']')?;

    if end < start {
        return None;
    }

    Some(&frame[start..=end])
}

/// Read a numeric field which the simulator may send either as a string or as a number.
///
/// Non-finite values such as `"nan"` or `"inf"` are rejected.
fn number_field(data: &Value, field: &'static str) -> Result<f64, FrameError> {
    match data.get(field) {
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(FrameError::InvalidNumber {
                field,
                value: s.clone(),
            }),
        },
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| FrameError::InvalidNumber {
            field,
            value: n.to_string(),
        }),
        Some(Value::Null) | None => Err(FrameError::MissingField(field)),
        Some(v) => Err(FrameError::InvalidNumber {
            field,
            value: v.to_string(),
        }),
    }
}
