//! # Drive library.
//!
//! Steering control and gain tuning for a simulated vehicle. The executable in `main.rs` wires
//! these modules to the simulator, and other crates in the workspace (and the benches) use them
//! directly.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Driver - the simulator event loop, in fixed gain or tuning mode
pub mod driver;

/// Episode runner - runs the controller for a fixed number of ticks and scores it
pub mod episode;

/// Parameters of the drive executable
pub mod params;

/// PID controller
pub mod pid;

/// Simulator link - the outbound interface between the core and the simulator
pub mod sim_link;

/// Throttle policy
pub mod throttle;

/// Optional per-tick trace
pub mod trace;

/// Twiddle - coordinate ascent tuning of the steering gains
pub mod twiddle;
