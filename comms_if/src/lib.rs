//! # Communications interface crate.
//!
//! Provides the interface to the driving simulator: the Socket.IO frame codec and the websocket
//! transport the simulator connects to.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Simulator message definitions and the frame codec
pub mod sim;

/// Network module
pub mod net;
