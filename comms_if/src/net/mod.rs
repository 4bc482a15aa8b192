//! # Network Module
//!
//! This module provides the websocket server the simulator connects to. The simulator is the
//! client; the drive executable binds the endpoint and serves one simulator connection at a time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::ErrorKind,
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};
use log::{debug, warn};
use serde::Deserialize;
use tungstenite::{Message, WebSocket};

use crate::sim::{self, SimEvent};

// Export tungstenite
pub use tungstenite;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetParams {
    /// Address the server binds to, such as `"0.0.0.0:4567"`.
    pub sim_endpoint: String,

    /// Maximum time a receive blocks before returning with no event.
    ///
    /// Units: milliseconds
    pub recv_timeout_ms: u64,

    /// Time to wait between checks for an incoming connection.
    ///
    /// Units: milliseconds
    pub accept_poll_ms: u64,
}

/// Listens for the simulator.
pub struct SimServer {
    listener: TcpListener,
    params: NetParams,
}

/// A connected simulator.
///
/// Receiving and sending are both performed on the thread which owns the socket, so events are
/// handled strictly in the order they arrive.
pub struct SimSocket {
    ws: WebSocket<TcpStream>,
    peer: SocketAddr,
    connected: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Could not bind the server to {0}: {1}")]
    BindError(String, std::io::Error),

    #[error("Could not accept a connection: {0}")]
    AcceptError(std::io::Error),

    #[error("Websocket handshake with {0} failed: {1}")]
    HandshakeError(SocketAddr, String),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(&'static str, std::io::Error),

    #[error("The simulator is not connected")]
    Disconnected,

    #[error("Could not recieve a message from the simulator: {0}")]
    RecvError(tungstenite::Error),

    #[error("Could not send a message to the simulator: {0}")]
    SendError(tungstenite::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for NetParams {
    fn default() -> Self {
        Self {
            sim_endpoint: String::from("0.0.0.0:4567"),
            recv_timeout_ms: 100,
            accept_poll_ms: 100,
        }
    }
}

impl SimServer {
    /// Bind the server to the endpoint in the parameters.
    pub fn bind(params: &NetParams) -> Result<Self, NetError> {
        let listener = TcpListener::bind(&params.sim_endpoint)
            .map_err(|e| NetError::BindError(params.sim_endpoint.clone(), e))?;

        // Non-blocking accept lets the owner poll for cancellation between connections
        listener
            .set_nonblocking(true)
            .map_err(|e| NetError::SocketOptionError("nonblocking", e))?;

        Ok(Self {
            listener,
            params: params.clone(),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.listener.local_addr().map_err(NetError::AcceptError)
    }

    /// Wait up to one poll interval for the simulator to connect.
    ///
    /// Returns `Ok(None)` if no connection arrived in that time.
    pub fn accept(&self) -> Result<Option<SimSocket>, NetError> {
        let (stream, peer) = match self.listener.accept() {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(self.params.accept_poll_ms));
                return Ok(None);
            }
            Err(e) => return Err(NetError::AcceptError(e)),
        };

        // The handshake and the event loop both want a blocking stream
        stream
            .set_nonblocking(false)
            .map_err(|e| NetError::SocketOptionError("nonblocking", e))?;

        let ws = tungstenite::accept(stream)
            .map_err(|e| NetError::HandshakeError(peer, e.to_string()))?;

        let timeout = match self.params.recv_timeout_ms {
            0 => None,
            t => Some(Duration::from_millis(t)),
        };
        ws.get_ref()
            .set_read_timeout(timeout)
            .map_err(|e| NetError::SocketOptionError("read_timeout", e))?;
        ws.get_ref()
            .set_nodelay(true)
            .map_err(|e| NetError::SocketOptionError("nodelay", e))?;

        Ok(Some(SimSocket {
            ws,
            peer,
            connected: true,
        }))
    }
}

impl SimSocket {
    /// Return if the simulator is still connected.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Address of the connected simulator.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Recieve a single event from the simulator.
    ///
    /// Returns `Ok(None)` if no frame arrived within the receive timeout. Frames which cannot be
    /// decoded are reported as [`SimEvent::Manual`], so that the simulator is acknowledged and the
    /// controller is not updated.
    pub fn recv_event(&mut self) -> Result<Option<SimEvent>, NetError> {
        if !self.connected {
            return Err(NetError::Disconnected);
        }

        let msg = match self.ws.read() {
            Ok(m) => m,
            Err(tungstenite::Error::Io(e))
                if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
            {
                return Ok(None)
            }
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                self.connected = false;
                return Err(NetError::Disconnected);
            }
            Err(e) => {
                self.connected = false;
                return Err(NetError::RecvError(e));
            }
        };

        match msg {
            Message::Text(text) => match sim::decode_frame(&text) {
                Ok(event) => Ok(Some(event)),
                Err(e) => {
                    warn!("Malformed telemetry from the simulator, treating as manual: {}", e);
                    Ok(Some(SimEvent::Manual))
                }
            },
            Message::Close(frame) => {
                debug!("Simulator closed the connection: {:?}", frame);
                self.connected = false;
                Err(NetError::Disconnected)
            }
            _ => Ok(Some(SimEvent::Ignored)),
        }
    }

    /// Send a text frame to the simulator.
    pub fn send_text(&mut self, text: &str) -> Result<(), NetError> {
        if !self.connected {
            return Err(NetError::Disconnected);
        }

        match self.ws.send(Message::Text(text.to_string())) {
            Ok(()) => Ok(()),
            Err(e @ tungstenite::Error::ConnectionClosed)
            | Err(e @ tungstenite::Error::AlreadyClosed) => {
                self.connected = false;
                Err(NetError::SendError(e))
            }
            Err(e) => Err(NetError::SendError(e)),
        }
    }
}
