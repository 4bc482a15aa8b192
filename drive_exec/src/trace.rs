//! # Diagnostic trace
//!
//! Optional per-tick CSV trace written into the session archive. Nothing is ever read back from
//! the trace.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use util::{
    archive::{ArchiveError, Archived, Archiver},
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Path of the trace file relative to the session archive root.
pub const TRACE_PATH: &str = "drive/trace.csv";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TraceParams {
    /// If true every tick is written to the trace
    pub enabled: bool,
}

/// One row of the trace.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TraceRecord {
    /// Index of the episode, starting at 1
    pub episode: u64,

    /// Tick within the episode, starting at 1
    pub tick: u64,

    pub cte: f64,
    pub speed: f64,
    pub heading_angle: f64,
    pub steering: f64,
    pub throttle: f64,
}

/// Per-tick trace writer
pub struct Trace {
    arch: Archiver,
    record: Option<TraceRecord>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Trace {
    /// Open the trace in the session's archive directory.
    pub fn new(session: &Session) -> Result<Self, ArchiveError> {
        Ok(Self {
            arch: Archiver::from_path(session, TRACE_PATH)?,
            record: None,
        })
    }

    /// Set the record to be written on the next call to `write`.
    pub fn set(&mut self, record: TraceRecord) {
        self.record = Some(record);
    }
}

impl Archived for Trace {
    fn write(&mut self) -> Result<(), ArchiveError> {
        match self.record.take() {
            Some(r) => self.arch.serialise(r),
            None => Ok(()),
        }
    }
}
