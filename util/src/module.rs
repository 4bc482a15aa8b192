//! # Cyclic modules
//!
//! A cyclic module is initialised once and then driven with one input per control tick, producing
//! an output and a status for each. The episode runner is the main implementor.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

pub trait CyclicModule {
    type InitData;
    type InitError;

    /// Data consumed on each tick
    type InputData;

    /// Data produced on each tick
    type OutputData;

    /// Where the module is in its cycle after a tick
    type StatusReport;

    type ProcError;

    /// (Re)initialise the module. Modules which archive data do so under `session` when one is
    /// given.
    fn init(&mut self, init_data: Self::InitData, session: Option<&Session>)
        -> Result<(), Self::InitError>;

    /// Process one tick.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>;

    /// Process a sequence of ticks in order, stopping at the first error.
    fn proc_all<'a, I>(
        &mut self,
        inputs: I,
    ) -> Result<Vec<(Self::OutputData, Self::StatusReport)>, Self::ProcError>
    where
        I: IntoIterator<Item = &'a Self::InputData>,
        Self::InputData: 'a,
    {
        inputs.into_iter().map(|i| self.proc(i)).collect()
    }
}
