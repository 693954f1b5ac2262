//! Standard error type for cosim.
//!

use crate::entry::SetupError;
use crate::gpi::GpiError;
use crate::handle::HandleError;
use crate::task::TaskError;
use crate::time::TimeError;
use crate::triggers::TriggerError;
use crate::types::ValueError;
use crate::write_scheduler::WriteError;

/// `cosim` result type.
pub type Result<T> = std::result::Result<T, Error>;

/// An enum aggregating the error types of each layer of the crate.
///
/// Implements the usual error traits. Errors are cheap to clone so that a
/// failure outcome can be both stored on a task and re-raised to every
/// observer of that task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Gpi(#[from] GpiError),
    #[error("{0}")]
    Trigger(#[from] TriggerError),
    #[error("{0}")]
    Task(#[from] TaskError),
    #[error("{0}")]
    Write(#[from] WriteError),
    #[error("{0}")]
    Handle(#[from] HandleError),
    #[error("{0}")]
    Value(#[from] ValueError),
    #[error("{0}")]
    Time(#[from] TimeError),
    #[error("{0}")]
    Setup(#[from] SetupError),
}

impl Error {
    /// Returns `true` if the error is a task-cancellation error.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Task(TaskError::Cancelled { .. }))
    }
}
