//! Task resumption outcomes.

use crate::{Error, Result};

/// The value a task is resumed with: a normal value, or an error to be
/// raised at the task's suspension point.
///
/// The scheduler never unwraps outcomes itself; an `Error` outcome is
/// delivered to the pending await, which surfaces it as an `Err` for the
/// task to propagate or handle.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Value(T),
    Error(Error),
}

impl<T> Outcome<T> {
    /// Unpacks into a `Result`, re-raising a stored error.
    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Error(e) => Err(e),
        }
    }

    /// Whether this outcome carries an error.
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(res: Result<T>) -> Outcome<T> {
        match res {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Error(e),
        }
    }
}
