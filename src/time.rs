//! Simulation time units and conversions.
//!
//! All simulator-facing durations are integer step counts at the
//! simulator's native precision; this module converts user-facing
//! `(value, unit)` quantities to and from steps.

use crate::gpi;
use crate::Result;

/// A time unit.
///
/// `Step` means the simulator's native precision, as reported by the
/// bridge (e.g. `-12` for 1 ps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Step,
    Fs,
    Ps,
    Ns,
    Us,
    Ms,
    Sec,
}

impl TimeUnit {
    /// The unit's magnitude as a power of ten, or `None` for `Step`.
    fn exponent(self) -> Option<i32> {
        match self {
            TimeUnit::Step => None,
            TimeUnit::Fs => Some(-15),
            TimeUnit::Ps => Some(-12),
            TimeUnit::Ns => Some(-9),
            TimeUnit::Us => Some(-6),
            TimeUnit::Ms => Some(-3),
            TimeUnit::Sec => Some(0),
        }
    }
}

/// How to handle durations that do not land exactly on a simulator step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundMode {
    /// Refuse non-integral step counts.
    Error,
    Round,
    Ceil,
    Floor,
}

/// An error converting a time quantity to simulator steps.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeError {
    #[error(
        "time {value} {unit:?} is not an integral number of simulator steps \
         (and the rounding mode is 'error')"
    )]
    NonIntegralSteps { value: f64, unit: TimeUnit },
}

// Tolerance for float fuzz when deciding whether a quantity is integral.
const STEP_EPSILON: f64 = 1e-9;

/// Converts `value` in `unit` to an exact number of simulator steps, using
/// the simulator-reported time precision.
pub fn sim_steps(value: f64, unit: TimeUnit, round_mode: RoundMode) -> Result<u64> {
    let steps = match unit.exponent() {
        None => value,
        Some(exp) => {
            let precision = gpi::get_sim_precision()? as i32;
            value * 10f64.powi(exp - precision)
        }
    };

    let rounded = steps.round();
    let integral = (steps - rounded).abs() <= STEP_EPSILON * steps.abs().max(1.0);
    let steps = match round_mode {
        RoundMode::Error => {
            if !integral {
                return Err(TimeError::NonIntegralSteps { value, unit }.into());
            }
            rounded
        }
        RoundMode::Round => rounded,
        RoundMode::Ceil => {
            if integral {
                rounded
            } else {
                steps.ceil()
            }
        }
        RoundMode::Floor => {
            if integral {
                rounded
            } else {
                steps.floor()
            }
        }
    };
    Ok(steps.max(0.0) as u64)
}

/// Converts a step count back into `unit`.
pub fn time_from_steps(steps: u64, unit: TimeUnit) -> Result<f64> {
    match unit.exponent() {
        None => Ok(steps as f64),
        Some(exp) => {
            let precision = gpi::get_sim_precision()? as i32;
            Ok(steps as f64 * 10f64.powi(precision - exp))
        }
    }
}

/// The current simulation time in simulator steps.
pub fn sim_time() -> Result<u64> {
    gpi::get_sim_time()
}

/// The current simulation time converted to `unit`.
pub fn sim_time_as(unit: TimeUnit) -> Result<f64> {
    time_from_steps(sim_time()?, unit)
}
