//! A simple clock generator.

use log::debug;

use crate::handle::LogicObject;
use crate::scheduler::start_soon;
use crate::task::TaskHandle;
use crate::time::{sim_steps, RoundMode, TimeUnit};
use crate::triggers::{Trigger, TriggerError};
use crate::Result;

/// Drives a scalar logic signal with a fixed-period square wave.
///
/// ```no_run
/// # fn demo(dut: &cosim::HierarchyObject) -> cosim::Result<()> {
/// use cosim::{Clock, TimeUnit};
///
/// let clock = Clock::new(&dut.logic("clk")?, 10.0, TimeUnit::Ns)?;
/// let _clk_task = clock.start();
/// # Ok(())
/// # }
/// ```
pub struct Clock {
    signal: LogicObject,
    t_high: u64,
    t_low: u64,
}

impl Clock {
    /// Creates a clock over `signal` with the given period.
    ///
    /// The period must span at least two simulator steps so that both
    /// half-periods are non-empty; an odd step count leaves the low phase
    /// one step longer.
    pub fn new(signal: &LogicObject, period: f64, unit: TimeUnit) -> Result<Clock> {
        let steps = sim_steps(period, unit, RoundMode::Error)?;
        if steps < 2 {
            return Err(TriggerError::InvalidTimerValue(period).into());
        }
        let t_high = steps / 2;
        Ok(Clock { signal: signal.clone(), t_high, t_low: steps - t_high })
    }

    /// Starts driving the clock in a background task, high phase first.
    ///
    /// Kill the returned task to stop the clock.
    pub fn start(&self) -> TaskHandle<()> {
        let signal = self.signal.clone();
        let (t_high, t_low) = (self.t_high, self.t_low);
        debug!("starting clock on {} ({} + {} steps)", signal.path(), t_high, t_low);
        start_soon(async move {
            loop {
                signal.set(true)?;
                Trigger::timer_steps(t_high)?.await?;
                signal.set(false)?;
                Trigger::timer_steps(t_low)?.await?;
            }
        })
    }
}
