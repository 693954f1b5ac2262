//! # [![](https://img.shields.io/crates/v/cosim.svg)](https://crates.io/crates/cosim) | [GitHub](https://github.com/cosim-rs/cosim)
//!
//! Coroutine-based cosimulation testbench core for HDL simulators.
//!
//! `cosim` lets async Rust tasks observe and drive signals inside a
//! Verilog/VHDL simulator through the GPI (generic programmatic
//! interface). Many concurrent tasks are multiplexed onto the single
//! simulator event stream by a cooperative scheduler which reifies
//! simulator callbacks as awaitable [`Trigger`]s, tracks the simulator's
//! delta-cycle phases, and batches signal writes for deterministic replay
//! at the ReadWrite phase boundary.
//!
//! ## Layers
//!
//! * [`ffi`]: the raw C ABI shared with the simulator bridge.
//! * [`gpi`]: typed, safe entry points over an installable simulator
//!   backend.
//! * the standard interface: [`Trigger`], [`TaskHandle`], the
//!   scheduler, signal handles and the [`types`] value library.
//!
//! ## A testbench task
//!
//! ```no_run
//! use cosim::{start_soon, TaskHandle, Trigger, TimeUnit};
//!
//! fn blink(led: cosim::LogicObject) -> TaskHandle<()> {
//!     start_soon(async move {
//!         loop {
//!             led.set(true)?;
//!             Trigger::timer(5.0, TimeUnit::Ns)?.await?;
//!             led.set(false)?;
//!             Trigger::timer(5.0, TimeUnit::Ns)?.await?;
//!         }
//!     })
//! }
//! ```

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate enum_primitive;
#[macro_use]
extern crate lazy_static;

pub mod ffi;
pub mod gpi;
pub mod types;

mod clock;
mod entry;
mod error;
mod handle;
mod outcome;
mod scheduler;
mod task;
mod time;
mod triggers;
mod write_scheduler;

#[cfg(test)]
mod tests;

pub use crate::clock::Clock;
pub use crate::entry::{
    argv, initialize_testbench, register_test, shutdown_testbench, top, SetupError, TestFn,
    TestFuture,
};
pub use crate::error::{Error, Result};
pub use crate::handle::{
    sim_object, Action, ArrayObject, HandleError, HierarchyObject, LogicArrayObject,
    LogicArrayValue, LogicObject, SimObject, ValueObject,
};
pub use crate::outcome::Outcome;
pub use crate::scheduler::{
    create_task, shutdown_soon, sim_phase, start, start_soon, SimPhase,
};
pub use crate::task::{TaskError, TaskHandle, TaskState};
pub use crate::time::{sim_steps, sim_time, sim_time_as, RoundMode, TimeError, TimeUnit};
pub use crate::triggers::{Event, Trigger, TriggerError, TriggerWait};
pub use crate::types::{Logic, LogicArray, Range, ValueError};
pub use crate::write_scheduler::WriteError;

pub mod prelude {
    //! The handful of names almost every testbench uses.

    pub use crate::{
        start, start_soon, Clock, Event, Logic, LogicArray, Result, RoundMode, TimeUnit, Trigger,
    };
}
