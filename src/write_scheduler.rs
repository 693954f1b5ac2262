//! The deferred-write scheduler.
//!
//! Writes issued in the Normal phase must not perturb the current delta
//! cycle; they are coalesced per handle and replayed, in order, when the
//! simulator enters the next ReadWrite phase. A permanent background task
//! makes sure a ReadWrite callback is primed whenever at least one write
//! is pending, so that the phase actually occurs.

use std::cell::RefCell;
use std::collections::VecDeque;

use log::{debug, error};

use crate::gpi::RawHdl;
use crate::scheduler::{self, SimPhase};
use crate::task::TaskHandle;
use crate::triggers::{Event, Trigger};
use crate::Result;

/// An error scheduling a deferred write.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WriteError {
    /// Writes are forbidden while the simulator is in the ReadOnly phase.
    #[error("write to object {path} was scheduled during a read-only simulation phase")]
    DuringReadOnly { path: String },
}

/// A captured simulator set call, applied at most once.
pub(crate) type WriteCall = Box<dyn FnOnce() -> Result<()>>;

struct WriteSchedulerState {
    /// Pending writes, oldest first; at most one entry per handle.
    calls: RefCell<VecDeque<(RawHdl, WriteCall)>>,
    writes_pending: Event,
    write_task: RefCell<Option<TaskHandle<()>>>,
}

thread_local! {
    static STATE: WriteSchedulerState = WriteSchedulerState {
        calls: RefCell::new(VecDeque::new()),
        writes_pending: Event::with_name("writes_pending"),
        write_task: RefCell::new(None),
    };
}

/// The permanent forcing task: whenever writes are pending, await a
/// ReadWrite so the simulator enters the phase that flushes them.
async fn do_writes() -> Result<()> {
    loop {
        let pending = STATE.with(|s| s.writes_pending.clone());
        pending.wait().await?;
        Trigger::read_write().await?;
    }
}

/// Starts the write-forcing background task. Idempotent.
pub(crate) fn start_write_scheduler() {
    STATE.with(|s| {
        let mut task = s.write_task.borrow_mut();
        if task.is_none() {
            *task = Some(crate::scheduler::start_soon(do_writes()));
        }
    });
}

/// Kills the forcing task and discards all pending writes.
pub(crate) fn stop_write_scheduler() {
    STATE.with(|s| {
        if let Some(task) = s.write_task.borrow_mut().take() {
            task.kill();
        }
        s.calls.borrow_mut().clear();
        s.writes_pending.clear();
    });
}

/// Applies every pending write in FIFO order and clears the pending flag.
///
/// Called by the scheduler at the start of the ReadWrite phase.
pub(crate) fn apply_scheduled_writes() {
    loop {
        let next = STATE.with(|s| s.calls.borrow_mut().pop_front());
        let Some((handle, call)) = next else { break };
        debug!("applying scheduled write to {:?}", handle);
        if let Err(err) = call() {
            error!("scheduled write to {:?} failed: {}", handle, err);
        }
    }
    STATE.with(|s| s.writes_pending.clear());
}

/// Queues `call` to run at the next ReadWrite phase.
///
/// Within the ReadWrite phase the call is applied immediately. In the
/// ReadOnly phase scheduling fails. Otherwise the call replaces any write
/// already pending for `handle` and moves it to the back of the queue:
/// only the last write per handle per timestep is applied.
pub(crate) fn schedule_write(handle: RawHdl, path: &str, call: WriteCall) -> Result<()> {
    match scheduler::sim_phase() {
        SimPhase::ReadWrite => call(),
        SimPhase::ReadOnly => {
            Err(WriteError::DuringReadOnly { path: path.to_owned() }.into())
        }
        SimPhase::Normal => {
            STATE.with(|s| {
                let mut calls = s.calls.borrow_mut();
                calls.retain(|(h, _)| *h != handle);
                calls.push_back((handle, call));
            });
            STATE.with(|s| s.writes_pending.set());
            Ok(())
        }
    }
}

/// The number of writes currently pending. Exposed for tests.
#[cfg(test)]
pub(crate) fn pending_write_count() -> usize {
    STATE.with(|s| s.calls.borrow().len())
}
