//! The task scheduler.
//!
//! How it generally works: tasks are queued with an [`Outcome`] in the run
//! queue. The event loop pops them FIFO and resumes each one, injecting
//! its outcome at the pending await. A resumed task either finishes or
//! suspends on a trigger; suspension registers the task in the
//! trigger-to-waiters map and primes the trigger with a reaction entry.
//! When a trigger fires, its reaction queues every waiting task (in their
//! await order) and the loop repeats.
//!
//! Simulator-bound triggers enter through [`Scheduler::sim_react`], which
//! also tracks the current [`SimPhase`] and flushes the deferred writes on
//! entry to the ReadWrite phase. Everything runs on the one thread the
//! simulator calls into.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use log::{debug, error};

use crate::gpi;
use crate::outcome::Outcome;
use crate::task::{self, Advance, TaskError, TaskHandle, TaskRef, TaskState};
use crate::triggers::{Reaction, Trigger, TriggerKind};
use crate::write_scheduler;
use crate::Result;

lazy_static! {
    // Logging in the hot path is gated on an env flag so the disabled
    // case costs one branch.
    static ref SCHED_DEBUG: bool = std::env::var_os("COCOTB_SCHEDULER_DEBUG").is_some();
}

/// A phase of the simulator time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    /// The beginning of a time step or a value-change phase.
    Normal,
    /// The end-of-timestep window in which user code may still write.
    ReadWrite,
    /// The final window in which signals are stable and writes are
    /// forbidden.
    ReadOnly,
}

impl fmt::Display for SimPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

thread_local! {
    static SCHEDULER: RefCell<Option<Rc<Scheduler>>> = RefCell::new(None);
    static SIM_PHASE: Cell<SimPhase> = Cell::new(SimPhase::Normal);

    // Hand-off slots between the scheduler and the await adapters of the
    // task being resumed.
    static RESUME_OUTCOME: RefCell<Option<Outcome<()>>> = RefCell::new(None);
    static YIELDED: RefCell<Option<Trigger>> = RefCell::new(None);
}

/// The current phase of the time step.
///
/// A task observes one coherent value for the whole span between two of
/// its awaits; the phase only changes when control is with the simulator.
pub fn sim_phase() -> SimPhase {
    SIM_PHASE.with(|p| p.get())
}

fn set_sim_phase(phase: SimPhase) {
    SIM_PHASE.with(|p| p.set(phase));
}

/// Creates the scheduler for this thread. `complete_cb` runs after a
/// termination sequence finishes.
pub(crate) fn init_scheduler(complete_cb: Box<dyn Fn()>) {
    SCHEDULER.with(|s| {
        let mut slot = s.borrow_mut();
        assert!(slot.is_none(), "scheduler already initialized on this thread");
        *slot = Some(Rc::new(Scheduler::new(complete_cb)));
    });
}

/// Drops the scheduler and resets the phase.
pub(crate) fn teardown_scheduler() {
    SCHEDULER.with(|s| *s.borrow_mut() = None);
    set_sim_phase(SimPhase::Normal);
}

pub(crate) fn with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    let sched = SCHEDULER
        .with(|s| s.borrow().clone())
        .expect("scheduler is not initialized on this thread");
    f(&sched)
}

pub(crate) fn try_with_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    SCHEDULER.with(|s| s.borrow().clone()).map(|sched| f(&sched))
}

pub(crate) fn set_resume_outcome(outcome: Outcome<()>) {
    RESUME_OUTCOME.with(|slot| *slot.borrow_mut() = Some(outcome));
}

pub(crate) fn take_resume_outcome() -> Option<Outcome<()>> {
    RESUME_OUTCOME.with(|slot| slot.borrow_mut().take())
}

/// Records the trigger the currently running task is suspending on.
pub(crate) fn yield_trigger(trigger: Trigger) {
    YIELDED.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            panic!("a task may only await one trigger at a time");
        }
        *slot = Some(trigger);
    });
}

pub(crate) fn take_yielded_trigger() -> Option<Trigger> {
    YIELDED.with(|slot| slot.borrow_mut().take())
}

/// The main task scheduler.
pub(crate) struct Scheduler {
    /// Pending tasks for each trigger, in FIFO await order. Kept in
    /// trigger insertion order so termination is deterministic.
    waiters: RefCell<Vec<(Trigger, Vec<TaskRef>)>>,
    /// Queued tasks and the outcomes to resume them with.
    run_queue: RefCell<VecDeque<(TaskRef, Outcome<()>)>>,
    current: RefCell<Option<TaskRef>>,
    terminate: Cell<bool>,
    complete_cb: Box<dyn Fn()>,
}

impl Scheduler {
    fn new(complete_cb: Box<dyn Fn()>) -> Scheduler {
        Scheduler {
            waiters: RefCell::new(Vec::new()),
            run_queue: RefCell::new(VecDeque::new()),
            current: RefCell::new(None),
            terminate: Cell::new(false),
            complete_cb,
        }
    }

    pub(crate) fn current_task(&self) -> Option<TaskRef> {
        self.current.borrow().clone()
    }

    pub(crate) fn shutdown_soon(&self) {
        self.terminate.set(true);
    }

    /// Entry point for fired simulator-bound triggers. Tracks the
    /// simulator phase, flushes deferred writes on ReadWrite entry, wakes
    /// the trigger's waiters and drains the event loop.
    pub(crate) fn sim_react(&self, trigger: &Trigger) {
        match trigger.kind() {
            TriggerKind::ReadWrite => set_sim_phase(SimPhase::ReadWrite),
            TriggerKind::ReadOnly => set_sim_phase(SimPhase::ReadOnly),
            _ => set_sim_phase(SimPhase::Normal),
        }
        if matches!(trigger.kind(), TriggerKind::ReadWrite) {
            write_scheduler::apply_scheduled_writes();
        }
        self.react(trigger);
        self.event_loop();
    }

    /// Wakes every task waiting on `trigger`, in FIFO await order.
    pub(crate) fn react(&self, trigger: &Trigger) {
        if *SCHED_DEBUG {
            debug!("trigger fired: {}", trigger);
        }

        let waiting = {
            let mut waiters = self.waiters.borrow_mut();
            match waiters.iter().position(|(t, _)| t.same(trigger)) {
                Some(pos) => waiters.remove(pos).1,
                None => {
                    // A fired simulator trigger with no waiters should have
                    // been unprimed already.
                    if trigger.is_sim_bound() {
                        error!("no tasks waiting on trigger that fired: {}", trigger);
                    } else if *SCHED_DEBUG {
                        debug!("no tasks waiting on trigger that fired: {}", trigger);
                    }
                    return;
                }
            }
        };

        if *SCHED_DEBUG {
            debug!("{} pending task(s) for trigger {}", waiting.len(), trigger);
        }

        for task in waiting {
            task.set_current_trigger(None);
            self.schedule_task(task, Outcome::Value(()));
        }

        trigger.cleanup();
    }

    /// Runs the main event loop until the queue drains or termination is
    /// requested.
    pub(crate) fn event_loop(&self) {
        while !self.terminate.get() {
            let next = self.run_queue.borrow_mut().pop_front();
            let Some((task, outcome)) = next else { break };
            if *SCHED_DEBUG {
                debug!("scheduling {}", task);
            }
            self.resume_task(&task, outcome);
        }

        if self.terminate.get() {
            self.handle_termination();
        } else if *SCHED_DEBUG {
            debug!("all tasks scheduled, handing control back to simulator");
        }
    }

    /// Queues `task` to be resumed with `outcome`.
    ///
    /// ## Panics
    ///
    /// Panics when the task is already queued; a task appears in the run
    /// queue at most once.
    pub(crate) fn schedule_task(&self, task: TaskRef, outcome: Outcome<()>) {
        let mut queue = self.run_queue.borrow_mut();
        if queue.iter().any(|(t, _)| Rc::ptr_eq(t, &task)) {
            panic!("task was queued more than once");
        }
        task.set_state(TaskState::Scheduled);
        queue.push_back((task, outcome));
    }

    /// Schedules `task` to be resumed when `trigger` fires.
    fn schedule_task_upon(&self, task: &TaskRef, trigger: Trigger) {
        task.set_current_trigger(Some(trigger.clone()));
        task.set_state(TaskState::Pending);

        let sole_waiter = {
            let mut waiters = self.waiters.borrow_mut();
            match waiters.iter_mut().find(|(t, _)| t.same(&trigger)) {
                Some((_, tasks)) => {
                    tasks.push(task.clone());
                    false
                }
                None => {
                    waiters.push((trigger.clone(), vec![task.clone()]));
                    true
                }
            }
        };

        if !trigger.primed() {
            if !sole_waiter {
                panic!("more than one task waiting on an unprimed trigger");
            }
            let reaction = if trigger.is_sim_bound() { Reaction::Sim } else { Reaction::Internal };
            if let Err(err) = trigger.prime(reaction) {
                // The trigger will never fire; discard the association and
                // raise the failure inside the task instead.
                let mut waiters = self.waiters.borrow_mut();
                if let Some(pos) = waiters.iter().position(|(t, _)| t.same(&trigger)) {
                    waiters.remove(pos);
                }
                drop(waiters);
                task.set_current_trigger(None);
                self.schedule_task(task.clone(), Outcome::Error(err));
            }
        }
    }

    /// Converts a yielded trigger into the trigger to actually wait on.
    ///
    /// Awaiting an unstarted task schedules it as a side effect.
    fn trigger_from_any(&self, trigger: Trigger) -> Trigger {
        if let TriggerKind::TaskComplete { task } = trigger.kind() {
            if task.state() == TaskState::Unstarted {
                if *SCHED_DEBUG {
                    debug!("scheduling unstarted task {}", task);
                }
                self.schedule_task(task.clone(), Outcome::Value(()));
            } else if *SCHED_DEBUG {
                debug!("joining already running task {}", task);
            }
        }
        trigger
    }

    /// Resumes `task` with `outcome`, running it until it finishes or
    /// reaches its next await.
    fn resume_task(&self, task: &TaskRef, outcome: Outcome<()>) {
        {
            let mut current = self.current.borrow_mut();
            if current.is_some() {
                panic!("resume_task() called while another task is executing");
            }
            *current = Some(task.clone());
        }

        let advanced = task.advance(outcome);
        // Drop any outcome the task did not consume.
        let _ = take_resume_outcome();

        if task.done() {
            if *SCHED_DEBUG {
                debug!("{} completed", task);
            }
            self.unschedule(task);
        }

        if !self.terminate.get() && !task.done() {
            match advanced {
                Advance::Yielded(trigger) => {
                    if *SCHED_DEBUG {
                        debug!("{} awaiting {} ({})", task, trigger, sim_phase());
                    }
                    let trigger = self.trigger_from_any(trigger);
                    self.schedule_task_upon(task, trigger);
                }
                Advance::Bare => {
                    task.abort_with(TaskError::ForeignAwait.into());
                }
                Advance::Finished => unreachable!("finished task reported not done"),
            }
        }

        *self.current.borrow_mut() = None;
    }

    /// Removes `task` from the run queue and from any waiter list,
    /// unpriming triggers left without waiters, and fires the task's
    /// completion trigger if anything awaits it.
    pub(crate) fn unschedule(&self, task: &TaskRef) {
        self.run_queue.borrow_mut().retain(|(t, _)| !Rc::ptr_eq(t, task));

        if let Some(trigger) = task.current_trigger() {
            task.set_current_trigger(None);
            let dangling = {
                let mut waiters = self.waiters.borrow_mut();
                match waiters.iter().position(|(t, _)| t.same(&trigger)) {
                    Some(pos) => {
                        waiters[pos].1.retain(|t| !Rc::ptr_eq(t, task));
                        if waiters[pos].1.is_empty() {
                            waiters.remove(pos);
                            true
                        } else {
                            false
                        }
                    }
                    None => false,
                }
            };
            if dangling {
                trigger.unprime();
            }
        }

        if self.terminate.get() {
            return;
        }

        if let Some(complete) = task.live_complete_trigger() {
            if self.has_waiters_on(&complete) {
                self.react(&complete);
            }
        }
    }

    pub(crate) fn has_waiters_on(&self, trigger: &Trigger) -> bool {
        self.waiters.borrow().iter().any(|(t, _)| t.same(trigger))
    }

    fn handle_termination(&self) {
        if *SCHED_DEBUG {
            debug!("scheduler terminating...");
        }
        self.cleanup();
        self.terminate.set(false);
        (self.complete_cb)();
    }

    /// Unprimes all pending triggers and kills every waiting and queued
    /// task.
    fn cleanup(&self) {
        let items: Vec<Vec<TaskRef>> =
            self.waiters.borrow().iter().map(|(_, tasks)| tasks.clone()).collect();
        for waiting in items.iter().rev() {
            for task in waiting {
                if *SCHED_DEBUG {
                    debug!("killing {}", task);
                }
                task.kill();
            }
            // killing the last waiter of a trigger unprimes it through
            // unschedule
        }
        assert!(
            self.waiters.borrow().is_empty(),
            "triggers remained primed after killing all waiting tasks"
        );

        loop {
            let next = self.run_queue.borrow_mut().pop_front();
            match next {
                Some((task, _)) => task.kill(),
                None => break,
            }
        }
    }
}

fn task_done_callback(task: &TaskRef) {
    // cancellation is not a failure
    if task.cancelled() {
        return;
    }
    // a task awaiting this one will observe the outcome itself
    if let Some(complete) = task.live_complete_trigger() {
        let watched = try_with_scheduler(|s| s.has_waiters_on(&complete)).unwrap_or(false);
        if watched {
            return;
        }
    }
    let Some(err) = task.failure() else { return };
    // a failure nobody is watching fails the testbench
    error!("Exception raised by {}: {}", task, err);
    gpi::stop_simulator();
    try_with_scheduler(|s| s.shutdown_soon());
}

/// Wraps a future into an unscheduled [`TaskHandle`].
///
/// The task can later be scheduled with [`start`] or [`start_soon`].
pub fn create_task<T, F>(fut: F) -> TaskHandle<T>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    task::new_task(fut)
}

/// Schedules a future to run concurrently as a [`TaskHandle`].
///
/// This is not an `async` function: the new task will not execute until
/// the calling task yields control, and runs after everything already
/// queued.
pub fn start_soon<T, F>(fut: F) -> TaskHandle<T>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let handle = create_task(fut);
    handle.inner().add_done_callback(Box::new(task_done_callback));
    with_scheduler(|s| s.schedule_task(handle.inner().clone(), Outcome::Value(())));
    handle
}

/// Schedules a future to run concurrently, then yields control so that it
/// executes before the calling task resumes.
pub async fn start<T, F>(fut: F) -> Result<TaskHandle<T>>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let handle = start_soon(fut);
    Trigger::null().await?;
    Ok(handle)
}

/// Requests scheduler termination: at the next event-loop iteration all
/// tasks are killed and the completion callback runs.
pub fn shutdown_soon() {
    with_scheduler(|s| s.shutdown_soon());
}
