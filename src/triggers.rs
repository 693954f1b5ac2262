//! Awaitable triggers.
//!
//! A trigger is a handle to a one-shot wakeup condition. Simulator-bound
//! triggers (timers, phase transitions, signal edges) arm a GPI callback
//! when primed; in-process triggers (events, null, task completion) fire
//! from within the scheduler. Awaiting a trigger suspends the current task
//! until the trigger fires.
//!
//! Phase-transition triggers are process-wide singletons so that every
//! task awaiting "the next ReadWrite" shares one underlying simulator
//! callback; edge triggers are interned per `(edge, signal)`.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use log::debug;

use crate::gpi::{self, CbHdl, EdgeKind, RawHdl};
use crate::handle::{LogicObject, ValueObject};
use crate::scheduler::{self, SimPhase};
use crate::task::TaskRef;
use crate::time::{RoundMode, TimeUnit};
use crate::Result;

/// An error constructing or priming a trigger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TriggerError {
    /// ReadWrite/ReadOnly may not be awaited while already in the
    /// ReadOnly phase.
    #[error("attempted illegal transition: awaiting {0} in ReadOnly phase")]
    IllegalPhaseTransition(&'static str),
    /// Timers require a positive duration.
    #[error("timer argument time must be positive, got {0}")]
    InvalidTimerValue(f64),
}

/// Which reaction entry a primed trigger fires into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reaction {
    /// The simulator-reaction entry; updates the phase and flushes writes.
    Sim,
    /// The plain reaction entry for in-process triggers.
    Internal,
}

pub(crate) enum TriggerKind {
    Timer { steps: u64 },
    ReadWrite,
    ReadOnly,
    NextTimeStep,
    Edge { sig: RawHdl, path: String, edge: EdgeKind },
    EventWait { event: Rc<EventInner> },
    Null,
    TaskComplete { task: TaskRef },
}

pub(crate) struct TriggerInner {
    kind: TriggerKind,
    primed: Cell<bool>,
    cbhdl: Cell<Option<CbHdl>>,
}

/// An awaitable wakeup condition.
///
/// `Trigger` is a cheap cloneable handle; identity (used for waiter
/// bookkeeping and the singleton guarantees) is the identity of the
/// underlying allocation, so two clones of the same trigger are the same
/// trigger.
#[derive(Clone)]
pub struct Trigger {
    inner: Rc<TriggerInner>,
}

thread_local! {
    static READ_WRITE: Trigger = Trigger::from_kind(TriggerKind::ReadWrite);
    static READ_ONLY: Trigger = Trigger::from_kind(TriggerKind::ReadOnly);
    static NEXT_TIME_STEP: Trigger = Trigger::from_kind(TriggerKind::NextTimeStep);

    static EDGE_TABLE: RefCell<HashMap<(usize, u32), Weak<TriggerInner>>> =
        RefCell::new(HashMap::new());
}

impl Trigger {
    fn from_kind(kind: TriggerKind) -> Trigger {
        Trigger {
            inner: Rc::new(TriggerInner {
                kind,
                primed: Cell::new(false),
                cbhdl: Cell::new(None),
            }),
        }
    }

    /// Fires after the given simulation time period has elapsed.
    ///
    /// Refuses durations that do not land exactly on a simulator step; use
    /// [`Trigger::timer_round`] to pick a rounding behavior. A positive
    /// duration shorter than one step is promoted to a single step.
    pub fn timer(time: f64, unit: TimeUnit) -> Result<Trigger> {
        Trigger::timer_round(time, unit, RoundMode::Error)
    }

    /// Fires after the given simulation time period, rounding fractional
    /// step counts with `round_mode`.
    pub fn timer_round(time: f64, unit: TimeUnit, round_mode: RoundMode) -> Result<Trigger> {
        if time <= 0.0 {
            return Err(TriggerError::InvalidTimerValue(time).into());
        }
        let steps = crate::time::sim_steps(time, unit, round_mode)?;
        Ok(Trigger::from_kind(TriggerKind::Timer { steps: steps.max(1) }))
    }

    /// Fires after `steps` simulator steps.
    pub fn timer_steps(steps: u64) -> Result<Trigger> {
        if steps == 0 {
            return Err(TriggerError::InvalidTimerValue(0.0).into());
        }
        Ok(Trigger::from_kind(TriggerKind::Timer { steps }))
    }

    /// Fires when the simulator enters the read-write phase of the current
    /// timestep. Singleton.
    pub fn read_write() -> Trigger {
        READ_WRITE.with(Trigger::clone)
    }

    /// Fires when the simulator enters the read-only phase of the current
    /// timestep, after which signal values are stable. Singleton.
    pub fn read_only() -> Trigger {
        READ_ONLY.with(Trigger::clone)
    }

    /// Fires when the next time step is started. Singleton.
    pub fn next_time_step() -> Trigger {
        NEXT_TIME_STEP.with(Trigger::clone)
    }

    /// Fires immediately upon priming, without consuming simulation time.
    ///
    /// Awaiting it reschedules the current task behind everything already
    /// queued.
    pub fn null() -> Trigger {
        Trigger::from_kind(TriggerKind::Null)
    }

    /// Fires on a transition of `signal` to `1`.
    pub fn rising_edge(signal: &LogicObject) -> Trigger {
        Trigger::edge_interned(signal.raw(), signal.path().to_owned(), EdgeKind::RISING)
    }

    /// Fires on a transition of `signal` to `0`.
    pub fn falling_edge(signal: &LogicObject) -> Trigger {
        Trigger::edge_interned(signal.raw(), signal.path().to_owned(), EdgeKind::FALLING)
    }

    /// Fires on any value change of `signal`.
    pub fn edge<T: ValueObject>(signal: &T) -> Trigger {
        Trigger::edge_interned(signal.raw(), signal.path().to_owned(), EdgeKind::VALUE_CHANGE)
    }

    // Keyed-singleton lookup: one live trigger per (signal, edge).
    fn edge_interned(sig: RawHdl, path: String, edge: EdgeKind) -> Trigger {
        EDGE_TABLE.with(|table| {
            let key = (sig.0, edge.bits());
            let mut table = table.borrow_mut();
            if let Some(inner) = table.get(&key).and_then(Weak::upgrade) {
                return Trigger { inner };
            }
            let trigger = Trigger::from_kind(TriggerKind::Edge { sig, path, edge });
            table.retain(|_, w| w.strong_count() > 0);
            table.insert(key, Rc::downgrade(&trigger.inner));
            trigger
        })
    }

    pub(crate) fn task_complete(task: TaskRef) -> Trigger {
        Trigger::from_kind(TriggerKind::TaskComplete { task })
    }

    pub(crate) fn from_inner(inner: Rc<TriggerInner>) -> Trigger {
        Trigger { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<TriggerInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn kind(&self) -> &TriggerKind {
        &self.inner.kind
    }

    /// Identity comparison; clones of one trigger compare equal.
    pub fn same(&self, other: &Trigger) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the trigger is bound to a simulator callback (consumes
    /// simulation time) rather than firing from within the scheduler.
    pub fn is_sim_bound(&self) -> bool {
        matches!(
            self.inner.kind,
            TriggerKind::Timer { .. }
                | TriggerKind::ReadWrite
                | TriggerKind::ReadOnly
                | TriggerKind::NextTimeStep
                | TriggerKind::Edge { .. }
        )
    }

    pub(crate) fn primed(&self) -> bool {
        self.inner.primed.get()
    }

    /// Arms the trigger so that its firing enters the scheduler through
    /// `reaction`. Failures are surfaced synchronously and leave the
    /// trigger unprimed.
    pub(crate) fn prime(&self, reaction: Reaction) -> Result<()> {
        match &self.inner.kind {
            TriggerKind::Timer { steps } => {
                if self.inner.cbhdl.get().is_none() {
                    let hdl = gpi::register_timed_callback(*steps, self.fire_callback(reaction))?;
                    self.inner.cbhdl.set(Some(hdl));
                }
            }
            TriggerKind::ReadWrite => {
                if scheduler::sim_phase() == SimPhase::ReadOnly {
                    return Err(TriggerError::IllegalPhaseTransition("ReadWrite").into());
                }
                if self.inner.cbhdl.get().is_none() {
                    let hdl = gpi::register_rwsynch_callback(self.fire_callback(reaction))?;
                    self.inner.cbhdl.set(Some(hdl));
                }
            }
            TriggerKind::ReadOnly => {
                if scheduler::sim_phase() == SimPhase::ReadOnly {
                    return Err(TriggerError::IllegalPhaseTransition("ReadOnly").into());
                }
                if self.inner.cbhdl.get().is_none() {
                    let hdl = gpi::register_readonly_callback(self.fire_callback(reaction))?;
                    self.inner.cbhdl.set(Some(hdl));
                }
            }
            TriggerKind::NextTimeStep => {
                if self.inner.cbhdl.get().is_none() {
                    let hdl = gpi::register_nextstep_callback(self.fire_callback(reaction))?;
                    self.inner.cbhdl.set(Some(hdl));
                }
            }
            TriggerKind::Edge { sig, edge, .. } => {
                if self.inner.cbhdl.get().is_none() {
                    let hdl = gpi::register_value_change_callback(
                        *sig,
                        *edge,
                        self.fire_callback(reaction),
                    )?;
                    self.inner.cbhdl.set(Some(hdl));
                }
            }
            TriggerKind::EventWait { event } => {
                if self.inner.primed.get() {
                    return Ok(());
                }
                event.waiters.borrow_mut().push(self.clone());
            }
            TriggerKind::Null => {
                // Fires before it is ever marked primed.
                self.fire(reaction);
                return Ok(());
            }
            TriggerKind::TaskComplete { task } => {
                if task.done() {
                    self.fire(reaction);
                    return Ok(());
                }
            }
        }
        self.inner.primed.set(true);
        Ok(())
    }

    /// Detaches the trigger, releasing any outstanding simulator callback.
    /// Idempotent.
    pub(crate) fn unprime(&self) {
        if let TriggerKind::EventWait { event } = &self.inner.kind {
            if self.inner.primed.get() {
                event.waiters.borrow_mut().retain(|t| !t.same(self));
            }
        }
        if let Some(hdl) = self.inner.cbhdl.get() {
            gpi::deregister(hdl);
        }
        self.cleanup();
    }

    /// Returns the trigger to the unprimed state after it has fired; the
    /// consumed callback handle is dropped without deregistration.
    pub(crate) fn cleanup(&self) {
        self.inner.cbhdl.set(None);
        self.inner.primed.set(false);
    }

    fn fire_callback(&self, reaction: Reaction) -> gpi::GpiCallback {
        let trigger = self.clone();
        Box::new(move || trigger.fire(reaction))
    }

    pub(crate) fn fire(&self, reaction: Reaction) {
        match reaction {
            Reaction::Sim => scheduler::with_scheduler(|s| s.sim_react(self)),
            Reaction::Internal => scheduler::with_scheduler(|s| s.react(self)),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.inner.kind {
            TriggerKind::Timer { steps } => write!(f, "Timer({} steps)", steps),
            TriggerKind::ReadWrite => write!(f, "ReadWrite()"),
            TriggerKind::ReadOnly => write!(f, "ReadOnly()"),
            TriggerKind::NextTimeStep => write!(f, "NextTimeStep()"),
            TriggerKind::Edge { path, edge, .. } => {
                if *edge == EdgeKind::RISING {
                    write!(f, "RisingEdge({})", path)
                } else if *edge == EdgeKind::FALLING {
                    write!(f, "FallingEdge({})", path)
                } else {
                    write!(f, "Edge({})", path)
                }
            }
            TriggerKind::EventWait { .. } => write!(f, "Event.wait()"),
            TriggerKind::Null => write!(f, "NullTrigger()"),
            TriggerKind::TaskComplete { task } => write!(f, "TaskComplete({})", task),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl IntoFuture for Trigger {
    type Output = Result<()>;
    type IntoFuture = TriggerWait;

    fn into_future(self) -> TriggerWait {
        TriggerWait { trigger: Some(self), registered: false }
    }
}

/// The future behind `trigger.await`.
///
/// The first poll hands the trigger to the scheduler and suspends; the
/// scheduler resumes the task when the trigger fires, injecting either a
/// plain wakeup or an error raised at this await site.
pub struct TriggerWait {
    trigger: Option<Trigger>,
    registered: bool,
}

impl Future for TriggerWait {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        let this = self.get_mut();
        if !this.registered {
            this.registered = true;
            let trigger = this.trigger.take().expect("trigger await polled after completion");
            scheduler::yield_trigger(trigger);
            Poll::Pending
        } else {
            match scheduler::take_resume_outcome() {
                Some(outcome) => Poll::Ready(outcome.into_result()),
                None => Poll::Pending,
            }
        }
    }
}

pub(crate) struct EventInner {
    waiters: RefCell<Vec<Trigger>>,
    fired: Cell<bool>,
    name: Option<String>,
}

/// A rendezvous for signaling between tasks.
///
/// Awaiting [`Event::wait`] blocks the awaiting task until [`Event::set`]
/// is called. The set state latches: once set, further waits fire
/// immediately until [`Event::clear`].
#[derive(Clone)]
pub struct Event {
    inner: Rc<EventInner>,
}

impl Event {
    pub fn new() -> Event {
        Event::named(None)
    }

    pub fn with_name(name: &str) -> Event {
        Event::named(Some(name.to_owned()))
    }

    fn named(name: Option<String>) -> Event {
        Event {
            inner: Rc::new(EventInner {
                waiters: RefCell::new(Vec::new()),
                fired: Cell::new(false),
                name,
            }),
        }
    }

    /// A trigger that fires once the event is set.
    ///
    /// Each call returns a fresh per-waiter trigger so the scheduler can
    /// keep a unique trigger-to-task mapping; once the event is set, a
    /// pre-fired trigger is returned instead.
    pub fn wait(&self) -> Trigger {
        if self.inner.fired.get() {
            return Trigger::null();
        }
        Trigger::from_kind(TriggerKind::EventWait { event: self.inner.clone() })
    }

    /// Sets the event and wakes all waiting tasks in the order they
    /// awaited.
    pub fn set(&self) {
        self.inner.fired.set(true);
        let waiters = self.inner.waiters.replace(Vec::new());
        if !waiters.is_empty() {
            debug!("{:?} waking {} waiter(s)", self, waiters.len());
        }
        for trigger in waiters {
            trigger.fire(Reaction::Internal);
        }
    }

    /// Clears a set event, re-enabling blocking waits.
    pub fn clear(&self) {
        self.inner.fired.set(false);
    }

    /// Whether the event is currently set.
    pub fn is_set(&self) -> bool {
        self.inner.fired.get()
    }
}

impl Default for Event {
    fn default() -> Event {
        Event::new()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.inner.name {
            Some(name) => write!(f, "Event({})", name),
            None => write!(f, "Event"),
        }
    }
}
