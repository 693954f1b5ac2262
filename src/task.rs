//! Concurrently executing tasks.
//!
//! A task wraps a user future and is driven by the scheduler: resumed with
//! an outcome, run until its next trigger await, and completed with either
//! a value or an error. Construction does not schedule; see
//! [`start_soon`][crate::start_soon] and [`start`][crate::start].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use futures::task::noop_waker;
use futures::FutureExt;
use log::debug;

use crate::outcome::Outcome;
use crate::scheduler;
use crate::triggers::{Trigger, TriggerInner};
use crate::{Error, Result};

/// An error observing or driving a task.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled.
    #[error("task was cancelled{}", fmt_cancel_msg(.msg))]
    Cancelled { msg: Option<String> },
    /// The task was killed; it finished without producing a result.
    #[error("task was killed before producing a result")]
    Killed,
    /// `result()`/`exception()` called before the task finished.
    #[error("task result is not yet available")]
    InvalidState,
    /// The task suspended on a future the scheduler does not know how to
    /// wake. Only triggers and tasks may be awaited across a suspension.
    #[error("task awaited a foreign future which suspended; only triggers and tasks can be awaited")]
    ForeignAwait,
}

fn fmt_cancel_msg(msg: &Option<String>) -> String {
    match msg {
        Some(m) => format!(": {}", m),
        None => String::new(),
    }
}

/// State of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, but never run and not scheduled.
    Unstarted,
    /// In the scheduler queue to run soon.
    Scheduled,
    /// Waiting for a trigger to fire.
    Pending,
    /// Currently running.
    Running,
    /// Finished with a value or an error.
    Finished,
    /// Cancelled before it finished.
    Cancelled,
}

pub(crate) type TaskRef = Rc<TaskInner>;

type Coro = LocalBoxFuture<'static, ()>;

/// The result of driving a task one step.
pub(crate) enum Advance {
    /// The coroutine ran to completion.
    Finished,
    /// The coroutine suspended on a trigger.
    Yielded(Trigger),
    /// The coroutine suspended without handing the scheduler a trigger.
    Bare,
}

thread_local! {
    static NEXT_TASK_ID: Cell<usize> = Cell::new(0);
}

/// The type-erased task object shared between the scheduler, triggers,
/// and typed handles.
pub(crate) struct TaskInner {
    id: usize,
    coro: RefCell<Option<Coro>>,
    state: Cell<TaskState>,
    /// Back-reference to the trigger this task is currently waiting on.
    trigger: RefCell<Option<Trigger>>,
    /// The error the task finished with, if any.
    failure: RefCell<Option<Error>>,
    cancel_error: RefCell<Option<TaskError>>,
    done_callbacks: RefCell<Vec<Box<dyn Fn(&TaskRef)>>>,
    /// Lazily-created authoritative completion trigger.
    complete: RefCell<Option<Weak<TriggerInner>>>,
}

impl TaskInner {
    pub(crate) fn state(&self) -> TaskState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.set(state);
    }

    pub(crate) fn done(&self) -> bool {
        matches!(self.state.get(), TaskState::Finished | TaskState::Cancelled)
    }

    pub(crate) fn failure(&self) -> Option<Error> {
        self.failure.borrow().clone()
    }

    pub(crate) fn current_trigger(&self) -> Option<Trigger> {
        self.trigger.borrow().clone()
    }

    pub(crate) fn set_current_trigger(&self, trigger: Option<Trigger>) {
        *self.trigger.borrow_mut() = trigger;
    }

    /// The task's completion trigger, created on first access. Repeated
    /// access returns the same live instance.
    pub(crate) fn complete_trigger(self: &Rc<Self>) -> Trigger {
        if let Some(trigger) = self.complete.borrow().as_ref().and_then(Weak::upgrade) {
            return Trigger::from_inner(trigger);
        }
        let trigger = Trigger::task_complete(self.clone());
        *self.complete.borrow_mut() = Some(trigger.downgrade());
        trigger
    }

    /// The completion trigger, only if one is currently alive.
    pub(crate) fn live_complete_trigger(&self) -> Option<Trigger> {
        self.complete.borrow().as_ref().and_then(Weak::upgrade).map(Trigger::from_inner)
    }

    /// Drives the coroutine one step; the outcome is delivered to the
    /// pending await. Fires completion callbacks if the task finishes.
    pub(crate) fn advance(self: &Rc<Self>, outcome: Outcome<()>) -> Advance {
        self.state.set(TaskState::Running);
        scheduler::set_resume_outcome(outcome);

        let mut coro = self
            .coro
            .borrow_mut()
            .take()
            .expect("resumed a task that has no coroutine");
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        match coro.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                // discard a registration left behind by a combinator whose
                // other branch completed the task
                let _ = scheduler::take_yielded_trigger();
                self.state.set(TaskState::Finished);
                self.run_done_callbacks();
                Advance::Finished
            }
            Poll::Pending => {
                *self.coro.borrow_mut() = Some(coro);
                match scheduler::take_yielded_trigger() {
                    Some(trigger) => Advance::Yielded(trigger),
                    None => Advance::Bare,
                }
            }
        }
    }

    /// Forcibly finishes the task with an error, without resuming it.
    pub(crate) fn abort_with(self: &Rc<Self>, error: Error) {
        if self.done() {
            return;
        }
        *self.failure.borrow_mut() = Some(error);
        scheduler::try_with_scheduler(|s| s.unschedule(self));
        self.coro.borrow_mut().take();
        self.state.set(TaskState::Finished);
        self.run_done_callbacks();
    }

    /// Stops the task without injecting an error. The task finishes with
    /// no result.
    pub(crate) fn kill(self: &Rc<Self>) {
        if self.done() {
            return;
        }
        debug!("kill() called on {}", self);
        scheduler::try_with_scheduler(|s| {
            if let Some(current) = s.current_task() {
                if Rc::ptr_eq(&current, self) {
                    panic!("a task cannot kill itself");
                }
            }
            s.unschedule(self);
        });
        self.coro.borrow_mut().take();
        self.state.set(TaskState::Finished);
        self.run_done_callbacks();
    }

    /// Cancels the task's further execution.
    pub(crate) fn cancel(self: &Rc<Self>, msg: Option<&str>) {
        if self.done() {
            return;
        }
        scheduler::try_with_scheduler(|s| {
            if let Some(current) = s.current_task() {
                if Rc::ptr_eq(&current, self) {
                    panic!("a task cannot cancel itself");
                }
            }
            s.unschedule(self);
        });
        *self.cancel_error.borrow_mut() =
            Some(TaskError::Cancelled { msg: msg.map(str::to_owned) });
        self.coro.borrow_mut().take();
        self.state.set(TaskState::Cancelled);
        self.run_done_callbacks();
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.state.get() == TaskState::Cancelled
    }

    fn cancel_error(&self) -> TaskError {
        self.cancel_error
            .borrow()
            .clone()
            .unwrap_or(TaskError::Cancelled { msg: None })
    }

    /// Registers `callback` to run when the task reaches a terminal
    /// state. If the task is already terminal the callback runs
    /// immediately; it is appended to the list regardless.
    pub(crate) fn add_done_callback(self: &Rc<Self>, callback: Box<dyn Fn(&TaskRef)>) {
        if self.done() {
            callback(self);
        }
        self.done_callbacks.borrow_mut().push(callback);
    }

    fn run_done_callbacks(self: &Rc<Self>) {
        let mut callbacks = std::mem::take(&mut *self.done_callbacks.borrow_mut());
        for callback in &callbacks {
            callback(self);
        }
        // keep any callbacks registered while firing
        callbacks.extend(std::mem::take(&mut *self.done_callbacks.borrow_mut()));
        *self.done_callbacks.borrow_mut() = callbacks;
    }
}

impl fmt::Display for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task {}", self.id)
    }
}

impl fmt::Debug for TaskInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "<Task {} {:?}>", self.id, self.state.get())
    }
}

/// Builds a task around a user future without scheduling it.
pub(crate) fn new_task<T, F>(fut: F) -> TaskHandle<T>
where
    T: 'static,
    F: Future<Output = Result<T>> + 'static,
{
    let id = NEXT_TASK_ID.with(|n| {
        let id = n.get();
        n.set(id + 1);
        id
    });
    let inner = Rc::new(TaskInner {
        id,
        coro: RefCell::new(None),
        state: Cell::new(TaskState::Unstarted),
        trigger: RefCell::new(None),
        failure: RefCell::new(None),
        cancel_error: RefCell::new(None),
        done_callbacks: RefCell::new(Vec::new()),
        complete: RefCell::new(None),
    });

    let result: Rc<RefCell<Option<Result<T>>>> = Rc::new(RefCell::new(None));
    let coro = {
        let result = result.clone();
        let inner = Rc::downgrade(&inner);
        async move {
            let out = fut.await;
            if let Err(e) = &out {
                if let Some(inner) = inner.upgrade() {
                    *inner.failure.borrow_mut() = Some(e.clone());
                }
            }
            *result.borrow_mut() = Some(out);
        }
        .boxed_local()
    };
    *inner.coro.borrow_mut() = Some(coro);

    TaskHandle { inner, result }
}

/// A handle on a concurrently executing task.
///
/// Handles are cheap clones sharing one task. Awaiting a handle (or
/// `&handle`) waits for completion and returns [`result`][TaskHandle::result];
/// awaiting [`complete`][TaskHandle::complete] waits without re-raising
/// the task's error.
pub struct TaskHandle<T> {
    inner: TaskRef,
    result: Rc<RefCell<Option<Result<T>>>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> TaskHandle<T> {
        TaskHandle { inner: self.inner.clone(), result: self.result.clone() }
    }
}

impl<T> TaskHandle<T> {
    pub(crate) fn inner(&self) -> &TaskRef {
        &self.inner
    }

    /// Whether the task has finished executing or was cancelled.
    pub fn done(&self) -> bool {
        self.inner.done()
    }

    /// Whether the task was cancelled.
    pub fn cancelled(&self) -> bool {
        self.inner.cancelled()
    }

    /// Cancels the task. By the time this returns the task is terminal
    /// and removed from every queue and waiter list. No-op on a terminal
    /// task.
    pub fn cancel(&self) {
        self.inner.cancel(None);
    }

    /// Cancels the task with a message carried by the cancellation error.
    pub fn cancel_with(&self, msg: &str) {
        self.inner.cancel(Some(msg));
    }

    /// Kills the task: it finishes immediately without a result and
    /// without an error. No-op on a terminal task.
    pub fn kill(&self) {
        self.inner.kill();
    }

    /// The task's completion trigger. Fires when the task reaches a
    /// terminal state; awaiting it never re-raises the task's error.
    pub fn complete(&self) -> Trigger {
        self.inner.complete_trigger()
    }

    /// The error the task finished with.
    ///
    /// Returns `None` after a clean finish, the stored error after a
    /// failure, and fails with the cancellation error on a cancelled task
    /// or `InvalidState` on an unfinished one.
    pub fn exception(&self) -> Result<Option<Error>> {
        match self.inner.state() {
            TaskState::Cancelled => Err(self.inner.cancel_error().into()),
            TaskState::Finished => Ok(self.inner.failure()),
            _ => Err(TaskError::InvalidState.into()),
        }
    }
}

impl<T: Clone> TaskHandle<T> {
    /// The task's result.
    ///
    /// Returns the value after a clean finish, re-raises the stored error
    /// after a failure, raises the cancellation error on a cancelled task
    /// and `InvalidState` on an unfinished one.
    pub fn result(&self) -> Result<T> {
        match self.inner.state() {
            TaskState::Cancelled => Err(self.inner.cancel_error().into()),
            TaskState::Finished => {
                if let Some(res) = self.result.borrow().clone() {
                    return res;
                }
                if let Some(failure) = self.inner.failure() {
                    return Err(failure);
                }
                Err(TaskError::Killed.into())
            }
            _ => Err(TaskError::InvalidState.into()),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl<T: Clone + 'static> IntoFuture for &TaskHandle<T> {
    type Output = Result<T>;
    type IntoFuture = LocalBoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        let handle = self.clone();
        async move {
            handle.complete().await?;
            handle.result()
        }
        .boxed_local()
    }
}

impl<T: Clone + 'static> IntoFuture for TaskHandle<T> {
    type Output = Result<T>;
    type IntoFuture = LocalBoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        (&self).into_future()
    }
}
