//! Scheduler behavior: wake ordering, task lifecycle, termination.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{dut, fixture, kick};
use crate::task::TaskError;
use crate::triggers::{Event, Trigger};
use crate::{create_task, start, start_soon, Error, TimeUnit};

#[test]
fn clock_and_edge_records_first_rising_edge_at_5ns() {
    let fx = fixture();
    fx.sim.add_logic("clk", '0');
    let clk = dut().logic("clk").unwrap();

    {
        let clk = clk.clone();
        let _clock: crate::TaskHandle<()> = start_soon(async move {
            loop {
                clk.set(false)?;
                Trigger::timer(5.0, TimeUnit::Ns)?.await?;
                clk.set(true)?;
                Trigger::timer(5.0, TimeUnit::Ns)?.await?;
            }
        });
    }

    let seen = Rc::new(Cell::new(None));
    {
        let seen = seen.clone();
        let clk = clk.clone();
        start_soon(async move {
            Trigger::rising_edge(&clk).await?;
            seen.set(Some(crate::sim_time()?));
            Ok(())
        });
    }

    kick();
    fx.sim.run_until(20);

    assert_eq!(seen.get(), Some(5));
}

#[test]
fn clock_generator_toggles_the_signal() {
    let fx = fixture();
    let hdl = fx.sim.add_logic("clk", '0');
    let clk = dut().logic("clk").unwrap();

    let clock = crate::Clock::new(&clk, 10.0, TimeUnit::Ns).unwrap();
    let driver = clock.start();
    kick();
    fx.sim.run_until(24);

    let toggles: Vec<String> =
        fx.sim.write_log(hdl).into_iter().map(|(_, value)| value).collect();
    assert_eq!(toggles, vec!["1", "0", "1", "0", "1"]);

    driver.kill();
    assert_eq!(fx.sim.timed_count(), 0);
    drop(fx);
}

#[test]
fn waiters_of_one_trigger_wake_in_await_order() {
    let fx = fixture();
    let event = Event::new();
    let order = Rc::new(RefCell::new(Vec::new()));

    for name in ["a", "b", "c"] {
        let event = event.clone();
        let order = order.clone();
        start_soon(async move {
            event.wait().await?;
            order.borrow_mut().push(name);
            Ok(())
        });
    }

    kick();
    assert!(order.borrow().is_empty());

    event.set();
    kick();
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
    drop(fx);
}

#[test]
fn start_runs_the_child_before_the_caller_resumes() {
    let fx = fixture();
    let order = Rc::new(RefCell::new(Vec::new()));

    {
        let order = order.clone();
        start_soon(async move {
            order.borrow_mut().push("parent");
            let child = {
                let order = order.clone();
                start(async move {
                    order.borrow_mut().push("child");
                    Ok(())
                })
                .await?
            };
            order.borrow_mut().push("parent resumed");
            assert!(child.done());
            Ok(())
        });
    }

    kick();
    assert_eq!(*order.borrow(), vec!["parent", "child", "parent resumed"]);
    drop(fx);
}

#[test]
fn start_soon_runs_after_everything_already_queued() {
    let fx = fixture();
    let order = Rc::new(RefCell::new(Vec::new()));

    for name in ["first", "second"] {
        let order = order.clone();
        start_soon(async move {
            order.borrow_mut().push(name);
            Ok(())
        });
    }
    {
        let order = order.clone();
        start_soon(async move {
            order.borrow_mut().push("third");
            Ok(())
        });
    }

    kick();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    drop(fx);
}

#[test]
#[should_panic(expected = "queued more than once")]
fn queueing_a_task_twice_is_an_error() {
    let _fx = fixture();
    let task = create_task(async { Ok(()) });
    crate::scheduler::with_scheduler(|s| {
        s.schedule_task(task.inner().clone(), crate::Outcome::Value(()));
        s.schedule_task(task.inner().clone(), crate::Outcome::Value(()));
    });
}

#[test]
fn null_trigger_reschedules_behind_queued_tasks() {
    let fx = fixture();
    let order = Rc::new(RefCell::new(Vec::new()));

    {
        let order = order.clone();
        start_soon(async move {
            order.borrow_mut().push("a1");
            Trigger::null().await?;
            order.borrow_mut().push("a2");
            Ok(())
        });
    }
    {
        let order = order.clone();
        start_soon(async move {
            order.borrow_mut().push("b");
            Ok(())
        });
    }

    kick();
    assert_eq!(*order.borrow(), vec!["a1", "b", "a2"]);
    drop(fx);
}

#[test]
fn cancelling_a_pending_task_wakes_its_awaiter() {
    let fx = fixture();

    let victim = start_soon(async {
        Trigger::timer(1000.0, TimeUnit::Ns)?.await?;
        Ok(())
    });

    let observed = Rc::new(RefCell::new(None));
    {
        let observed = observed.clone();
        let victim = victim.clone();
        start_soon(async move {
            victim.complete().await?;
            observed.borrow_mut().replace((victim.cancelled(), victim.result()));
            Ok(())
        });
    }

    kick();
    assert!(observed.borrow().is_none());

    victim.cancel();
    assert!(victim.cancelled());
    kick();

    let observed = observed.borrow().clone().expect("awaiter never resumed");
    assert!(observed.0);
    assert_eq!(observed.1, Err(Error::Task(TaskError::Cancelled { msg: None })));
    drop(fx);
}

#[test]
fn cancel_on_a_terminal_task_is_a_no_op() {
    let fx = fixture();
    let task = start_soon(async { Ok(42) });
    kick();
    assert!(task.done());
    assert_eq!(task.result(), Ok(42));

    task.cancel();
    task.kill();
    assert!(!task.cancelled());
    assert_eq!(task.result(), Ok(42));
    drop(fx);
}

#[test]
#[should_panic(expected = "cancel itself")]
fn a_task_cancelling_itself_panics() {
    let _fx = fixture();
    let own: Rc<RefCell<Option<crate::TaskHandle<()>>>> = Rc::new(RefCell::new(None));
    let task = {
        let own = own.clone();
        start_soon(async move {
            let me = own.borrow().clone().unwrap();
            me.cancel();
            Ok(())
        })
    };
    own.borrow_mut().replace(task);
    kick();
}

#[test]
fn awaiting_a_foreign_future_fails_the_task() {
    let fx = fixture();

    let foreign = create_task(async {
        futures::future::pending::<()>().await;
        Ok(())
    });

    let observed = Rc::new(RefCell::new(None));
    {
        let observed = observed.clone();
        let foreign = foreign.clone();
        start_soon(async move {
            let res = (&foreign).await;
            observed.borrow_mut().replace(res);
            Ok(())
        });
    }

    kick();
    let observed = observed.borrow().clone().expect("watcher never resumed");
    assert_eq!(observed, Err(Error::Task(TaskError::ForeignAwait)));
    assert!(!fx.sim.stopped());
    drop(fx);
}

#[test]
fn an_unwatched_failure_stops_the_simulator() {
    let fx = fixture();

    start_soon(async {
        futures::future::pending::<()>().await;
        Ok(())
    });

    kick();
    assert!(fx.sim.stopped());
    drop(fx);
}

#[test]
fn failed_task_error_is_observable_three_ways() {
    let fx = fixture();

    let failing: crate::TaskHandle<()> = create_task(async {
        Err(crate::types::ValueError::InvalidLiteral('q').into())
    });

    let results = Rc::new(RefCell::new(None));
    {
        let results = results.clone();
        let failing = failing.clone();
        start_soon(async move {
            // completion never re-raises
            failing.complete().await?;
            let via_await = (&failing).await;
            let via_result = failing.result();
            let via_exception = failing.exception();
            results.borrow_mut().replace((via_await, via_result, via_exception));
            Ok(())
        });
    }

    kick();
    let expected: Error = crate::types::ValueError::InvalidLiteral('q').into();
    let (via_await, via_result, via_exception) =
        results.borrow().clone().expect("watcher never resumed");
    assert_eq!(via_await, Err(expected.clone()));
    assert_eq!(via_result, Err(expected.clone()));
    assert_eq!(via_exception, Ok(Some(expected)));
    drop(fx);
}

#[test]
fn shutdown_kills_waiting_and_queued_tasks() {
    let fx = fixture();

    let waiting = start_soon(async {
        Trigger::timer(1000.0, TimeUnit::Ns)?.await?;
        Ok(())
    });
    kick();
    assert!(!waiting.done());

    let queued = start_soon(async { Ok(()) });
    crate::shutdown_soon();
    kick();

    assert!(waiting.done());
    assert!(!waiting.cancelled());
    assert!(queued.done());
    assert_eq!(waiting.result(), Err(Error::Task(TaskError::Killed)));
    assert_eq!(fx.sim.timed_count(), 0);
    drop(fx);
}
