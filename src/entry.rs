//! Testbench bring-up and teardown.
//!
//! The host (the simulator startup hook, or a test harness) installs a
//! simulator backend, registers tests, and calls
//! [`initialize_testbench`] once. Bring-up resolves the root handle,
//! constructs the scheduler, starts the write-forcing task, schedules the
//! tests selected by `COCOTB_TEST_MODULES`, and runs the event loop until
//! the run queue drains; control then returns to the simulator, and
//! subsequent transfers come through the primed trigger callbacks.

use std::cell::RefCell;
use std::sync::Mutex;

use futures::future::LocalBoxFuture;
use log::{error, info};

use crate::gpi;
use crate::handle::{sim_object, HierarchyObject};
use crate::scheduler;
use crate::write_scheduler;
use crate::Result;

/// An error during testbench bring-up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SetupError {
    #[error(
        "environment variable COCOTB_TEST_MODULES, which selects the test(s) \
         to execute, is not defined or empty"
    )]
    MissingTestModules,
    #[error("no registered test named {0:?}")]
    UnknownTest(String),
    #[error("can not find root handle {0:?}")]
    NoRootHandle(String),
    #[error("testbench is already initialized on this thread")]
    AlreadyInitialized,
}

/// The future produced by a registered test.
pub type TestFuture = LocalBoxFuture<'static, Result<()>>;

/// A registered test entry point, handed the root handle when scheduled.
pub type TestFn = fn(HierarchyObject) -> TestFuture;

lazy_static! {
    static ref TEST_REGISTRY: Mutex<Vec<(String, TestFn)>> = Mutex::new(Vec::new());
}

thread_local! {
    static TOP: RefCell<Option<HierarchyObject>> = RefCell::new(None);
    static ARGV: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Registers a test under `name` for selection via `COCOTB_TEST_MODULES`.
///
/// Registration must happen before [`initialize_testbench`] runs;
/// re-registering a name replaces the earlier entry.
pub fn register_test(name: &str, test: TestFn) {
    let mut registry = TEST_REGISTRY.lock().expect("test registry poisoned");
    registry.retain(|(n, _)| n.as_str() != name);
    registry.push((name.to_owned(), test));
}

/// The root handle, once bring-up has resolved it.
pub fn top() -> Option<HierarchyObject> {
    TOP.with(|t| t.borrow().clone())
}

/// The argument list the testbench was initialized with.
pub fn argv() -> Vec<String> {
    ARGV.with(|a| a.borrow().clone())
}

fn sim_event(msg: &str) {
    // asynchronous failure from the simulator; fail the run and shut down
    error!("simulator event: {}", msg);
    gpi::stop_simulator();
    scheduler::try_with_scheduler(|s| s.shutdown_soon());
}

fn setup_root_handle() -> Result<HierarchyObject> {
    let root_name = std::env::var("COCOTB_TOPLEVEL").ok().and_then(|name| {
        let name = name.trim().to_owned();
        if name.is_empty() {
            None
        } else if let Some((_lib, rest)) = name.split_once('.') {
            Some(rest.to_owned())
        } else {
            Some(name)
        }
    });

    let raw = gpi::get_root_handle(root_name.as_deref())?
        .ok_or_else(|| SetupError::NoRootHandle(root_name.clone().unwrap_or_default()))?;
    sim_object(raw, None)?.as_hierarchy()
}

fn selected_tests() -> Result<Vec<(String, TestFn)>> {
    let module_str = std::env::var("COCOTB_TEST_MODULES").unwrap_or_default();
    let names: Vec<&str> = module_str.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if names.is_empty() {
        return Err(SetupError::MissingTestModules.into());
    }

    let registry = TEST_REGISTRY.lock().expect("test registry poisoned");
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        match registry.iter().find(|(n, _)| n.as_str() == name) {
            Some((n, test)) => selected.push((n.clone(), *test)),
            None => return Err(SetupError::UnknownTest(name.to_owned()).into()),
        }
    }
    Ok(selected)
}

/// Brings the testbench up. Called by the host exactly once, after a
/// simulator backend has been installed.
pub fn initialize_testbench(argv: Vec<String>) -> Result<()> {
    if scheduler::try_with_scheduler(|_| ()).is_some() {
        return Err(SetupError::AlreadyInitialized.into());
    }

    gpi::set_sim_event_callback(Box::new(sim_event))?;

    ARGV.with(|a| *a.borrow_mut() = argv);

    let product = gpi::get_simulator_product()?;
    let version = gpi::get_simulator_version()?;
    info!("Running on {} version {}", product.trim(), version.trim());

    let top = setup_root_handle()?;
    TOP.with(|t| *t.borrow_mut() = Some(top.clone()));

    let tests = selected_tests()?;

    scheduler::init_scheduler(Box::new(|| {}));
    write_scheduler::start_write_scheduler();

    for (name, test) in tests {
        info!("starting test {}", name);
        scheduler::start_soon(test(top.clone()));
    }

    scheduler::with_scheduler(|s| s.event_loop());
    Ok(())
}

/// Tears the testbench down: kills every task, discards pending writes,
/// and releases all per-thread state.
pub fn shutdown_testbench() {
    write_scheduler::stop_write_scheduler();
    if scheduler::try_with_scheduler(|s| {
        s.shutdown_soon();
        s.event_loop();
    })
    .is_some()
    {
        scheduler::teardown_scheduler();
    }
    crate::handle::clear_handle_cache();
    TOP.with(|t| *t.borrow_mut() = None);
}
