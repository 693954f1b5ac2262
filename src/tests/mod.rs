//! End-to-end tests against the mock simulator.

mod mock_sim;

mod handles;
mod scheduler;

use std::rc::Rc;
use std::sync::Mutex;

use self::mock_sim::MockSim;
use crate::gpi;
use crate::handle::HierarchyObject;

lazy_static! {
    // Tests that touch process-wide state (env vars, the test registry)
    // hold this while running.
    pub(crate) static ref ENV_LOCK: Mutex<()> = Mutex::new(());
}

/// A per-test environment: mock simulator installed, scheduler
/// constructed, write scheduler running. Tears everything down on drop.
pub(crate) struct Fixture {
    pub sim: Rc<MockSim>,
}

pub(crate) fn fixture() -> Fixture {
    let fixture = bare_fixture();
    crate::scheduler::init_scheduler(Box::new(|| {}));
    crate::write_scheduler::start_write_scheduler();
    fixture
}

/// Backend installed but testbench not brought up; for tests driving
/// `initialize_testbench` themselves.
pub(crate) fn bare_fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    reset_thread_state();
    let sim = MockSim::new();
    gpi::install_backend(sim.clone());
    Fixture { sim }
}

// Clears any state a previous (possibly panicked) test left on this
// thread.
fn reset_thread_state() {
    if crate::scheduler::try_with_scheduler(|_| ()).is_some() {
        crate::entry::shutdown_testbench();
    }
    crate::handle::clear_handle_cache();
    gpi::uninstall_backend();
}

impl Drop for Fixture {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            crate::entry::shutdown_testbench();
            gpi::uninstall_backend();
        }
    }
}

/// Runs the event loop once, starting any freshly queued tasks.
pub(crate) fn kick() {
    crate::scheduler::with_scheduler(|s| s.event_loop());
}

/// The root handle as a hierarchy object.
pub(crate) fn dut() -> HierarchyObject {
    let root = gpi::get_root_handle(None)
        .expect("backend not installed")
        .expect("mock simulator has no root");
    crate::handle::sim_object(root, None)
        .expect("root object")
        .as_hierarchy()
        .expect("root is a hierarchy")
}
