//! Safe entry points into the simulator bridge.
//!
//! The bridge is a dispatch table: a [`SimulatorBackend`] installed on the
//! scheduler thread. When the crate is embedded in a simulator process
//! (feature `vpi`), the extern-backed implementation is installed at
//! bring-up; the test suite installs an event-wheel double instead. This
//! mirrors how the GPI layer itself routes to whichever language support
//! library registered with it.

use std::cell::RefCell;
use std::rc::Rc;

use super::types::{CbHdl, EdgeKind, GpiError, ObjectKind, RawHdl, SetAction};
use crate::ffi::GpiCallback;
use crate::Result;

/// The simulator dispatch table.
///
/// All callbacks are one-shot: the simulator invokes them at most once and
/// the registration is consumed by the invocation. [`deregister`] disarms a
/// registration that has not fired.
pub trait SimulatorBackend {
    fn register_timed_callback(&self, steps: u64, cb: GpiCallback) -> Option<CbHdl>;
    fn register_readonly_callback(&self, cb: GpiCallback) -> Option<CbHdl>;
    fn register_rwsynch_callback(&self, cb: GpiCallback) -> Option<CbHdl>;
    fn register_nextstep_callback(&self, cb: GpiCallback) -> Option<CbHdl>;
    fn register_value_change_callback(
        &self,
        sig: RawHdl,
        edge: EdgeKind,
        cb: GpiCallback,
    ) -> Option<CbHdl>;
    fn deregister(&self, hdl: CbHdl);

    fn set_sim_event_callback(&self, cb: Box<dyn Fn(&str)>);
    fn stop_simulator(&self);

    fn get_root_handle(&self, name: Option<&str>) -> Option<RawHdl>;
    fn get_handle_by_name(&self, parent: RawHdl, name: &str) -> Option<RawHdl>;
    fn get_handle_by_index(&self, parent: RawHdl, index: i32) -> Option<RawHdl>;
    fn iterate(&self, parent: RawHdl) -> Vec<RawHdl>;

    fn get_name_string(&self, hdl: RawHdl) -> String;
    fn get_type_string(&self, hdl: RawHdl) -> String;
    fn get_type(&self, hdl: RawHdl) -> i32;
    fn get_const(&self, hdl: RawHdl) -> bool;
    fn get_num_elems(&self, hdl: RawHdl) -> usize;
    fn get_definition_name(&self, hdl: RawHdl) -> String;

    fn get_signal_val_binstr(&self, hdl: RawHdl) -> String;
    fn set_signal_val_int(&self, hdl: RawHdl, action: SetAction, value: i64);
    fn set_signal_val_binstr(&self, hdl: RawHdl, action: SetAction, value: &str);

    fn get_sim_time(&self) -> u64;
    fn get_sim_precision(&self) -> i8;
    fn get_simulator_product(&self) -> String;
    fn get_simulator_version(&self) -> String;
}

thread_local! {
    static BACKEND: RefCell<Option<Rc<dyn SimulatorBackend>>> = RefCell::new(None);
}

/// Installs `backend` as the bridge for the current thread.
///
/// Replaces any previously installed backend.
pub fn install_backend(backend: Rc<dyn SimulatorBackend>) {
    BACKEND.with(|b| *b.borrow_mut() = Some(backend));
}

/// Removes the installed backend, if any.
pub fn uninstall_backend() {
    BACKEND.with(|b| *b.borrow_mut() = None);
}

fn with_backend<R>(f: impl FnOnce(&Rc<dyn SimulatorBackend>) -> R) -> Result<R> {
    BACKEND.with(|b| {
        let b = b.borrow();
        match b.as_ref() {
            Some(backend) => Ok(f(backend)),
            None => Err(GpiError::NotInstalled.into()),
        }
    })
}

pub fn register_timed_callback(steps: u64, cb: GpiCallback) -> Result<CbHdl> {
    with_backend(|b| b.register_timed_callback(steps, cb))?
        .ok_or_else(|| GpiError::RegistrationFailed("timed").into())
}

pub fn register_readonly_callback(cb: GpiCallback) -> Result<CbHdl> {
    with_backend(|b| b.register_readonly_callback(cb))?
        .ok_or_else(|| GpiError::RegistrationFailed("read-only synch").into())
}

pub fn register_rwsynch_callback(cb: GpiCallback) -> Result<CbHdl> {
    with_backend(|b| b.register_rwsynch_callback(cb))?
        .ok_or_else(|| GpiError::RegistrationFailed("read-write synch").into())
}

pub fn register_nextstep_callback(cb: GpiCallback) -> Result<CbHdl> {
    with_backend(|b| b.register_nextstep_callback(cb))?
        .ok_or_else(|| GpiError::RegistrationFailed("next time step").into())
}

pub fn register_value_change_callback(
    sig: RawHdl,
    edge: EdgeKind,
    cb: GpiCallback,
) -> Result<CbHdl> {
    with_backend(|b| b.register_value_change_callback(sig, edge, cb))?
        .ok_or_else(|| GpiError::RegistrationFailed("value change").into())
}

/// Disarms a registration that has not yet fired.
pub fn deregister(hdl: CbHdl) {
    let _ = with_backend(|b| b.deregister(hdl));
}

/// Installs the handler for asynchronous simulator failure events.
pub fn set_sim_event_callback(cb: Box<dyn Fn(&str)>) -> Result<()> {
    with_backend(|b| b.set_sim_event_callback(cb))
}

/// Asks the simulator to end the run at the next opportunity.
pub fn stop_simulator() {
    let _ = with_backend(|b| b.stop_simulator());
}

pub fn get_root_handle(name: Option<&str>) -> Result<Option<RawHdl>> {
    with_backend(|b| b.get_root_handle(name))
}

pub fn get_handle_by_name(parent: RawHdl, name: &str) -> Result<Option<RawHdl>> {
    with_backend(|b| b.get_handle_by_name(parent, name))
}

pub fn get_handle_by_index(parent: RawHdl, index: i32) -> Result<Option<RawHdl>> {
    with_backend(|b| b.get_handle_by_index(parent, index))
}

pub fn iterate(parent: RawHdl) -> Result<Vec<RawHdl>> {
    with_backend(|b| b.iterate(parent))
}

pub fn get_name_string(hdl: RawHdl) -> Result<String> {
    with_backend(|b| b.get_name_string(hdl))
}

pub fn get_type_string(hdl: RawHdl) -> Result<String> {
    with_backend(|b| b.get_type_string(hdl))
}

/// The typed object kind of `hdl`.
pub fn get_type(hdl: RawHdl) -> Result<ObjectKind> {
    use num_traits::FromPrimitive;
    let raw = with_backend(|b| b.get_type(hdl))?;
    ObjectKind::from_i32(raw).ok_or_else(|| GpiError::UnknownObjectKind(raw).into())
}

pub fn get_const(hdl: RawHdl) -> Result<bool> {
    with_backend(|b| b.get_const(hdl))
}

pub fn get_num_elems(hdl: RawHdl) -> Result<usize> {
    with_backend(|b| b.get_num_elems(hdl))
}

pub fn get_definition_name(hdl: RawHdl) -> Result<String> {
    with_backend(|b| b.get_definition_name(hdl))
}

pub fn get_signal_val_binstr(hdl: RawHdl) -> Result<String> {
    with_backend(|b| b.get_signal_val_binstr(hdl))
}

pub fn set_signal_val_int(hdl: RawHdl, action: SetAction, value: i64) -> Result<()> {
    with_backend(|b| b.set_signal_val_int(hdl, action, value))
}

pub fn set_signal_val_binstr(hdl: RawHdl, action: SetAction, value: &str) -> Result<()> {
    with_backend(|b| b.set_signal_val_binstr(hdl, action, value))
}

/// The current simulation time in simulator steps.
pub fn get_sim_time() -> Result<u64> {
    with_backend(|b| b.get_sim_time())
}

/// The simulator time precision as a power of ten, e.g. `-12` for 1 ps.
pub fn get_sim_precision() -> Result<i8> {
    with_backend(|b| b.get_sim_precision())
}

pub fn get_simulator_product() -> Result<String> {
    with_backend(|b| b.get_simulator_product())
}

pub fn get_simulator_version() -> Result<String> {
    with_backend(|b| b.get_simulator_version())
}
