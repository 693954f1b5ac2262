//! Raw GPI types and, when linking against a simulator, the C ABI surface.
//!
//! The GPI (generic programmatic interface) is the simulator-agnostic C
//! layer that VPI/VHPI support libraries register themselves with. This
//! module defines the raw handle types shared by every backend, plus the
//! extern declarations and callback trampolines used when this crate is
//! embedded in a simulator process (cargo feature `vpi`).
//!
//! Payloads handed across the C boundary are boxed and passed as keyed
//! `*mut c_void` pointers; they are re-boxed exactly once, by the
//! trampoline, when the callback fires.

#![allow(non_camel_case_types)]

#[cfg(feature = "vpi")]
pub use libc::{c_char, c_int, c_void};

/// An opaque simulator object handle.
///
/// Raw handles are plain keys: they are never dereferenced on this side of
/// the bridge, only passed back to the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct gpi_sim_hdl(pub usize);

/// An opaque callback registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct gpi_cb_hdl(pub u64);

/// A boxed one-shot callback crossing the GPI boundary.
pub type GpiCallback = Box<dyn FnOnce()>;

/// Boxes `item` and leaks it as a `*mut c_void` payload pointer.
#[cfg(feature = "vpi")]
pub fn box_raw_void<T>(item: T) -> *mut c_void {
    let item_box = Box::new(item);
    Box::into_raw(item_box) as *mut _ as *mut c_void
}

/// The single extern entry point the simulator invokes for every callback
/// registered by this crate. Re-boxes the payload and runs it.
#[cfg(feature = "vpi")]
pub extern "C" fn _gpi_cb_trampoline(user_data: *mut c_void) {
    if user_data.is_null() {
        panic!("cosim::ffi::_gpi_cb_trampoline: null callback payload");
    }
    let cb = unsafe { Box::from_raw(user_data as *mut GpiCallback) };
    (*cb)();
}

/// The [`SimulatorBackend`][crate::gpi::SimulatorBackend] backed by the
/// extern GPI entry points. Install at bring-up when this crate is
/// embedded in a simulator process.
#[cfg(feature = "vpi")]
pub struct VpiBackend;

#[cfg(feature = "vpi")]
mod backend {
    use std::ffi::{CStr, CString};

    use super::{
        box_raw_void, c_char, gpi_cb_hdl, gpi_sim_hdl, GpiCallback, VpiBackend,
        _gpi_cb_trampoline,
    };
    use crate::gpi::{CbHdl, EdgeKind, RawHdl, SetAction, SimulatorBackend};

    fn from_c_str(ptr: *const c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }

    fn to_c_string(s: &str) -> CString {
        CString::new(s).expect("interior NUL in string passed to the simulator")
    }

    fn nonzero_hdl(raw: usize) -> Option<RawHdl> {
        if raw == 0 {
            None
        } else {
            Some(gpi_sim_hdl(raw))
        }
    }

    fn nonzero_cb(raw: u64) -> Option<CbHdl> {
        if raw == 0 {
            None
        } else {
            Some(CbHdl(gpi_cb_hdl(raw)))
        }
    }

    impl SimulatorBackend for VpiBackend {
        fn register_timed_callback(&self, steps: u64, cb: GpiCallback) -> Option<CbHdl> {
            let raw = unsafe {
                super::gpi_register_timed_callback(_gpi_cb_trampoline, box_raw_void(cb), steps)
            };
            nonzero_cb(raw)
        }

        fn register_readonly_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
            let raw = unsafe {
                super::gpi_register_readonly_callback(_gpi_cb_trampoline, box_raw_void(cb))
            };
            nonzero_cb(raw)
        }

        fn register_rwsynch_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
            let raw = unsafe {
                super::gpi_register_rwsynch_callback(_gpi_cb_trampoline, box_raw_void(cb))
            };
            nonzero_cb(raw)
        }

        fn register_nextstep_callback(&self, cb: GpiCallback) -> Option<CbHdl> {
            let raw = unsafe {
                super::gpi_register_nexttime_callback(_gpi_cb_trampoline, box_raw_void(cb))
            };
            nonzero_cb(raw)
        }

        fn register_value_change_callback(
            &self,
            sig: RawHdl,
            edge: EdgeKind,
            cb: GpiCallback,
        ) -> Option<CbHdl> {
            let raw = unsafe {
                super::gpi_register_value_change_callback(
                    _gpi_cb_trampoline,
                    box_raw_void(cb),
                    sig.0,
                    edge.bits() as super::c_int,
                )
            };
            nonzero_cb(raw)
        }

        fn deregister(&self, hdl: CbHdl) {
            unsafe { super::gpi_deregister_callback(hdl.raw()) }
        }

        fn set_sim_event_callback(&self, cb: Box<dyn Fn(&str)>) {
            SIM_EVENT_CB.with(|slot| *slot.borrow_mut() = Some(cb));
        }

        fn stop_simulator(&self) {
            unsafe { super::gpi_sim_end() }
        }

        fn get_root_handle(&self, name: Option<&str>) -> Option<RawHdl> {
            let raw = match name {
                Some(name) => {
                    let name = to_c_string(name);
                    unsafe { super::gpi_get_root_handle(name.as_ptr()) }
                }
                None => unsafe { super::gpi_get_root_handle(std::ptr::null()) },
            };
            nonzero_hdl(raw)
        }

        fn get_handle_by_name(&self, parent: RawHdl, name: &str) -> Option<RawHdl> {
            let name = to_c_string(name);
            nonzero_hdl(unsafe { super::gpi_get_handle_by_name(parent.0, name.as_ptr()) })
        }

        fn get_handle_by_index(&self, parent: RawHdl, index: i32) -> Option<RawHdl> {
            nonzero_hdl(unsafe { super::gpi_get_handle_by_index(parent.0, index) })
        }

        fn iterate(&self, _parent: RawHdl) -> Vec<RawHdl> {
            // GPI iterators are cursor-based; discovery through them is
            // wired up together with the simulator-specific object model.
            Vec::new()
        }

        fn get_name_string(&self, hdl: RawHdl) -> String {
            from_c_str(unsafe { super::gpi_get_signal_name_str(hdl.0) })
        }

        fn get_type_string(&self, hdl: RawHdl) -> String {
            from_c_str(unsafe { super::gpi_get_signal_type_str(hdl.0) })
        }

        fn get_type(&self, hdl: RawHdl) -> i32 {
            unsafe { super::gpi_get_object_type(hdl.0) }
        }

        fn get_const(&self, hdl: RawHdl) -> bool {
            unsafe { super::gpi_is_constant(hdl.0) != 0 }
        }

        fn get_num_elems(&self, hdl: RawHdl) -> usize {
            unsafe { super::gpi_get_num_elems(hdl.0) }.max(0) as usize
        }

        fn get_definition_name(&self, hdl: RawHdl) -> String {
            from_c_str(unsafe { super::gpi_get_definition_name(hdl.0) })
        }

        fn get_signal_val_binstr(&self, hdl: RawHdl) -> String {
            from_c_str(unsafe { super::gpi_get_signal_value_binstr(hdl.0) })
        }

        fn set_signal_val_int(&self, hdl: RawHdl, action: SetAction, value: i64) {
            unsafe { super::gpi_set_signal_value_int(hdl.0, action as super::c_int, value) }
        }

        fn set_signal_val_binstr(&self, hdl: RawHdl, action: SetAction, value: &str) {
            let value = to_c_string(value);
            unsafe {
                super::gpi_set_signal_value_binstr(hdl.0, action as super::c_int, value.as_ptr())
            }
        }

        fn get_sim_time(&self) -> u64 {
            unsafe { super::gpi_get_sim_time() }
        }

        fn get_sim_precision(&self) -> i8 {
            unsafe { super::gpi_get_sim_precision() }
        }

        fn get_simulator_product(&self) -> String {
            from_c_str(unsafe { super::gpi_get_simulator_product() })
        }

        fn get_simulator_version(&self) -> String {
            from_c_str(unsafe { super::gpi_get_simulator_version() })
        }
    }

    thread_local! {
        static SIM_EVENT_CB: std::cell::RefCell<Option<Box<dyn Fn(&str)>>> =
            std::cell::RefCell::new(None);
    }

    /// Entry point for the simulator's asynchronous failure events.
    #[no_mangle]
    pub extern "C" fn cosim_sim_event(msg: *const c_char) {
        let msg = from_c_str(msg);
        SIM_EVENT_CB.with(|slot| {
            if let Some(cb) = slot.borrow().as_ref() {
                cb(&msg);
            }
        });
    }
}

#[cfg(feature = "vpi")]
extern "C" {
    pub fn gpi_register_timed_callback(
        cb: extern "C" fn(*mut c_void),
        user_data: *mut c_void,
        steps: u64,
    ) -> u64;
    pub fn gpi_register_readonly_callback(
        cb: extern "C" fn(*mut c_void),
        user_data: *mut c_void,
    ) -> u64;
    pub fn gpi_register_rwsynch_callback(
        cb: extern "C" fn(*mut c_void),
        user_data: *mut c_void,
    ) -> u64;
    pub fn gpi_register_nexttime_callback(
        cb: extern "C" fn(*mut c_void),
        user_data: *mut c_void,
    ) -> u64;
    pub fn gpi_register_value_change_callback(
        cb: extern "C" fn(*mut c_void),
        user_data: *mut c_void,
        sig_hdl: usize,
        edge: c_int,
    ) -> u64;
    pub fn gpi_deregister_callback(cb_hdl: u64);

    pub fn gpi_get_root_handle(name: *const c_char) -> usize;
    pub fn gpi_get_handle_by_name(parent: usize, name: *const c_char) -> usize;
    pub fn gpi_get_handle_by_index(parent: usize, index: c_int) -> usize;

    pub fn gpi_get_signal_name_str(sig_hdl: usize) -> *const c_char;
    pub fn gpi_get_signal_type_str(sig_hdl: usize) -> *const c_char;
    pub fn gpi_get_object_type(sig_hdl: usize) -> c_int;
    pub fn gpi_is_constant(sig_hdl: usize) -> c_int;
    pub fn gpi_get_num_elems(sig_hdl: usize) -> c_int;
    pub fn gpi_get_signal_value_binstr(sig_hdl: usize) -> *const c_char;
    pub fn gpi_set_signal_value_int(sig_hdl: usize, action: c_int, value: i64);
    pub fn gpi_set_signal_value_binstr(sig_hdl: usize, action: c_int, value: *const c_char);
    pub fn gpi_get_definition_name(sig_hdl: usize) -> *const c_char;

    pub fn gpi_get_sim_time() -> u64;
    pub fn gpi_get_sim_precision() -> i8;
    pub fn gpi_get_simulator_product() -> *const c_char;
    pub fn gpi_get_simulator_version() -> *const c_char;
    pub fn gpi_sim_end();
}
