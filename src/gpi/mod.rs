//! The GPI core layer.
//!
//! Thin, typed entry points over the simulator bridge. Everything the rest
//! of the crate knows about the simulator goes through here: callback
//! registration, handle discovery, signal value access, and time queries.

mod functions;
mod types;

pub use self::functions::{
    deregister, get_const, get_definition_name, get_handle_by_index, get_handle_by_name,
    get_name_string, get_num_elems, get_root_handle, get_signal_val_binstr, get_sim_precision,
    get_sim_time, get_simulator_product, get_simulator_version, get_type, get_type_string,
    install_backend, iterate, register_nextstep_callback, register_readonly_callback,
    register_rwsynch_callback, register_timed_callback, register_value_change_callback,
    set_sim_event_callback, set_signal_val_binstr, set_signal_val_int, stop_simulator,
    uninstall_backend, SimulatorBackend,
};
pub use self::types::{CbHdl, EdgeKind, GpiError, ObjectKind, RawHdl, SetAction};

pub use crate::ffi::GpiCallback;
