//! GPI enumerators, flags, and error types.

use std::fmt;

use crate::ffi::{gpi_cb_hdl, gpi_sim_hdl};

/// An opaque simulator object handle, usable as a map key.
pub type RawHdl = gpi_sim_hdl;

/// An owned registration handle for a pending simulator callback.
///
/// The handle is consumed when the callback fires. An outstanding un-fired
/// handle must be passed to [`deregister`][crate::gpi::deregister] to disarm
/// it; handles do not deregister themselves on drop, since a fired handle is
/// already dead on the simulator side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CbHdl(pub(crate) gpi_cb_hdl);

impl CbHdl {
    pub(crate) fn new(raw: u64) -> CbHdl {
        CbHdl(gpi_cb_hdl(raw))
    }

    /// The raw registration token.
    pub fn raw(&self) -> u64 {
        (self.0).0
    }
}

impl fmt::Display for CbHdl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "CbHdl({})", self.raw())
    }
}

enum_from_primitive! {
    /// The GPI object kind of a discovered simulation handle.
    ///
    /// Values match the `gpi_objtype` C enum.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum ObjectKind {
        Unknown         = 0,
        Memory          = 1,
        Module          = 2,
        NetArray        = 3,
        Enum            = 4,
        Structure       = 5,
        Real            = 6,
        Integer         = 7,
        String          = 8,
        GenArray        = 9,
        Package         = 10,
        PackedStructure = 11,
        Logic           = 12,
        LogicArray      = 13,
    }
}

enum_from_primitive! {
    /// How a value write is applied by the simulator.
    ///
    /// Values match the GPI set-action C enum. `NoDelay` is the immediate
    /// (blocking-assignment) form of `Deposit`.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum SetAction {
        Deposit = 0,
        Force   = 1,
        Release = 2,
        NoDelay = 3,
    }
}

bitflags! {
    /// Edge selection for value-change callbacks.
    ///
    /// `VALUE_CHANGE` is the union of both edges and fires on any value
    /// change, including transitions between non-`0`/`1` states.
    pub struct EdgeKind: u32 {
        const RISING = 1;
        const FALLING = 2;
        const VALUE_CHANGE = Self::RISING.bits | Self::FALLING.bits;
    }
}

/// An error originating at the simulator bridge.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GpiError {
    /// No simulator backend has been installed on this thread.
    #[error("no simulator backend is installed")]
    NotInstalled,
    /// The simulator refused to register a callback.
    #[error("unable to set up {0} callback")]
    RegistrationFailed(&'static str),
    /// The simulator reported an object kind this crate does not model.
    #[error("unknown GPI object kind {0}")]
    UnknownObjectKind(i32),
}
