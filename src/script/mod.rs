//! Script Boundary
//!
//! Everything the single-threaded script engine hands to the adapter:
//! the owning [`ContextId`], callback handles and the cooperative
//! [`ScriptTaskQueue`]. None of these types are `Send`; they never leave the
//! script thread.

pub mod callback;
pub mod queue;

use std::fmt;

pub use callback::{
    ChangeListener, DeviceCallback, DevicesCallback, DiscoveryCallbacks, ResultCallback,
    VoidCallback,
};
pub use queue::{LocalTask, ScriptTaskQueue};

/// Identifies the script context (frame) that owns a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}
