//! Bluetooth Bridge
//!
//! Exposes a native Bluetooth stack (adapter power and visibility, discovery,
//! bonding, RFCOMM services and sockets) to a single-threaded script engine
//! through callback-style asynchronous operations.

pub mod domain;
pub mod infrastructure;
pub mod runtime;
pub mod script;

pub use domain::errors::{BridgeError, ErrorKind, NativeError};
pub use infrastructure::bluetooth::BluetoothAdapter;
pub use runtime::ScriptRuntime;
