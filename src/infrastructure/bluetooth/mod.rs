//! Bluetooth Module
//!
//! Binds a native Bluetooth stack to the single-threaded script engine.
//!
//! ## Architecture
//!
//! ```text
//!  script thread                                 native / worker threads
//! ┌──────────────────────────────────────┐      ┌──────────────────────┐
//! │           BluetoothAdapter            │ ───▶ │     NativeStack      │
//! │  (operations, state, event routing)   │      │ (enable, discover,   │
//! └──┬──────────┬──────────┬──────────┬──┘      │  bond, rfcomm, ...)  │
//!    │          │          │          │         └──────────┬───────────┘
//!    ▼          ▼          ▼          ▼                    │ callbacks
//! ┌───────┐ ┌─────────┐ ┌──────────┐ ┌────────┐          ▼
//! │ Slots │ │Discovery│ │Connection│ │Bonding │  ┌──────────────────────┐
//! │       │ │ Session │ │ Registry │ │        │  │ NativeEventDispatcher│
//! └───────┘ └─────────┘ └──────────┘ └────────┘  └──────────┬───────────┘
//!    ▲                                                      │ bounded mpsc
//!    └──────────────── ScriptRuntime ◀──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`native`] - Native stack trait, events and value types
//! - [`dispatcher`] - Cross-thread hand-off of native callbacks
//! - [`slots`] - One pending request per operation kind
//! - [`discovery`] - Discovery rounds and found/disappeared devices
//! - [`connection`] - RFCOMM services, outbound requests and sockets
//! - [`socket`] - Script handles for services and sockets
//! - [`bonding`] - Bond creation and destruction
//! - [`lifecycle`] - Context teardown
//! - [`worker`] - Detached worker jobs
//! - [`service`] - The adapter coordinating all of the above
//! - [`simulated`] - In-process native stack for tests and the demo host

pub mod bonding;
pub mod connection;
pub mod discovery;
pub mod dispatcher;
pub mod lifecycle;
pub mod native;
pub mod service;
pub mod simulated;
pub mod slots;
pub mod socket;
pub mod worker;

// Re-export main adapter for convenience
pub use service::BluetoothAdapter;
