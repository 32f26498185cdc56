//! Native Stack Boundary
//!
//! The [`NativeStack`] trait is every downward call the adapter makes; the
//! [`NativeEvent`] enum is every upward callback the stack can deliver.
//! Implementations may call back synchronously from inside a trait method or
//! later from their own threads, always through a
//! [`NativeEventDispatcher`](super::dispatcher::NativeEventDispatcher).

use crate::domain::device::DeviceInfo;
use crate::domain::errors::NativeResult;

/// Adapter discoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisibilityMode {
    NonDiscoverable,
    GeneralDiscoverable,
    LimitedDiscoverable,
}

impl VisibilityMode {
    pub fn is_visible(self) -> bool {
        self != VisibilityMode::NonDiscoverable
    }

    /// Mode implied by a script `set_visible(visible, timeout)` request.
    pub fn requested(visible: bool, timeout: u32) -> Self {
        if !visible {
            VisibilityMode::NonDiscoverable
        } else if timeout == 0 {
            VisibilityMode::GeneralDiscoverable
        } else {
            VisibilityMode::LimitedDiscoverable
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Started,
    Found,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketRole {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Connection details carried by a socket connection-state event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub descriptor: i32,
    pub role: SocketRole,
    pub remote_address: String,
    pub service_uuid: String,
}

/// Native callback registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscription {
    AdapterState,
    Name,
    Visibility,
    Discovery,
    BondCreated,
    BondDestroyed,
    ConnectionState,
    DataReceived,
}

impl Subscription {
    /// Registered for the whole lifetime of the adapter.
    pub const ADAPTER: [Subscription; 4] = [
        Subscription::AdapterState,
        Subscription::Name,
        Subscription::Visibility,
        Subscription::Discovery,
    ];
}

/// Upward callbacks of the native stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeEvent {
    AdapterStateChanged {
        result: NativeResult,
        enabled: bool,
    },
    NameChanged {
        name: String,
    },
    VisibilityChanged {
        result: NativeResult,
        mode: VisibilityMode,
    },
    DiscoveryStateChanged {
        result: NativeResult,
        state: DiscoveryState,
        device: Option<DeviceInfo>,
    },
    BondCreated {
        result: NativeResult,
        device: Option<DeviceInfo>,
    },
    BondDestroyed {
        result: NativeResult,
        address: String,
    },
    SocketConnectionStateChanged {
        result: NativeResult,
        state: ConnectionState,
        connection: Option<ConnectionInfo>,
    },
    SocketDataReceived {
        descriptor: i32,
        data: Vec<u8>,
    },
}

impl NativeEvent {
    /// Registration under which the stack delivers this event.
    pub fn subscription(&self) -> Subscription {
        match self {
            NativeEvent::AdapterStateChanged { .. } => Subscription::AdapterState,
            NativeEvent::NameChanged { .. } => Subscription::Name,
            NativeEvent::VisibilityChanged { .. } => Subscription::Visibility,
            NativeEvent::DiscoveryStateChanged { .. } => Subscription::Discovery,
            NativeEvent::BondCreated { .. } => Subscription::BondCreated,
            NativeEvent::BondDestroyed { .. } => Subscription::BondDestroyed,
            NativeEvent::SocketConnectionStateChanged { .. } => Subscription::ConnectionState,
            NativeEvent::SocketDataReceived { .. } => Subscription::DataReceived,
        }
    }
}

/// Downward calls into the platform Bluetooth stack.
pub trait NativeStack: Send + Sync {
    fn initialize(&self) -> NativeResult;
    fn deinitialize(&self) -> NativeResult;

    fn subscribe(&self, subscription: Subscription) -> NativeResult;
    fn unsubscribe(&self, subscription: Subscription) -> NativeResult;

    // Adapter
    fn is_enabled(&self) -> NativeResult<bool>;
    fn enable(&self) -> NativeResult;
    fn disable(&self) -> NativeResult;
    fn name(&self) -> NativeResult<String>;
    fn set_name(&self, name: &str) -> NativeResult;
    fn address(&self) -> NativeResult<String>;
    fn visibility(&self) -> NativeResult<(VisibilityMode, u32)>;
    fn set_visibility(&self, mode: VisibilityMode, timeout: u32) -> NativeResult;

    // Discovery
    fn start_discovery(&self) -> NativeResult;
    fn stop_discovery(&self) -> NativeResult;
    fn is_discovering(&self) -> NativeResult<bool>;

    // Bonding
    fn bonded_devices(&self) -> NativeResult<Vec<DeviceInfo>>;
    fn bonded_device(&self, address: &str) -> NativeResult<Option<DeviceInfo>>;
    fn create_bond(&self, address: &str) -> NativeResult;
    fn destroy_bond(&self, address: &str) -> NativeResult;

    // RFCOMM
    fn is_service_used(&self, uuid: &str) -> NativeResult<bool>;
    fn create_rfcomm(&self, uuid: &str) -> NativeResult<i32>;
    fn listen_rfcomm(&self, descriptor: i32, backlog: u32) -> NativeResult;
    fn destroy_rfcomm(&self, descriptor: i32) -> NativeResult;
    fn connect_rfcomm(&self, address: &str, uuid: &str) -> NativeResult;
    fn disconnect_rfcomm(&self, descriptor: i32) -> NativeResult;
    fn send_data(&self, descriptor: i32, data: &[u8]) -> NativeResult<usize>;
}
