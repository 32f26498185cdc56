//! Script-side handles for RFCOMM services and sockets
//!
//! Both are `Rc` handles shared between the script and the adapter's
//! [`ConnectionRegistry`](super::connection::ConnectionRegistry). Event
//! callbacks are cloned out before being invoked so a callback may use the
//! handle it was fired for.

use crate::domain::device::BluetoothDevice;
use crate::domain::errors::BridgeError;
use crate::infrastructure::bluetooth::native::{ConnectionInfo, NativeStack};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error};

pub(crate) type EventHandler = Rc<dyn Fn()>;
pub(crate) type ErrorHandler = Rc<dyn Fn(BridgeError)>;
pub(crate) type ConnectHandler = Rc<dyn Fn(BluetoothSocket)>;

struct SocketState {
    descriptor: i32,
    uuid: String,
    peer: BluetoothDevice,
    connected: bool,
    buffer: Vec<u8>,
    onmessage: Option<EventHandler>,
    onclose: Option<EventHandler>,
    onerror: Option<ErrorHandler>,
}

/// A connected RFCOMM socket.
#[derive(Clone)]
pub struct BluetoothSocket {
    state: Rc<RefCell<SocketState>>,
    native: Arc<dyn NativeStack>,
}

impl BluetoothSocket {
    pub(crate) fn new(
        connection: &ConnectionInfo,
        peer: BluetoothDevice,
        native: Arc<dyn NativeStack>,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(SocketState {
                descriptor: connection.descriptor,
                uuid: connection.service_uuid.clone(),
                peer,
                connected: true,
                buffer: Vec::new(),
                onmessage: None,
                onclose: None,
                onerror: None,
            })),
            native,
        }
    }

    pub fn descriptor(&self) -> i32 {
        self.state.borrow().descriptor
    }

    pub fn uuid(&self) -> String {
        self.state.borrow().uuid.clone()
    }

    pub fn peer(&self) -> BluetoothDevice {
        self.state.borrow().peer.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn set_onmessage(&self, handler: impl Fn() + 'static) {
        self.state.borrow_mut().onmessage = Some(Rc::new(handler));
    }

    pub fn set_onclose(&self, handler: impl Fn() + 'static) {
        self.state.borrow_mut().onclose = Some(Rc::new(handler));
    }

    pub fn set_onerror(&self, handler: impl Fn(BridgeError) + 'static) {
        self.state.borrow_mut().onerror = Some(Rc::new(handler));
    }

    pub fn write_data(&self, data: &[u8]) -> Result<usize, BridgeError> {
        let descriptor = self.descriptor();
        self.native.send_data(descriptor, data).map_err(|e| {
            error!("Failed to send {} bytes on socket {}: {}", data.len(), descriptor, e);
            BridgeError::from_native(e, "sending data failed")
        })
    }

    /// Take everything received so far.
    pub fn read_data(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.borrow_mut().buffer)
    }

    /// Ask the stack to disconnect. The socket is dropped from the registry
    /// when the disconnect event arrives.
    pub fn close(&self) -> Result<(), BridgeError> {
        if !self.is_connected() {
            debug!("Socket {} is already closed", self.descriptor());
            return Ok(());
        }
        let descriptor = self.descriptor();
        self.native.disconnect_rfcomm(descriptor).map_err(|e| {
            error!("Failed to disconnect socket {}: {}", descriptor, e);
            BridgeError::from_native(e, "disconnecting socket failed")
        })
    }

    pub(crate) fn store_received(&self, data: &[u8]) {
        self.state.borrow_mut().buffer.extend_from_slice(data);
    }

    pub(crate) fn mark_closed(&self) {
        self.state.borrow_mut().connected = false;
    }

    pub(crate) fn onmessage(&self) -> Option<EventHandler> {
        self.state.borrow().onmessage.clone()
    }

    pub(crate) fn onclose(&self) -> Option<EventHandler> {
        self.state.borrow().onclose.clone()
    }

    pub(crate) fn onerror(&self) -> Option<ErrorHandler> {
        self.state.borrow().onerror.clone()
    }
}

impl fmt::Debug for BluetoothSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("BluetoothSocket")
            .field("descriptor", &state.descriptor)
            .field("uuid", &state.uuid)
            .field("peer", &state.peer.address())
            .field("connected", &state.connected)
            .finish()
    }
}

struct ServiceState {
    uuid: String,
    name: String,
    descriptor: i32,
    connected: bool,
    registered: bool,
    onconnect: Option<ConnectHandler>,
}

/// A registered RFCOMM service listening for inbound connections.
#[derive(Clone)]
pub struct ServiceHandler {
    state: Rc<RefCell<ServiceState>>,
}

impl ServiceHandler {
    pub(crate) fn new(uuid: &str, name: &str, descriptor: i32) -> Self {
        Self {
            state: Rc::new(RefCell::new(ServiceState {
                uuid: uuid.to_string(),
                name: name.to_string(),
                descriptor,
                connected: false,
                registered: true,
                onconnect: None,
            })),
        }
    }

    pub fn uuid(&self) -> String {
        self.state.borrow().uuid.clone()
    }

    pub fn name(&self) -> String {
        self.state.borrow().name.clone()
    }

    pub fn descriptor(&self) -> i32 {
        self.state.borrow().descriptor
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn is_registered(&self) -> bool {
        self.state.borrow().registered
    }

    pub fn set_onconnect(&self, handler: impl Fn(BluetoothSocket) + 'static) {
        self.state.borrow_mut().onconnect = Some(Rc::new(handler));
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.state.borrow_mut().connected = connected;
    }

    pub(crate) fn mark_unregistered(&self) {
        let mut state = self.state.borrow_mut();
        state.registered = false;
        state.connected = false;
    }

    pub(crate) fn onconnect(&self) -> Option<ConnectHandler> {
        self.state.borrow().onconnect.clone()
    }
}

impl fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ServiceHandler")
            .field("uuid", &state.uuid)
            .field("name", &state.name)
            .field("descriptor", &state.descriptor)
            .field("registered", &state.registered)
            .finish()
    }
}
