//! RFCOMM connection bookkeeping
//!
//! Server registrations are keyed by UUID, outbound requests by remote
//! address (several per address, told apart by UUID) and live sockets by
//! descriptor. The native data and connection-state subscriptions follow the
//! registry contents.

use crate::domain::errors::{BridgeError, NativeError, NativeResult};
use crate::domain::validation::{is_valid_address, is_valid_uuid};
use crate::infrastructure::bluetooth::native::{
    ConnectionInfo, ConnectionState, NativeStack, SocketRole, Subscription,
};
use crate::infrastructure::bluetooth::service::BluetoothAdapter;
use crate::infrastructure::bluetooth::socket::{BluetoothSocket, ServiceHandler};
use crate::script::{ContextId, ResultCallback, VoidCallback};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

pub type SocketCallback = ResultCallback<BluetoothSocket>;
pub type ServiceCallback = ResultCallback<ServiceHandler>;

/// Outbound connection waiting for its native connected event.
pub struct ConnectionRequest {
    pub address: String,
    pub uuid: String,
    pub callback: SocketCallback,
}

impl ConnectionRequest {
    pub fn context(&self) -> ContextId {
        self.callback.context()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    services: HashMap<String, ServiceHandler>,
    requests: HashMap<String, Vec<ConnectionRequest>>,
    sockets: HashMap<i32, BluetoothSocket>,
    data_subscribed: bool,
    connection_subscribed: bool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Services are keyed by the upper-cased UUID.
    pub fn service(&self, uuid: &str) -> Option<&ServiceHandler> {
        self.services.get(&uuid.to_ascii_uppercase())
    }

    pub fn is_registered(&self, uuid: &str) -> bool {
        self.services.contains_key(&uuid.to_ascii_uppercase())
    }

    pub fn insert_service(&mut self, handler: ServiceHandler) {
        self.services
            .insert(handler.uuid().to_ascii_uppercase(), handler);
    }

    pub fn remove_service(&mut self, uuid: &str) -> Option<ServiceHandler> {
        self.services.remove(&uuid.to_ascii_uppercase())
    }

    pub fn add_request(&mut self, request: ConnectionRequest) {
        self.requests
            .entry(request.address.to_ascii_uppercase())
            .or_default()
            .push(request);
    }

    /// Remove the request whose address and UUID both match.
    pub fn take_request(&mut self, address: &str, uuid: &str) -> Option<ConnectionRequest> {
        let key = address.to_ascii_uppercase();
        let requests = self.requests.get_mut(&key)?;
        let position = requests
            .iter()
            .position(|request| request.uuid.eq_ignore_ascii_case(uuid))?;
        let request = requests.remove(position);
        if requests.is_empty() {
            self.requests.remove(&key);
        }
        Some(request)
    }

    pub fn remove_requests_for(&mut self, address: &str) -> usize {
        self.requests
            .remove(&address.to_ascii_uppercase())
            .map(|requests| requests.len())
            .unwrap_or(0)
    }

    /// Drop every request for which `keep` is false; returns how many went.
    pub fn retain_requests(&mut self, mut keep: impl FnMut(&ConnectionRequest) -> bool) -> usize {
        let before = self.pending_request_count();
        for requests in self.requests.values_mut() {
            requests.retain(|request| keep(request));
        }
        self.requests.retain(|_, requests| !requests.is_empty());
        before - self.pending_request_count()
    }

    pub fn pending_request_count(&self) -> usize {
        self.requests.values().map(Vec::len).sum()
    }

    pub fn insert_socket(&mut self, socket: BluetoothSocket) {
        self.sockets.insert(socket.descriptor(), socket);
    }

    pub fn socket(&self, descriptor: i32) -> Option<&BluetoothSocket> {
        self.sockets.get(&descriptor)
    }

    pub fn remove_socket(&mut self, descriptor: i32) -> Option<BluetoothSocket> {
        self.sockets.remove(&descriptor)
    }

    pub fn socket_count(&self) -> usize {
        self.sockets.len()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn is_idle(&self) -> bool {
        self.services.is_empty() && self.requests.is_empty() && self.sockets.is_empty()
    }

    pub fn is_data_subscribed(&self) -> bool {
        self.data_subscribed
    }

    pub fn is_connection_subscribed(&self) -> bool {
        self.connection_subscribed
    }

    /// Subscribe connection-state events ahead of an outbound connect.
    pub fn ensure_connection_subscribed(&mut self, native: &dyn NativeStack) {
        if !self.connection_subscribed {
            self.connection_subscribed = toggle(native, Subscription::ConnectionState, true);
        }
    }

    /// Bring the native subscriptions in line with the registry contents.
    pub fn sync_subscriptions(&mut self, native: &dyn NativeStack) {
        let want_connection = !self.is_idle();
        if want_connection != self.connection_subscribed {
            self.connection_subscribed =
                toggle(native, Subscription::ConnectionState, want_connection);
        }

        let want_data = !self.sockets.is_empty();
        if want_data != self.data_subscribed {
            self.data_subscribed = toggle(native, Subscription::DataReceived, want_data);
        }
    }

    /// Forget everything, returning the listening descriptors still open.
    pub(crate) fn drain_services(&mut self) -> Vec<i32> {
        let descriptors = self
            .services
            .drain()
            .map(|(_, handler)| {
                handler.mark_unregistered();
                handler.descriptor()
            })
            .collect();
        self.requests.clear();
        for socket in self.sockets.values() {
            socket.mark_closed();
        }
        self.sockets.clear();
        descriptors
    }
}

/// Returns the new subscription state. A failed unset still counts as unset.
fn toggle(native: &dyn NativeStack, subscription: Subscription, active: bool) -> bool {
    if active {
        match native.subscribe(subscription) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to subscribe {:?}: {}", subscription, e);
                false
            }
        }
    } else {
        if let Err(e) = native.unsubscribe(subscription) {
            error!("Failed to unsubscribe {:?}: {}", subscription, e);
        }
        false
    }
}

impl BluetoothAdapter {
    /// Register an RFCOMM service. Runs on a later queue turn.
    pub fn register_service(&mut self, uuid: &str, name: &str, callback: ServiceCallback) {
        let uuid = uuid.to_string();
        let name = name.to_string();
        self.tasks
            .push(move |adapter| adapter.complete_service_registration(&uuid, &name, callback));
    }

    fn complete_service_registration(&mut self, uuid: &str, name: &str, callback: ServiceCallback) {
        if !is_valid_uuid(uuid) {
            callback.fail(BridgeError::InvalidValues("Wrong UUID".to_string()));
            return;
        }
        if !self.enabled {
            callback.fail(BridgeError::powered_off());
            return;
        }

        let in_use = match self.native.is_service_used(uuid) {
            Ok(in_use) => in_use,
            Err(e) => {
                error!("Failed to query service {}: {}", uuid, e);
                callback.fail(BridgeError::from_native(e, "service query failed"));
                return;
            }
        };
        if in_use || self.connections.is_registered(uuid) {
            callback.fail(BridgeError::InvalidValues(
                "The UUID is already registered".to_string(),
            ));
            return;
        }

        let descriptor = match self.native.create_rfcomm(uuid) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                error!("Failed to create RFCOMM socket for {}: {}", uuid, e);
                callback.fail(BridgeError::from_native(e, "socket creation failed"));
                return;
            }
        };
        if let Err(e) = self.native.listen_rfcomm(descriptor, self.listen_backlog) {
            error!("Failed to listen on RFCOMM socket {}: {}", descriptor, e);
            if let Err(e) = self.native.destroy_rfcomm(descriptor) {
                warn!("Failed to destroy RFCOMM socket {}: {}", descriptor, e);
            }
            callback.fail(BridgeError::from_native(e, "listening on socket failed"));
            return;
        }

        info!("Registered service {} ({}) on socket {}", name, uuid, descriptor);
        let handler = ServiceHandler::new(uuid, name, descriptor);
        self.connections.insert_service(handler.clone());
        self.connections.sync_subscriptions(self.native.as_ref());
        callback.succeed(handler);
    }

    pub fn unregister_service(&mut self, handler: &ServiceHandler, callback: VoidCallback) {
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }

        let uuid = handler.uuid();
        if handler.is_registered() {
            if let Err(e) = self.native.destroy_rfcomm(handler.descriptor()) {
                error!("Failed to destroy RFCOMM socket for {}: {}", uuid, e);
                self.tasks
                    .defer_error(callback, BridgeError::from_native(e, "socket destruction failed"));
                return;
            }
        }

        info!("Unregistered service {}", uuid);
        handler.mark_unregistered();
        self.connections.remove_service(&uuid);
        self.connections.sync_subscriptions(self.native.as_ref());
        self.tasks.defer_success(callback, ());
    }

    pub fn connect_to_service_by_uuid(
        &mut self,
        address: &str,
        uuid: &str,
        callback: SocketCallback,
    ) {
        if !is_valid_uuid(uuid) {
            self.tasks
                .defer_error(callback, BridgeError::InvalidValues("Wrong UUID".to_string()));
            return;
        }
        if !is_valid_address(address) {
            self.tasks
                .defer_error(callback, BridgeError::InvalidValues("Wrong address".to_string()));
            return;
        }
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }

        self.connections
            .ensure_connection_subscribed(self.native.as_ref());
        match self.native.connect_rfcomm(address, uuid) {
            Ok(()) => {
                info!("Connecting to {} on {}", address, uuid);
                self.connections.add_request(ConnectionRequest {
                    address: address.to_string(),
                    uuid: uuid.to_string(),
                    callback,
                });
            }
            Err(NativeError::RemoteDeviceNotBonded) => {
                self.tasks.defer_error(
                    callback,
                    BridgeError::InvalidValues("The remote device is not bonded".to_string()),
                );
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                self.tasks
                    .defer_error(callback, BridgeError::from_native(e, "connecting failed"));
            }
        }
        self.connections.sync_subscriptions(self.native.as_ref());
    }

    /// Drop a socket the script no longer references.
    pub fn release_socket(&mut self, descriptor: i32) -> bool {
        if !self.enabled {
            return false;
        }
        match self.connections.remove_socket(descriptor) {
            Some(socket) => {
                debug!("Released socket {}", descriptor);
                socket.mark_closed();
                self.connections.sync_subscriptions(self.native.as_ref());
                true
            }
            None => false,
        }
    }

    /// Forget outbound requests once no device value for `address` remains.
    pub fn cancel_connection_requests(&mut self, address: &str) -> usize {
        let removed = self.connections.remove_requests_for(address);
        if removed > 0 {
            debug!("Dropped {} connection requests for {}", removed, address);
            self.connections.sync_subscriptions(self.native.as_ref());
        }
        removed
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub(super) fn on_connection_state_changed(
        &mut self,
        result: NativeResult,
        state: ConnectionState,
        connection: Option<ConnectionInfo>,
    ) {
        let Some(connection) = connection else {
            warn!("Connection state changed without connection info");
            return;
        };

        match connection.role {
            SocketRole::Server => self.on_server_connection(result, state, &connection),
            SocketRole::Client => self.on_client_connection(result, state, &connection),
        }
        self.connections.sync_subscriptions(self.native.as_ref());
    }

    fn on_server_connection(
        &mut self,
        result: NativeResult,
        state: ConnectionState,
        connection: &ConnectionInfo,
    ) {
        let Some(service) = self.connections.service(&connection.service_uuid).cloned() else {
            warn!(
                "Connection event for unregistered service {}",
                connection.service_uuid
            );
            return;
        };

        match (state, result) {
            (ConnectionState::Connected, Ok(())) => {
                info!(
                    "Inbound connection from {} on {}",
                    connection.remote_address, connection.service_uuid
                );
                service.set_connected(true);
                let socket = self.open_socket(connection);
                if let Some(onconnect) = service.onconnect() {
                    self.tasks.push(move |_| onconnect(socket));
                }
            }
            (ConnectionState::Connected, Err(e)) => {
                warn!("Inbound connection on {} failed: {}", connection.service_uuid, e);
            }
            (ConnectionState::Disconnected, Ok(())) => {
                service.set_connected(false);
                self.close_socket(connection.descriptor);
            }
            (ConnectionState::Disconnected, Err(e)) => {
                self.report_disconnect_failure(connection.descriptor, e);
            }
        }
    }

    fn on_client_connection(
        &mut self,
        result: NativeResult,
        state: ConnectionState,
        connection: &ConnectionInfo,
    ) {
        match state {
            ConnectionState::Connected => {
                let Some(request) = self
                    .connections
                    .take_request(&connection.remote_address, &connection.service_uuid)
                else {
                    warn!(
                        "No connection request for {} on {}",
                        connection.remote_address, connection.service_uuid
                    );
                    return;
                };

                match result {
                    Ok(()) => {
                        info!("Connected to {}", connection.remote_address);
                        let socket = self.open_socket(connection);
                        request.callback.succeed(socket);
                    }
                    Err(e) => {
                        error!("Connecting to {} failed: {}", connection.remote_address, e);
                        request
                            .callback
                            .fail(BridgeError::NotFound("Not found".to_string()));
                    }
                }
            }
            ConnectionState::Disconnected => match result {
                Ok(()) => self.close_socket(connection.descriptor),
                Err(e) => self.report_disconnect_failure(connection.descriptor, e),
            },
        }
    }

    fn open_socket(&mut self, connection: &ConnectionInfo) -> BluetoothSocket {
        let peer = self.resolve_peer(&connection.remote_address);
        let socket = BluetoothSocket::new(connection, peer, self.native.clone());
        self.connections.insert_socket(socket.clone());
        socket
    }

    fn close_socket(&mut self, descriptor: i32) {
        let Some(socket) = self.connections.remove_socket(descriptor) else {
            debug!("Disconnect for unknown socket {}", descriptor);
            return;
        };
        info!("Socket {} closed", descriptor);
        socket.mark_closed();
        if let Some(onclose) = socket.onclose() {
            self.tasks.push(move |_| onclose());
        }
    }

    fn report_disconnect_failure(&mut self, descriptor: i32, error: NativeError) {
        warn!("Disconnecting socket {} failed: {}", descriptor, error);
        let handler = self
            .connections
            .socket(descriptor)
            .and_then(BluetoothSocket::onerror);
        if let Some(onerror) = handler {
            let error = BridgeError::from_native(error, "disconnecting socket failed");
            self.tasks.push(move |_| onerror(error));
        }
    }

    pub(super) fn on_data_received(&mut self, descriptor: i32, data: &[u8]) {
        let Some(socket) = self.connections.socket(descriptor).cloned() else {
            warn!("Data received on unknown socket {}", descriptor);
            return;
        };
        debug!("Received {} bytes on socket {}", data.len(), descriptor);
        socket.store_received(data);
        if let Some(onmessage) = socket.onmessage() {
            onmessage();
        }
    }
}
