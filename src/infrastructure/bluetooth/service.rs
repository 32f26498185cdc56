//! Bluetooth Adapter Module
//!
//! The coordinator that owns adapter state and every registry, accepts
//! script operations and resolves them from native events. All of it runs on
//! the script thread; native callbacks reach it only through the task queue.

use crate::domain::device::{BluetoothDevice, DeviceInfo};
use crate::domain::errors::{BridgeError, NativeError, NativeResult};
use crate::domain::settings::Settings;
use crate::domain::validation::is_valid_address;
use crate::infrastructure::bluetooth::bonding::{BondDirection, BondingCoordinator};
use crate::infrastructure::bluetooth::connection::ConnectionRegistry;
use crate::infrastructure::bluetooth::discovery::DiscoverySession;
use crate::infrastructure::bluetooth::dispatcher::NativeEventDispatcher;
use crate::infrastructure::bluetooth::native::{NativeEvent, NativeStack, Subscription, VisibilityMode};
use crate::infrastructure::bluetooth::slots::{OperationKind, OperationSlotRegistry, PendingRequest};
use crate::infrastructure::bluetooth::worker::{self, JobId, WorkerOutcome};
use crate::script::{ChangeListener, DeviceCallback, DevicesCallback, ScriptTaskQueue, VoidCallback};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(crate) fn already_in_progress(kind: OperationKind) -> BridgeError {
    BridgeError::AlreadyInProgress(format!("{} is already in progress", kind))
}

/// Script-facing Bluetooth adapter
pub struct BluetoothAdapter {
    pub(super) native: Arc<dyn NativeStack>,
    dispatcher: NativeEventDispatcher,
    pub(super) tasks: ScriptTaskQueue,
    pub(super) enabled: bool,
    visible: bool,
    pub(super) slots: OperationSlotRegistry,
    pub(super) discovery: DiscoverySession,
    pub(super) connections: ConnectionRegistry,
    pub(super) bonding: BondingCoordinator,
    pub(super) change_listener: Option<ChangeListener>,
    pub(super) pending_jobs: HashMap<JobId, DevicesCallback>,
    next_job_id: u64,
    pub(super) listen_backlog: u32,
    worker_thread_name: String,
    shut_down: bool,
}

impl BluetoothAdapter {
    /// Initialise the native stack and register the adapter-wide callbacks.
    pub fn new(
        native: Arc<dyn NativeStack>,
        dispatcher: NativeEventDispatcher,
        tasks: ScriptTaskQueue,
        settings: &Settings,
    ) -> Result<Self, BridgeError> {
        native
            .initialize()
            .map_err(|e| BridgeError::from_native(e, "native stack initialisation failed"))?;

        let enabled = native
            .is_enabled()
            .map_err(|e| BridgeError::from_native(e, "adapter state query failed"))?;
        let visible = native
            .visibility()
            .map(|(mode, _)| mode.is_visible())
            .map_err(|e| BridgeError::from_native(e, "visibility query failed"))?;

        for subscription in Subscription::ADAPTER {
            native
                .subscribe(subscription)
                .map_err(|e| BridgeError::from_native(e, "callback registration failed"))?;
        }

        info!("Bluetooth adapter ready (powered: {}, visible: {})", enabled, visible);

        Ok(Self {
            native,
            dispatcher,
            tasks,
            enabled,
            visible,
            slots: OperationSlotRegistry::new(),
            discovery: DiscoverySession::new(),
            connections: ConnectionRegistry::new(),
            bonding: BondingCoordinator::new(),
            change_listener: None,
            pending_jobs: HashMap::new(),
            next_job_id: 0,
            listen_backlog: settings.rfcomm_listen_backlog,
            worker_thread_name: settings.worker_thread_name.clone(),
            shut_down: false,
        })
    }

    pub fn powered(&self) -> bool {
        self.enabled
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn name(&self) -> Result<String, BridgeError> {
        self.native.name().map_err(|e| {
            error!("Failed to read adapter name: {}", e);
            BridgeError::from_native(e, "adapter name query failed")
        })
    }

    pub fn address(&self) -> Result<String, BridgeError> {
        self.native.address().map_err(|e| {
            error!("Failed to read adapter address: {}", e);
            BridgeError::from_native(e, "adapter address query failed")
        })
    }

    pub fn tasks(&self) -> &ScriptTaskQueue {
        &self.tasks
    }

    pub fn found_devices(&self) -> &[BluetoothDevice] {
        self.discovery.found_devices()
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.pending_jobs.is_empty()
    }

    pub fn is_pending(&self, kind: OperationKind) -> bool {
        self.slots.is_claimed(kind)
    }

    /// Claim a slot; an occupied slot fails the request on a later turn.
    pub(super) fn claim(&mut self, request: PendingRequest) -> bool {
        match self.slots.try_claim(request) {
            Ok(()) => true,
            Err(request) => {
                let kind = request.kind();
                warn!("{} is already requested", kind);
                self.tasks.push(move |_| request.fail(already_in_progress(kind)));
                false
            }
        }
    }

    /// Release a slot after its native call failed and report `error`.
    pub(super) fn abort_request(&mut self, kind: OperationKind, error: BridgeError) {
        if let Some(request) = self.slots.release(kind) {
            self.tasks.push(move |_| request.fail(error));
        }
    }

    pub fn set_powered(&mut self, powered: bool, callback: VoidCallback) {
        let kind = OperationKind::SetPowered;
        if self.enabled == powered {
            debug!("Adapter is already {}", if powered { "on" } else { "off" });
            self.tasks.defer_success(callback, ());
            return;
        }
        if !self.claim(PendingRequest::SetPowered {
            requested: powered,
            callback,
        }) {
            return;
        }

        info!("Turning adapter {}", if powered { "on" } else { "off" });
        let result = if powered {
            self.native.enable()
        } else {
            self.native.disable()
        };
        match result {
            Ok(()) => {}
            Err(NativeError::AlreadyDone) => {
                if let Some(PendingRequest::SetPowered { callback, .. }) = self.slots.release(kind) {
                    self.tasks.defer_success(callback, ());
                }
            }
            Err(e) => {
                error!("Failed to change adapter power: {}", e);
                self.abort_request(kind, BridgeError::from_native(e, "adapter power change failed"));
            }
        }
    }

    pub fn set_name(&mut self, name: &str, callback: VoidCallback) {
        let kind = OperationKind::SetName;
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }
        if self.slots.is_claimed(kind) {
            warn!("{} is already requested", kind);
            self.tasks.defer_error(callback, already_in_progress(kind));
            return;
        }
        if self.native.name().is_ok_and(|current| current == name) {
            debug!("Adapter name is already {:?}", name);
            self.tasks.defer_success(callback, ());
            return;
        }
        if !self.claim(PendingRequest::SetName {
            requested: name.to_string(),
            callback,
        }) {
            return;
        }

        info!("Renaming adapter to {:?}", name);
        if let Err(e) = self.native.set_name(name) {
            error!("Failed to rename adapter: {}", e);
            self.abort_request(kind, BridgeError::from_native(e, "adapter rename failed"));
        }
    }

    pub fn set_visible(&mut self, visible: bool, timeout: u32, callback: VoidCallback) {
        let kind = OperationKind::SetVisible;
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }
        if self.slots.is_claimed(kind) {
            warn!("{} is already requested", kind);
            self.tasks.defer_error(callback, already_in_progress(kind));
            return;
        }

        let requested = VisibilityMode::requested(visible, timeout);
        match self.native.visibility() {
            Ok((current, current_timeout))
                if current == requested
                    && (requested != VisibilityMode::LimitedDiscoverable
                        || current_timeout == timeout) =>
            {
                debug!("Adapter visibility is already {:?}", requested);
                self.tasks.defer_success(callback, ());
                return;
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to read adapter visibility: {}", e),
        }
        if !self.claim(PendingRequest::SetVisible {
            requested,
            callback,
        }) {
            return;
        }

        info!("Setting adapter visibility to {:?} ({}s)", requested, timeout);
        match self.native.set_visibility(requested, timeout) {
            Ok(()) => {}
            Err(NativeError::AlreadyDone) => {
                if let Some(PendingRequest::SetVisible { callback, .. }) = self.slots.release(kind) {
                    self.tasks.defer_success(callback, ());
                }
            }
            Err(e) => {
                error!("Failed to change adapter visibility: {}", e);
                self.abort_request(kind, BridgeError::from_native(e, "adapter visibility change failed"));
            }
        }
    }

    /// Bonded devices merged with the last discovery round.
    pub fn get_known_devices(&mut self, callback: DevicesCallback) {
        if !self.enabled {
            self.tasks.defer_error(callback, BridgeError::powered_off());
            return;
        }

        let job = JobId::new(self.next_job_id);
        self.next_job_id += 1;
        self.pending_jobs.insert(job, callback);

        let spawned = worker::spawn_known_devices_job(
            &self.worker_thread_name,
            job,
            self.native.clone(),
            self.dispatcher.clone(),
        );
        if let Err(e) = spawned {
            error!("Failed to start worker thread: {}", e);
            if let Some(callback) = self.pending_jobs.remove(&job) {
                self.tasks
                    .defer_error(callback, BridgeError::Unknown("Could not start a worker".to_string()));
            }
        }
    }

    /// Look up a device by address. Runs on a later queue turn.
    pub fn get_device(&mut self, address: &str, callback: DeviceCallback) {
        let address = address.to_string();
        self.tasks
            .push(move |adapter| adapter.return_device(&address, callback));
    }

    fn return_device(&mut self, address: &str, callback: DeviceCallback) {
        if !is_valid_address(address) {
            callback.fail(BridgeError::InvalidValues("Wrong address".to_string()));
            return;
        }
        if !self.enabled {
            callback.fail(BridgeError::powered_off());
            return;
        }

        if let Ok(Some(info)) = self.native.bonded_device(address) {
            callback.succeed(BluetoothDevice::from(&info));
        } else if let Some(device) = self.discovery.find(address) {
            callback.succeed(device.clone());
        } else {
            callback.fail(BridgeError::NotFound(
                "There is no device with the given address".to_string(),
            ));
        }
    }

    pub fn set_change_listener(&mut self, listener: ChangeListener) {
        debug!("Change listener set by {}", listener.context());
        self.change_listener = Some(listener);
    }

    pub fn unset_change_listener(&mut self) {
        self.change_listener = None;
    }

    /// Route a native event to its handler. Runs as a queue task.
    pub fn handle_native_event(&mut self, event: NativeEvent) {
        if self.shut_down {
            debug!("Ignoring {:?} after shutdown", event.subscription());
            return;
        }
        match event {
            NativeEvent::AdapterStateChanged { result, enabled } => {
                self.on_state_changed(result, enabled)
            }
            NativeEvent::NameChanged { name } => self.on_name_changed(&name),
            NativeEvent::VisibilityChanged { result, mode } => {
                self.on_visibility_changed(result, mode)
            }
            NativeEvent::DiscoveryStateChanged {
                result,
                state,
                device,
            } => self.on_discovery_state_changed(result, state, device),
            NativeEvent::BondCreated { result, device } => self.on_bond_created(result, device),
            NativeEvent::BondDestroyed { result, address } => {
                self.on_bond_destroyed(result, &address)
            }
            NativeEvent::SocketConnectionStateChanged {
                result,
                state,
                connection,
            } => self.on_connection_state_changed(result, state, connection),
            NativeEvent::SocketDataReceived { descriptor, data } => {
                self.on_data_received(descriptor, &data)
            }
        }
    }

    /// Resolve a worker job. Jobs of unloaded contexts are gone by now.
    pub fn handle_worker_outcome(&mut self, outcome: WorkerOutcome) {
        match outcome {
            WorkerOutcome::KnownDevices { job, result } => {
                let Some(callback) = self.pending_jobs.remove(&job) else {
                    debug!("Known devices for {:?} are no longer awaited", job);
                    return;
                };
                if !self.enabled {
                    callback.fail(BridgeError::powered_off());
                    return;
                }
                match result {
                    Ok(bonded) => callback.succeed(self.merge_known_devices(&bonded)),
                    Err(e) => {
                        error!("Bonded device enumeration failed: {}", e);
                        callback.fail(BridgeError::from_native(e, "bonded device enumeration failed"));
                    }
                }
            }
        }
    }

    fn merge_known_devices(&self, bonded: &[DeviceInfo]) -> Vec<BluetoothDevice> {
        let mut known = self.discovery.found_devices().to_vec();
        for info in bonded {
            match known.iter_mut().find(|device| device.has_address(&info.address)) {
                Some(device) => device.update_from(info),
                None => known.push(BluetoothDevice::from(info)),
            }
        }
        known
    }

    /// Peer device value for a socket.
    pub(super) fn resolve_peer(&self, address: &str) -> BluetoothDevice {
        if let Ok(Some(info)) = self.native.bonded_device(address) {
            return BluetoothDevice::from(&info);
        }
        match self.discovery.find(address) {
            Some(device) => device.clone(),
            None => {
                debug!("Peer {} is neither bonded nor discovered", address);
                BluetoothDevice::with_address(address)
            }
        }
    }

    fn on_state_changed(&mut self, result: NativeResult, enabled: bool) {
        let previous = self.enabled;
        self.enabled = enabled;
        if enabled {
            self.visible = self
                .native
                .visibility()
                .map(|(mode, _)| mode.is_visible())
                .unwrap_or(self.visible);
        }
        if previous != enabled && result.is_ok() {
            if let Some(listener) = self.change_listener.as_mut() {
                listener.state_changed(enabled);
            }
        }

        let kind = OperationKind::SetPowered;
        let requested = match self.slots.get(kind) {
            Some(PendingRequest::SetPowered { requested, .. }) => *requested,
            _ => {
                debug!("Adapter state changed to {} without a request", enabled);
                return;
            }
        };
        if let Err(e) = result {
            error!("Adapter state change failed: {}", e);
            if let Some(request) = self.slots.release(kind) {
                request.fail(BridgeError::from_native(e, "adapter power change failed"));
            }
            return;
        }
        if requested != enabled {
            warn!("Requested state is not equal to current state");
            return;
        }
        if let Some(PendingRequest::SetPowered { callback, .. }) = self.slots.release(kind) {
            callback.succeed(());
        }
    }

    fn on_name_changed(&mut self, name: &str) {
        if let Some(listener) = self.change_listener.as_mut() {
            listener.name_changed(name);
        }

        let kind = OperationKind::SetName;
        let matches = match self.slots.get(kind) {
            Some(PendingRequest::SetName { requested, .. }) => requested == name,
            _ => {
                debug!("Adapter name changed to {:?} without a request", name);
                return;
            }
        };
        if !matches {
            warn!("Requested name is not equal to the new name {:?}", name);
            return;
        }
        if let Some(PendingRequest::SetName { callback, .. }) = self.slots.release(kind) {
            callback.succeed(());
        }
    }

    fn on_visibility_changed(&mut self, result: NativeResult, mode: VisibilityMode) {
        let visible = mode.is_visible();
        let previous = self.visible;
        self.visible = visible;
        if previous != visible && result.is_ok() {
            if let Some(listener) = self.change_listener.as_mut() {
                listener.visibility_changed(visible);
            }
        }

        let kind = OperationKind::SetVisible;
        let requested = match self.slots.get(kind) {
            Some(PendingRequest::SetVisible { requested, .. }) => *requested,
            _ => {
                debug!("Adapter visibility changed to {:?} without a request", mode);
                return;
            }
        };
        if let Err(e) = result {
            error!("Adapter visibility change failed: {}", e);
            if let Some(request) = self.slots.release(kind) {
                request.fail(BridgeError::from_native(e, "adapter visibility change failed"));
            }
            return;
        }
        if requested != mode {
            warn!("Requested visibility is not equal to current visibility");
            return;
        }
        if let Some(PendingRequest::SetVisible { callback, .. }) = self.slots.release(kind) {
            callback.succeed(());
        }
    }

    /// Unregister every native callback, close services and deinitialise the
    /// stack. Pending callbacks are dropped unresolved.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Shutting down Bluetooth adapter");

        for descriptor in self.connections.drain_services() {
            if let Err(e) = self.native.destroy_rfcomm(descriptor) {
                warn!("Failed to destroy RFCOMM socket {}: {}", descriptor, e);
            }
        }
        self.connections.sync_subscriptions(self.native.as_ref());

        self.slots.clear();
        self.pending_jobs.clear();
        self.change_listener = None;
        self.bonding
            .unwatch(BondDirection::Create, self.native.as_ref());
        self.bonding
            .unwatch(BondDirection::Destroy, self.native.as_ref());

        for subscription in Subscription::ADAPTER {
            if let Err(e) = self.native.unsubscribe(subscription) {
                warn!("Failed to unsubscribe {:?}: {}", subscription, e);
            }
        }
        if let Err(e) = self.native.deinitialize() {
            error!("Failed to deinitialise native stack: {}", e);
        }
    }
}

impl Drop for BluetoothAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
