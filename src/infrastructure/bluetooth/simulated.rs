//! Simulated native stack
//!
//! An in-process [`NativeStack`] that records every call, answers queries
//! from configurable state and, depending on its [`Delivery`] mode, answers
//! operations with the events a real stack would send. Events are only
//! delivered for active subscriptions, as a real stack only calls registered
//! callbacks.

use crate::domain::device::DeviceInfo;
use crate::domain::errors::{NativeError, NativeResult};
use crate::infrastructure::bluetooth::dispatcher::NativeEventDispatcher;
use crate::infrastructure::bluetooth::native::{
    ConnectionInfo, ConnectionState, DiscoveryState, NativeEvent, NativeStack, SocketRole,
    Subscription, VisibilityMode,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// A state-changing call made on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCall {
    Initialize,
    Deinitialize,
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Enable,
    Disable,
    SetName(String),
    SetVisibility(VisibilityMode, u32),
    StartDiscovery,
    StopDiscovery,
    CreateBond(String),
    DestroyBond(String),
    CreateRfcomm(String),
    ListenRfcomm(i32, u32),
    DestroyRfcomm(i32),
    ConnectRfcomm(String, String),
    DisconnectRfcomm(i32),
    SendData(i32, Vec<u8>),
}

/// Operations that can be made to fail once with [`SimulatedStack::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    QueryName,
    QueryAddress,
    Enable,
    Disable,
    SetName,
    SetVisibility,
    StartDiscovery,
    StopDiscovery,
    CreateBond,
    DestroyBond,
    CreateRfcomm,
    ListenRfcomm,
    DestroyRfcomm,
    ConnectRfcomm,
    DisconnectRfcomm,
    SendData,
}

/// How operation results are reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No automatic events; tests emit them.
    Manual,
    /// Events are dispatched from inside the native call.
    Inline,
    /// Events are dispatched from a separate thread.
    Thread,
}

struct SimulatedState {
    enabled: bool,
    name: String,
    address: String,
    visibility: VisibilityMode,
    visibility_timeout: u32,
    discovering: bool,
    bonded: Vec<DeviceInfo>,
    nearby: Vec<DeviceInfo>,
    used_services: HashSet<String>,
    listening: HashMap<i32, String>,
    connections: HashMap<i32, ConnectionInfo>,
    next_descriptor: i32,
    subscriptions: HashSet<Subscription>,
    failures: HashMap<Operation, NativeError>,
    delivery: Delivery,
    calls: Vec<NativeCall>,
}

impl SimulatedState {
    fn take_failure(&mut self, operation: Operation) -> NativeResult {
        match self.failures.remove(&operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn allocate_descriptor(&mut self) -> i32 {
        let descriptor = self.next_descriptor;
        self.next_descriptor += 1;
        descriptor
    }

    fn bonded_index(&self, address: &str) -> Option<usize> {
        self.bonded
            .iter()
            .position(|info| info.address.eq_ignore_ascii_case(address))
    }
}

pub struct SimulatedStack {
    state: Mutex<SimulatedState>,
    dispatcher: NativeEventDispatcher,
    deliveries: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedStack {
    /// Powered-off adapter with manual event delivery.
    pub fn new(dispatcher: NativeEventDispatcher) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                enabled: false,
                name: "bluetooth-bridge".to_string(),
                address: "00:1A:7D:DA:71:13".to_string(),
                visibility: VisibilityMode::NonDiscoverable,
                visibility_timeout: 0,
                discovering: false,
                bonded: Vec::new(),
                nearby: Vec::new(),
                used_services: HashSet::new(),
                listening: HashMap::new(),
                connections: HashMap::new(),
                next_descriptor: 10,
                subscriptions: HashSet::new(),
                failures: HashMap::new(),
                delivery: Delivery::Manual,
                calls: Vec::new(),
            }),
            dispatcher,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_delivery(&self, delivery: Delivery) {
        self.lock().delivery = delivery;
    }

    pub fn set_powered_state(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    pub fn set_visibility_state(&self, mode: VisibilityMode, timeout: u32) {
        let mut state = self.lock();
        state.visibility = mode;
        state.visibility_timeout = timeout;
    }

    pub fn set_discovering(&self, discovering: bool) {
        self.lock().discovering = discovering;
    }

    pub fn add_bonded(&self, mut info: DeviceInfo) {
        info.is_bonded = true;
        self.lock().bonded.push(info);
    }

    /// Devices reported by the next discovery round.
    pub fn set_nearby(&self, devices: Vec<DeviceInfo>) {
        self.lock().nearby = devices;
    }

    pub fn mark_service_used(&self, uuid: &str) {
        self.lock().used_services.insert(uuid.to_string());
    }

    /// Make the next call of `operation` fail with `error`.
    pub fn fail_next(&self, operation: Operation, error: NativeError) {
        self.lock().failures.insert(operation, error);
    }

    pub fn calls(&self) -> Vec<NativeCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, matches: impl Fn(&NativeCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn is_subscribed(&self, subscription: Subscription) -> bool {
        self.lock().subscriptions.contains(&subscription)
    }

    /// Dispatch `event` now, from the calling thread.
    pub fn emit(&self, event: NativeEvent) {
        if let NativeEvent::DiscoveryStateChanged { state, .. } = &event {
            match state {
                DiscoveryState::Started => self.set_discovering(true),
                DiscoveryState::Finished => self.set_discovering(false),
                DiscoveryState::Found => {}
            }
        }
        if self.is_subscribed(event.subscription()) {
            self.send(event);
        } else {
            debug!("No subscription for {:?}, event dropped", event.subscription());
        }
    }

    /// Dispatch `event` from a separate thread.
    pub fn emit_from_thread(&self, event: NativeEvent) {
        if self.is_subscribed(event.subscription()) {
            self.spawn_delivery(vec![event]);
        }
    }

    /// Simulate an inbound connection to a listening service.
    pub fn accept_connection(&self, uuid: &str, remote_address: &str) -> i32 {
        let connection = {
            let mut state = self.lock();
            let descriptor = state.allocate_descriptor();
            let connection = ConnectionInfo {
                descriptor,
                role: SocketRole::Server,
                remote_address: remote_address.to_string(),
                service_uuid: uuid.to_string(),
            };
            state.connections.insert(descriptor, connection.clone());
            connection
        };
        let descriptor = connection.descriptor;
        self.emit(NativeEvent::SocketConnectionStateChanged {
            result: Ok(()),
            state: ConnectionState::Connected,
            connection: Some(connection),
        });
        descriptor
    }

    /// Simulate the remote side sending bytes.
    pub fn receive_data(&self, descriptor: i32, data: &[u8]) {
        self.emit(NativeEvent::SocketDataReceived {
            descriptor,
            data: data.to_vec(),
        });
    }

    /// Wait for every delivery thread started so far.
    pub fn join_deliveries(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Event delivery thread panicked");
            }
        }
    }

    fn send(&self, event: NativeEvent) {
        if let Err(e) = self.dispatcher.dispatch(event) {
            warn!("Simulated event not delivered: {}", e);
        }
    }

    fn spawn_delivery(&self, events: Vec<NativeEvent>) {
        let dispatcher = self.dispatcher.clone();
        let handle = thread::spawn(move || {
            for event in events {
                if let Err(e) = dispatcher.dispatch(event) {
                    warn!("Simulated event not delivered: {}", e);
                }
            }
        });
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Report the outcome of an operation according to the delivery mode.
    fn publish(&self, events: Vec<NativeEvent>) {
        let (delivery, events) = {
            let state = self.lock();
            let events: Vec<NativeEvent> = events
                .into_iter()
                .filter(|event| state.subscriptions.contains(&event.subscription()))
                .collect();
            (state.delivery, events)
        };
        match delivery {
            Delivery::Manual => {}
            Delivery::Inline => events.into_iter().for_each(|event| self.send(event)),
            Delivery::Thread => self.spawn_delivery(events),
        }
    }
}

impl NativeStack for SimulatedStack {
    fn initialize(&self) -> NativeResult {
        self.lock().calls.push(NativeCall::Initialize);
        Ok(())
    }

    fn deinitialize(&self) -> NativeResult {
        let mut state = self.lock();
        state.calls.push(NativeCall::Deinitialize);
        state.subscriptions.clear();
        Ok(())
    }

    fn subscribe(&self, subscription: Subscription) -> NativeResult {
        let mut state = self.lock();
        state.calls.push(NativeCall::Subscribe(subscription));
        state.subscriptions.insert(subscription);
        Ok(())
    }

    fn unsubscribe(&self, subscription: Subscription) -> NativeResult {
        let mut state = self.lock();
        state.calls.push(NativeCall::Unsubscribe(subscription));
        state.subscriptions.remove(&subscription);
        Ok(())
    }

    fn is_enabled(&self) -> NativeResult<bool> {
        Ok(self.lock().enabled)
    }

    fn enable(&self) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::Enable);
            state.take_failure(Operation::Enable)?;
            if state.enabled {
                return Err(NativeError::AlreadyDone);
            }
            state.enabled = true;
        }
        self.publish(vec![NativeEvent::AdapterStateChanged {
            result: Ok(()),
            enabled: true,
        }]);
        Ok(())
    }

    fn disable(&self) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::Disable);
            state.take_failure(Operation::Disable)?;
            if !state.enabled {
                return Err(NativeError::AlreadyDone);
            }
            state.enabled = false;
            state.discovering = false;
        }
        self.publish(vec![NativeEvent::AdapterStateChanged {
            result: Ok(()),
            enabled: false,
        }]);
        Ok(())
    }

    fn name(&self) -> NativeResult<String> {
        let mut state = self.lock();
        state.take_failure(Operation::QueryName)?;
        Ok(state.name.clone())
    }

    fn set_name(&self, name: &str) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::SetName(name.to_string()));
            state.take_failure(Operation::SetName)?;
            state.name = name.to_string();
        }
        self.publish(vec![NativeEvent::NameChanged {
            name: name.to_string(),
        }]);
        Ok(())
    }

    fn address(&self) -> NativeResult<String> {
        let mut state = self.lock();
        state.take_failure(Operation::QueryAddress)?;
        Ok(state.address.clone())
    }

    fn visibility(&self) -> NativeResult<(VisibilityMode, u32)> {
        let state = self.lock();
        Ok((state.visibility, state.visibility_timeout))
    }

    fn set_visibility(&self, mode: VisibilityMode, timeout: u32) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::SetVisibility(mode, timeout));
            state.take_failure(Operation::SetVisibility)?;
            state.visibility = mode;
            state.visibility_timeout = timeout;
        }
        self.publish(vec![NativeEvent::VisibilityChanged {
            result: Ok(()),
            mode,
        }]);
        Ok(())
    }

    fn start_discovery(&self) -> NativeResult {
        let nearby = {
            let mut state = self.lock();
            state.calls.push(NativeCall::StartDiscovery);
            state.take_failure(Operation::StartDiscovery)?;
            if !state.enabled {
                return Err(NativeError::NotEnabled);
            }
            if state.discovering {
                return Err(NativeError::NowInProgress);
            }
            // An automatic round completes immediately
            state.discovering = state.delivery == Delivery::Manual;
            state.nearby.clone()
        };

        let mut events = vec![NativeEvent::DiscoveryStateChanged {
            result: Ok(()),
            state: DiscoveryState::Started,
            device: None,
        }];
        events.extend(nearby.into_iter().map(|info| NativeEvent::DiscoveryStateChanged {
            result: Ok(()),
            state: DiscoveryState::Found,
            device: Some(info),
        }));
        events.push(NativeEvent::DiscoveryStateChanged {
            result: Ok(()),
            state: DiscoveryState::Finished,
            device: None,
        });
        self.publish(events);
        Ok(())
    }

    fn stop_discovery(&self) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::StopDiscovery);
            state.take_failure(Operation::StopDiscovery)?;
            if !state.discovering {
                return Err(NativeError::NotInProgress);
            }
            // A manual round ends with the Finished event
            state.discovering = state.delivery == Delivery::Manual;
        }
        self.publish(vec![NativeEvent::DiscoveryStateChanged {
            result: Err(NativeError::Cancelled),
            state: DiscoveryState::Finished,
            device: None,
        }]);
        Ok(())
    }

    fn is_discovering(&self) -> NativeResult<bool> {
        Ok(self.lock().discovering)
    }

    fn bonded_devices(&self) -> NativeResult<Vec<DeviceInfo>> {
        Ok(self.lock().bonded.clone())
    }

    fn bonded_device(&self, address: &str) -> NativeResult<Option<DeviceInfo>> {
        let state = self.lock();
        Ok(state.bonded_index(address).map(|i| state.bonded[i].clone()))
    }

    fn create_bond(&self, address: &str) -> NativeResult {
        let info = {
            let mut state = self.lock();
            state.calls.push(NativeCall::CreateBond(address.to_string()));
            state.take_failure(Operation::CreateBond)?;
            let mut info = state
                .nearby
                .iter()
                .find(|info| info.address.eq_ignore_ascii_case(address))
                .cloned()
                .unwrap_or_else(|| DeviceInfo::new(address, ""));
            info.is_bonded = true;
            if state.bonded_index(address).is_none() {
                state.bonded.push(info.clone());
            }
            info
        };
        self.publish(vec![NativeEvent::BondCreated {
            result: Ok(()),
            device: Some(info),
        }]);
        Ok(())
    }

    fn destroy_bond(&self, address: &str) -> NativeResult {
        {
            let mut state = self.lock();
            state.calls.push(NativeCall::DestroyBond(address.to_string()));
            state.take_failure(Operation::DestroyBond)?;
            let index = state
                .bonded_index(address)
                .ok_or(NativeError::InvalidParameter)?;
            state.bonded.remove(index);
        }
        self.publish(vec![NativeEvent::BondDestroyed {
            result: Ok(()),
            address: address.to_string(),
        }]);
        Ok(())
    }

    fn is_service_used(&self, uuid: &str) -> NativeResult<bool> {
        Ok(self.lock().used_services.contains(uuid))
    }

    fn create_rfcomm(&self, uuid: &str) -> NativeResult<i32> {
        let mut state = self.lock();
        state.calls.push(NativeCall::CreateRfcomm(uuid.to_string()));
        state.take_failure(Operation::CreateRfcomm)?;
        let descriptor = state.allocate_descriptor();
        state.listening.insert(descriptor, uuid.to_string());
        Ok(descriptor)
    }

    fn listen_rfcomm(&self, descriptor: i32, backlog: u32) -> NativeResult {
        let mut state = self.lock();
        state.calls.push(NativeCall::ListenRfcomm(descriptor, backlog));
        state.take_failure(Operation::ListenRfcomm)?;
        let uuid = state
            .listening
            .get(&descriptor)
            .cloned()
            .ok_or(NativeError::InvalidParameter)?;
        state.used_services.insert(uuid);
        Ok(())
    }

    fn destroy_rfcomm(&self, descriptor: i32) -> NativeResult {
        let mut state = self.lock();
        state.calls.push(NativeCall::DestroyRfcomm(descriptor));
        state.take_failure(Operation::DestroyRfcomm)?;
        if let Some(uuid) = state.listening.remove(&descriptor) {
            state.used_services.remove(&uuid);
        }
        Ok(())
    }

    fn connect_rfcomm(&self, address: &str, uuid: &str) -> NativeResult {
        let connection = {
            let mut state = self.lock();
            state
                .calls
                .push(NativeCall::ConnectRfcomm(address.to_string(), uuid.to_string()));
            state.take_failure(Operation::ConnectRfcomm)?;
            if state.bonded_index(address).is_none() {
                return Err(NativeError::RemoteDeviceNotBonded);
            }
            let descriptor = state.allocate_descriptor();
            let connection = ConnectionInfo {
                descriptor,
                role: SocketRole::Client,
                remote_address: address.to_string(),
                service_uuid: uuid.to_string(),
            };
            state.connections.insert(descriptor, connection.clone());
            connection
        };
        self.publish(vec![NativeEvent::SocketConnectionStateChanged {
            result: Ok(()),
            state: ConnectionState::Connected,
            connection: Some(connection),
        }]);
        Ok(())
    }

    fn disconnect_rfcomm(&self, descriptor: i32) -> NativeResult {
        let connection = {
            let mut state = self.lock();
            state.calls.push(NativeCall::DisconnectRfcomm(descriptor));
            state.take_failure(Operation::DisconnectRfcomm)?;
            state
                .connections
                .remove(&descriptor)
                .ok_or(NativeError::RemoteDeviceNotConnected)?
        };
        self.publish(vec![NativeEvent::SocketConnectionStateChanged {
            result: Ok(()),
            state: ConnectionState::Disconnected,
            connection: Some(connection),
        }]);
        Ok(())
    }

    fn send_data(&self, descriptor: i32, data: &[u8]) -> NativeResult<usize> {
        let mut state = self.lock();
        state.calls.push(NativeCall::SendData(descriptor, data.to_vec()));
        state.take_failure(Operation::SendData)?;
        if !state.connections.contains_key(&descriptor) {
            return Err(NativeError::RemoteDeviceNotConnected);
        }
        Ok(data.len())
    }
}

impl Drop for SimulatedStack {
    fn drop(&mut self) {
        self.join_deliveries();
    }
}
