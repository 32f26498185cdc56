use bluetooth_bridge::domain::device::{BluetoothDevice, DeviceInfo};
use bluetooth_bridge::domain::settings::Settings;
use bluetooth_bridge::infrastructure::bluetooth::dispatcher::NativeEventDispatcher;
use bluetooth_bridge::infrastructure::bluetooth::native::{
    ConnectionInfo, ConnectionState, DiscoveryState, NativeEvent, SocketRole, Subscription,
    VisibilityMode,
};
use bluetooth_bridge::infrastructure::bluetooth::simulated::{
    Delivery, NativeCall, Operation, SimulatedStack,
};
use bluetooth_bridge::infrastructure::bluetooth::slots::OperationKind;
use bluetooth_bridge::infrastructure::bluetooth::socket::{BluetoothSocket, ServiceHandler};
use bluetooth_bridge::script::{ChangeListener, ContextId, DiscoveryCallbacks, ResultCallback};
use bluetooth_bridge::{BridgeError, ErrorKind, NativeError, ScriptRuntime};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

const PHONE: &str = "00:12:47:08:9A:A6";
const HEADSET: &str = "00:12:47:08:9A:A7";
const SPEAKER: &str = "00:12:47:08:9A:A8";
const SPP: &str = "00001101-0000-1000-8000-00805F9B34FB";
const OPP: &str = "00001105-0000-1000-8000-00805F9B34FB";

const SCRIPT: ContextId = ContextId::new(1);
const OTHER_SCRIPT: ContextId = ContextId::new(2);

type Outcomes<T> = Rc<RefCell<Vec<Result<T, BridgeError>>>>;

fn harness(powered: bool, delivery: Delivery) -> (ScriptRuntime, Arc<SimulatedStack>) {
    harness_with(Settings::default(), powered, delivery)
}

fn harness_with(
    settings: Settings,
    powered: bool,
    delivery: Delivery,
) -> (ScriptRuntime, Arc<SimulatedStack>) {
    let (dispatcher, receiver) = NativeEventDispatcher::channel(settings.task_queue_capacity);
    let stack = Arc::new(SimulatedStack::new(dispatcher.clone()));
    stack.set_powered_state(powered);
    stack.set_delivery(delivery);
    let runtime =
        ScriptRuntime::new(stack.clone(), dispatcher, receiver, &settings).expect("runtime");
    (runtime, stack)
}

fn recorder<T: 'static>(context: ContextId) -> (ResultCallback<T>, Outcomes<T>) {
    let outcomes: Outcomes<T> = Rc::new(RefCell::new(Vec::new()));
    let (ok, err) = (outcomes.clone(), outcomes.clone());
    let callback = ResultCallback::new(
        context,
        move |value| ok.borrow_mut().push(Ok(value)),
        move |error| err.borrow_mut().push(Err(error)),
    );
    (callback, outcomes)
}

fn first_error<T>(outcomes: &Outcomes<T>) -> Option<ErrorKind> {
    outcomes
        .borrow()
        .first()
        .and_then(|outcome| outcome.as_ref().err().map(BridgeError::kind))
}

fn succeeded<T>(outcomes: &Outcomes<T>) -> bool {
    matches!(outcomes.borrow().as_slice(), [Ok(_)])
}

fn discovery_event(state: DiscoveryState, device: Option<DeviceInfo>) -> NativeEvent {
    NativeEvent::DiscoveryStateChanged {
        result: Ok(()),
        state,
        device,
    }
}

fn client_connected(descriptor: i32, address: &str, uuid: &str) -> NativeEvent {
    NativeEvent::SocketConnectionStateChanged {
        result: Ok(()),
        state: ConnectionState::Connected,
        connection: Some(ConnectionInfo {
            descriptor,
            role: SocketRole::Client,
            remote_address: address.to_string(),
            service_uuid: uuid.to_string(),
        }),
    }
}

fn server_connection(descriptor: i32, state: ConnectionState, result: Result<(), NativeError>) -> NativeEvent {
    NativeEvent::SocketConnectionStateChanged {
        result,
        state,
        connection: Some(ConnectionInfo {
            descriptor,
            role: SocketRole::Server,
            remote_address: HEADSET.to_string(),
            service_uuid: SPP.to_string(),
        }),
    }
}

fn registered_service(runtime: &mut ScriptRuntime) -> ServiceHandler {
    let (callback, outcome) = recorder::<ServiceHandler>(SCRIPT);
    runtime.adapter().register_service(SPP, "chat", callback);
    runtime.run_pending();
    let handler = match outcome.borrow().first() {
        Some(Ok(handler)) => handler.clone(),
        _ => panic!("service registration failed"),
    };
    handler
}

fn accept_into(handler: &ServiceHandler) -> Rc<RefCell<Option<BluetoothSocket>>> {
    let accepted: Rc<RefCell<Option<BluetoothSocket>>> = Rc::new(RefCell::new(None));
    let accepted_sink = accepted.clone();
    handler.set_onconnect(move |socket| *accepted_sink.borrow_mut() = Some(socket));
    accepted
}

struct DiscoveryRecord {
    started: Rc<RefCell<usize>>,
    found: Rc<RefCell<Vec<String>>>,
    disappeared: Rc<RefCell<Vec<String>>>,
    finished: Rc<RefCell<Option<Vec<String>>>>,
    error: Rc<RefCell<Option<ErrorKind>>>,
}

fn discovery_recorder(context: ContextId) -> (DiscoveryCallbacks, DiscoveryRecord) {
    let record = DiscoveryRecord {
        started: Rc::default(),
        found: Rc::default(),
        disappeared: Rc::default(),
        finished: Rc::default(),
        error: Rc::default(),
    };
    let (started, found, disappeared, finished, error) = (
        record.started.clone(),
        record.found.clone(),
        record.disappeared.clone(),
        record.finished.clone(),
        record.error.clone(),
    );
    let callbacks = DiscoveryCallbacks::new(context)
        .on_started(move || *started.borrow_mut() += 1)
        .on_device_found(move |device| found.borrow_mut().push(device.address().to_string()))
        .on_device_disappeared(move |address| disappeared.borrow_mut().push(address))
        .on_finished(move |devices| {
            let addresses = devices
                .iter()
                .map(|device| device.address().to_string())
                .collect();
            *finished.borrow_mut() = Some(addresses);
        })
        .on_error(move |e| *error.borrow_mut() = Some(e.kind()));
    (callbacks, record)
}

#[test]
fn test_second_request_of_each_kind_is_rejected_without_native_call() {
    let (mut runtime, stack) = harness(false, Delivery::Manual);
    let (first, first_outcome) = recorder(SCRIPT);
    let (second, second_outcome) = recorder(SCRIPT);
    runtime.adapter().set_powered(true, first);
    runtime.adapter().set_powered(true, second);
    runtime.run_pending();
    assert!(first_outcome.borrow().is_empty());
    assert_eq!(first_error(&second_outcome), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(stack.call_count(|call| *call == NativeCall::Enable), 1);

    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(HEADSET, "Headset"));

    let (name_first, _) = recorder(SCRIPT);
    let (name_second, name_outcome) = recorder(SCRIPT);
    runtime.adapter().set_name("one", name_first);
    runtime.adapter().set_name("two", name_second);

    let (visible_first, _) = recorder(SCRIPT);
    let (visible_second, visible_outcome) = recorder(SCRIPT);
    runtime.adapter().set_visible(true, 0, visible_first);
    runtime.adapter().set_visible(false, 0, visible_second);

    let (discover_first, _) = discovery_recorder(SCRIPT);
    let (discover_second, discover_record) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(discover_first);
    runtime.adapter().discover_devices(discover_second);

    let (stop_first, _) = recorder(SCRIPT);
    let (stop_second, stop_outcome) = recorder(SCRIPT);
    runtime.adapter().stop_discovery(stop_first);
    runtime.adapter().stop_discovery(stop_second);

    let (create_first, _) = recorder::<BluetoothDevice>(SCRIPT);
    let (create_second, create_outcome) = recorder(SCRIPT);
    runtime.adapter().create_bonding(PHONE, create_first);
    runtime.adapter().create_bonding(SPEAKER, create_second);

    let (destroy_first, _) = recorder(SCRIPT);
    let (destroy_second, destroy_outcome) = recorder(SCRIPT);
    runtime.adapter().destroy_bonding(HEADSET, destroy_first);
    runtime.adapter().destroy_bonding(HEADSET, destroy_second);

    runtime.run_pending();

    assert_eq!(first_error(&name_outcome), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(first_error(&visible_outcome), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(*discover_record.error.borrow(), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(first_error(&stop_outcome), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(first_error(&create_outcome), Some(ErrorKind::AlreadyInProgress));
    assert_eq!(first_error(&destroy_outcome), Some(ErrorKind::AlreadyInProgress));

    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::SetName(_))), 1);
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::SetVisibility(..))), 1);
    assert_eq!(stack.call_count(|call| *call == NativeCall::StartDiscovery), 1);
    assert_eq!(stack.call_count(|call| *call == NativeCall::StopDiscovery), 1);
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::CreateBond(_))), 1);
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::DestroyBond(_))), 1);

    for kind in [
        OperationKind::SetName,
        OperationKind::SetVisible,
        OperationKind::DiscoverDevices,
        OperationKind::StopDiscovery,
        OperationKind::CreateBonding,
        OperationKind::DestroyBonding,
    ] {
        assert!(runtime.adapter().is_pending(kind), "{} should stay pending", kind);
    }
}

#[test]
fn test_requests_matching_current_state_succeed_without_native_call() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.set_visibility_state(VisibilityMode::LimitedDiscoverable, 120);

    let (powered, powered_outcome) = recorder(SCRIPT);
    runtime.adapter().set_powered(true, powered);
    let (visible, visible_outcome) = recorder(SCRIPT);
    runtime.adapter().set_visible(true, 120, visible);
    runtime.run_pending();

    assert!(succeeded(&powered_outcome));
    assert!(succeeded(&visible_outcome));
    assert_eq!(stack.call_count(|call| *call == NativeCall::Enable), 0);
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::SetVisibility(..))), 0);

    let (longer, longer_outcome) = recorder(SCRIPT);
    runtime.adapter().set_visible(true, 60, longer);
    assert_eq!(
        stack.calls().last(),
        Some(&NativeCall::SetVisibility(VisibilityMode::LimitedDiscoverable, 60))
    );
    stack.emit(NativeEvent::VisibilityChanged {
        result: Ok(()),
        mode: VisibilityMode::LimitedDiscoverable,
    });
    runtime.run_pending();
    assert!(succeeded(&longer_outcome));
}

#[test]
fn test_precondition_failures_are_reported_on_a_later_turn() {
    let (mut runtime, stack) = harness(false, Delivery::Manual);
    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().set_name("renamed", callback);
    assert!(outcome.borrow().is_empty());

    runtime.run_pending();
    assert_eq!(first_error(&outcome), Some(ErrorKind::ServiceNotAvailable));
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::SetName(_))), 0);

    let (invalid, invalid_outcome) = recorder::<BluetoothDevice>(SCRIPT);
    runtime.adapter().create_bonding("not-an-address", invalid);
    assert!(invalid_outcome.borrow().is_empty());
    runtime.run_pending();
    assert_eq!(first_error(&invalid_outcome), Some(ErrorKind::InvalidValues));
}

#[test]
fn test_state_events_resolve_only_the_matching_request() {
    let (mut runtime, stack) = harness(false, Delivery::Manual);
    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().set_powered(true, callback);

    stack.emit(NativeEvent::AdapterStateChanged {
        result: Ok(()),
        enabled: false,
    });
    runtime.run_pending();
    assert!(outcome.borrow().is_empty());
    assert!(runtime.adapter().is_pending(OperationKind::SetPowered));

    stack.emit(NativeEvent::AdapterStateChanged {
        result: Ok(()),
        enabled: true,
    });
    runtime.run_pending();
    assert!(succeeded(&outcome));
    assert!(runtime.adapter().powered());
    assert!(!runtime.adapter().is_pending(OperationKind::SetPowered));
}

#[test]
fn test_failed_state_event_releases_the_request() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().set_visible(true, 0, callback);

    stack.emit(NativeEvent::VisibilityChanged {
        result: Err(NativeError::OperationFailed),
        mode: VisibilityMode::NonDiscoverable,
    });
    runtime.run_pending();

    assert_eq!(first_error(&outcome), Some(ErrorKind::Unknown));
    assert!(!runtime.adapter().is_pending(OperationKind::SetVisible));
}

#[test]
fn test_discovery_reports_disappeared_devices_in_the_next_round() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);

    let (callbacks, first) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(callbacks);
    stack.emit(discovery_event(DiscoveryState::Started, None));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(PHONE, "Phone"))));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(HEADSET, "Headset"))));
    stack.emit(discovery_event(DiscoveryState::Finished, None));
    runtime.run_pending();

    assert_eq!(*first.started.borrow(), 1);
    assert_eq!(*first.found.borrow(), vec![PHONE, HEADSET]);
    assert!(first.disappeared.borrow().is_empty());
    assert_eq!(*first.finished.borrow(), Some(vec![PHONE.to_string(), HEADSET.to_string()]));

    let (callbacks, second) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(callbacks);
    stack.emit(discovery_event(DiscoveryState::Started, None));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(HEADSET, "Headset"))));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(SPEAKER, "Speaker"))));

    let (stop, stop_outcome) = recorder(SCRIPT);
    runtime.adapter().stop_discovery(stop);
    stack.emit(NativeEvent::DiscoveryStateChanged {
        result: Err(NativeError::Cancelled),
        state: DiscoveryState::Finished,
        device: None,
    });
    runtime.run_pending();

    assert!(succeeded(&stop_outcome));
    assert_eq!(*second.disappeared.borrow(), vec![PHONE]);
    assert_eq!(
        *second.finished.borrow(),
        Some(vec![HEADSET.to_string(), SPEAKER.to_string()])
    );
    assert!(second.error.borrow().is_none());
}

#[test]
fn test_discovery_failures_release_the_slot() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.fail_next(Operation::StartDiscovery, NativeError::ResourceBusy);

    let (callbacks, record) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(callbacks);
    runtime.run_pending();
    assert_eq!(*record.error.borrow(), Some(ErrorKind::ServiceNotAvailable));
    assert!(!runtime.adapter().is_pending(OperationKind::DiscoverDevices));

    let (callbacks, record) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(callbacks);
    stack.emit(discovery_event(DiscoveryState::Started, None));
    stack.emit(NativeEvent::DiscoveryStateChanged {
        result: Err(NativeError::OperationFailed),
        state: DiscoveryState::Finished,
        device: None,
    });
    runtime.run_pending();

    assert_eq!(*record.started.borrow(), 1);
    assert_eq!(*record.error.borrow(), Some(ErrorKind::Unknown));
    assert!(record.finished.borrow().is_none());
}

#[test]
fn test_bond_event_for_another_device_keeps_request_pending() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    let (callback, outcome) = recorder::<BluetoothDevice>(SCRIPT);
    runtime.adapter().create_bonding(PHONE, callback);
    assert!(stack.is_subscribed(Subscription::BondCreated));

    stack.emit(NativeEvent::BondCreated {
        result: Ok(()),
        device: Some(DeviceInfo::new(HEADSET, "Headset")),
    });
    runtime.run_pending();
    assert!(outcome.borrow().is_empty());
    assert!(runtime.adapter().is_pending(OperationKind::CreateBonding));

    stack.emit(NativeEvent::BondCreated {
        result: Ok(()),
        device: Some(DeviceInfo::new(&PHONE.to_lowercase(), "Phone")),
    });
    runtime.run_pending();

    let outcomes = outcome.borrow();
    let device = outcomes[0].as_ref().expect("bonded device");
    assert_eq!(device.name(), "Phone");
    assert!(!stack.is_subscribed(Subscription::BondCreated));
}

#[test]
fn test_destroy_bonding_without_bond_fails_before_native_call() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);
    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().destroy_bonding(PHONE, callback);
    runtime.run_pending();

    assert_eq!(first_error(&outcome), Some(ErrorKind::NotFound));
    assert_eq!(stack.call_count(|call| matches!(call, NativeCall::DestroyBond(_))), 0);
    assert!(!stack.is_subscribed(Subscription::BondDestroyed));
}

#[test]
fn test_destroy_bonding_resolves_on_event() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));

    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().destroy_bonding(PHONE, callback);
    runtime.run_pending();

    assert!(succeeded(&outcome));
    assert!(!stack.is_subscribed(Subscription::BondDestroyed));

    let (lookup, lookup_outcome) = recorder::<BluetoothDevice>(SCRIPT);
    runtime.adapter().get_device(PHONE, lookup);
    runtime.run_pending();
    assert_eq!(first_error(&lookup_outcome), Some(ErrorKind::NotFound));
}

#[test]
fn test_client_socket_lifecycle_unsubscribes_data_once() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));

    let (callback, outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(PHONE, SPP, callback);
    runtime.run_pending();

    let socket = match outcome.borrow().first() {
        Some(Ok(socket)) => socket.clone(),
        other => panic!("expected a socket, got {:?}", other.map(|o| o.is_ok())),
    };
    assert_eq!(socket.peer().name(), "Phone");
    assert!(socket.peer().is_bonded());
    assert!(stack.is_subscribed(Subscription::DataReceived));

    let messages = Rc::new(RefCell::new(0));
    let closed = Rc::new(RefCell::new(0));
    let (messages_sink, closed_sink) = (messages.clone(), closed.clone());
    socket.set_onmessage(move || *messages_sink.borrow_mut() += 1);
    socket.set_onclose(move || *closed_sink.borrow_mut() += 1);

    stack.receive_data(socket.descriptor(), b"ping");
    runtime.run_pending();
    assert_eq!(*messages.borrow(), 1);
    assert_eq!(socket.read_data(), b"ping".to_vec());
    assert!(socket.read_data().is_empty());

    assert_eq!(socket.write_data(b"pong").expect("write"), 4);
    socket.close().expect("close");
    runtime.run_pending();

    assert_eq!(*closed.borrow(), 1);
    assert!(!socket.is_connected());
    assert!(!runtime.adapter().release_socket(socket.descriptor()));
    assert_eq!(
        stack.call_count(|call| *call == NativeCall::Unsubscribe(Subscription::DataReceived)),
        1
    );
    assert!(!stack.is_subscribed(Subscription::ConnectionState));
}

#[test]
fn test_client_connection_matches_address_and_uuid() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));

    let (callback, outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(PHONE, SPP, callback);
    assert_eq!(runtime.adapter().connections().pending_request_count(), 1);

    stack.emit(client_connected(40, PHONE, OPP));
    runtime.run_pending();
    assert!(outcome.borrow().is_empty());
    assert_eq!(runtime.adapter().connections().pending_request_count(), 1);

    stack.emit(client_connected(41, PHONE, &SPP.to_lowercase()));
    runtime.run_pending();
    assert!(succeeded(&outcome));
    assert_eq!(runtime.adapter().connections().pending_request_count(), 0);
    assert_eq!(runtime.adapter().connections().socket_count(), 1);
}

#[test]
fn test_connect_to_unbonded_device_fails() {
    let (mut runtime, _stack) = harness(true, Delivery::Inline);
    let (callback, outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(PHONE, SPP, callback);
    runtime.run_pending();

    assert_eq!(first_error(&outcome), Some(ErrorKind::InvalidValues));
    assert!(runtime.adapter().connections().is_idle());
}

#[test]
fn test_service_accepts_inbound_connections() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);

    let (callback, outcome) = recorder::<ServiceHandler>(SCRIPT);
    runtime.adapter().register_service(SPP, "chat", callback);
    assert!(outcome.borrow().is_empty());
    runtime.run_pending();

    let handler = match outcome.borrow().first() {
        Some(Ok(handler)) => handler.clone(),
        _ => panic!("service registration failed"),
    };
    assert_eq!(handler.name(), "chat");
    assert!(stack.calls().contains(&NativeCall::ListenRfcomm(handler.descriptor(), 0)));
    assert!(stack.is_subscribed(Subscription::ConnectionState));

    let (duplicate, duplicate_outcome) = recorder::<ServiceHandler>(SCRIPT);
    runtime.adapter().register_service(SPP, "again", duplicate);
    runtime.run_pending();
    assert_eq!(first_error(&duplicate_outcome), Some(ErrorKind::InvalidValues));

    let accepted: Rc<RefCell<Option<BluetoothSocket>>> = Rc::new(RefCell::new(None));
    let accepted_sink = accepted.clone();
    handler.set_onconnect(move |socket| *accepted_sink.borrow_mut() = Some(socket));

    let descriptor = stack.accept_connection(SPP, HEADSET);
    assert!(accepted.borrow().is_none());
    runtime.run_pending();

    let socket = accepted.borrow().clone().expect("onconnect fired");
    assert_eq!(socket.descriptor(), descriptor);
    assert_eq!(socket.peer().address(), HEADSET);
    assert!(handler.is_connected());

    stack.receive_data(descriptor, b"hello");
    runtime.run_pending();
    assert_eq!(socket.read_data(), b"hello".to_vec());

    let (unregister, unregister_outcome) = recorder(SCRIPT);
    runtime.adapter().unregister_service(&handler, unregister);
    runtime.run_pending();
    assert!(succeeded(&unregister_outcome));
    assert!(!handler.is_registered());
    assert!(stack.calls().contains(&NativeCall::DestroyRfcomm(handler.descriptor())));
}

#[test]
fn test_unload_context_keeps_other_contexts_requests() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(HEADSET, "Headset"));

    let (rename, rename_outcome) = recorder(SCRIPT);
    runtime.adapter().set_name("renamed", rename);
    let (connect, connect_outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(HEADSET, SPP, connect);
    let (bond, bond_outcome) = recorder::<BluetoothDevice>(OTHER_SCRIPT);
    runtime.adapter().create_bonding(PHONE, bond);

    let names = Rc::new(RefCell::new(Vec::new()));
    let names_sink = names.clone();
    runtime.adapter().set_change_listener(
        ChangeListener::new(SCRIPT).on_name_changed(move |name| names_sink.borrow_mut().push(name)),
    );

    assert_eq!(runtime.adapter().unload_context(SCRIPT), 3);
    assert!(!runtime.adapter().is_pending(OperationKind::SetName));
    assert!(runtime.adapter().is_pending(OperationKind::CreateBonding));
    assert_eq!(runtime.adapter().connections().pending_request_count(), 0);
    assert!(!stack.is_subscribed(Subscription::ConnectionState));

    stack.emit(NativeEvent::NameChanged {
        name: "renamed".to_string(),
    });
    stack.emit(NativeEvent::BondCreated {
        result: Ok(()),
        device: Some(DeviceInfo::new(PHONE, "Phone")),
    });
    runtime.run_pending();

    assert!(rename_outcome.borrow().is_empty());
    assert!(connect_outcome.borrow().is_empty());
    assert!(names.borrow().is_empty());
    assert!(succeeded(&bond_outcome));
}

#[test]
fn test_events_from_another_thread_reach_the_script_thread() {
    let (mut runtime, stack) = harness(false, Delivery::Thread);

    let states = Rc::new(RefCell::new(Vec::new()));
    let states_sink = states.clone();
    runtime.adapter().set_change_listener(
        ChangeListener::new(SCRIPT).on_state_changed(move |on| states_sink.borrow_mut().push(on)),
    );

    let (callback, outcome) = recorder(SCRIPT);
    runtime.adapter().set_powered(true, callback);
    stack.join_deliveries();
    runtime.run_pending();

    assert!(succeeded(&outcome));
    assert!(runtime.adapter().powered());
    assert_eq!(*states.borrow(), vec![true]);
}

#[tokio::test]
async fn test_known_devices_merge_bonded_and_found() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));

    let (callbacks, _record) = discovery_recorder(SCRIPT);
    runtime.adapter().discover_devices(callbacks);
    stack.emit(discovery_event(DiscoveryState::Started, None));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(PHONE, ""))));
    stack.emit(discovery_event(DiscoveryState::Found, Some(DeviceInfo::new(HEADSET, "Headset"))));
    stack.emit(discovery_event(DiscoveryState::Finished, None));
    runtime.run_pending();

    let (callback, outcome) = recorder::<Vec<BluetoothDevice>>(SCRIPT);
    runtime.adapter().get_known_devices(callback);
    assert!(runtime.adapter().has_pending_jobs());
    runtime.run_until_idle().await;

    let outcomes = outcome.borrow();
    let devices = outcomes[0].as_ref().expect("known devices");
    assert_eq!(devices.len(), 2);
    let phone = devices
        .iter()
        .find(|device| device.has_address(PHONE))
        .expect("phone");
    assert!(phone.is_bonded());
    assert_eq!(phone.name(), "Phone");
    assert!(devices.iter().any(|device| device.has_address(HEADSET)));
}

#[test]
fn test_shutdown_unregisters_native_callbacks() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);
    let (callback, _outcome) = recorder::<ServiceHandler>(SCRIPT);
    runtime.adapter().register_service(SPP, "chat", callback);
    runtime.run_pending();

    runtime.shutdown();

    for subscription in [
        Subscription::AdapterState,
        Subscription::Name,
        Subscription::Visibility,
        Subscription::Discovery,
        Subscription::ConnectionState,
    ] {
        assert!(!stack.is_subscribed(subscription));
    }
    assert!(stack
        .calls()
        .iter()
        .any(|call| matches!(call, NativeCall::DestroyRfcomm(_))));
    assert_eq!(stack.calls().last(), Some(&NativeCall::Deinitialize));
}

#[test]
fn test_cancel_connection_requests_for_address() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));
    stack.add_bonded(DeviceInfo::new(HEADSET, "Headset"));

    let (spp, spp_outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(PHONE, SPP, spp);
    let (opp, _) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(PHONE, OPP, opp);
    let (headset, headset_outcome) = recorder::<BluetoothSocket>(SCRIPT);
    runtime.adapter().connect_to_service_by_uuid(HEADSET, SPP, headset);

    assert_eq!(runtime.adapter().cancel_connection_requests(&PHONE.to_lowercase()), 2);
    assert_eq!(runtime.adapter().connections().pending_request_count(), 1);
    assert!(stack.is_subscribed(Subscription::ConnectionState));

    stack.emit(client_connected(50, PHONE, SPP));
    stack.emit(client_connected(51, &HEADSET.to_lowercase(), SPP));
    runtime.run_pending();

    assert!(spp_outcome.borrow().is_empty());
    assert!(succeeded(&headset_outcome));
}

#[test]
fn test_service_uuid_case_is_ignored() {
    let (mut runtime, stack) = harness(true, Delivery::Inline);
    let handler = registered_service(&mut runtime);
    let lower = SPP.to_ascii_lowercase();

    let (duplicate, duplicate_outcome) = recorder::<ServiceHandler>(SCRIPT);
    runtime.adapter().register_service(&lower, "again", duplicate);
    runtime.run_pending();
    assert_eq!(first_error(&duplicate_outcome), Some(ErrorKind::InvalidValues));
    assert_eq!(runtime.adapter().connections().service_count(), 1);

    let accepted = accept_into(&handler);
    let descriptor = stack.accept_connection(&lower, HEADSET);
    runtime.run_pending();
    let socket = accepted.borrow().clone().expect("onconnect fired");
    assert_eq!(socket.descriptor(), descriptor);
    assert!(handler.is_connected());

    socket.close().expect("close");
    runtime.run_pending();
    assert!(!handler.is_connected());
    assert_eq!(runtime.adapter().connections().socket_count(), 0);
    assert!(!stack.is_subscribed(Subscription::DataReceived));
}

#[test]
fn test_remote_disconnect_closes_server_socket() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    let handler = registered_service(&mut runtime);
    let accepted = accept_into(&handler);

    let descriptor = stack.accept_connection(SPP, HEADSET);
    runtime.run_pending();
    let socket = accepted.borrow().clone().expect("onconnect fired");
    assert!(stack.is_subscribed(Subscription::DataReceived));

    let closed = Rc::new(RefCell::new(0));
    let closed_sink = closed.clone();
    socket.set_onclose(move || *closed_sink.borrow_mut() += 1);

    stack.emit(server_connection(descriptor, ConnectionState::Disconnected, Ok(())));
    assert_eq!(*closed.borrow(), 0);
    runtime.run_pending();

    assert_eq!(*closed.borrow(), 1);
    assert!(!socket.is_connected());
    assert!(!handler.is_connected());
    assert_eq!(runtime.adapter().connections().socket_count(), 0);
    assert!(!stack.is_subscribed(Subscription::DataReceived));
    assert!(stack.is_subscribed(Subscription::ConnectionState));

    let (unregister, unregister_outcome) = recorder(SCRIPT);
    runtime.adapter().unregister_service(&handler, unregister);
    runtime.run_pending();

    assert!(succeeded(&unregister_outcome));
    assert!(!stack.is_subscribed(Subscription::ConnectionState));
    assert_eq!(
        stack.call_count(|c| *c == NativeCall::Unsubscribe(Subscription::DataReceived)),
        1
    );
    assert_eq!(
        stack.call_count(|c| *c == NativeCall::Unsubscribe(Subscription::ConnectionState)),
        1
    );
}

#[test]
fn test_failed_disconnect_reports_onerror() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    let handler = registered_service(&mut runtime);
    let accepted = accept_into(&handler);

    let descriptor = stack.accept_connection(SPP, HEADSET);
    runtime.run_pending();
    let socket = accepted.borrow().clone().expect("onconnect fired");

    let errors = Rc::new(RefCell::new(Vec::new()));
    let errors_sink = errors.clone();
    socket.set_onerror(move |error| errors_sink.borrow_mut().push(error.kind()));
    let closed = Rc::new(RefCell::new(false));
    let closed_sink = closed.clone();
    socket.set_onclose(move || *closed_sink.borrow_mut() = true);

    stack.emit(server_connection(
        descriptor,
        ConnectionState::Disconnected,
        Err(NativeError::OperationFailed),
    ));
    assert!(errors.borrow().is_empty());
    runtime.run_pending();

    assert_eq!(*errors.borrow(), vec![ErrorKind::Unknown]);
    assert!(!*closed.borrow());
    assert!(socket.is_connected());
    assert!(handler.is_connected());
    assert_eq!(runtime.adapter().connections().socket_count(), 1);
}

#[tokio::test]
async fn test_known_devices_wait_for_room_in_full_queue() {
    let settings = Settings {
        task_queue_capacity: 1,
        ..Settings::default()
    };
    let (mut runtime, stack) = harness_with(settings, true, Delivery::Manual);
    stack.add_bonded(DeviceInfo::new(PHONE, "Phone"));

    stack.emit(NativeEvent::NameChanged {
        name: "busy".to_string(),
    });
    let (callback, outcome) = recorder::<Vec<BluetoothDevice>>(SCRIPT);
    runtime.adapter().get_known_devices(callback);
    std::thread::sleep(std::time::Duration::from_millis(200));

    let drained =
        tokio::time::timeout(std::time::Duration::from_secs(2), runtime.run_until_idle()).await;
    assert!(drained.is_ok(), "known devices never resolved");
    assert!(succeeded(&outcome));
    assert_eq!(outcome.borrow()[0].as_ref().map(Vec::len).ok(), Some(1));
    assert!(!runtime.adapter().has_pending_jobs());
}

#[test]
fn test_adapter_properties_report_native_failures() {
    let (mut runtime, stack) = harness(true, Delivery::Manual);
    assert_eq!(runtime.adapter().name().ok().as_deref(), Some("bluetooth-bridge"));
    assert_eq!(
        runtime.adapter().address().ok().as_deref(),
        Some("00:1A:7D:DA:71:13")
    );

    stack.fail_next(Operation::QueryName, NativeError::NotInitialized);
    stack.fail_next(Operation::QueryAddress, NativeError::OperationFailed);
    assert_eq!(
        runtime.adapter().name().map_err(|e| e.kind()),
        Err(ErrorKind::Unknown)
    );
    assert_eq!(
        runtime.adapter().address().map_err(|e| e.kind()),
        Err(ErrorKind::Unknown)
    );
    assert!(runtime.adapter().name().is_ok());
}
