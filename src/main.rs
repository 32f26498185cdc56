use bluetooth_bridge::domain::device::DeviceInfo;
use bluetooth_bridge::domain::settings::{Settings, SettingsService};
use bluetooth_bridge::infrastructure::bluetooth::dispatcher::NativeEventDispatcher;
use bluetooth_bridge::infrastructure::bluetooth::socket::BluetoothSocket;
use bluetooth_bridge::infrastructure::bluetooth::simulated::{Delivery, SimulatedStack};
use bluetooth_bridge::infrastructure::logging;
use bluetooth_bridge::script::{ContextId, DiscoveryCallbacks, ResultCallback};
use bluetooth_bridge::ScriptRuntime;
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SERIAL_PORT_UUID: &str = "00001101-0000-1000-8000-00805F9B34FB";
const SETTLE_TIME: Duration = Duration::from_millis(100);

fn report<T: Debug + 'static>(context: ContextId, operation: &'static str) -> ResultCallback<T> {
    ResultCallback::new(
        context,
        move |value| info!("{} succeeded: {:?}", operation, value),
        move |error| warn!("{} failed: {}", operation, error),
    )
}

async fn run_session(settings: Settings) -> anyhow::Result<()> {
    let (dispatcher, receiver) = NativeEventDispatcher::channel(settings.task_queue_capacity);
    let stack = Arc::new(SimulatedStack::new(dispatcher.clone()));
    stack.set_delivery(Delivery::Thread);
    stack.set_nearby(vec![
        DeviceInfo {
            class_of_device: 0x5A020C,
            ..DeviceInfo::new("00:12:47:08:9A:A6", "Phone")
        },
        DeviceInfo {
            class_of_device: 0x240404,
            ..DeviceInfo::new("00:12:47:08:9A:A7", "Headset")
        },
    ]);

    let mut runtime = ScriptRuntime::new(stack.clone(), dispatcher, receiver, &settings)?;
    let context = ContextId::new(1);

    runtime.adapter().set_powered(true, report(context, "setPowered"));
    runtime.run_for(SETTLE_TIME).await;

    let found = Rc::new(RefCell::new(Vec::new()));
    let found_sink = found.clone();
    runtime.adapter().discover_devices(
        DiscoveryCallbacks::new(context)
            .on_started(|| info!("Discovery started"))
            .on_device_found(move |device| {
                info!("Found {} ({})", device.name(), device.address());
                found_sink.borrow_mut().push(device.address().to_string());
            })
            .on_device_disappeared(|address| info!("{} disappeared", address))
            .on_finished(|devices| info!("Discovery finished with {} devices", devices.len()))
            .on_error(|error| warn!("Discovery failed: {}", error)),
    );
    runtime.run_for(SETTLE_TIME).await;

    let Some(target) = found.borrow().first().cloned() else {
        warn!("No device found, ending session");
        runtime.shutdown();
        return Ok(());
    };

    runtime
        .adapter()
        .create_bonding(&target, report(context, "createBonding"));
    runtime.run_for(SETTLE_TIME).await;

    runtime
        .adapter()
        .get_known_devices(report(context, "getKnownDevices"));
    runtime.run_until_idle().await;

    let socket: Rc<RefCell<Option<BluetoothSocket>>> = Rc::new(RefCell::new(None));
    let socket_sink = socket.clone();
    runtime.adapter().connect_to_service_by_uuid(
        &target,
        SERIAL_PORT_UUID,
        ResultCallback::new(
            context,
            move |connected: BluetoothSocket| {
                info!("Connected socket {:?}", connected);
                *socket_sink.borrow_mut() = Some(connected);
            },
            |error| warn!("connectToServiceByUUID failed: {}", error),
        ),
    );
    runtime.run_for(SETTLE_TIME).await;

    let connected = socket.borrow_mut().take();
    if let Some(connected) = connected {
        connected.set_onclose(|| info!("Socket closed"));
        match connected.write_data(b"hello") {
            Ok(written) => info!("Wrote {} bytes", written),
            Err(e) => warn!("Write failed: {}", e),
        }
        if let Err(e) = connected.close() {
            warn!("Close failed: {}", e);
        }
        runtime.run_for(SETTLE_TIME).await;
    }

    runtime.shutdown();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting Bluetooth bridge demo session");

    // The adapter and its callbacks are !Send, so the whole session lives on
    // one thread with a current-thread runtime.
    let session = std::thread::Builder::new()
        .name("script".to_string())
        .spawn(move || -> anyhow::Result<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(run_session(settings))
        })?;

    session
        .join()
        .map_err(|_| anyhow::anyhow!("Script thread panicked"))??;

    info!("Session finished");
    Ok(())
}
