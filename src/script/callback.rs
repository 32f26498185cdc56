use super::ContextId;
use crate::domain::device::BluetoothDevice;
use crate::domain::errors::BridgeError;

/// `{success, error}` pair owned by one script context.
///
/// Consuming `succeed`/`fail` makes double resolution impossible.
pub struct ResultCallback<T> {
    context: ContextId,
    on_success: Box<dyn FnOnce(T)>,
    on_error: Box<dyn FnOnce(BridgeError)>,
}

impl<T> ResultCallback<T> {
    pub fn new(
        context: ContextId,
        on_success: impl FnOnce(T) + 'static,
        on_error: impl FnOnce(BridgeError) + 'static,
    ) -> Self {
        Self {
            context,
            on_success: Box::new(on_success),
            on_error: Box::new(on_error),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn succeed(self, value: T) {
        (self.on_success)(value)
    }

    pub fn fail(self, error: BridgeError) {
        (self.on_error)(error)
    }

    pub fn resolve(self, result: Result<T, BridgeError>) {
        match result {
            Ok(value) => self.succeed(value),
            Err(error) => self.fail(error),
        }
    }
}

pub type VoidCallback = ResultCallback<()>;
pub type DeviceCallback = ResultCallback<BluetoothDevice>;
pub type DevicesCallback = ResultCallback<Vec<BluetoothDevice>>;

/// Named multi-event bundle for `discover_devices`. Every member is optional.
pub struct DiscoveryCallbacks {
    context: ContextId,
    onstarted: Option<Box<dyn FnMut()>>,
    ondevicefound: Option<Box<dyn FnMut(BluetoothDevice)>>,
    ondevicedisappeared: Option<Box<dyn FnMut(String)>>,
    onfinished: Option<Box<dyn FnOnce(Vec<BluetoothDevice>)>>,
    onerror: Option<Box<dyn FnOnce(BridgeError)>>,
}

impl DiscoveryCallbacks {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            onstarted: None,
            ondevicefound: None,
            ondevicedisappeared: None,
            onfinished: None,
            onerror: None,
        }
    }

    pub fn on_started(mut self, f: impl FnMut() + 'static) -> Self {
        self.onstarted = Some(Box::new(f));
        self
    }

    pub fn on_device_found(mut self, f: impl FnMut(BluetoothDevice) + 'static) -> Self {
        self.ondevicefound = Some(Box::new(f));
        self
    }

    pub fn on_device_disappeared(mut self, f: impl FnMut(String) + 'static) -> Self {
        self.ondevicedisappeared = Some(Box::new(f));
        self
    }

    pub fn on_finished(mut self, f: impl FnOnce(Vec<BluetoothDevice>) + 'static) -> Self {
        self.onfinished = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(BridgeError) + 'static) -> Self {
        self.onerror = Some(Box::new(f));
        self
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub(crate) fn started(&mut self) {
        if let Some(f) = self.onstarted.as_mut() {
            f();
        }
    }

    pub(crate) fn device_found(&mut self, device: BluetoothDevice) {
        if let Some(f) = self.ondevicefound.as_mut() {
            f(device);
        }
    }

    pub(crate) fn device_disappeared(&mut self, address: String) {
        if let Some(f) = self.ondevicedisappeared.as_mut() {
            f(address);
        }
    }

    pub(crate) fn finished(self, devices: Vec<BluetoothDevice>) {
        if let Some(f) = self.onfinished {
            f(devices);
        }
    }

    pub(crate) fn fail(self, error: BridgeError) {
        if let Some(f) = self.onerror {
            f(error);
        }
    }
}

/// Adapter change listener bundle.
pub struct ChangeListener {
    context: ContextId,
    onstatechanged: Option<Box<dyn FnMut(bool)>>,
    onnamechanged: Option<Box<dyn FnMut(String)>>,
    onvisibilitychanged: Option<Box<dyn FnMut(bool)>>,
}

impl ChangeListener {
    pub fn new(context: ContextId) -> Self {
        Self {
            context,
            onstatechanged: None,
            onnamechanged: None,
            onvisibilitychanged: None,
        }
    }

    pub fn on_state_changed(mut self, f: impl FnMut(bool) + 'static) -> Self {
        self.onstatechanged = Some(Box::new(f));
        self
    }

    pub fn on_name_changed(mut self, f: impl FnMut(String) + 'static) -> Self {
        self.onnamechanged = Some(Box::new(f));
        self
    }

    pub fn on_visibility_changed(mut self, f: impl FnMut(bool) + 'static) -> Self {
        self.onvisibilitychanged = Some(Box::new(f));
        self
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub(crate) fn state_changed(&mut self, powered: bool) {
        if let Some(f) = self.onstatechanged.as_mut() {
            f(powered);
        }
    }

    pub(crate) fn name_changed(&mut self, name: &str) {
        if let Some(f) = self.onnamechanged.as_mut() {
            f(name.to_string());
        }
    }

    pub(crate) fn visibility_changed(&mut self, visible: bool) {
        if let Some(f) = self.onvisibilitychanged.as_mut() {
            f(visible);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_resolve_routes_to_matching_half() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (ok_log, err_log) = (log.clone(), log.clone());
        let callback: ResultCallback<u32> = ResultCallback::new(
            ContextId::new(1),
            move |v| ok_log.borrow_mut().push(format!("ok {}", v)),
            move |e| err_log.borrow_mut().push(e.name().to_string()),
        );
        callback.resolve(Err(BridgeError::NotFound("gone".to_string())));

        assert_eq!(*log.borrow(), vec!["NotFoundError".to_string()]);
    }

    #[test]
    fn test_missing_discovery_members_are_skipped() {
        let found = Rc::new(RefCell::new(0));
        let counter = found.clone();
        let mut callbacks = DiscoveryCallbacks::new(ContextId::new(2))
            .on_device_found(move |_| *counter.borrow_mut() += 1);

        callbacks.started();
        callbacks.device_found(BluetoothDevice::with_address("00:12:47:08:9A:A6"));
        callbacks.device_disappeared("00:12:47:08:9A:A7".to_string());
        callbacks.finished(Vec::new());

        assert_eq!(*found.borrow(), 1);
    }
}
