use crate::domain::device_class::DeviceClass;
use serde::{Deserialize, Serialize};

/// Remote device information as reported by the native stack.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: String,
    pub name: String,
    pub class_of_device: u32,
    pub service_uuids: Vec<String>,
    pub is_bonded: bool,
    pub is_trusted: bool,
    pub is_connected: bool,
}

impl DeviceInfo {
    pub fn new(address: &str, name: &str) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

/// Device value handed to scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BluetoothDevice {
    address: String,
    name: String,
    device_class: DeviceClass,
    uuids: Vec<String>,
    is_bonded: bool,
    is_trusted: bool,
    is_connected: bool,
}

impl BluetoothDevice {
    /// Device known only by its address.
    pub fn with_address(address: &str) -> Self {
        Self::from(&DeviceInfo::new(address, ""))
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_class(&self) -> &DeviceClass {
        &self.device_class
    }

    pub fn uuids(&self) -> &[String] {
        &self.uuids
    }

    pub fn is_bonded(&self) -> bool {
        self.is_bonded
    }

    pub fn is_trusted(&self) -> bool {
        self.is_trusted
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    pub fn has_address(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }

    /// Refresh from newer native information for the same address.
    pub fn update_from(&mut self, info: &DeviceInfo) {
        if !info.name.is_empty() {
            self.name = info.name.clone();
        }
        if info.class_of_device != 0 {
            self.device_class = DeviceClass::from_class_of_device(info.class_of_device);
        }
        if !info.service_uuids.is_empty() {
            self.uuids = info.service_uuids.clone();
        }
        self.is_bonded = info.is_bonded;
        self.is_trusted = info.is_trusted;
        self.is_connected = info.is_connected;
    }
}

impl From<&DeviceInfo> for BluetoothDevice {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            address: info.address.clone(),
            name: info.name.clone(),
            device_class: DeviceClass::from_class_of_device(info.class_of_device),
            uuids: info.service_uuids.clone(),
            is_bonded: info.is_bonded,
            is_trusted: info.is_trusted,
            is_connected: info.is_connected,
        }
    }
}
