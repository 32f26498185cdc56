//! Class-of-device decoding

use serde::{Deserialize, Serialize};

/// Major device classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MajorDeviceClass {
    Misc,
    Computer,
    Phone,
    Network,
    AudioVideo,
    Peripheral,
    Imaging,
    Wearable,
    Toy,
    Health,
    Uncategorized,
}

impl MajorDeviceClass {
    pub fn value(self) -> u8 {
        match self {
            MajorDeviceClass::Misc => 0x00,
            MajorDeviceClass::Computer => 0x01,
            MajorDeviceClass::Phone => 0x02,
            MajorDeviceClass::Network => 0x03,
            MajorDeviceClass::AudioVideo => 0x04,
            MajorDeviceClass::Peripheral => 0x05,
            MajorDeviceClass::Imaging => 0x06,
            MajorDeviceClass::Wearable => 0x07,
            MajorDeviceClass::Toy => 0x08,
            MajorDeviceClass::Health => 0x09,
            MajorDeviceClass::Uncategorized => 0x1F,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        let class = match value {
            0x00 => MajorDeviceClass::Misc,
            0x01 => MajorDeviceClass::Computer,
            0x02 => MajorDeviceClass::Phone,
            0x03 => MajorDeviceClass::Network,
            0x04 => MajorDeviceClass::AudioVideo,
            0x05 => MajorDeviceClass::Peripheral,
            0x06 => MajorDeviceClass::Imaging,
            0x07 => MajorDeviceClass::Wearable,
            0x08 => MajorDeviceClass::Toy,
            0x09 => MajorDeviceClass::Health,
            0x1F => MajorDeviceClass::Uncategorized,
            _ => return None,
        };
        Some(class)
    }
}

/// Service class bits, already shifted down to bit 0.
pub mod service {
    pub const LIMITED_DISCOVERABILITY: u16 = 0x0001;
    pub const POSITIONING: u16 = 0x0008;
    pub const NETWORKING: u16 = 0x0010;
    pub const RENDERING: u16 = 0x0020;
    pub const CAPTURING: u16 = 0x0040;
    pub const OBJECT_TRANSFER: u16 = 0x0080;
    pub const AUDIO: u16 = 0x0100;
    pub const TELEPHONY: u16 = 0x0200;
    pub const INFORMATION: u16 = 0x0400;

    pub const ALL: [u16; 9] = [
        LIMITED_DISCOVERABILITY,
        POSITIONING,
        NETWORKING,
        RENDERING,
        CAPTURING,
        OBJECT_TRANSFER,
        AUDIO,
        TELEPHONY,
        INFORMATION,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceClass {
    pub major: u8,
    pub minor: u8,
    pub services: Vec<u16>,
}

impl DeviceClass {
    pub fn new(major: u8, minor: u8, service_mask: u16) -> Self {
        let services = service::ALL
            .iter()
            .copied()
            .filter(|bit| service_mask & bit != 0)
            .collect();
        Self {
            major,
            minor,
            services,
        }
    }

    /// Decode a 24-bit class-of-device value
    /// (bits 2..8 minor, 8..13 major, 13..24 services).
    pub fn from_class_of_device(class_of_device: u32) -> Self {
        let minor = ((class_of_device >> 2) & 0x3F) as u8;
        let major = ((class_of_device >> 8) & 0x1F) as u8;
        let service_mask = ((class_of_device >> 13) & 0x07FF) as u16;
        Self::new(major, minor, service_mask)
    }

    pub fn major_class(&self) -> Option<MajorDeviceClass> {
        MajorDeviceClass::from_value(self.major)
    }

    pub fn has_service(&self, service: u16) -> bool {
        self.services.contains(&service)
    }
}
