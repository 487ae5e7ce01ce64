#![forbid(unsafe_code)]

use super::DeviceKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use throughput::{LinkSpeed, UsbVersion};

/// One USB device as reported by a snapshot provider. `None` means the
/// platform did not report the attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub class: Option<String>,
    pub usb_version: Option<UsbVersion>,
    pub link_speed: Option<LinkSpeed>,
    /// Maximum power draw in mA.
    pub power_ma: Option<u32>,
    pub driver: Option<String>,
    pub connected: Option<bool>,
    /// Where the device's filesystem is mounted, for storage devices.
    pub mount_point: Option<PathBuf>,
}

impl DeviceRecord {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_link_speed(mut self, link_speed: LinkSpeed) -> Self {
        self.link_speed = Some(link_speed);
        self
    }

    pub fn with_mount_point(mut self, mount_point: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.vendor_id, self.product_id, self.serial.as_deref())
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.description.clone())
            .unwrap_or_else(|| format!("USB device {:04x}:{:04x}", self.vendor_id, self.product_id))
    }

    /// State this record puts the device in. A device is connected unless
    /// the platform explicitly says otherwise.
    pub fn state(&self) -> ConnectionState {
        match self.connected {
            Some(false) => ConnectionState::Disconnected,
            _ => ConnectionState::Connected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Persisted projection of a device, rebuilt from history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub class: Option<String>,
    pub usb_version: Option<UsbVersion>,
    pub link_speed: Option<LinkSpeed>,
    pub power_ma: Option<u32>,
    pub driver: Option<String>,
    pub mount_point: Option<PathBuf>,
    pub state: ConnectionState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The attributes as a provider would report them.
    pub fn to_record(&self) -> DeviceRecord {
        DeviceRecord {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial: self.serial.clone(),
            name: Some(self.name.clone()),
            description: self.description.clone(),
            manufacturer: self.manufacturer.clone(),
            class: self.class.clone(),
            usb_version: self.usb_version,
            link_speed: self.link_speed,
            power_ma: self.power_ma,
            driver: self.driver.clone(),
            connected: Some(self.is_connected()),
            mount_point: self.mount_point.clone(),
        }
    }
}
