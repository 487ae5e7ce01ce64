#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a physical USB device across snapshots.
///
/// `vvvv:pppp:SERIAL` when the device reports a serial number, otherwise the
/// fallback `vvvv:pppp`. Two identical devices without serial numbers share a
/// fallback key and cannot be told apart.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(vendor_id: u16, product_id: u16, serial: Option<&str>) -> Self {
        match serial.map(str::trim).filter(|s| !s.is_empty()) {
            Some(serial) => Self(format!("{vendor_id:04x}:{product_id:04x}:{serial}")),
            None => Self(format!("{vendor_id:04x}:{product_id:04x}")),
        }
    }

    /// Wrap an already formatted key, e.g. one read back from the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the key was built without a serial number.
    pub fn is_fallback(&self) -> bool {
        self.0.splitn(3, ':').count() < 3
    }
}

impl fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceKey").field(&self.0).finish()
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name or path of a serial port (`/dev/ttyUSB0`, `COM3`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortName(String);

impl PortName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PortName").field(&self.0).finish()
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
