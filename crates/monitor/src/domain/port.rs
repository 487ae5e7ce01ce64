#![forbid(unsafe_code)]

use super::{DeviceKey, PortName};
use chrono::{DateTime, Utc};
use config::{FlowControl, Parity, Serial, StopBits};
use serde::{Deserialize, Serialize};

/// One serial port as reported by a snapshot provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub name: PortName,
    /// USB device the port belongs to, when the platform can tell.
    pub device: Option<DeviceKey>,
    pub description: Option<String>,
    pub baud_rate: Option<u32>,
    pub data_bits: Option<u8>,
    pub stop_bits: Option<StopBits>,
    pub parity: Option<Parity>,
    pub flow_control: Option<FlowControl>,
    pub available: Option<bool>,
}

impl PortRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: PortName::new(name),
            device: None,
            description: None,
            baud_rate: None,
            data_bits: None,
            stop_bits: None,
            parity: None,
            flow_control: None,
            available: None,
        }
    }

    pub fn with_device(mut self, device: DeviceKey) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = Some(baud_rate);
        self
    }

    /// Reported line settings, with the configured defaults for the rest.
    pub fn line_settings(&self, defaults: &Serial) -> LineSettings {
        LineSettings {
            baud_rate: self.baud_rate.unwrap_or(defaults.baud_rate),
            data_bits: self.data_bits.unwrap_or(defaults.data_bits),
            stop_bits: self.stop_bits.unwrap_or(defaults.stop_bits),
            parity: self.parity.unwrap_or(defaults.parity),
            flow_control: self.flow_control.unwrap_or(defaults.flow_control),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

/// Persisted projection of one appearance of a port. A port name that comes
/// back after being removed gets a new row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: i64,
    pub name: PortName,
    pub device: Option<DeviceKey>,
    pub description: Option<String>,
    #[serde(flatten)]
    pub line: LineSettings,
    pub available: bool,
    /// Last cycle the port was seen available.
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}

impl Port {
    pub fn kind(&self) -> PortKind {
        PortKind::of(&self.name)
    }

    pub fn to_record(&self) -> PortRecord {
        PortRecord {
            name: self.name.clone(),
            device: self.device.clone(),
            description: self.description.clone(),
            baud_rate: Some(self.line.baud_rate),
            data_bits: Some(self.line.data_bits),
            stop_bits: Some(self.line.stop_bits),
            parity: Some(self.line.parity),
            flow_control: Some(self.line.flow_control),
            available: Some(self.available),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    UsbSerial,
    WindowsCom,
    Tty,
    Other,
}

impl PortKind {
    pub fn of(name: &PortName) -> Self {
        let upper = name.as_str().to_uppercase();
        if upper.contains("USB") || upper.contains("ACM") {
            Self::UsbSerial
        } else if upper.contains("COM") {
            Self::WindowsCom
        } else if upper.contains("TTY") {
            Self::Tty
        } else {
            Self::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_settings() {
        let record = PortRecord::new("/dev/ttyUSB0").with_baud_rate(115200);
        let line = record.line_settings(&Serial::default());
        assert_eq!(line.baud_rate, 115200);
        assert_eq!(line.data_bits, 8);
        assert_eq!(line.parity, Parity::None);
    }

    #[test]
    fn port_kinds() {
        assert_eq!(PortKind::of(&PortName::new("/dev/ttyUSB0")), PortKind::UsbSerial);
        assert_eq!(PortKind::of(&PortName::new("/dev/ttyACM1")), PortKind::UsbSerial);
        assert_eq!(PortKind::of(&PortName::new("COM3")), PortKind::WindowsCom);
        assert_eq!(PortKind::of(&PortName::new("/dev/ttyS0")), PortKind::Tty);
        assert_eq!(PortKind::of(&PortName::new("/dev/cu.debug")), PortKind::Other);
    }
}
