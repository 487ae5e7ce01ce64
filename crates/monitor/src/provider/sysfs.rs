#![forbid(unsafe_code)]

use super::{EnumerationError, SnapshotProvider};
use crate::domain::{DeviceKey, DeviceRecord, PortRecord};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use throughput::{LinkSpeed, UsbVersion};
use tracing::{debug, trace};

const SERIAL_PREFIXES: [&str; 4] = ["ttyUSB", "ttyACM", "ttyS", "ttyAMA"];

/// Where the provider learns which block device is mounted where.
#[derive(Debug, Clone)]
enum Mounts {
    /// `/proc/self/mountinfo`.
    Procfs,
    /// Fixed `(source, mount point)` pairs.
    Fixed(Vec<(String, PathBuf)>),
}

/// Linux provider reading USB devices from `/sys/bus/usb/devices`, serial
/// ports from `/sys/class/tty`, and storage mount points from the mount
/// table.
#[derive(Debug, Clone)]
pub struct SysfsProvider {
    sys: PathBuf,
    dev: PathBuf,
    mounts: Mounts,
}

impl Default for SysfsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsProvider {
    pub fn new() -> Self {
        Self {
            sys: PathBuf::from("/sys"),
            dev: PathBuf::from("/dev"),
            mounts: Mounts::Procfs,
        }
    }

    /// Read from alternative `sys` and `dev` trees with a fixed mount table.
    pub fn with_roots(
        sys: impl Into<PathBuf>,
        dev: impl Into<PathBuf>,
        mounts: Vec<(String, PathBuf)>,
    ) -> Self {
        Self {
            sys: sys.into(),
            dev: dev.into(),
            mounts: Mounts::Fixed(mounts),
        }
    }

    fn usb_root(&self) -> PathBuf {
        self.sys.join("bus/usb/devices")
    }

    fn mount_table(&self) -> Result<Vec<(String, PathBuf)>, EnumerationError> {
        match &self.mounts {
            Mounts::Fixed(table) => Ok(table.clone()),
            Mounts::Procfs => {
                let infos = procfs::process::Process::myself()
                    .and_then(|process| process.mountinfo())
                    .map_err(|err| EnumerationError::Mounts(err.to_string()))?;
                Ok(infos
                    .0
                    .into_iter()
                    .filter_map(|info| Some((info.mount_source?, info.mount_point)))
                    .collect())
            }
        }
    }

    /// Mount point per USB device, keyed by the device's sysfs directory.
    fn storage_mounts(&self) -> Result<HashMap<PathBuf, PathBuf>, EnumerationError> {
        let block_root = self.sys.join("class/block");
        let mut owners = HashMap::new();
        for name in list_dir(&block_root)? {
            let Ok(target) = fs::canonicalize(block_root.join(&name)) else {
                continue;
            };
            if let Some(usb_dir) = usb_ancestor(&target) {
                owners.insert(name, usb_dir);
            }
        }

        let mut mounts = HashMap::new();
        for (source, mount_point) in self.mount_table()? {
            let Some(block) = source.strip_prefix("/dev/") else {
                continue;
            };
            if let Some(usb_dir) = owners.get(block) {
                mounts.entry(usb_dir.clone()).or_insert(mount_point);
            }
        }
        Ok(mounts)
    }

    fn read_device(&self, dir: &Path) -> Option<DeviceRecord> {
        let vendor_id = read_hex(&dir.join("idVendor"))?;
        let product_id = read_hex(&dir.join("idProduct"))?;

        let mut record = DeviceRecord::new(vendor_id, product_id);
        record.serial = read_attr(&dir.join("serial"));
        record.name = read_attr(&dir.join("product"));
        record.manufacturer = read_attr(&dir.join("manufacturer"));
        record.description = match (&record.manufacturer, &record.name) {
            (Some(manufacturer), Some(product)) => Some(format!("{manufacturer} {product}")),
            _ => None,
        };
        record.usb_version = read_attr(&dir.join("version")).and_then(|v| UsbVersion::parse(&v));
        record.link_speed = read_attr(&dir.join("speed")).and_then(|s| LinkSpeed::from_sysfs(&s));
        record.power_ma = read_attr(&dir.join("bMaxPower"))
            .and_then(|p| p.trim_end_matches("mA").trim().parse().ok());
        record.class = device_class(dir);
        record.driver = interface_driver(dir);
        record.connected = Some(true);
        Some(record)
    }

    fn read_port(&self, tty_dir: &Path, name: &str) -> Option<PortRecord> {
        let device = fs::canonicalize(tty_dir.join("device")).ok()?;
        // 8250 placeholders report port type 0 (unknown).
        if name.starts_with("ttyS") && read_attr(&tty_dir.join("type")).as_deref() == Some("0") {
            return None;
        }

        let node = self.dev.join(name);
        let mut record = PortRecord::new(node.to_string_lossy());
        record.device = usb_ancestor(&device).and_then(|dir| {
            let vendor_id = read_hex(&dir.join("idVendor"))?;
            let product_id = read_hex(&dir.join("idProduct"))?;
            let serial = read_attr(&dir.join("serial"));
            Some(DeviceKey::new(vendor_id, product_id, serial.as_deref()))
        });
        record.description = read_attr(&device.join("interface"))
            .or_else(|| driver_name(&device));
        record.available = Some(node.exists());
        Some(record)
    }
}

impl SnapshotProvider for SysfsProvider {
    fn list_devices(&self) -> Result<Vec<DeviceRecord>, EnumerationError> {
        let root = self.usb_root();
        let mounts = self.storage_mounts()?;

        let mut names = list_dir(&root)?;
        names.sort();

        let mut devices = Vec::new();
        for name in names {
            // Interfaces (`1-1:1.0`) and root hubs (`usb1`) are not devices.
            if name.contains(':') || name.starts_with("usb") {
                continue;
            }
            let dir = root.join(&name);
            let Some(mut record) = self.read_device(&dir) else {
                trace!(%name, "skipping entry without ids");
                continue;
            };
            if let Ok(canonical) = fs::canonicalize(&dir) {
                record.mount_point = mounts.get(&canonical).cloned();
            }
            devices.push(record);
        }
        debug!(count = devices.len(), "enumerated usb devices");
        Ok(devices)
    }

    fn list_ports(&self) -> Result<Vec<PortRecord>, EnumerationError> {
        let root = self.sys.join("class/tty");
        let mut names: Vec<_> = list_dir(&root)?
            .into_iter()
            .filter(|name| SERIAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix)))
            .collect();
        names.sort();

        let ports: Vec<_> = names
            .iter()
            .filter_map(|name| self.read_port(&root.join(name), name))
            .collect();
        debug!(count = ports.len(), "enumerated serial ports");
        Ok(ports)
    }
}

fn list_dir(path: &Path) -> Result<Vec<String>, EnumerationError> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(EnumerationError::io(path, &err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EnumerationError::io(path, &err))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

fn read_attr(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn read_hex(path: &Path) -> Option<u16> {
    u16::from_str_radix(&read_attr(path)?, 16).ok()
}

/// Nearest ancestor directory that describes a USB device.
fn usb_ancestor(path: &Path) -> Option<PathBuf> {
    path.ancestors()
        .find(|dir| dir.join("idVendor").is_file() && dir.join("idProduct").is_file())
        .map(Path::to_path_buf)
}

fn driver_name(dir: &Path) -> Option<String> {
    let target = fs::read_link(dir.join("driver")).ok()?;
    Some(target.file_name()?.to_string_lossy().into_owned())
}

fn interfaces(dir: &Path) -> Vec<PathBuf> {
    let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    let prefix = format!("{name}:");
    let mut found: Vec<_> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

fn interface_driver(dir: &Path) -> Option<String> {
    interfaces(dir)
        .iter()
        .find_map(|interface| driver_name(interface))
        .or_else(|| driver_name(dir))
}

fn device_class(dir: &Path) -> Option<String> {
    let code = match read_hex(&dir.join("bDeviceClass"))? {
        // Class is declared per interface.
        0 => interfaces(dir)
            .iter()
            .find_map(|interface| read_hex(&interface.join("bInterfaceClass")))?,
        code => code,
    };
    Some(class_name(code).to_owned())
}

fn class_name(code: u16) -> &'static str {
    match code {
        0x01 => "Audio",
        0x02 => "Communications",
        0x03 => "HID",
        0x05 => "Physical",
        0x06 => "Image",
        0x07 => "Printer",
        0x08 => "Mass Storage",
        0x09 => "Hub",
        0x0a => "CDC Data",
        0x0b => "Smart Card",
        0x0e => "Video",
        0x0f => "Personal Healthcare",
        0x10 => "Audio/Video",
        0xdc => "Diagnostic",
        0xe0 => "Wireless Controller",
        0xef => "Miscellaneous",
        0xfe => "Application Specific",
        0xff => "Vendor Specific",
        _ => "Unknown",
    }
}
