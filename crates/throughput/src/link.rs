#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal megabyte, the unit every speed in this crate is expressed in.
pub const MB: f64 = 1_000_000.0;

/// Negotiated USB signalling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSpeed {
    Low,
    Full,
    High,
    Super,
    SuperPlus,
    SuperPlus2x2,
    Usb4,
}

impl LinkSpeed {
    /// Raw signalling rate in megabits per second.
    pub fn megabits(self) -> f64 {
        match self {
            Self::Low => 1.5,
            Self::Full => 12.0,
            Self::High => 480.0,
            Self::Super => 5_000.0,
            Self::SuperPlus => 10_000.0,
            Self::SuperPlus2x2 => 20_000.0,
            Self::Usb4 => 40_000.0,
        }
    }

    /// Theoretical payload ceiling in MB/s (bit rate / 8).
    pub fn theoretical_mbps(self) -> f64 {
        self.megabits() / 8.0
    }

    /// Parse the value of a sysfs `speed` attribute, which is the bit rate
    /// in Mb/s (`"480"`, `"5000"`, `"1.5"`).
    pub fn from_sysfs(raw: &str) -> Option<Self> {
        match raw.trim() {
            "1.5" => Some(Self::Low),
            "12" => Some(Self::Full),
            "480" => Some(Self::High),
            "5000" => Some(Self::Super),
            "10000" => Some(Self::SuperPlus),
            "20000" => Some(Self::SuperPlus2x2),
            "40000" => Some(Self::Usb4),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "1.5 Mb/s",
            Self::Full => "12 Mb/s",
            Self::High => "480 Mb/s",
            Self::Super => "5 Gb/s",
            Self::SuperPlus => "10 Gb/s",
            Self::SuperPlus2x2 => "20 Gb/s",
            Self::Usb4 => "40 Gb/s",
        }
    }
}

impl fmt::Display for LinkSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// USB specification release a device declares (`bcdUSB`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct UsbVersion {
    pub major: u8,
    pub minor: u8,
}

impl UsbVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Accepts `"2.00"`, `" 3.10"`, `"3.1"`, `"USB 3.0"` and `"2"`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw
            .strip_prefix("USB")
            .or_else(|| raw.strip_prefix("usb"))
            .unwrap_or(raw)
            .trim();
        let (major, minor) = match raw.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (raw, "0"),
        };
        let major = major.parse().ok()?;
        // bcdUSB minor is two digits, "10" means .1
        let minor = minor.chars().next().unwrap_or('0').to_digit(10)? as u8;
        Some(Self { major, minor })
    }

    /// Fastest link a device of this release can negotiate.
    pub fn nominal_speed(self) -> LinkSpeed {
        match (self.major, self.minor) {
            (0 | 1, _) => LinkSpeed::Full,
            (2, _) => LinkSpeed::High,
            (3, 0) => LinkSpeed::Super,
            (3, _) => LinkSpeed::SuperPlus,
            _ => LinkSpeed::Usb4,
        }
    }
}

impl fmt::Display for UsbVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl From<UsbVersion> for String {
    fn from(version: UsbVersion) -> Self {
        version.to_string()
    }
}

impl TryFrom<String> for UsbVersion {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("not a USB version: {raw:?}"))
    }
}

/// Link used as the ceiling for a device: the negotiated speed when known,
/// otherwise the nominal speed of its declared release.
pub fn effective_link(link: Option<LinkSpeed>, version: Option<UsbVersion>) -> Option<LinkSpeed> {
    link.or_else(|| version.map(UsbVersion::nominal_speed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn theoretical_table() {
        assert_eq!(LinkSpeed::High.theoretical_mbps(), 60.0);
        assert_eq!(LinkSpeed::Super.theoretical_mbps(), 625.0);
        assert_eq!(LinkSpeed::SuperPlus.theoretical_mbps(), 1250.0);
        assert_eq!(LinkSpeed::Usb4.theoretical_mbps(), 5000.0);
    }

    #[test]
    fn parse_sysfs_speed() {
        assert_eq!(LinkSpeed::from_sysfs("480\n"), Some(LinkSpeed::High));
        assert_eq!(LinkSpeed::from_sysfs("1.5"), Some(LinkSpeed::Low));
        assert_eq!(LinkSpeed::from_sysfs("fast"), None);
    }

    #[test]
    fn parse_versions() {
        assert_eq!(UsbVersion::parse(" 2.00"), Some(UsbVersion::new(2, 0)));
        assert_eq!(UsbVersion::parse("3.10"), Some(UsbVersion::new(3, 1)));
        assert_eq!(UsbVersion::parse("USB 3.0"), Some(UsbVersion::new(3, 0)));
        assert_eq!(UsbVersion::parse("2"), Some(UsbVersion::new(2, 0)));
        assert_eq!(UsbVersion::parse("n/a"), None);
    }

    #[test]
    fn negotiated_speed_wins_over_release() {
        let version = Some(UsbVersion::new(3, 1));
        assert_eq!(effective_link(Some(LinkSpeed::High), version), Some(LinkSpeed::High));
        assert_eq!(effective_link(None, version), Some(LinkSpeed::SuperPlus));
        assert_eq!(effective_link(None, None), None);
    }
}
