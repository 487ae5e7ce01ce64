#![forbid(unsafe_code)]

use std::io;
use std::path::Path;
use sysinfo::Disks;

/// Reports how many bytes an unprivileged writer may still put below `dir`.
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64>;
}

#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

#[cfg(unix)]
impl SpaceProbe for StatvfsProbe {
    #[allow(clippy::unnecessary_cast)]
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(dir).map_err(io::Error::from)?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }
}

/// Looks the directory up in the list of mounted disks. Works on every
/// platform sysinfo supports, at the cost of a full disk refresh per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl SpaceProbe for SysinfoProbe {
    fn available_bytes(&self, dir: &Path) -> io::Result<u64> {
        let dir = dir.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted disk holds {}", dir.display()),
                )
            })
    }
}

pub fn default_probe() -> Box<dyn SpaceProbe> {
    #[cfg(unix)]
    {
        Box::new(StatvfsProbe)
    }
    #[cfg(not(unix))]
    {
        Box::new(SysinfoProbe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_probe_reports_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let available = default_probe().available_bytes(dir.path()).unwrap();
        assert!(available > 0);
    }

    #[test]
    fn missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("gone");
        assert!(default_probe().available_bytes(&gone).is_err());
    }
}
