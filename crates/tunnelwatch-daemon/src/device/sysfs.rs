//! Linux sysfs-backed tunnel device.

use std::path::{Path, PathBuf};

use super::{DeviceError, NetStats, TunnelDeviceInfo};

const SYSFS_NET_ROOT: &str = "/sys/class/net";

/// Reads interface counters from `/sys/class/net/<if>/statistics`.
#[derive(Debug, Clone)]
pub struct SysfsDevice {
    interface: String,
    root: PathBuf,
}

impl SysfsDevice {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_root(interface, SYSFS_NET_ROOT)
    }

    /// Use a different sysfs net root (for tests and containers).
    pub fn with_root(interface: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            interface: interface.into(),
            root: root.into(),
        }
    }

    fn interface_dir(&self) -> PathBuf {
        self.root.join(&self.interface)
    }

    fn read_counter(dir: &Path, counter: &'static str) -> Result<u64, DeviceError> {
        let raw = std::fs::read_to_string(dir.join("statistics").join(counter))
            .map_err(|source| DeviceError::ReadCounter { counter, source })?;
        raw.trim()
            .parse()
            .map_err(|_| DeviceError::ParseCounter {
                counter,
                value: raw.trim().to_string(),
            })
    }
}

impl TunnelDeviceInfo for SysfsDevice {
    fn interface_name(&self) -> Option<String> {
        self.interface_dir()
            .exists()
            .then(|| self.interface.clone())
    }

    fn stats(&self) -> Result<NetStats, DeviceError> {
        let dir = self.interface_dir();
        if !dir.exists() {
            return Err(DeviceError::InterfaceUnavailable {
                interface: self.interface.clone(),
            });
        }
        Ok(NetStats {
            bytes_received: Self::read_counter(&dir, "rx_bytes")?,
            bytes_sent: Self::read_counter(&dir, "tx_bytes")?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fake_interface(root: &Path, name: &str, rx: &str, tx: &str) {
        let stats = root.join(name).join("statistics");
        std::fs::create_dir_all(&stats).unwrap();
        std::fs::write(stats.join("rx_bytes"), rx).unwrap();
        std::fs::write(stats.join("tx_bytes"), tx).unwrap();
    }

    #[test]
    fn reads_counters() {
        let root = tempfile::tempdir().unwrap();
        fake_interface(root.path(), "wg0", "1234\n", "5678\n");

        let device = SysfsDevice::with_root("wg0", root.path());
        assert_eq!(device.interface_name().as_deref(), Some("wg0"));
        assert_eq!(device.stats().unwrap(), NetStats::new(1234, 5678));
    }

    #[test]
    fn missing_interface() {
        let root = tempfile::tempdir().unwrap();
        let device = SysfsDevice::with_root("wg0", root.path());

        assert!(device.interface_name().is_none());
        assert!(matches!(
            device.stats(),
            Err(DeviceError::InterfaceUnavailable { .. })
        ));
    }

    #[test]
    fn garbage_counter() {
        let root = tempfile::tempdir().unwrap();
        fake_interface(root.path(), "wg0", "12", "lots");

        let device = SysfsDevice::with_root("wg0", root.path());
        assert!(matches!(
            device.stats(),
            Err(DeviceError::ParseCounter {
                counter: "tx_bytes",
                ..
            })
        ));
    }
}
