//! Tunnel device information and traffic counters.

mod sysfs;

pub use sysfs::SysfsDevice;

/// Cumulative byte counters of the tunnel interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStats {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl NetStats {
    pub const fn new(bytes_received: u64, bytes_sent: u64) -> Self {
        Self {
            bytes_received,
            bytes_sent,
        }
    }

    /// Whether either counter went backwards relative to `previous`, which
    /// happens when the interface is recreated.
    pub const fn is_reset_from(&self, previous: &Self) -> bool {
        self.bytes_received < previous.bytes_received || self.bytes_sent < previous.bytes_sent
    }
}

/// Source of tunnel interface identity and traffic counters.
pub trait TunnelDeviceInfo: Send {
    /// Name of the tunnel interface, if it currently exists.
    fn interface_name(&self) -> Option<String>;

    /// Current cumulative counters. Values are monotonic for the lifetime of
    /// the interface.
    fn stats(&self) -> Result<NetStats, DeviceError>;
}

/// Errors reading tunnel device information.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Tunnel interface {interface} is not available")]
    InterfaceUnavailable { interface: String },

    #[error("Failed to read counter {counter}: {source}")]
    ReadCounter {
        counter: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse counter {counter}: {value:?}")]
    ParseCounter { counter: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_decrease_is_a_reset() {
        let previous = NetStats::new(1_000, 500);
        assert!(NetStats::new(10, 600).is_reset_from(&previous));
        assert!(NetStats::new(2_000, 100).is_reset_from(&previous));
        assert!(!NetStats::new(1_000, 500).is_reset_from(&previous));
        assert!(!NetStats::new(1_001, 501).is_reset_from(&previous));
    }
}
