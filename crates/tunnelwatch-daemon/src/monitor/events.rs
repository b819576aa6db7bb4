//! Events emitted by the tunnel monitor to its owner.

use std::net::Ipv4Addr;

use super::state::ConnectionState;
use crate::device::NetStats;

/// Notification for the tunnel lifecycle supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelMonitorEvent {
    /// First probe reply received while establishing.
    ConnectionEstablished,
    /// Liveness timeout. The owner must rebuild the tunnel and call
    /// `start` again.
    ConnectionLost,
    /// Underlying network became reachable (`true`) or unreachable.
    NetworkReachabilityChanged(bool),
}

/// Read-only view of the monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub connection_state: ConnectionState,
    pub retry_attempt: u32,
    pub is_heartbeat_suspended: bool,
    pub net_stats: NetStats,
    pub pending_requests: usize,
    pub probe_address: Option<Ipv4Addr>,
}
