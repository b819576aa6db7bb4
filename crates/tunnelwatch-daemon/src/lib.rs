//! tunnelwatch daemon library
//!
//! Tunnel connection-health monitoring:
//! - Connection monitor state machine and actor
//! - ICMP echo probing through the tunnel
//! - Tunnel device counters and default network path observation
//! - Lifecycle supervisor reacting to lost connections

pub mod device;
pub mod monitor;
pub mod path;
pub mod probe;
pub mod supervisor;
