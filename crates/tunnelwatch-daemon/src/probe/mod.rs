//! Probe transport: ICMP echo to an address reachable only through the tunnel.

mod icmp;
pub mod packet;

pub use icmp::IcmpPinger;
pub use packet::PacketError;

use std::net::{IpAddr, Ipv4Addr};

use tokio::sync::mpsc;

/// Outcome of a successfully sent echo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSendResult {
    pub sequence_number: u16,
    pub bytes_sent: usize,
}

/// Echo reply received on the probe socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingReply {
    pub sender: IpAddr,
    pub sequence_number: u16,
}

/// Asynchronous notifications from an open probe socket.
#[derive(Debug)]
pub enum PingerEvent {
    Reply(PingReply),
    /// A packet arrived but could not be read or parsed.
    Error(PingerError),
}

/// Sends echo requests and reports replies by sequence number.
pub trait Pinger: Send {
    /// Open the probe socket, optionally bound to `interface_name`. Replaces
    /// any previously opened socket. Replies and receive errors are delivered
    /// on the returned channel until the socket is closed.
    fn open_socket(
        &mut self,
        interface_name: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<PingerEvent>, PingerError>;

    fn close_socket(&mut self);

    /// Send a single echo request. Never blocks.
    fn send(&mut self, address: Ipv4Addr) -> Result<PingSendResult, PingerError>;
}

/// Probe transport errors.
#[derive(Debug, thiserror::Error)]
pub enum PingerError {
    #[error("Failed to create socket: {0}")]
    CreateSocket(#[source] std::io::Error),

    #[error("Failed to map interface name {interface} to index")]
    MapInterfaceNameToIndex { interface: String },

    #[error("Failed to bind socket to interface {interface}: {source}")]
    BindSocket {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket is closed")]
    ClosedSocket,

    #[error("Failed to send packet: {0}")]
    SendPacket(#[source] std::io::Error),

    #[error("Failed to receive packet: {0}")]
    ReceivePacket(#[source] std::io::Error),

    #[error("Malformed response: {0}")]
    MalformedResponse(#[from] PacketError),
}
