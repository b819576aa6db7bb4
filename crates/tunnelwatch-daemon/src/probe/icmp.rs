//! Unprivileged ICMP pinger over a datagram socket.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::packet::{self, PacketError};
use super::{PingReply, PingSendResult, Pinger, PingerError, PingerEvent};

/// Identifier placed in outgoing echo requests.
const DEFAULT_IDENTIFIER: u16 = 757;

const READ_BUFFER_SIZE: usize = 65_535;

/// Pause after a failed receive so a persistent socket error cannot spin.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pinger backed by a `SOCK_DGRAM`/`IPPROTO_ICMP` socket.
///
/// Replies are read by a background task that lives as long as the socket.
pub struct IcmpPinger {
    identifier: u16,
    sequence_number: u16,
    socket: Option<Arc<UdpSocket>>,
    reader: Option<JoinHandle<()>>,
}

impl IcmpPinger {
    pub const fn new() -> Self {
        Self::with_identifier(DEFAULT_IDENTIFIER)
    }

    pub const fn with_identifier(identifier: u16) -> Self {
        Self {
            identifier,
            sequence_number: 0,
            socket: None,
            reader: None,
        }
    }

    /// The Linux ping socket rewrites the identifier to its local port.
    const fn expected_identifier(&self) -> Option<u16> {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            None
        } else {
            Some(self.identifier)
        }
    }
}

impl Default for IcmpPinger {
    fn default() -> Self {
        Self::new()
    }
}

impl Pinger for IcmpPinger {
    fn open_socket(
        &mut self,
        interface_name: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<PingerEvent>, PingerError> {
        self.close_socket();

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))
            .map_err(PingerError::CreateSocket)?;
        if let Some(interface) = interface_name {
            bind_to_interface(&socket, interface)?;
        }
        socket
            .set_nonblocking(true)
            .map_err(PingerError::CreateSocket)?;
        let socket = UdpSocket::from_std(std::net::UdpSocket::from(socket))
            .map_err(PingerError::CreateSocket)?;
        let socket = Arc::new(socket);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.reader = Some(tokio::spawn(read_replies(
            Arc::clone(&socket),
            self.expected_identifier(),
            events_tx,
        )));
        self.socket = Some(socket);

        debug!(interface = ?interface_name, "Probe socket opened");
        Ok(events_rx)
    }

    fn close_socket(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if self.socket.take().is_some() {
            debug!("Probe socket closed");
        }
    }

    fn send(&mut self, address: Ipv4Addr) -> Result<PingSendResult, PingerError> {
        let socket = self.socket.as_ref().ok_or(PingerError::ClosedSocket)?;

        self.sequence_number = self.sequence_number.wrapping_add(1);
        let request = packet::encode_echo_request(self.identifier, self.sequence_number);
        let bytes_sent = socket
            .try_send_to(&request, SocketAddr::from((address, 0)))
            .map_err(PingerError::SendPacket)?;

        Ok(PingSendResult {
            sequence_number: self.sequence_number,
            bytes_sent,
        })
    }
}

impl Drop for IcmpPinger {
    fn drop(&mut self) {
        self.close_socket();
    }
}

/// Forward replies until the event receiver is dropped. Receive errors are
/// reported and the loop keeps reading.
async fn read_replies(
    socket: Arc<UdpSocket>,
    expected_identifier: Option<u16>,
    events: mpsc::UnboundedSender<PingerEvent>,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let received = socket.recv_from(&mut buffer).await;
        let failed = received.is_err();
        let Some(event) = reply_event(received, &buffer, expected_identifier) else {
            continue;
        };
        if events.send(event).is_err() {
            return;
        }
        if failed {
            tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
        }
    }
}

/// Map one `recv_from` outcome to an event. Replies to other pingers on this
/// host yield `None`.
fn reply_event(
    received: io::Result<(usize, SocketAddr)>,
    buffer: &[u8],
    expected_identifier: Option<u16>,
) -> Option<PingerEvent> {
    let (len, sender) = match received {
        Ok(received) => received,
        Err(e) => return Some(PingerEvent::Error(PingerError::ReceivePacket(e))),
    };
    match packet::parse_echo_reply(&buffer[..len], expected_identifier) {
        Ok(reply) => Some(PingerEvent::Reply(PingReply {
            sender: sender.ip(),
            sequence_number: reply.sequence_number,
        })),
        Err(PacketError::IdentifierMismatch { .. }) => None,
        Err(e) => Some(PingerEvent::Error(PingerError::MalformedResponse(e))),
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_to_interface(socket: &Socket, interface: &str) -> Result<(), PingerError> {
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(|source| PingerError::BindSocket {
            interface: interface.to_string(),
            source,
        })
}

#[cfg(target_vendor = "apple")]
fn bind_to_interface(socket: &Socket, interface: &str) -> Result<(), PingerError> {
    let index = nix::net::if_::if_nametoindex(interface)
        .ok()
        .and_then(std::num::NonZeroU32::new)
        .ok_or_else(|| PingerError::MapInterfaceNameToIndex {
            interface: interface.to_string(),
        })?;
    socket
        .bind_device_by_index_v4(Some(index))
        .map_err(|source| PingerError::BindSocket {
            interface: interface.to_string(),
            source,
        })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
fn bind_to_interface(_socket: &Socket, interface: &str) -> Result<(), PingerError> {
    Err(PingerError::BindSocket {
        interface: interface.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "binding to an interface is not supported on this platform",
        ),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn echo_reply(identifier: u16, sequence_number: u16) -> Vec<u8> {
        let mut reply = packet::encode_echo_request(identifier, sequence_number).to_vec();
        reply[0] = 0;
        reply[2..4].fill(0);
        let sum = packet::checksum(&reply);
        reply[2..4].copy_from_slice(&sum.to_be_bytes());
        reply
    }

    #[test]
    fn send_without_socket_fails() {
        let mut pinger = IcmpPinger::new();
        assert!(matches!(
            pinger.send(Ipv4Addr::new(10, 64, 0, 1)),
            Err(PingerError::ClosedSocket)
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut pinger = IcmpPinger::default();
        pinger.close_socket();
        pinger.close_socket();
        assert!(pinger.socket.is_none());
    }

    #[test]
    fn receive_error_becomes_error_event() {
        let received = Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(
            reply_event(received, &[], None),
            Some(PingerEvent::Error(PingerError::ReceivePacket(_)))
        ));
    }

    #[test]
    fn foreign_identifier_is_skipped() {
        let reply = echo_reply(9, 1);
        let sender = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        assert!(reply_event(Ok((reply.len(), sender)), &reply, Some(757)).is_none());
    }

    #[tokio::test]
    async fn reader_survives_malformed_packets() {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let address = socket.local_addr().unwrap();
        let peer = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_replies(Arc::new(socket), Some(757), events_tx));

        peer.send_to(&[0xff], address).await.unwrap();
        let event = events_rx.recv().await.unwrap();
        assert!(matches!(
            event,
            PingerEvent::Error(PingerError::MalformedResponse(_))
        ));

        peer.send_to(&echo_reply(757, 42), address).await.unwrap();
        match events_rx.recv().await.unwrap() {
            PingerEvent::Reply(reply) => {
                assert_eq!(reply.sender, peer.local_addr().unwrap().ip());
                assert_eq!(reply.sequence_number, 42);
            }
            PingerEvent::Error(e) => panic!("unexpected error: {e}"),
        }

        // Dropping the receiver ends the reader.
        drop(events_rx);
        peer.send_to(&echo_reply(757, 43), address).await.unwrap();
        reader.await.unwrap();
    }
}
