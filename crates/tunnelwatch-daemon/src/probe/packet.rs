//! ICMPv4 echo request encoding and echo reply parsing.

/// ICMP header length in bytes.
pub const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_ECHO_REQUEST: u8 = 8;

/// Parsed ICMP echo reply header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence_number: u16,
}

/// Reasons a received packet is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("IPv4 packet too small ({0} bytes)")]
    Ipv4PacketTooSmall(usize),

    #[error("ICMP header too small ({0} bytes)")]
    IcmpHeaderTooSmall(usize),

    #[error("not an echo reply (type {0})")]
    InvalidEchoReplyType(u8),

    #[error("checksum mismatch (computed {computed:#06x}, received {received:#06x})")]
    ChecksumMismatch { computed: u16, received: u16 },

    /// Reply addressed to another pinger on the same host.
    #[error("identifier mismatch (expected {expected}, received {received})")]
    IdentifierMismatch { expected: u16, received: u16 },
}

/// RFC 1071 internet checksum.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|chunk| {
            let hi = u32::from(chunk[0]) << 8;
            let lo = chunk.get(1).copied().map_or(0, u32::from);
            hi | lo
        })
        .fold(0u32, u32::wrapping_add);
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    #[allow(clippy::cast_possible_truncation)]
    let folded = sum as u16;
    !folded
}

/// Build an echo request with no payload.
pub fn encode_echo_request(identifier: u16, sequence_number: u16) -> [u8; ICMP_HEADER_LEN] {
    let mut packet = [0u8; ICMP_HEADER_LEN];
    packet[0] = ICMP_ECHO_REQUEST;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence_number.to_be_bytes());
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Parse an echo reply.
///
/// Datagram ICMP sockets deliver the IPv4 header on Apple platforms but not
/// on Linux; a leading IPv4 header is detected and stripped. Pass
/// `expected_identifier = None` where the kernel rewrites the identifier.
pub fn parse_echo_reply(
    buffer: &[u8],
    expected_identifier: Option<u16>,
) -> Result<EchoReply, PacketError> {
    let icmp = strip_ipv4_header(buffer)?;
    if icmp.len() < ICMP_HEADER_LEN {
        return Err(PacketError::IcmpHeaderTooSmall(icmp.len()));
    }

    let identifier = u16::from_be_bytes([icmp[4], icmp[5]]);
    if let Some(expected) = expected_identifier
        && expected != identifier
    {
        return Err(PacketError::IdentifierMismatch {
            expected,
            received: identifier,
        });
    }

    if icmp[0] != ICMP_ECHO_REPLY {
        return Err(PacketError::InvalidEchoReplyType(icmp[0]));
    }

    let received = u16::from_be_bytes([icmp[2], icmp[3]]);
    let mut zeroed = icmp.to_vec();
    zeroed[2] = 0;
    zeroed[3] = 0;
    let computed = checksum(&zeroed);
    if computed != received {
        return Err(PacketError::ChecksumMismatch { computed, received });
    }

    Ok(EchoReply {
        identifier,
        sequence_number: u16::from_be_bytes([icmp[6], icmp[7]]),
    })
}

fn strip_ipv4_header(buffer: &[u8]) -> Result<&[u8], PacketError> {
    let Some(first) = buffer.first() else {
        return Err(PacketError::IcmpHeaderTooSmall(0));
    };
    // An ICMP message starts with its type, and echo reply is 0, so a version
    // nibble of 4 can only be an IP header.
    if first >> 4 != 4 {
        return Ok(buffer);
    }
    if buffer.len() < IPV4_MIN_HEADER_LEN {
        return Err(PacketError::Ipv4PacketTooSmall(buffer.len()));
    }
    let header_len = usize::from(first & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || buffer.len() < header_len {
        return Err(PacketError::Ipv4PacketTooSmall(buffer.len()));
    }
    Ok(&buffer[header_len..])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn reply_from_request(identifier: u16, sequence_number: u16) -> Vec<u8> {
        let mut packet = encode_echo_request(identifier, sequence_number).to_vec();
        packet[0] = ICMP_ECHO_REPLY;
        packet[2] = 0;
        packet[3] = 0;
        let sum = checksum(&packet);
        packet[2..4].copy_from_slice(&sum.to_be_bytes());
        packet
    }

    fn with_ipv4_header(icmp: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; IPV4_MIN_HEADER_LEN];
        packet[0] = 0x45;
        packet[9] = 1;
        packet.extend_from_slice(icmp);
        packet
    }

    #[test]
    fn request_layout() {
        let packet = encode_echo_request(757, 0x0102);
        assert_eq!(packet[0], ICMP_ECHO_REQUEST);
        assert_eq!(packet[1], 0);
        assert_eq!(&packet[4..6], &757u16.to_be_bytes());
        assert_eq!(&packet[6..8], &[0x01, 0x02]);
        // A packet including its own checksum sums to zero.
        assert_eq!(checksum(&packet), 0);
    }

    #[test]
    fn checksum_odd_length() {
        // Trailing byte is padded with zero.
        assert_eq!(checksum(&[0x01]), !0x0100);
        assert_eq!(checksum(&[]), 0xffff);
    }

    #[test]
    fn parses_bare_reply() {
        let reply = parse_echo_reply(&reply_from_request(757, 42), Some(757)).unwrap();
        assert_eq!(
            reply,
            EchoReply {
                identifier: 757,
                sequence_number: 42
            }
        );
    }

    #[test]
    fn parses_reply_with_ip_header() {
        let packet = with_ipv4_header(&reply_from_request(757, 7));
        let reply = parse_echo_reply(&packet, Some(757)).unwrap();
        assert_eq!(reply.sequence_number, 7);
    }

    #[test]
    fn identifier_ignored_when_kernel_rewrites_it() {
        let reply = parse_echo_reply(&reply_from_request(31337, 9), None).unwrap();
        assert_eq!(reply.identifier, 31337);
    }

    #[test]
    fn rejects_foreign_identifier() {
        let err = parse_echo_reply(&reply_from_request(1, 9), Some(757)).unwrap_err();
        assert_eq!(
            err,
            PacketError::IdentifierMismatch {
                expected: 757,
                received: 1
            }
        );
    }

    #[test]
    fn rejects_request_type() {
        let request = encode_echo_request(757, 1);
        assert_eq!(
            parse_echo_reply(&request, Some(757)).unwrap_err(),
            PacketError::InvalidEchoReplyType(ICMP_ECHO_REQUEST)
        );
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut packet = reply_from_request(757, 3);
        packet[7] ^= 0xff;
        assert!(matches!(
            parse_echo_reply(&packet, Some(757)),
            Err(PacketError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated() {
        assert_eq!(
            parse_echo_reply(&[0, 0, 0], None).unwrap_err(),
            PacketError::IcmpHeaderTooSmall(3)
        );
        assert_eq!(
            parse_echo_reply(&[0x45, 0, 0], None).unwrap_err(),
            PacketError::Ipv4PacketTooSmall(3)
        );
        let header_only = with_ipv4_header(&[]);
        assert_eq!(
            parse_echo_reply(&header_only, None).unwrap_err(),
            PacketError::IcmpHeaderTooSmall(0)
        );
    }
}
