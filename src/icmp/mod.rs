pub mod checksum;
pub mod raw_socket;

use std::io;
use std::net::Ipv4Addr;
use async_trait::async_trait;
use bytes::{Buf, BufMut};
#[cfg(test)] use mockall::automock;

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;

pub const ICMP_ECHO_HEADER_SIZE: usize = 8;

/// The header of an ICMP Echo Request / Echo Reply message.
///
/// Identifier and sequence are in network byte order. The checksum is kept exactly as it is on
///  the wire, i.e. in the byte order produced by [checksum::checksum].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IcmpEchoHeader {
    pub kind: u8,
    pub code: u8,
    pub checksum: [u8; 2],
    pub identifier: u16,
    pub sequence: u16,
}

impl IcmpEchoHeader {
    pub fn new(kind: u8, identifier: u16, sequence: u16) -> IcmpEchoHeader {
        IcmpEchoHeader {
            kind,
            code: 0,
            checksum: [0, 0],
            identifier,
            sequence,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_u8(self.code);
        buf.put_slice(&self.checksum);
        buf.put_u16(self.identifier);
        buf.put_u16(self.sequence);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<IcmpEchoHeader> {
        let kind = buf.try_get_u8()?;
        let code = buf.try_get_u8()?;
        let checksum = buf.try_get_u16()?.to_be_bytes();
        let identifier = buf.try_get_u16()?;
        let sequence = buf.try_get_u16()?;
        Ok(IcmpEchoHeader {
            kind,
            code,
            checksum,
            identifier,
            sequence,
        })
    }

    /// Writes the header to the start of `packet` (which must hold at least the header) and
    ///  stores the checksum over the entire packet.
    pub fn write_with_checksum(&self, packet: &mut [u8]) {
        self.ser(&mut &mut packet[..ICMP_ECHO_HEADER_SIZE]);
        checksum::put_checksum(packet, 2);
    }
}

/// An ICMPv4 socket that sends and receives ICMP messages (without IP header) to / from IPv4
///  hosts.
///
/// This is the seam between the tunnel and the raw socket, which requires privileges.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IcmpSocket: Send + Sync {
    async fn send_to(&self, buf: &[u8], to: Ipv4Addr) -> io::Result<usize>;

    /// Receives a single ICMP message, returning its length and the sender's address
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)>;
}
