use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use anyhow::Context;
use async_trait::async_trait;
use tracing::info;
use crate::icmp::IcmpSocket;

/// A raw ICMPv4 socket. Sending and receiving requires `CAP_NET_RAW` (or root).
///
/// The kernel delivers received packets including their IPv4 header, which is stripped before
///  they are returned, so callers see ICMP messages only.
pub struct RawIcmpSocket {
    #[cfg(unix)]
    inner: tokio::io::unix::AsyncFd<socket2::Socket>,
}

#[cfg(unix)]
impl RawIcmpSocket {
    pub fn bind() -> anyhow::Result<RawIcmpSocket> {
        use socket2::{Domain, Protocol, Socket, Type};

        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .context("error opening raw ICMP socket (this requires CAP_NET_RAW)")?;
        socket.set_nonblocking(true)?;
        socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
        info!("opened raw ICMP socket");

        Ok(RawIcmpSocket {
            inner: tokio::io::unix::AsyncFd::new(socket)?,
        })
    }
}

#[cfg(not(unix))]
impl RawIcmpSocket {
    pub fn bind() -> anyhow::Result<RawIcmpSocket> {
        anyhow::bail!("raw ICMP sockets are only supported on unix platforms");
    }
}

/// Returns the ICMP part of a raw IPv4 packet, and the packet's source address
fn strip_ipv4_header(packet: &[u8]) -> io::Result<(usize, Ipv4Addr)> {
    if packet.len() < 20 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("IPv4 packet too short: {} bytes", packet.len())));
    }
    let header_len = ((packet[0] & 0x0f) as usize) * 4;
    if header_len < 20 || header_len > packet.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("bad IPv4 header length {}", header_len)));
    }
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    Ok((header_len, src))
}

#[cfg(unix)]
#[async_trait]
impl IcmpSocket for RawIcmpSocket {
    async fn send_to(&self, buf: &[u8], to: Ipv4Addr) -> io::Result<usize> {
        let addr: socket2::SockAddr = SocketAddr::from((to, 0)).into();
        loop {
            let mut guard = self.inner.writable().await?;
            if let Ok(result) = guard.try_io(|inner| inner.get_ref().send_to(buf, &addr)) {
                return result;
            }
        }
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        use std::io::Read;

        loop {
            let mut guard = self.inner.readable().await?;
            let n = match guard.try_io(|inner| {
                let mut socket = inner.get_ref();
                socket.read(buf)
            }) {
                Ok(result) => result?,
                Err(_would_block) => continue,
            };

            let (header_len, src) = strip_ipv4_header(&buf[..n])?;
            buf.copy_within(header_len..n, 0);
            return Ok((n - header_len, src));
        }
    }
}

#[cfg(not(unix))]
#[async_trait]
impl IcmpSocket for RawIcmpSocket {
    async fn send_to(&self, _buf: &[u8], _to: Ipv4Addr) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    async fn recv_from(&self, _buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        Err(io::ErrorKind::Unsupported.into())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn ipv4_packet(ihl: u8, src: [u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; ihl as usize * 4];
        packet[0] = 0x40 | ihl;
        packet[9] = 1; // ICMP
        packet[12..16].copy_from_slice(&src);
        packet.extend_from_slice(payload);
        packet
    }

    fn truncated(mut packet: Vec<u8>, len: usize) -> Vec<u8> {
        packet.truncate(len);
        packet
    }

    #[rstest]
    #[case::minimal(5)]
    #[case::with_options(7)]
    fn test_strip_ipv4_header(#[case] ihl: u8) {
        let packet = ipv4_packet(ihl, [10, 1, 2, 3], &[8, 0, 1, 2]);
        let (header_len, src) = strip_ipv4_header(&packet).unwrap();
        assert_eq!(header_len, ihl as usize * 4);
        assert_eq!(src, Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(&packet[header_len..], &[8, 0, 1, 2]);
    }

    #[rstest]
    #[case::too_short(vec![0x45; 19])]
    #[case::ihl_below_minimum(ipv4_packet(4, [1, 2, 3, 4], &[0; 8]))]
    #[case::ihl_beyond_packet(truncated(ipv4_packet(15, [1, 2, 3, 4], &[]), 40))]
    fn test_strip_ipv4_header_invalid(#[case] packet: Vec<u8>) {
        assert!(strip_ipv4_header(&packet).is_err());
    }
}
