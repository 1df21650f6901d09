use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tracing::trace;
use crate::icmp::{IcmpEchoHeader, IcmpSocket, ICMP_ECHO_HEADER_SIZE};
use crate::obfuscation::Obfuscator;
use crate::tunnel::frame::FrameHeader;

type Packet = (Vec<u8>, Ipv4Addr);

/// An in-memory network of ICMP endpoints, each identified by an IPv4 address. Packets sent to
///  an address without an endpoint are silently dropped, like on a real network.
#[derive(Default)]
pub struct MemoryIcmpNetwork {
    endpoints: Mutex<FxHashMap<Ipv4Addr, mpsc::UnboundedSender<Packet>>>,
}

impl MemoryIcmpNetwork {
    pub fn new() -> Arc<MemoryIcmpNetwork> {
        Default::default()
    }

    /// Creates the endpoint for `ip`, replacing an existing endpoint for that address
    pub fn endpoint(self: &Arc<Self>, ip: Ipv4Addr) -> Arc<MemoryIcmpSocket> {
        let (send, recv) = mpsc::unbounded_channel();
        self.endpoints.lock().unwrap().insert(ip, send);
        Arc::new(MemoryIcmpSocket {
            ip,
            network: self.clone(),
            receiver: tokio::sync::Mutex::new(recv),
        })
    }

    fn deliver(&self, from: Ipv4Addr, to: Ipv4Addr, packet: &[u8]) {
        let endpoints = self.endpoints.lock().unwrap();
        match endpoints.get(&to) {
            Some(endpoint) => {
                trace!("delivering {} bytes {:?} -> {:?}", packet.len(), from, to);
                let _ = endpoint.send((packet.to_vec(), from));
            }
            None => trace!("no endpoint for {:?}, dropping {} bytes", to, packet.len()),
        }
    }
}

pub struct MemoryIcmpSocket {
    ip: Ipv4Addr,
    network: Arc<MemoryIcmpNetwork>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl MemoryIcmpSocket {
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }
}

#[async_trait]
impl IcmpSocket for MemoryIcmpSocket {
    async fn send_to(&self, buf: &[u8], to: Ipv4Addr) -> io::Result<usize> {
        self.network.deliver(self.ip, to, buf);
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        let (packet, from) = self.receiver.lock().await
            .recv().await
            .ok_or_else(|| io::Error::from(io::ErrorKind::BrokenPipe))?;

        let n = packet.len().min(buf.len());
        buf[..n].copy_from_slice(&packet[..n]);
        Ok((n, from))
    }
}

/// Builds a complete tunnel packet: ICMP echo header with checksum, envelope, frame
pub fn encode_tunnel_packet(obfuscator: &dyn Obfuscator, icmp: IcmpEchoHeader, frame: FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut plain = Vec::new();
    frame.ser(&mut plain);
    plain.extend_from_slice(payload);

    let mut packet = obfuscator.encode(&[0u8; ICMP_ECHO_HEADER_SIZE], &plain);
    icmp.write_with_checksum(&mut packet);
    packet
}

/// Splits a tunnel packet into its ICMP header, frame header and payload
pub fn decode_tunnel_packet(obfuscator: &dyn Obfuscator, packet: &[u8]) -> anyhow::Result<(IcmpEchoHeader, FrameHeader, Vec<u8>)> {
    let icmp = IcmpEchoHeader::deser(&mut &packet[..])?;
    let plain = obfuscator.decode(&packet[ICMP_ECHO_HEADER_SIZE..])?;
    let (frame, payload) = FrameHeader::parse(&plain)?;
    Ok((icmp, frame, payload.to_vec()))
}
