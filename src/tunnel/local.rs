use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use anyhow::Context;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use crate::config::LocalConfig;
use crate::icmp::raw_socket::RawIcmpSocket;
use crate::icmp::{IcmpEchoHeader, IcmpSocket, ECHO_REPLY, ECHO_REQUEST, ICMP_ECHO_HEADER_SIZE};
use crate::obfuscation::Obfuscator;
use crate::shutdown::ShutdownGroup;
use crate::tunnel::frame::{FrameHeader, FRAME_HEADER_SIZE};
use crate::tunnel::{resolve_ipv4, BUF_SIZE};
use crate::window::loss_stats::LossStats;

/// The client-facing end of the tunnel. It listens for datagrams of a single client application
///  and sends them to the remote endpoint as Echo Requests, and it relays Echo Replies from the
///  remote endpoint back to the client.
///
/// The client's address is learned from the datagrams it sends. Replies arriving before the first
///  datagram from the client are dropped.
pub struct Local {
    inner: Arc<LocalInner>,
}

struct LocalInner {
    config: LocalConfig,
    obfuscator: Arc<dyn Obfuscator>,
    udp: UdpSocket,
    icmp: Arc<dyn IcmpSocket>,
    remote_ip: Ipv4Addr,
    client_addr: Mutex<Option<SocketAddr>>,
    group: ShutdownGroup,
}

impl Local {
    /// Binds the client listener and a raw ICMP socket
    pub async fn bind(config: LocalConfig) -> anyhow::Result<Local> {
        let icmp = Arc::new(RawIcmpSocket::bind()
            .context("listen for remote icmp")?);
        Self::bind_with_icmp(config, icmp).await
    }

    pub async fn bind_with_icmp(config: LocalConfig, icmp: Arc<dyn IcmpSocket>) -> anyhow::Result<Local> {
        config.validate()?;

        let remote_ip = resolve_ipv4(&config.remote).await
            .with_context(|| format!("resolve remote {:?}", config.remote))?;
        let udp = UdpSocket::bind(&config.listen_addr).await
            .with_context(|| format!("listen on local {:?}", config.listen_addr))?;
        info!("start listening [remote:{:?}][local:{:?}]", remote_ip, udp.local_addr()?);

        let obfuscator = config.obfuscator();
        Ok(Local {
            inner: Arc::new(LocalInner {
                config,
                obfuscator,
                udp,
                icmp,
                remote_ip,
                client_addr: Mutex::new(None),
                group: ShutdownGroup::new(),
            }),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.inner.udp.local_addr()?)
    }

    /// Quitting this group stops [Local::run]
    pub fn shutdown_group(&self) -> ShutdownGroup {
        self.inner.group.clone()
    }

    /// Relays in both directions until the shutdown group is told to quit
    pub async fn run(&self) -> anyhow::Result<()> {
        let inner = self.inner.clone();
        self.inner.group.go(async move { inner.client_to_remote().await });
        let inner = self.inner.clone();
        self.inner.group.go(async move { inner.remote_to_client().await });

        self.inner.group.wait().await;
        debug!("stopped");
        Ok(())
    }
}

impl LocalInner {
    fn learn_client_addr(&self, addr: SocketAddr) {
        let mut client_addr = self.client_addr.lock().unwrap();
        match *client_addr {
            None => info!("learned client [addr:{:?}]", addr),
            Some(old) if old != addr => info!("client addr update [old:{:?}] -> [new:{:?}]", old, addr),
            Some(_) => return,
        }
        *client_addr = Some(addr);
    }

    async fn client_to_remote(&self) {
        let icmp_id: u16 = rand::random();
        let mut icmp_seq: u16 = rand::random();
        let mut packet_id: u32 = rand::random();
        debug!("ready to read from client [icmpid:{}]", icmp_id);

        let frame_offset = ICMP_ECHO_HEADER_SIZE + self.obfuscator.header_size();
        let mut datagram = vec![0u8; BUF_SIZE];
        let mut buf = Vec::with_capacity(BUF_SIZE + frame_offset + FRAME_HEADER_SIZE);

        while !self.group.is_quit() {
            let (n, client) = match timeout(self.config.read_timeout, self.udp.recv_from(&mut datagram)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("client read: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };
            self.learn_client_addr(client);

            packet_id = packet_id.wrapping_add(1);
            buf.clear();
            buf.resize(frame_offset, 0);
            FrameHeader::new(self.config.local_id, self.config.remote_id, packet_id)
                .ser(&mut buf);
            buf.extend_from_slice(&datagram[..n]);
            self.obfuscator.encode_in_place(&mut buf, ICMP_ECHO_HEADER_SIZE);

            icmp_seq = icmp_seq.wrapping_add(1);
            IcmpEchoHeader::new(ECHO_REQUEST, icmp_id, icmp_seq)
                .write_with_checksum(&mut buf);

            if let Err(e) = self.icmp.send_to(&buf, self.remote_ip).await {
                error!("send to remote: {}", e);
                continue;
            }

            if self.config.verbose {
                debug!("send icmp packet to remote [icmpseq:{}] [pktid:{}] [size:{}/{}]", icmp_seq, packet_id, n, buf.len());
            }
        }

        debug!("stopped reading from client");
    }

    async fn remote_to_client(&self) {
        debug!("ready to read icmp from remote");

        let mut buf = vec![0u8; BUF_SIZE];
        let mut stats = LossStats::new();

        while !self.group.is_quit() {
            let (n, ip) = match timeout(self.config.read_timeout, self.icmp.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("remote read: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            let icmp = match IcmpEchoHeader::deser(&mut &buf[..n]) {
                Ok(icmp) => icmp,
                Err(_) => {
                    warn!("icmp packet too short, [ip:{:?}][length:{}]", ip, n);
                    continue;
                }
            };
            if icmp.kind != ECHO_REPLY {
                debug!("not icmp type echo reply [ip:{:?}][type:{}]", ip, icmp.kind);
                continue;
            }

            let frame = match self.obfuscator.decode_in_place(&mut buf[ICMP_ECHO_HEADER_SIZE..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("[ip:{:?}][icmpid:{}][icmpseq:{}] decode: {}", ip, icmp.identifier, icmp.sequence, e);
                    continue;
                }
            };
            let (header, payload) = match FrameHeader::parse(frame) {
                Ok(parsed) => parsed,
                Err(_) => {
                    error!("[ip:{:?}][icmpid:{}][icmpseq:{}] short data, length: {}", ip, icmp.identifier, icmp.sequence, frame.len());
                    continue;
                }
            };

            if header.src != self.config.remote_id || header.dst != self.config.local_id {
                error!("[ip:{:?}][icmpid:{}][icmpseq:{}] [src:{}][dst:{}] mismatch with [remote:{}][local:{}]",
                    ip, icmp.identifier, icmp.sequence, header.src, header.dst, self.config.remote_id, self.config.local_id);
                continue;
            }

            if self.config.verbose {
                debug!("recv from [remote:{}] [ip:{:?}][icmpid:{}][icmpseq:{}] [pktid:{}] [size:{}/{}]",
                    header.src, ip, icmp.identifier, icmp.sequence, header.packet_id, payload.len(), n);
            }

            if stats.update(header.packet_id) {
                info!("[remote:{}] loss count: [{}/{}] [{}/{}] [{}/{}]", header.src,
                    stats.last_100.lost, stats.last_100.count,
                    stats.last_1000.lost, stats.last_1000.count,
                    stats.last_10000.lost, stats.last_10000.count,
                );
            }

            let client_addr = *self.client_addr.lock().unwrap();
            let client_addr = match client_addr {
                Some(addr) => addr,
                None => {
                    warn!("client addr not learned");
                    continue;
                }
            };

            if let Err(e) = self.udp.send_to(payload, client_addr).await {
                error!("write client from [remote:{}]: {}", header.src, e);
            }
        }

        debug!("stopped reading icmp from remote");
    }
}
