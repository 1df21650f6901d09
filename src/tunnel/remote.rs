use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use tokio::time::timeout;
use tracing::{debug, error, info, span, warn, Instrument, Level};
use crate::config::RemoteConfig;
use crate::icmp::checksum::incremental_update;
use crate::icmp::raw_socket::RawIcmpSocket;
use crate::icmp::{IcmpEchoHeader, IcmpSocket, ECHO_REPLY, ECHO_REQUEST, ICMP_ECHO_HEADER_SIZE};
use crate::obfuscation::Obfuscator;
use crate::shutdown::ShutdownGroup;
use crate::tunnel::frame::{FrameHeader, FRAME_HEADER_SIZE};
use crate::tunnel::peer_session::{PeerRoute, PeerSession};
use crate::tunnel::{resolve_ipv4_socket_addr, BUF_SIZE};

/// The target-facing end of the tunnel. It accepts Echo Requests addressed to its node id from
///  any number of Local endpoints, forwards their payload to the target, and returns the target's
///  responses as Echo Replies.
///
/// There is a [PeerSession] per Local node id, created on its first request. A session lives
///  until shutdown.
pub struct Remote {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    config: RemoteConfig,
    obfuscator: Arc<dyn Obfuscator>,
    icmp: Arc<dyn IcmpSocket>,
    target: SocketAddr,
    sessions: Mutex<FxHashMap<u32, Arc<PeerSession>>>,
    group: ShutdownGroup,
}

impl Remote {
    /// Resolves the target and binds a raw ICMP socket
    pub async fn bind(config: RemoteConfig) -> anyhow::Result<Remote> {
        let icmp = Arc::new(RawIcmpSocket::bind()
            .context("listen for local")?);
        Self::bind_with_icmp(config, icmp).await
    }

    pub async fn bind_with_icmp(config: RemoteConfig, icmp: Arc<dyn IcmpSocket>) -> anyhow::Result<Remote> {
        config.validate()?;

        let target = resolve_ipv4_socket_addr(&config.target).await
            .with_context(|| format!("resolve target {:?}", config.target))?;
        debug!("target resolved: {:?}", target);

        let obfuscator = config.obfuscator();
        Ok(Remote {
            inner: Arc::new(RemoteInner {
                config,
                obfuscator,
                icmp,
                target,
                sessions: Default::default(),
                group: ShutdownGroup::new(),
            }),
        })
    }

    /// Quitting this group stops [Remote::run]
    pub fn shutdown_group(&self) -> ShutdownGroup {
        self.inner.group.clone()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().unwrap().len()
    }

    /// The address of the UDP socket a node's session uses towards the target
    pub fn session_local_addr(&self, node_id: u32) -> Option<SocketAddr> {
        let sessions = self.inner.sessions.lock().unwrap();
        sessions.get(&node_id)
            .and_then(|session| session.local_addr().ok())
    }

    /// Relays until the shutdown group is told to quit. All sessions are closed when this returns.
    pub async fn run(&self) -> anyhow::Result<()> {
        self.inner.group.go(self.inner.clone().local_to_remote());
        self.inner.group.wait().await;

        let remaining = self.session_count();
        if remaining != 0 {
            error!("{} sessions left after all tasks finished", remaining);
            bail!("{} sessions left after shutdown", remaining);
        }
        debug!("stopped");
        Ok(())
    }
}

impl RemoteInner {
    async fn local_to_remote(self: Arc<Self>) {
        debug!("ready to read icmp from local");

        let hs = self.obfuscator.header_size();
        let mut buf = vec![0u8; BUF_SIZE];

        while !self.group.is_quit() {
            let (n, ip) = match timeout(self.config.read_timeout, self.icmp.recv_from(&mut buf)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("local read: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            if n < ICMP_ECHO_HEADER_SIZE + hs {
                warn!("icmp packet from [ip:{:?}] too short, length: {}", ip, n);
                continue;
            }
            let Ok(icmp) = IcmpEchoHeader::deser(&mut &buf[..n]) else {
                continue;
            };
            if icmp.kind != ECHO_REQUEST {
                debug!("[ip:{:?}] not icmp type echo: {}", ip, icmp.kind);
                continue;
            }

            let frame = match self.obfuscator.decode_in_place(&mut buf[ICMP_ECHO_HEADER_SIZE..n]) {
                Ok(frame) => frame,
                Err(e) => {
                    if self.config.enable_echo {
                        self.reply_ping(&mut buf[..n], ip, icmp).await;
                    }
                    else {
                        warn!("[ip:{:?}][icmpid:{}][icmpseq:{}] decode: {}", ip, icmp.identifier, icmp.sequence, e);
                    }
                    continue;
                }
            };
            let (header, payload) = match FrameHeader::parse(frame) {
                Ok(parsed) => parsed,
                Err(_) => {
                    error!("short data, length: {}", frame.len());
                    continue;
                }
            };

            if header.dst != self.config.node_id {
                error!("[dst:{}] != [myid:{}] [src:{}][ip:{:?}]", header.dst, self.config.node_id, header.src, ip);
                continue;
            }

            let Some(session) = self.update_peer(ip, icmp.identifier, icmp.sequence, header.src) else {
                continue;
            };

            if self.config.verbose {
                debug!("recv from [local:{}] [ip:{:?}][icmpid:{}][icmpseq:{}] [pktid:{}] [size:{}/{}]",
                    header.src, ip, icmp.identifier, icmp.sequence, header.packet_id, payload.len(), n);
            }

            if let Some([l100, l1000, l10000]) = session.record_packet_id(header.packet_id) {
                info!("[local:{}] loss count: [{}/{}] [{}/{}] [{}/{}]", header.src,
                    l100.lost, l100.count,
                    l1000.lost, l1000.count,
                    l10000.lost, l10000.count,
                );
            }

            if let Err(e) = session.udp().send_to(payload, self.target).await {
                error!("write target for [local:{}]: {}", header.src, e);
            }
        }

        debug!("stopped reading icmp from local");
    }

    /// Answers an Echo Request that is not tunnel traffic by sending it back as an Echo Reply,
    ///  the way the kernel would
    async fn reply_ping(&self, packet: &mut [u8], ip: Ipv4Addr, icmp: IcmpEchoHeader) {
        packet[0] = ECHO_REPLY;
        incremental_update(&mut packet[2..4], ECHO_REQUEST as u16, ECHO_REPLY as u16);

        match self.icmp.send_to(packet, ip).await {
            Ok(_) => debug!("icmp echo reply to [ip:{:?}][icmpid:{}][icmpseq:{}] [size:{}]", ip, icmp.identifier, icmp.sequence, packet.len()),
            Err(e) => error!("[ip:{:?}][icmpid:{}][icmpseq:{}] icmp echo reply: {}", ip, icmp.identifier, icmp.sequence, e),
        }
    }

    /// Looks up the session for `node_id`, updating its route, or creates it and starts its task
    ///  reading from the target. Returns `None` if no session could be created.
    fn update_peer(self: &Arc<Self>, ip: Ipv4Addr, identifier: u16, sequence: u16, node_id: u32) -> Option<Arc<PeerSession>> {
        let mut sessions = self.sessions.lock().unwrap();

        if let Some(session) = sessions.get(&node_id) {
            if let Some(old) = session.update_route(ip, identifier, sequence) {
                info!("[local:{}] local ip:id updated [old:{:?}:{}] -> [new:{:?}:{}]", node_id, old.ip, old.identifier, ip, identifier);
            }
            return Some(session.clone());
        }

        info!("[local:{}] ip:id learned: {:?}:{}", node_id, ip, identifier);
        let session = match PeerSession::bind(node_id, PeerRoute { ip, identifier, sequence }) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!("[local:{}] can not listen udp for local: {}", node_id, e);
                return None;
            }
        };
        match session.local_addr() {
            Ok(addr) => info!("[local:{}] listen on [addr:{:?}] for target", node_id, addr),
            Err(e) => warn!("[local:{}] listening for target, address unknown: {}", node_id, e),
        }

        let span = span!(Level::INFO, "peer", node_id);
        if !self.group.go(self.clone().target_to_remote(session.clone()).instrument(span)) {
            debug!("[local:{}] quiting, can not start target reader", node_id);
            return None;
        }

        sessions.insert(node_id, session.clone());
        Some(session)
    }

    async fn target_to_remote(self: Arc<Self>, session: Arc<PeerSession>) {
        debug!("ready to read from target for local");

        let frame_offset = ICMP_ECHO_HEADER_SIZE + self.obfuscator.header_size();
        let mut packet_id: u32 = rand::random();
        let mut datagram = vec![0u8; BUF_SIZE];
        let mut buf = Vec::with_capacity(BUF_SIZE + frame_offset + FRAME_HEADER_SIZE);

        while !self.group.is_quit() {
            let (n, from) = match timeout(self.config.read_timeout, session.udp().recv_from(&mut datagram)).await {
                Err(_) => continue,
                Ok(Err(e)) => {
                    error!("target read: {}", e);
                    continue;
                }
                Ok(Ok(received)) => received,
            };

            if from != self.target {
                warn!("drop from [non-target:{:?}] [pktlen:{}]", from, n);
                continue;
            }

            packet_id = packet_id.wrapping_add(1);
            buf.clear();
            buf.resize(frame_offset, 0);
            FrameHeader::new(self.config.node_id, session.node_id, packet_id)
                .ser(&mut buf);
            buf.extend_from_slice(&datagram[..n]);
            self.obfuscator.encode_in_place(&mut buf, ICMP_ECHO_HEADER_SIZE);

            let route = session.route();
            IcmpEchoHeader::new(ECHO_REPLY, route.identifier, route.sequence)
                .write_with_checksum(&mut buf);

            if let Err(e) = self.icmp.send_to(&buf, route.ip).await {
                error!("reply local error: {}", e);
                continue;
            }

            if self.config.verbose {
                debug!("reply icmp packet to local [pktid:{}] [size:{}/{}]", packet_id, n, buf.len());
            }
        }

        self.sessions.lock().unwrap().remove(&session.node_id);
        debug!("stopped reading from target");
    }
}
