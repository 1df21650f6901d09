use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use tokio::net::UdpSocket;
use crate::window::loss_stats::{LossStats, WindowLoss};

/// Where replies to a peer go: the address and ICMP identifier / sequence of the most recent
///  Echo Request received from it. Echoing these keeps NAT and firewall state on the path
///  matching.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerRoute {
    pub ip: Ipv4Addr,
    pub identifier: u16,
    pub sequence: u16,
}

/// Remote side state for one Local endpoint, identified by its node id. Each session owns a
///  dedicated UDP socket towards the target, so the target's responses can be attributed to the
///  session.
///
/// The route is written by the task reading ICMP and read by the session's own task forwarding
///  the target's responses.
pub struct PeerSession {
    pub node_id: u32,
    route: Mutex<PeerRoute>,
    udp: UdpSocket,
    stats: Mutex<LossStats>,
}

impl PeerSession {
    /// Binds the session's socket to an ephemeral port. This is synchronous so it can be done
    ///  while holding the session table's lock, but it must be called from inside a tokio
    ///  runtime.
    pub fn bind(node_id: u32, route: PeerRoute) -> anyhow::Result<PeerSession> {
        let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_nonblocking(true)?;

        Ok(PeerSession {
            node_id,
            route: Mutex::new(route),
            udp: UdpSocket::from_std(socket)?,
            stats: Mutex::new(LossStats::new()),
        })
    }

    pub fn udp(&self) -> &UdpSocket {
        &self.udp
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.udp.local_addr()?)
    }

    pub fn route(&self) -> PeerRoute {
        *self.route.lock().unwrap()
    }

    /// Records the route of a newly received request. The sequence number is always taken over;
    ///  if address or identifier changed (the peer roamed, or its NAT mapping changed), the
    ///  previous route is returned.
    pub fn update_route(&self, ip: Ipv4Addr, identifier: u16, sequence: u16) -> Option<PeerRoute> {
        let mut route = self.route.lock().unwrap();
        let previous = *route;
        route.sequence = sequence;
        if previous.ip != ip || previous.identifier != identifier {
            route.ip = ip;
            route.identifier = identifier;
            Some(previous)
        }
        else {
            None
        }
    }

    /// Feeds a received packet id into the session's loss statistics, returning the loss for the
    ///  last 100 / 1000 / 10000 ids if they were refreshed
    pub fn record_packet_id(&self, packet_id: u32) -> Option<[WindowLoss; 3]> {
        let mut stats = self.stats.lock().unwrap();
        if stats.update(packet_id) {
            Some([stats.last_100, stats.last_1000, stats.last_10000])
        }
        else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(ip: [u8; 4], identifier: u16, sequence: u16) -> PeerRoute {
        PeerRoute {
            ip: Ipv4Addr::from(ip),
            identifier,
            sequence,
        }
    }

    #[tokio::test]
    async fn test_update_route_sequence_only() {
        let session = PeerSession::bind(5, route([10, 0, 0, 1], 7, 1)).unwrap();
        assert_eq!(session.update_route(Ipv4Addr::new(10, 0, 0, 1), 7, 2), None);
        assert_eq!(session.route(), route([10, 0, 0, 1], 7, 2));
    }

    #[tokio::test]
    async fn test_update_route_roaming() {
        let session = PeerSession::bind(5, route([10, 0, 0, 1], 7, 1)).unwrap();

        assert_eq!(session.update_route(Ipv4Addr::new(10, 0, 0, 9), 7, 2), Some(route([10, 0, 0, 1], 7, 1)));
        assert_eq!(session.route(), route([10, 0, 0, 9], 7, 2));

        assert_eq!(session.update_route(Ipv4Addr::new(10, 0, 0, 9), 8, 3), Some(route([10, 0, 0, 9], 7, 2)));
        assert_eq!(session.route(), route([10, 0, 0, 9], 8, 3));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let a = PeerSession::bind(5, route([10, 0, 0, 1], 7, 1)).unwrap();
        let b = PeerSession::bind(6, route([10, 0, 0, 1], 7, 1)).unwrap();
        assert_ne!(a.local_addr().unwrap().port(), 0);
        assert_ne!(a.local_addr().unwrap(), b.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_record_packet_id() {
        let session = PeerSession::bind(5, route([10, 0, 0, 1], 7, 1)).unwrap();
        let refreshed = (1..=300u32)
            .filter_map(|id| session.record_packet_id(id))
            .last();
        // the first refresh is at id 200: anchored at 100, no publication interval pending yet
        let [last_100, _, _] = refreshed.unwrap();
        assert_eq!(last_100, WindowLoss { lost: 0, count: 100 });
    }
}
