use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use rstest::rstest;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::Level;
use icmp_tun::config::{LocalConfig, RemoteConfig};
use icmp_tun::shutdown::ShutdownGroup;
use icmp_tun::test_util::icmp::MemoryIcmpNetwork;
use icmp_tun::tunnel::local::Local;
use icmp_tun::tunnel::remote::Remote;

const REMOTE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 1);
const REMOTE_ID: u32 = 0xc0a8_0701;

#[ctor::ctor]
fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(Level::DEBUG)
        .try_init()
        .ok();
}

/// A UDP target that answers every datagram with the same bytes
async fn spawn_echo_target() -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let _ = socket.send_to(&buf[..n], from).await;
        }
    });
    (addr, handle)
}

struct Running {
    group: ShutdownGroup,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.group.quit();
        timeout(Duration::from_secs(5), self.handle).await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

async fn start_local(network: &Arc<MemoryIcmpNetwork>, ip: Ipv4Addr, local_id: u32, obfuscate: bool) -> (SocketAddr, Running) {
    let mut config = LocalConfig::new(local_id, REMOTE_ID, "127.0.0.1:0", REMOTE_IP.to_string());
    config.obfuscate = obfuscate;
    config.read_timeout = Duration::from_millis(20);
    let local = Local::bind_with_icmp(config, network.endpoint(ip)).await.unwrap();

    let addr = local.local_addr().unwrap();
    let group = local.shutdown_group();
    let handle = tokio::spawn(async move { local.run().await });
    (addr, Running { group, handle })
}

async fn start_remote(network: &Arc<MemoryIcmpNetwork>, target: SocketAddr, obfuscate: bool) -> (Arc<Remote>, Running) {
    let mut config = RemoteConfig::new(REMOTE_ID, target.to_string());
    config.obfuscate = obfuscate;
    config.read_timeout = Duration::from_millis(20);
    let remote = Arc::new(Remote::bind_with_icmp(config, network.endpoint(REMOTE_IP)).await.unwrap());

    let group = remote.shutdown_group();
    let handle = {
        let remote = remote.clone();
        tokio::spawn(async move { remote.run().await })
    };
    (remote, Running { group, handle })
}

async fn round_trip(client: &UdpSocket, local_addr: SocketAddr, datagram: &[u8]) -> Vec<u8> {
    client.send_to(datagram, local_addr).await.unwrap();
    let mut buf = vec![0u8; 65536];
    let (n, from) = timeout(Duration::from_secs(5), client.recv_from(&mut buf)).await
        .unwrap()
        .unwrap();
    assert_eq!(from, local_addr);
    buf.truncate(n);
    buf
}

#[rstest]
#[case::obfuscated(true)]
#[case::plain(false)]
#[tokio::test]
async fn test_datagrams_arrive_byte_identical(#[case] obfuscate: bool) {
    let network = MemoryIcmpNetwork::new();
    let (target, target_task) = spawn_echo_target().await;
    let (remote, remote_running) = start_remote(&network, target, obfuscate).await;
    let (local_addr, local_running) = start_local(&network, Ipv4Addr::new(10, 1, 1, 1), 0x0a01_0101, obfuscate).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for len in [0, 1, 7, 8, 9, 100, 1000, 1472, 8000] {
        let datagram = (0..len).map(|i| (i * 7 + len) as u8).collect::<Vec<_>>();
        assert_eq!(round_trip(&client, local_addr, &datagram).await, datagram, "length {}", len);
    }
    assert_eq!(remote.session_count(), 1);

    local_running.stop().await;
    remote_running.stop().await;
    assert_eq!(remote.session_count(), 0);
    target_task.abort();
}

#[tokio::test]
async fn test_sessions_are_separate_per_node() {
    let network = MemoryIcmpNetwork::new();
    let (target, target_task) = spawn_echo_target().await;
    let (remote, remote_running) = start_remote(&network, target, true).await;
    let (addr_a, running_a) = start_local(&network, Ipv4Addr::new(10, 1, 1, 1), 0x0a01_0101, true).await;
    let (addr_b, running_b) = start_local(&network, Ipv4Addr::new(10, 1, 1, 2), 0x0a01_0102, true).await;

    let client_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for i in 0..20u8 {
        assert_eq!(round_trip(&client_a, addr_a, &[b'a', i]).await, vec![b'a', i]);
        assert_eq!(round_trip(&client_b, addr_b, &[b'b', i]).await, vec![b'b', i]);
    }

    assert_eq!(remote.session_count(), 2);
    assert_ne!(remote.session_local_addr(0x0a01_0101), remote.session_local_addr(0x0a01_0102));

    running_a.stop().await;
    running_b.stop().await;
    remote_running.stop().await;
    target_task.abort();
}

#[tokio::test]
async fn test_mismatched_obfuscation_does_not_relay() {
    let network = MemoryIcmpNetwork::new();
    let (target, target_task) = spawn_echo_target().await;
    let (remote, remote_running) = start_remote(&network, target, true).await;
    let (local_addr, local_running) = start_local(&network, Ipv4Addr::new(10, 1, 1, 1), 0x0a01_0101, false).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(b"plain text", local_addr).await.unwrap();
    let mut buf = vec![0u8; 1000];
    assert!(timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await.is_err());
    assert_eq!(remote.session_count(), 0);

    local_running.stop().await;
    remote_running.stop().await;
    target_task.abort();
}
