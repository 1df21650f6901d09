pub mod frame;
pub mod local;
pub mod peer_session;
pub mod remote;

use std::net::{Ipv4Addr, SocketAddr};
use anyhow::bail;
use tokio::net::lookup_host;

/// size of the per-task packet buffers
pub const BUF_SIZE: usize = 128 * 1024;

/// resolves a host name or address literal to its first IPv4 address
async fn resolve_ipv4(host: &str) -> anyhow::Result<Ipv4Addr> {
    for addr in lookup_host((host, 0)).await? {
        if let SocketAddr::V4(addr) = addr {
            return Ok(*addr.ip());
        }
    }
    bail!("{:?} does not resolve to an IPv4 address", host)
}

/// resolves `host:port` to its first IPv4 socket address
async fn resolve_ipv4_socket_addr(addr: &str) -> anyhow::Result<SocketAddr> {
    for resolved in lookup_host(addr).await? {
        if resolved.is_ipv4() {
            return Ok(resolved);
        }
    }
    bail!("{:?} does not resolve to an IPv4 address", addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ipv4() {
        assert_eq!(resolve_ipv4("10.1.2.3").await.unwrap(), Ipv4Addr::new(10, 1, 2, 3));
        assert!(resolve_ipv4("::1").await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_ipv4_socket_addr() {
        assert_eq!(resolve_ipv4_socket_addr("127.0.0.1:53").await.unwrap(), "127.0.0.1:53".parse().unwrap());
        assert!(resolve_ipv4_socket_addr("[::1]:53").await.is_err());
        assert!(resolve_ipv4_socket_addr("127.0.0.1").await.is_err());
    }
}
