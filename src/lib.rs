//! Tunnels UDP datagrams through ICMP Echo Request / Echo Reply packets, for networks that
//!  drop UDP and TCP but let ping through.
//!
//! There are two roles:
//! * [tunnel::local::Local] exposes a UDP listener to a client application, wraps every datagram
//!    into an Echo Request towards the remote host, and unwraps Echo Replies back to the client
//! * [tunnel::remote::Remote] unwraps Echo Requests, keeps one UDP session towards the configured
//!    target per originating node, and sends the target's responses back as Echo Replies
//!
//! ## Wire format
//!
//! ```ascii
//!  0: ICMP echo header (8 bytes): type, code, checksum, identifier (BE), sequence (BE)
//!  8: obfuscation header (8 bytes): padding length, salt and CRC32 of the frame, mixed
//! 16: frame header (16 bytes, each u32 LE): source node id, destination node id, command (0),
//!      packet id
//! 32: payload, followed by random padding
//! ```
//!
//! Everything from offset 16 on is XORed with a keystream derived from the obfuscation header.
//!  The obfuscation hides structure only, it is not a security boundary.
//!
//! The tunnel is lossy and best effort: there is no retransmission, reordering or congestion
//!  control. Packet ids are used for loss statistics only.

pub mod config;
pub mod icmp;
pub mod logging;
pub mod node_id;
pub mod obfuscation;
pub mod shutdown;
pub mod sysctl;
pub mod test_util;
pub mod tunnel;
pub mod window;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            // .with_max_level(Level::TRACE)
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
