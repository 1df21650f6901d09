use std::net::{Ipv4Addr, UdpSocket};
use anyhow::{anyhow, bail, Context};
use rand::Rng;
use tracing::debug;

/// Parses a node id from its configuration string:
/// * `ip`: the preferred outbound IPv4 address of this host, see [outbound_ipv4]
/// * `rand`: a random id
/// * an IPv4 address, interpreted as a big-endian `u32`
/// * an integer literal: decimal, `0x` hex, `0o` or leading-zero octal, `0b` binary
///
/// Node id 0 is not a valid id.
pub fn parse_node_id(s: &str) -> anyhow::Result<u32> {
    let id = if s.eq_ignore_ascii_case("ip") {
        let ip = outbound_ipv4()?;
        if ip.is_unspecified() {
            bail!("outbound address is unspecified");
        }
        ip.to_bits()
    }
    else if s.eq_ignore_ascii_case("rand") {
        rand::rng().random()
    }
    else if let Ok(ip) = s.parse::<Ipv4Addr>() {
        ip.to_bits()
    }
    else {
        parse_int_literal(s)
            .ok_or_else(|| anyhow!("invalid node id: {:?}", s))?
    };

    if id == 0 {
        bail!("node id must not be 0: {:?}", s);
    }
    debug!("parsed node id {:?} as 0x{:08X}", s, id);
    Ok(id)
}

fn parse_int_literal(s: &str) -> Option<u32> {
    let (digits, radix) = if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (rest, 16)
    }
    else if let Some(rest) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (rest, 8)
    }
    else if let Some(rest) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (rest, 2)
    }
    else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    }
    else {
        (s, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// The local address this host would use for outbound IPv4 traffic. This 'connects' a UDP
///  socket to a public address, which only selects a route and sends nothing.
pub fn outbound_ipv4() -> anyhow::Result<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(("8.8.8.8", 53))
        .context("no outbound IPv4 route")?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) => Ok(ip),
        std::net::IpAddr::V6(ip) => bail!("outbound address is not IPv4: {:?}", ip),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::decimal("1234", 1234)]
    #[case::max("4294967295", u32::MAX)]
    #[case::hex("0x1A2b", 0x1a2b)]
    #[case::hex_upper("0XFF", 0xff)]
    #[case::octal("0o17", 0o17)]
    #[case::octal_leading_zero("010", 8)]
    #[case::binary("0b101", 5)]
    #[case::ipv4("1.2.3.4", 0x0102_0304)]
    #[case::ipv4_high("192.168.0.1", 0xc0a8_0001)]
    fn test_parse_node_id(#[case] s: &str, #[case] expected: u32) {
        assert_eq!(parse_node_id(s).unwrap(), expected);
    }

    #[rstest]
    #[case::empty("")]
    #[case::zero("0")]
    #[case::zero_hex("0x0")]
    #[case::zero_ip("0.0.0.0")]
    #[case::overflow("4294967296")]
    #[case::garbage("node")]
    #[case::negative("-1")]
    #[case::bad_octal("09")]
    #[case::empty_hex("0x")]
    #[case::signed_hex("0x+1")]
    fn test_parse_node_id_invalid(#[case] s: &str) {
        assert!(parse_node_id(s).is_err());
    }

    #[test]
    fn test_parse_node_id_rand() {
        let a = parse_node_id("rand").unwrap();
        let b = parse_node_id("RAND").unwrap();
        assert_ne!(a, 0);
        assert_ne!(b, 0);
    }
}
