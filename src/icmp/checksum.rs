//! Internet checksum (RFC 1071) over little-endian 16-bit words, as it is stored in ICMP headers
//!  on little-endian hosts: the low byte of the checksum goes first.
//!
//! There is a scalar and a 'wide' implementation that sums eight bytes per step. They produce
//!  identical results for all inputs.

/// Computes the ones' complement checksum of `buf`. A trailing odd byte is added as the low byte
///  of a final word.
pub fn checksum(buf: &[u8]) -> u16 {
    if buf.len() < 32 {
        checksum_scalar(buf)
    }
    else {
        checksum_wide(buf)
    }
}

pub fn checksum_scalar(buf: &[u8]) -> u16 {
    finish(sum_scalar(buf))
}

pub fn checksum_wide(buf: &[u8]) -> u16 {
    let mut chunks = buf.chunks_exact(8);
    let mut sum = 0u64;
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let word = u64::from_le_bytes(word);
        // 2^16 == 1 (mod 0xffff), so 32-bit halves can be summed as they are
        sum += (word & 0xffff_ffff) + (word >> 32);
    }
    finish(fold(sum) + sum_scalar(chunks.remainder()))
}

fn sum_scalar(buf: &[u8]) -> u64 {
    let mut words = buf.chunks_exact(2);
    let mut sum = 0u64;
    for word in &mut words {
        sum += u16::from_le_bytes([word[0], word[1]]) as u64;
    }
    if let [last] = words.remainder() {
        sum += *last as u64;
    }
    sum
}

fn fold(mut sum: u64) -> u64 {
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    sum
}

fn finish(sum: u64) -> u16 {
    !(fold(sum) as u16)
}

/// Clears the 2-byte checksum field at `buf[offset..offset+2]`, computes the checksum over all
///  of `buf` and stores it in the field.
pub fn put_checksum(buf: &mut [u8], offset: usize) {
    buf[offset] = 0;
    buf[offset + 1] = 0;
    let s = checksum(buf);
    buf[offset..offset + 2].copy_from_slice(&s.to_le_bytes());
}

/// Adjusts a stored checksum for a single 16-bit word of the covered data changing from `old` to
///  `new` (RFC 1624, eqn. 3). Words are little-endian as [checksum] sees them, e.g. changing the
///  ICMP type from 8 to 0 (with code 0) is `old = 8, new = 0`.
pub fn incremental_update(stored: &mut [u8], old: u16, new: u16) {
    let hc = u16::from_le_bytes([stored[0], stored[1]]);
    let sum = (!hc) as u64 + (!old) as u64 + new as u64;
    let updated = !(fold(sum) as u16);
    stored[..2].copy_from_slice(&updated.to_le_bytes());
}
