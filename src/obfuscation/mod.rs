pub mod keystream;
pub mod keystream_obfuscation;

use thiserror::Error;

pub use keystream_obfuscation::KeystreamObfuscation;

/// Reasons for rejecting an incoming envelope. None of them is reported to the sender.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ObfuscationError {
    #[error("packet length {len} is shorter than the obfuscation header")]
    ShortPacket { len: usize },
    #[error("bad packet: packet length {len}, padding length {padding}")]
    BadPadding { len: usize, padding: usize },
    #[error("crc32 mismatch: [calc:{calc:08x}] != [header:{declared:08x}]")]
    IntegrityMismatch { calc: u32, declared: u32 },
}

/// Wraps frames into an envelope that hides their structure, and unwraps them again. The
///  implementation is chosen once at startup and shared as an `Arc<dyn Obfuscator>`.
///
/// The in-place methods are used on the hot path, operating on the packet buffer that also holds
///  the ICMP header in front of the envelope.
pub trait Obfuscator: Send + Sync {
    /// number of bytes the envelope adds in front of the payload
    fn header_size(&self) -> usize;

    /// `buf` holds `prefix || header_size() reserved bytes || payload`. This writes the envelope
    ///  header into the reserved bytes, may append padding, and transforms everything after the
    ///  prefix in place. The prefix is left untouched.
    ///
    /// Panics if `buf` is too short to hold the prefix and the reserved header.
    fn encode_in_place(&self, buf: &mut Vec<u8>, prefix_len: usize);

    /// Unwraps an envelope in place, returning the payload as a sub-slice of `buf`. On failure,
    ///  `buf` is left as it was.
    fn decode_in_place<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ObfuscationError>;

    fn encode(&self, prefix: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(prefix.len() + self.header_size() + payload.len());
        buf.extend_from_slice(prefix);
        buf.resize(prefix.len() + self.header_size(), 0);
        buf.extend_from_slice(payload);
        self.encode_in_place(&mut buf, prefix.len());
        buf
    }

    fn decode(&self, encoded: &[u8]) -> Result<Vec<u8>, ObfuscationError> {
        let mut buf = encoded.to_vec();
        Ok(self.decode_in_place(&mut buf)?.to_vec())
    }
}

/// passthrough for debugging, sends frames as they are
pub struct NoObfuscation;
impl Obfuscator for NoObfuscation {
    fn header_size(&self) -> usize {
        0
    }

    fn encode_in_place(&self, buf: &mut Vec<u8>, prefix_len: usize) {
        assert!(buf.len() >= prefix_len, "buffer of length {} can not hold a prefix of {} bytes", buf.len(), prefix_len);
    }

    fn decode_in_place<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ObfuscationError> {
        Ok(buf)
    }
}
