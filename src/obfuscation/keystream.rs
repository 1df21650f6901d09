/// MurmurHash3's 64-bit finalizer: a bijective avalanche mix
pub fn fmix64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

/// the inverse of [fmix64]
pub fn ximf64(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0x9cb4_b2f8_1293_37db);
    h ^= h >> 33;
    h = h.wrapping_mul(0x4f74_430c_22a5_4005);
    h ^= h >> 33;
    h
}

/// The SplitMix64 generator, used as a keystream: each output word is XORed over eight bytes
///  in little-endian order. A trailing partial word uses the output's low bytes first.
///
/// This is not a cipher in any cryptographic sense.
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    const GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

    pub fn new(seed: u64) -> SplitMix64 {
        SplitMix64 { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(Self::GAMMA);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// XORs the keystream over `buf`, eight bytes per step
    pub fn xor_keystream(&mut self, buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(8);
        for chunk in &mut chunks {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            let word = u64::from_le_bytes(word) ^ self.next_u64();
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        self.xor_tail(chunks.into_remainder());
    }

    /// Byte-at-a-time equivalent of [SplitMix64::xor_keystream]
    pub fn xor_keystream_bytewise(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(8) {
            self.xor_tail(chunk);
        }
    }

    fn xor_tail(&mut self, tail: &mut [u8]) {
        if tail.is_empty() {
            return;
        }
        let mut r = self.next_u64();
        for b in tail {
            *b ^= r as u8;
            r >>= 8;
        }
    }
}
