use crc::{Crc, CRC_32_ISO_HDLC};
use rand::{Rng, RngCore};
use crate::obfuscation::keystream::{fmix64, ximf64, SplitMix64};
use crate::obfuscation::{ObfuscationError, Obfuscator};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Envelope with random padding, a CRC32 integrity tag and a SplitMix64 keystream:
///
/// ```ascii
/// 0: mixed header (8 bytes) = fmix64(padding length (u16) | salt (u16) << 16 | crc32 (u32) << 32), LE
/// 8: payload || padding, XORed with the keystream seeded with the unmixed header word
/// ```
///
/// Payloads shorter than [KeystreamObfuscation::PADDING_LIMIT] get a random amount of padding
///  so that the total stays below the limit, which blurs the packet length distribution.
pub struct KeystreamObfuscation;

impl KeystreamObfuscation {
    pub const HEADER_SIZE: usize = 8;
    pub const PADDING_LIMIT: usize = 1000;

    fn padding_len(payload_len: usize, rng: &mut impl Rng) -> usize {
        if payload_len >= Self::PADDING_LIMIT {
            0
        }
        else {
            rng.random_range(0..Self::PADDING_LIMIT - payload_len)
        }
    }
}

impl Obfuscator for KeystreamObfuscation {
    fn header_size(&self) -> usize {
        Self::HEADER_SIZE
    }

    fn encode_in_place(&self, buf: &mut Vec<u8>, prefix_len: usize) {
        let header_end = prefix_len + Self::HEADER_SIZE;
        assert!(buf.len() >= header_end, "buffer of length {} can not hold prefix ({}) and obfuscation header", buf.len(), prefix_len);

        let mut rng = rand::rng();
        let payload_len = buf.len() - header_end;
        let padding = Self::padding_len(payload_len, &mut rng);
        let crc = CRC32.checksum(&buf[header_end..]);

        let payload_end = buf.len();
        buf.resize(payload_end + padding, 0);
        rng.fill_bytes(&mut buf[payload_end..]);

        let raw = padding as u64
            | (rng.random::<u16>() as u64) << 16
            | (crc as u64) << 32;
        buf[prefix_len..header_end].copy_from_slice(&fmix64(raw).to_le_bytes());

        SplitMix64::new(raw).xor_keystream(&mut buf[header_end..]);
    }

    fn decode_in_place<'a>(&self, buf: &'a mut [u8]) -> Result<&'a mut [u8], ObfuscationError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(ObfuscationError::ShortPacket { len: buf.len() });
        }

        let mut header = [0u8; Self::HEADER_SIZE];
        header.copy_from_slice(&buf[..Self::HEADER_SIZE]);
        let raw = ximf64(u64::from_le_bytes(header));

        let padding = (raw & 0xffff) as usize;
        let body_len = match (buf.len() - Self::HEADER_SIZE).checked_sub(padding) {
            Some(l) => l,
            None => return Err(ObfuscationError::BadPadding { len: buf.len(), padding }),
        };

        let body = &mut buf[Self::HEADER_SIZE..Self::HEADER_SIZE + body_len];
        SplitMix64::new(raw).xor_keystream(body);

        let declared = (raw >> 32) as u32;
        let calc = CRC32.checksum(body);
        if calc != declared {
            // restore the original bytes
            SplitMix64::new(raw).xor_keystream(body);
            return Err(ObfuscationError::IntegrityMismatch { calc, declared });
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, RngCore};
    use rstest::rstest;
    use super::*;

    fn random_bytes(len: usize) -> Vec<u8> {
        let mut result = vec![0u8; len];
        rand::rng().fill_bytes(&mut result);
        result
    }

    #[test]
    fn test_round_trip() {
        let prefix = [8u8, 0, 0, 0, 1, 2, 3, 4];
        for len in 0..2000 {
            let payload = random_bytes(len);
            let original = payload.clone();

            let encoded = KeystreamObfuscation.encode(&prefix, &payload);
            assert_eq!(payload, original);
            assert_eq!(&encoded[..prefix.len()], &prefix);

            let envelope_len = encoded.len() - prefix.len();
            let padding = envelope_len - KeystreamObfuscation::HEADER_SIZE - len;
            if len < KeystreamObfuscation::PADDING_LIMIT {
                assert!(padding < KeystreamObfuscation::PADDING_LIMIT - len);
            }
            else {
                assert_eq!(padding, 0);
            }

            let decoded = KeystreamObfuscation.decode(&encoded[prefix.len()..]).unwrap();
            assert_eq!(decoded, original, "len {}", len);
        }
    }

    #[test]
    fn test_round_trip_in_place() {
        let payload = b"some payload".to_vec();
        let mut buf = vec![0xaa; 3 + KeystreamObfuscation::HEADER_SIZE];
        buf.extend_from_slice(&payload);

        KeystreamObfuscation.encode_in_place(&mut buf, 3);
        assert_eq!(&buf[..3], &[0xaa, 0xaa, 0xaa]);
        assert_ne!(&buf[3 + 8..3 + 8 + payload.len()], payload.as_slice());

        let decoded = KeystreamObfuscation.decode_in_place(&mut buf[3..]).unwrap();
        assert_eq!(decoded, payload.as_slice());
    }

    #[test]
    #[should_panic]
    fn test_encode_in_place_without_room_for_header() {
        let mut buf = vec![0u8; 10];
        KeystreamObfuscation.encode_in_place(&mut buf, 3);
    }

    /// envelope built by hand: the keystream is seeded with the unmixed header word
    #[test]
    fn test_decode_known_layout() {
        let payload = b"123456789";
        let crc = 0xcbf4_3926u64; // CRC-32/ISO-HDLC check value
        let raw = 3 | (0x1234 << 16) | (crc << 32);

        let mut envelope = fmix64(raw).to_le_bytes().to_vec();
        envelope.extend_from_slice(payload);
        envelope.extend_from_slice(&[7, 7, 7]);
        SplitMix64::new(raw).xor_keystream(&mut envelope[8..]);

        assert_eq!(KeystreamObfuscation.decode(&envelope).unwrap(), payload.to_vec());
    }

    #[rstest]
    #[case::empty(0)]
    #[case::one(1)]
    #[case::seven(7)]
    fn test_short_packet(#[case] len: usize) {
        let mut buf = vec![0u8; len];
        assert_eq!(KeystreamObfuscation.decode_in_place(&mut buf), Err(ObfuscationError::ShortPacket { len }));
    }

    #[test]
    fn test_bad_padding() {
        let mut envelope = fmix64(500).to_le_bytes().to_vec();
        envelope.extend_from_slice(&[0u8; 10]);
        assert_eq!(KeystreamObfuscation.decode(&envelope), Err(ObfuscationError::BadPadding { len: 18, padding: 500 }));
    }

    #[test]
    fn test_flipped_payload_byte_is_detected() {
        let mut rng = rand::rng();
        for len in [1, 2, 17, 100, 999, 1000, 1500] {
            let payload = random_bytes(len);
            let encoded = KeystreamObfuscation.encode(&[], &payload);

            for _ in 0..20 {
                let mut corrupted = encoded.clone();
                let pos = KeystreamObfuscation::HEADER_SIZE + rng.random_range(0..len);
                corrupted[pos] ^= 1 << rng.random_range(0..8);

                let before = corrupted.clone();
                let result = KeystreamObfuscation.decode_in_place(&mut corrupted).map(|p| p.to_vec());
                assert!(matches!(result, Err(ObfuscationError::IntegrityMismatch { .. })), "len {} pos {}", len, pos);
                // a rejected packet is left as it was
                assert_eq!(corrupted, before);
            }
        }
    }

    #[test]
    fn test_flipped_header_byte_is_detected() {
        let payload = random_bytes(200);
        let encoded = KeystreamObfuscation.encode(&[], &payload);
        for pos in 0..KeystreamObfuscation::HEADER_SIZE {
            let mut corrupted = encoded.clone();
            corrupted[pos] ^= 0x10;
            assert!(KeystreamObfuscation.decode(&corrupted).is_err(), "pos {}", pos);
        }
    }

    #[test]
    fn test_trailing_bytes_are_treated_as_padding() {
        let envelope = KeystreamObfuscation.encode(&[], b"x");
        let padding = envelope.len() - 9;
        let mut raw_header = [0u8; 8];
        raw_header.copy_from_slice(&envelope[..8]);
        assert_eq!((ximf64(u64::from_le_bytes(raw_header)) & 0xffff) as usize, padding);
    }
}
