use bytes::{Buf, BufMut};

pub const FRAME_HEADER_SIZE: usize = 16;

/// reserved, the only command there is
pub const COMMAND_DATA: u32 = 0;

/// The tunnel's own header in front of every relayed datagram. All fields are little endian.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    pub src: u32,
    pub dst: u32,
    pub command: u32,
    pub packet_id: u32,
}

impl FrameHeader {
    pub fn new(src: u32, dst: u32, packet_id: u32) -> FrameHeader {
        FrameHeader {
            src,
            dst,
            command: COMMAND_DATA,
            packet_id,
        }
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.src);
        buf.put_u32_le(self.dst);
        buf.put_u32_le(self.command);
        buf.put_u32_le(self.packet_id);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<FrameHeader> {
        let src = buf.try_get_u32_le()?;
        let dst = buf.try_get_u32_le()?;
        let command = buf.try_get_u32_le()?;
        let packet_id = buf.try_get_u32_le()?;
        Ok(FrameHeader {
            src,
            dst,
            command,
            packet_id,
        })
    }

    /// Splits a decoded frame into its header and the payload
    pub fn parse(frame: &[u8]) -> anyhow::Result<(FrameHeader, &[u8])> {
        let mut buf = frame;
        let header = Self::deser(&mut buf)?;
        Ok((header, buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ser() {
        let mut buf = Vec::new();
        FrameHeader::new(1, 0x0203_0405, 0xffff_fffe).ser(&mut buf);
        assert_eq!(buf, vec![
            1, 0, 0, 0,
            5, 4, 3, 2,
            0, 0, 0, 0,
            0xfe, 0xff, 0xff, 0xff,
        ]);
    }

    #[test]
    fn test_parse() {
        let mut buf = Vec::new();
        FrameHeader::new(7, 8, 9).ser(&mut buf);
        buf.extend_from_slice(b"payload");

        let (header, payload) = FrameHeader::parse(&buf).unwrap();
        assert_eq!(header, FrameHeader { src: 7, dst: 8, command: COMMAND_DATA, packet_id: 9 });
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn test_parse_empty_payload() {
        let mut buf = Vec::new();
        FrameHeader::new(7, 8, 9).ser(&mut buf);
        let (_, payload) = FrameHeader::parse(&buf).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn test_parse_truncated() {
        assert!(FrameHeader::parse(&[0u8; FRAME_HEADER_SIZE - 1]).is_err());
    }
}
