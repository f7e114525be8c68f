//! IPv6 protocol - RFC 8200

use crate::{Error, Result};

/// IPv6 header size (fixed, unlike IPv4)
pub const HEADER_SIZE: usize = 40;

/// Fragment extension header size
pub const FRAGMENT_HEADER_SIZE: usize = 8;

/// Parsed IPv6 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv6View<'a> {
    buffer: &'a [u8],
}

impl<'a> Ipv6View<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("IPv6 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 6 {
            return Err(Error::Parse("not an IPv6 packet".into()));
        }

        Ok(Self { buffer })
    }

    /// Traffic class (the IPv4 DSCP+ECN byte)
    pub fn traffic_class(&self) -> u8 {
        ((self.buffer[0] & 0x0F) << 4) | (self.buffer[1] >> 4)
    }

    /// Flow label (20 bits)
    pub fn flow_label(&self) -> u32 {
        (u32::from(self.buffer[1] & 0x0F) << 16)
            | (u32::from(self.buffer[2]) << 8)
            | u32::from(self.buffer[3])
    }

    /// Payload length (everything after the 40-byte header)
    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn next_header(&self) -> u8 {
        self.buffer[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buffer[7]
    }

    pub fn src_addr(&self) -> [u8; 16] {
        self.buffer[8..24].try_into().unwrap()
    }

    pub fn dst_addr(&self) -> [u8; 16] {
        self.buffer[24..40].try_into().unwrap()
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_SIZE..]
    }
}

/// Parsed fragment extension header (zero-copy reference)
#[derive(Debug)]
pub struct FragmentView<'a> {
    buffer: &'a [u8],
}

impl<'a> FragmentView<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < FRAGMENT_HEADER_SIZE {
            return Err(Error::Parse("IPv6 fragment header too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn next_header(&self) -> u8 {
        self.buffer[0]
    }

    /// Fragment offset in 8-byte units
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]]) >> 3
    }

    pub fn more_fragments(&self) -> bool {
        (self.buffer[3] & 0x01) != 0
    }

    pub fn identification(&self) -> u32 {
        u32::from_be_bytes(self.buffer[4..8].try_into().unwrap())
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[FRAGMENT_HEADER_SIZE..]
    }
}

/// Field set for emitting a fresh 40-byte header.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Fields {
    pub traffic_class: u8,
    pub flow_label: u32,
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src: [u8; 16],
    pub dst: [u8; 16],
}

impl Ipv6Fields {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header = [0u8; HEADER_SIZE];
        header[0] = 0x60 | (self.traffic_class >> 4);
        header[1] = (self.traffic_class << 4) | ((self.flow_label >> 16) as u8 & 0x0F);
        header[2] = (self.flow_label >> 8) as u8;
        header[3] = self.flow_label as u8;
        header[4..6].copy_from_slice(&self.payload_length.to_be_bytes());
        header[6] = self.next_header;
        header[7] = self.hop_limit;
        header[8..24].copy_from_slice(&self.src);
        header[24..40].copy_from_slice(&self.dst);
        header
    }
}

/// Serializes a fragment extension header. The identification is written in
/// network byte order so the host's endianness never shows on the wire.
pub fn fragment_header(
    next_header: u8,
    fragment_offset: u16,
    more_fragments: bool,
    identification: u32,
) -> [u8; FRAGMENT_HEADER_SIZE] {
    let mut header = [0u8; FRAGMENT_HEADER_SIZE];
    header[0] = next_header;
    let offset_flags = (fragment_offset << 3) | u16::from(more_fragments);
    header[2..4].copy_from_slice(&offset_flags.to_be_bytes());
    header[4..8].copy_from_slice(&identification.to_be_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> Ipv6Fields {
        let mut src = [0u8; 16];
        src[..4].copy_from_slice(&[0x20, 0x01, 0x0d, 0xb8]);
        src[15] = 1;
        let mut dst = [0u8; 16];
        dst[..4].copy_from_slice(&[0x00, 0x64, 0xff, 0x9b]);
        dst[15] = 2;

        Ipv6Fields {
            traffic_class: 0xB8,
            flow_label: 0x9F00D,
            payload_length: 28,
            next_header: 17,
            hop_limit: 63,
            src,
            dst,
        }
    }

    #[test]
    fn test_build_then_parse_round_trip() {
        let fields = sample_fields();
        let header = fields.to_bytes();
        let view = Ipv6View::parse(&header).unwrap();

        assert_eq!(view.traffic_class(), 0xB8);
        assert_eq!(view.flow_label(), 0x9F00D);
        assert_eq!(view.payload_length(), 28);
        assert_eq!(view.next_header(), 17);
        assert_eq!(view.hop_limit(), 63);
        assert_eq!(view.src_addr(), fields.src);
        assert_eq!(view.dst_addr(), fields.dst);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Ipv6View::parse(&[0u8; 39]).is_err());

        let mut header = sample_fields().to_bytes();
        header[0] = 0x45;
        assert!(Ipv6View::parse(&header).is_err());
    }

    #[test]
    fn test_fragment_header_round_trip() {
        let header = fragment_header(17, 185, true, 0xDEADBEEF);
        let view = FragmentView::parse(&header).unwrap();

        assert_eq!(view.next_header(), 17);
        assert_eq!(view.fragment_offset(), 185);
        assert!(view.more_fragments());
        assert_eq!(view.identification(), 0xDEADBEEF);

        let last = fragment_header(6, 0, false, 7);
        let view = FragmentView::parse(&last).unwrap();
        assert_eq!(view.fragment_offset(), 0);
        assert!(!view.more_fragments());
        assert_eq!(view.identification(), 7);
    }
}
