//! IPv4 protocol - RFC 791

use crate::checksum;
use crate::{Error, Result};

/// Minimum IPv4 header size (without options)
pub const MIN_HEADER_SIZE: usize = 20;

/// Fragment flags (upper 3 bits of byte 6)
pub mod flags {
    /// Don't Fragment
    pub const DF: u8 = 0b010;
    /// More Fragments
    pub const MF: u8 = 0b001;
}

/// Parsed IPv4 header (zero-copy reference)
#[derive(Debug)]
pub struct Ipv4View<'a> {
    buffer: &'a [u8],
    header_len: usize,
}

impl<'a> Ipv4View<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < MIN_HEADER_SIZE {
            return Err(Error::Parse("IPv4 header too short".into()));
        }

        let version = buffer[0] >> 4;
        if version != 4 {
            return Err(Error::Parse("not an IPv4 packet".into()));
        }

        let ihl = (buffer[0] & 0x0F) as usize;
        let header_len = ihl * 4;
        if header_len < MIN_HEADER_SIZE || buffer.len() < header_len {
            return Err(Error::Parse("IPv4 header truncated".into()));
        }

        Ok(Self { buffer, header_len })
    }

    /// DSCP and ECN as one byte, the IPv6 traffic class layout.
    pub fn dscp_ecn(&self) -> u8 {
        self.buffer[1]
    }

    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    pub fn identification(&self) -> u16 {
        u16::from_be_bytes([self.buffer[4], self.buffer[5]])
    }

    pub fn flags(&self) -> u8 {
        self.buffer[6] >> 5
    }

    /// Fragment offset in 8-byte units
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buffer[6] & 0x1F, self.buffer[7]])
    }

    pub fn ttl(&self) -> u8 {
        self.buffer[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buffer[9]
    }

    pub fn src_addr(&self) -> [u8; 4] {
        self.buffer[12..16].try_into().unwrap()
    }

    pub fn dst_addr(&self) -> [u8; 4] {
        self.buffer[16..20].try_into().unwrap()
    }

    pub fn dont_fragment(&self) -> bool {
        (self.flags() & flags::DF) != 0
    }

    pub fn more_fragments(&self) -> bool {
        (self.flags() & flags::MF) != 0
    }

    /// MF set or a non-zero offset
    pub fn is_fragment(&self) -> bool {
        self.more_fragments() || self.fragment_offset() > 0
    }

    pub fn validate_checksum(&self) -> bool {
        let stored = u16::from_be_bytes([self.buffer[10], self.buffer[11]]);
        checksum::ipv4_header_checksum(&self.buffer[..self.header_len]) == stored
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.header_len..]
    }
}

/// Field set for emitting a fresh 20-byte header (no options).
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Fields {
    pub dscp_ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// In 8-byte units
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

impl Ipv4Fields {
    /// Serializes the header, computing its checksum.
    pub fn to_bytes(&self) -> [u8; MIN_HEADER_SIZE] {
        let mut header = [0u8; MIN_HEADER_SIZE];
        header[0] = 0x45;
        header[1] = self.dscp_ecn;
        header[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        header[4..6].copy_from_slice(&self.identification.to_be_bytes());

        let mut flags_offset = self.fragment_offset & 0x1FFF;
        if self.dont_fragment {
            flags_offset |= (flags::DF as u16) << 13;
        }
        if self.more_fragments {
            flags_offset |= (flags::MF as u16) << 13;
        }
        header[6..8].copy_from_slice(&flags_offset.to_be_bytes());

        header[8] = self.ttl;
        header[9] = self.protocol;
        header[12..16].copy_from_slice(&self.src);
        header[16..20].copy_from_slice(&self.dst);

        let sum = checksum::ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&sum.to_be_bytes());
        header
    }
}
