//! ICMP / ICMPv6 message layout
//!
//! Both families share the same first 8 bytes: type, code, checksum and a
//! 4-byte "rest of header" whose meaning depends on the type. Error
//! messages carry the offending IP header plus leading payload bytes after
//! that.

use crate::{Error, Result};

/// Fixed part shared by ICMPv4 and ICMPv6
pub const HEADER_SIZE: usize = 8;

/// ICMPv4 types handled by the translator
pub mod v4 {
    pub const ECHO_REPLY: u8 = 0;
    pub const DEST_UNREACHABLE: u8 = 3;
    pub const ECHO_REQUEST: u8 = 8;
    pub const TIME_EXCEEDED: u8 = 11;

    pub const CODE_HOST_UNREACHABLE: u8 = 1;
    pub const CODE_PORT_UNREACHABLE: u8 = 3;
    pub const CODE_FRAG_NEEDED: u8 = 4;
    pub const CODE_COMM_PROHIBITED: u8 = 13;
}

/// ICMPv6 types handled by the translator
pub mod v6 {
    pub const DEST_UNREACHABLE: u8 = 1;
    pub const PACKET_TOO_BIG: u8 = 2;
    pub const TIME_EXCEEDED: u8 = 3;
    pub const ECHO_REQUEST: u8 = 128;
    pub const ECHO_REPLY: u8 = 129;

    pub const CODE_NO_ROUTE: u8 = 0;
    pub const CODE_ADMIN_PROHIBITED: u8 = 1;
    pub const CODE_ADDR_UNREACHABLE: u8 = 3;
    pub const CODE_PORT_UNREACHABLE: u8 = 4;
}

/// Parsed ICMP message (zero-copy reference, either family)
#[derive(Debug)]
pub struct IcmpView<'a> {
    buffer: &'a [u8],
}

impl<'a> IcmpView<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("ICMP message too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn message_type(&self) -> u8 {
        self.buffer[0]
    }

    pub fn code(&self) -> u8 {
        self.buffer[1]
    }

    /// Bytes 4..8, e.g. identifier+sequence for echo, MTU for packet-too-big
    pub fn rest_of_header(&self) -> [u8; 4] {
        self.buffer[4..8].try_into().unwrap()
    }

    /// Everything after the fixed 8 bytes: echo data, or the embedded
    /// packet of an error message
    pub fn body(&self) -> &[u8] {
        &self.buffer[HEADER_SIZE..]
    }
}
