//! Packet translation engine
//!
//! One [`worker`] per thread runs the read-translate-write loop; everything
//! it touches (buffers, caches, fragment counters, resolver transport) is
//! exclusively owned by that worker, so the hot path takes no locks.

pub mod addr;
pub mod cache;
pub mod external;
pub mod icmp;
pub mod v4_to_v6;
pub mod v6_to_v4;
pub mod worker;

use crate::config::RuntimeConfig;
use crate::{Error, Result};
use std::ops::Range;
use std::sync::Arc;

/// Whether an address belongs to the packet being translated or to the
/// packet embedded in an ICMP error. The external resolver and its caches
/// keep the two populations apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRole {
    Main,
    IcmpError,
}

/// Why a single packet was discarded. Dropping is always per-packet; the
/// worker loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDrop {
    Malformed,
    ForbiddenProtocol,
    TtlExpired,
    Address,
    Mtu,
    Unsupported,
    Resolver,
    /// Blocking I/O inside translation was cancelled by the termination
    /// signal; the loop re-checks the run flag and exits.
    Interrupted,
}

/// Per-worker translation state: configuration, address translator and the
/// fragment-identifier counters. The counters are seeded from a secure
/// random source and emitted big-endian, so neither the sequence origin nor
/// the host byte order is observable on the wire.
pub struct XlatState {
    pub cfg: Arc<RuntimeConfig>,
    pub addr: addr::AddressTranslator,
    fragment_id_ipv4: u16,
    fragment_id_ipv6: u32,
}

impl XlatState {
    pub fn new(cfg: Arc<RuntimeConfig>, addr: addr::AddressTranslator) -> Result<Self> {
        let mut seed4 = [0u8; 2];
        let mut seed6 = [0u8; 4];
        getrandom::getrandom(&mut seed4).map_err(|_| Error::Random)?;
        getrandom::getrandom(&mut seed6).map_err(|_| Error::Random)?;

        Ok(Self {
            cfg,
            addr,
            fragment_id_ipv4: u16::from_ne_bytes(seed4),
            fragment_id_ipv6: u32::from_ne_bytes(seed6),
        })
    }

    pub fn next_ipv4_fragment_id(&mut self) -> u16 {
        let id = self.fragment_id_ipv4;
        self.fragment_id_ipv4 = self.fragment_id_ipv4.wrapping_add(1);
        id
    }

    pub fn next_ipv6_fragment_id(&mut self) -> u32 {
        let id = self.fragment_id_ipv6;
        self.fragment_id_ipv6 = self.fragment_id_ipv6.wrapping_add(1);
        id
    }
}

/// Output packets assembled by a translation pass.
///
/// Freshly built headers land in an owned scratch buffer; the transport
/// payload stays in the receive buffer and is referenced by range, so the
/// worker can emit header and payload with one vectored write and no copy.
/// One input packet may yield several outputs when fragmentation kicks in.
#[derive(Debug, Default)]
pub struct OutPackets {
    buf: Vec<u8>,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    header: (u32, u32),
    payload: (u32, u32),
}

impl OutPackets {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(4096),
            segments: Vec::with_capacity(4),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.segments.clear();
    }

    /// Appends one output packet: `header_parts` are copied into the
    /// scratch buffer, `payload` indexes the receive buffer.
    pub fn push(&mut self, header_parts: &[&[u8]], payload: Range<usize>) {
        let start = self.buf.len();
        for part in header_parts {
            self.buf.extend_from_slice(part);
        }
        self.segments.push(Segment {
            header: (start as u32, self.buf.len() as u32),
            payload: (payload.start as u32, payload.end as u32),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Iterates output packets as (header bytes, payload bytes) pairs,
    /// `input` being the receive buffer the ranges were taken from.
    pub fn packets<'a>(&'a self, input: &'a [u8]) -> impl Iterator<Item = (&'a [u8], &'a [u8])> {
        self.segments.iter().map(move |seg| {
            let header = &self.buf[seg.header.0 as usize..seg.header.1 as usize];
            let payload = &input[seg.payload.0 as usize..seg.payload.1 as usize];
            (header, payload)
        })
    }
}
