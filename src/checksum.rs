//! Internet checksum engine - RFC 1071 / RFC 1624
//!
//! All functions here are pure and allocation-free; any number of worker
//! threads may call them concurrently. The incremental variants are the hot
//! path: swapping an IPv4 pseudo-header for an IPv6 one (or back) touches
//! only the pseudo-header words, never the transport payload.

/// IPv4 pseudo-header fields included in TCP/UDP checksums.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Pseudo {
    pub src: [u8; 4],
    pub dst: [u8; 4],
    pub protocol: u8,
    pub length: u16,
}

/// IPv6 pseudo-header fields included in TCP/UDP/ICMPv6 checksums.
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Pseudo {
    pub src: [u8; 16],
    pub dst: [u8; 16],
    pub length: u32,
    pub next_header: u8,
}

/// Sums 16-bit big-endian words; an odd trailing byte is padded with zero.
fn sum_words(mut acc: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for chunk in &mut chunks {
        acc += u32::from(u16::from_be_bytes([chunk[0], chunk[1]]));
    }
    if let [last] = chunks.remainder() {
        acc += u32::from(u16::from_be_bytes([*last, 0]));
    }
    acc
}

fn sum_pseudo4(acc: u32, pseudo: &Ipv4Pseudo) -> u32 {
    let mut acc = sum_words(acc, &pseudo.src);
    acc = sum_words(acc, &pseudo.dst);
    acc += u32::from(pseudo.protocol);
    acc += u32::from(pseudo.length);
    acc
}

fn sum_pseudo6(acc: u32, pseudo: &Ipv6Pseudo) -> u32 {
    let mut acc = sum_words(acc, &pseudo.src);
    acc = sum_words(acc, &pseudo.dst);
    acc += pseudo.length >> 16;
    acc += pseudo.length & 0xFFFF;
    acc += u32::from(pseudo.next_header);
    acc
}

/// One's-complement sum of an IPv4 pseudo-header, used by the incremental
/// recalculation to subtract the old contribution.
fn sum_pseudo4_complement(acc: u32, pseudo: &Ipv4Pseudo) -> u32 {
    let partial = fold(sum_pseudo4(0, pseudo));
    acc + u32::from(!partial)
}

fn sum_pseudo6_complement(acc: u32, pseudo: &Ipv6Pseudo) -> u32 {
    let partial = fold(sum_pseudo6(0, pseudo));
    acc + u32::from(!partial)
}

/// Folds a 32-bit accumulator to 16 bits with end-around carry.
fn fold(mut acc: u32) -> u16 {
    while acc >> 16 != 0 {
        acc = (acc & 0xFFFF) + (acc >> 16);
    }
    acc as u16
}

/// IPv4 header checksum with the checksum field (bytes 10..12) treated as
/// zero, so it works on headers that still carry their old checksum.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let mut acc = sum_words(0, &header[..10]);
    acc = sum_words(acc, &header[12..]);
    !fold(acc)
}

/// Checksum over one or two contiguous byte ranges plus an optional IPv4
/// pseudo-header. Two ranges cover the "fresh header + borrowed payload"
/// case when a packet is synthesized from scratch; `payload1` must have even
/// length whenever `payload2` is present.
pub fn checksum4(payload1: &[u8], payload2: Option<&[u8]>, pseudo: Option<&Ipv4Pseudo>) -> u16 {
    debug_assert!(payload2.is_none() || payload1.len() % 2 == 0);

    let mut acc = sum_words(0, payload1);
    if let Some(payload2) = payload2 {
        acc = sum_words(acc, payload2);
    }
    if let Some(pseudo) = pseudo {
        acc = sum_pseudo4(acc, pseudo);
    }
    !fold(acc)
}

/// Same as [`checksum4`] with an IPv6 pseudo-header.
pub fn checksum6(payload1: &[u8], payload2: Option<&[u8]>, pseudo: Option<&Ipv6Pseudo>) -> u16 {
    debug_assert!(payload2.is_none() || payload1.len() % 2 == 0);

    let mut acc = sum_words(0, payload1);
    if let Some(payload2) = payload2 {
        acc = sum_words(acc, payload2);
    }
    if let Some(pseudo) = pseudo {
        acc = sum_pseudo6(acc, pseudo);
    }
    !fold(acc)
}

/// Incrementally rewrites a transport checksum when the packet moves from an
/// IPv4 header to an IPv6 header: removes the old pseudo-header contribution
/// and adds the new one, without rescanning the payload.
pub fn recalc_checksum_4to6(old_checksum: u16, old: &Ipv4Pseudo, new: &Ipv6Pseudo) -> u16 {
    let mut acc = u32::from(!old_checksum);
    acc = sum_pseudo4_complement(acc, old);
    acc = sum_pseudo6(acc, new);
    !fold(acc)
}

/// Mirror of [`recalc_checksum_4to6`] for the 6->4 direction.
pub fn recalc_checksum_6to4(old_checksum: u16, old: &Ipv6Pseudo, new: &Ipv4Pseudo) -> u16 {
    let mut acc = u32::from(!old_checksum);
    acc = sum_pseudo6_complement(acc, old);
    acc = sum_pseudo4(acc, new);
    !fold(acc)
}

/// UDP permits an all-zero "no checksum" sentinel, so a computed 0x0000 must
/// be transmitted as 0xFFFF. Checksum-mandatory protocols skip this mapping.
pub fn udp_fixup(checksum: u16) -> u16 {
    if checksum == 0 {
        0xFFFF
    } else {
        checksum
    }
}
