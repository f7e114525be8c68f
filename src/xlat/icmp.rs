//! ICMP translation - RFC 7915 section 4/5
//!
//! Echo messages swap type numbers and get their checksum recomputed
//! (ICMPv6 includes a pseudo-header, ICMPv4 does not). Error messages are
//! the hard case: type and code are mapped table-wise and the embedded
//! offending packet is itself translated, addresses included, using the
//! relaxed icmp-error address rules.
//!
//! Unsupported types and codes drop the message; an ICMP error embedding
//! another ICMP error is invalid and drops too.

use super::{OutPackets, PacketDrop, XlatState};
use crate::checksum::{self, Ipv6Pseudo};
use crate::protocol::icmp::{v4, v6, IcmpView, HEADER_SIZE};
use crate::protocol::ipv4::{Ipv4Fields, Ipv4View};
use crate::protocol::ipv6::{Ipv6Fields, Ipv6View, HEADER_SIZE as V6_HEADER_SIZE};
use crate::protocol::{self, PROTO_FRAGMENT, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};

/// ICMPv6 errors must fit the minimum IPv6 MTU.
const MAX_ERROR_SIZE_V6: usize = 1280;
/// ICMPv4 errors are kept within the classic minimum reassembly size.
const MAX_ERROR_SIZE_V4: usize = 576;

/// Longest embedded-packet payload an ICMPv6 error can carry:
/// outer IPv6 + ICMP header + embedded IPv6 header.
const MAX_EMBEDDED_PAYLOAD_V6: usize = MAX_ERROR_SIZE_V6 - 40 - HEADER_SIZE - 40;
const MAX_EMBEDDED_PAYLOAD_V4: usize = MAX_ERROR_SIZE_V4 - 20 - HEADER_SIZE - 20;

#[allow(clippy::too_many_arguments)]
pub fn translate_4to6(
    pkt: &mut [u8],
    msg_start: usize,
    state: &mut XlatState,
    hop_limit: u8,
    traffic_class: u8,
    src6: &[u8; 16],
    dst6: &[u8; 16],
    out: &mut OutPackets,
) -> Result<(), PacketDrop> {
    let msg = &pkt[msg_start..];
    let view = IcmpView::parse(msg).map_err(|_| PacketDrop::Malformed)?;
    if checksum::checksum4(msg, None, None) != 0 {
        return Err(PacketDrop::Malformed);
    }

    let message_type = view.message_type();
    let code = view.code();
    let rest = view.rest_of_header();
    let body_len = msg.len() - HEADER_SIZE;

    // Informational messages: type swap plus checksum recomputation.
    if (message_type == v4::ECHO_REQUEST || message_type == v4::ECHO_REPLY) && code == 0 {
        let new_type = if message_type == v4::ECHO_REQUEST {
            v6::ECHO_REQUEST
        } else {
            v6::ECHO_REPLY
        };
        if V6_HEADER_SIZE + HEADER_SIZE + body_len > usize::from(state.cfg.mtu_ipv6) {
            return Err(PacketDrop::Mtu);
        }

        let mut icmp = [0u8; HEADER_SIZE];
        icmp[0] = new_type;
        icmp[4..8].copy_from_slice(&rest);
        let pseudo = Ipv6Pseudo {
            src: *src6,
            dst: *dst6,
            length: (HEADER_SIZE + body_len) as u32,
            next_header: PROTO_ICMPV6,
        };
        let body = &pkt[msg_start + HEADER_SIZE..];
        let sum = checksum::checksum6(&icmp, Some(body), Some(&pseudo));
        icmp[2..4].copy_from_slice(&sum.to_be_bytes());

        let ip = Ipv6Fields {
            traffic_class,
            flow_label: 0,
            payload_length: (HEADER_SIZE + body_len) as u16,
            next_header: PROTO_ICMPV6,
            hop_limit,
            src: *src6,
            dst: *dst6,
        }
        .to_bytes();
        out.push(&[&ip, &icmp], msg_start + HEADER_SIZE..pkt.len());
        return Ok(());
    }

    let (new_type, new_code, new_rest) = match (message_type, code) {
        (v4::DEST_UNREACHABLE, v4::CODE_FRAG_NEEDED) => {
            let mtu = u16::from_be_bytes([rest[2], rest[3]]);
            // The IPv6 path can carry 20 more bytes of header; zero means
            // a router predating path-MTU discovery, assume the minimum.
            let mtu = if mtu == 0 {
                MAX_ERROR_SIZE_V6 as u32
            } else {
                u32::from(mtu) + 20
            };
            (v6::PACKET_TOO_BIG, 0, mtu.to_be_bytes())
        }
        (v4::DEST_UNREACHABLE, v4::CODE_PORT_UNREACHABLE) => {
            (v6::DEST_UNREACHABLE, v6::CODE_PORT_UNREACHABLE, [0; 4])
        }
        (v4::DEST_UNREACHABLE, 9 | 10 | 13 | 15) => {
            (v6::DEST_UNREACHABLE, v6::CODE_ADMIN_PROHIBITED, [0; 4])
        }
        (v4::DEST_UNREACHABLE, 0 | 5 | 8 | 11) => {
            (v6::DEST_UNREACHABLE, v6::CODE_NO_ROUTE, [0; 4])
        }
        (v4::DEST_UNREACHABLE, 1 | 6 | 7 | 12) => {
            (v6::DEST_UNREACHABLE, v6::CODE_ADDR_UNREACHABLE, [0; 4])
        }
        (v4::TIME_EXCEEDED, code @ (0 | 1)) => (v6::TIME_EXCEEDED, code, [0; 4]),
        _ => return Err(PacketDrop::Unsupported),
    };

    let emb_start = msg_start + HEADER_SIZE;
    let (emb_header, emb_payload) = embedded_4to6(pkt, emb_start, state)?;

    let icmp_len = HEADER_SIZE + V6_HEADER_SIZE + (emb_payload.1 - emb_payload.0);
    let mut front = [0u8; HEADER_SIZE + V6_HEADER_SIZE];
    front[0] = new_type;
    front[1] = new_code;
    front[4..8].copy_from_slice(&new_rest);
    front[HEADER_SIZE..].copy_from_slice(&emb_header);

    let pseudo = Ipv6Pseudo {
        src: *src6,
        dst: *dst6,
        length: icmp_len as u32,
        next_header: PROTO_ICMPV6,
    };
    let sum = checksum::checksum6(
        &front,
        Some(&pkt[emb_payload.0..emb_payload.1]),
        Some(&pseudo),
    );
    front[2..4].copy_from_slice(&sum.to_be_bytes());

    let ip = Ipv6Fields {
        traffic_class,
        flow_label: 0,
        payload_length: icmp_len as u16,
        next_header: PROTO_ICMPV6,
        hop_limit,
        src: *src6,
        dst: *dst6,
    }
    .to_bytes();
    out.push(&[&ip, &front], emb_payload.0..emb_payload.1);
    Ok(())
}

/// Translates the packet embedded in an ICMPv4 error in place and returns
/// the fresh IPv6 header plus the byte range of the (possibly truncated)
/// embedded transport payload.
fn embedded_4to6(
    pkt: &mut [u8],
    emb_start: usize,
    state: &mut XlatState,
) -> Result<([u8; V6_HEADER_SIZE], (usize, usize)), PacketDrop> {
    let emb = &pkt[emb_start..];
    let view = Ipv4View::parse(emb).map_err(|_| PacketDrop::Malformed)?;

    // A fragmented embedded packet would need a nested fragment header on
    // the IPv6 side; not worth representing.
    if view.is_fragment() {
        return Err(PacketDrop::Unsupported);
    }

    let proto = view.protocol();
    if protocol::is_protocol_forbidden(proto) {
        return Err(PacketDrop::Unsupported);
    }

    let header_len = view.header_len();
    let total_len = usize::from(view.total_length());
    if total_len < header_len {
        return Err(PacketDrop::Malformed);
    }
    let logical_payload = total_len - header_len;
    let ttl = view.ttl();
    let dscp_ecn = view.dscp_ecn();
    let src4 = view.src_addr();
    let dst4 = view.dst_addr();

    let src6 = state.addr.translate_addr_4to6_icmp_error(&src4)?;
    let dst6 = state.addr.translate_addr_4to6_icmp_error(&dst4)?;

    // Bytes actually present, capped so the error stays within 1280.
    let available = (emb.len() - header_len)
        .min(logical_payload)
        .min(MAX_EMBEDDED_PAYLOAD_V6);
    let complete = available == logical_payload;
    let payload_start = emb_start + header_len;
    let payload_end = payload_start + available;

    let next_header = fixup_embedded_transport_4to6(
        pkt,
        payload_start,
        available,
        proto,
        logical_payload,
        complete,
        &src4,
        &dst4,
        &src6,
        &dst6,
    )?;

    let header = Ipv6Fields {
        traffic_class: if state.cfg.copy_dscp_ecn { dscp_ecn } else { 0 },
        flow_label: 0,
        payload_length: logical_payload as u16,
        next_header,
        hop_limit: ttl,
        src: src6,
        dst: dst6,
    }
    .to_bytes();

    Ok((header, (payload_start, payload_end)))
}

/// Rewrites the embedded transport header for the new address family.
/// Returns the next-header value for the rebuilt embedded IP header.
#[allow(clippy::too_many_arguments)]
fn fixup_embedded_transport_4to6(
    pkt: &mut [u8],
    payload_start: usize,
    available: usize,
    proto: u8,
    logical_payload: usize,
    complete: bool,
    src4: &[u8; 4],
    dst4: &[u8; 4],
    src6: &[u8; 16],
    dst6: &[u8; 16],
) -> Result<u8, PacketDrop> {
    use crate::checksum::Ipv4Pseudo;

    match proto {
        PROTO_ICMP => {
            if available < 2 {
                return Err(PacketDrop::Unsupported);
            }
            // Only echo survives inside an error; an error embedding
            // another error is malformed by definition.
            let new_type = match pkt[payload_start] {
                v4::ECHO_REQUEST => v6::ECHO_REQUEST,
                v4::ECHO_REPLY => v6::ECHO_REPLY,
                _ => return Err(PacketDrop::Unsupported),
            };
            pkt[payload_start] = new_type;
            // A full checksum needs the whole message; a truncated one is
            // left alone, receivers cannot verify it anyway.
            if complete && available >= HEADER_SIZE {
                pkt[payload_start + 2] = 0;
                pkt[payload_start + 3] = 0;
                let pseudo = Ipv6Pseudo {
                    src: *src6,
                    dst: *dst6,
                    length: logical_payload as u32,
                    next_header: PROTO_ICMPV6,
                };
                let sum = checksum::checksum6(
                    &pkt[payload_start..payload_start + available],
                    None,
                    Some(&pseudo),
                );
                pkt[payload_start + 2..payload_start + 4].copy_from_slice(&sum.to_be_bytes());
            }
            Ok(PROTO_ICMPV6)
        }
        PROTO_TCP | PROTO_UDP => {
            let at = payload_start + if proto == PROTO_TCP { 16 } else { 6 };
            if at + 2 <= payload_start + available {
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                if proto != PROTO_UDP || old != 0 {
                    let old_pseudo = Ipv4Pseudo {
                        src: *src4,
                        dst: *dst4,
                        protocol: proto,
                        length: logical_payload as u16,
                    };
                    let new_pseudo = Ipv6Pseudo {
                        src: *src6,
                        dst: *dst6,
                        length: logical_payload as u32,
                        next_header: proto,
                    };
                    let mut new = checksum::recalc_checksum_4to6(old, &old_pseudo, &new_pseudo);
                    if proto == PROTO_UDP {
                        new = checksum::udp_fixup(new);
                    }
                    pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
                }
            }
            Ok(proto)
        }
        other => Ok(other),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn translate_6to4(
    pkt: &mut [u8],
    msg_start: usize,
    state: &mut XlatState,
    ttl: u8,
    dscp_ecn: u8,
    src4: &[u8; 4],
    dst4: &[u8; 4],
    out: &mut OutPackets,
) -> Result<(), PacketDrop> {
    let outer_src6: [u8; 16] = pkt[8..24].try_into().map_err(|_| PacketDrop::Malformed)?;
    let outer_dst6: [u8; 16] = pkt[24..40].try_into().map_err(|_| PacketDrop::Malformed)?;

    let msg = &pkt[msg_start..];
    let view = IcmpView::parse(msg).map_err(|_| PacketDrop::Malformed)?;
    let pseudo = Ipv6Pseudo {
        src: outer_src6,
        dst: outer_dst6,
        length: msg.len() as u32,
        next_header: PROTO_ICMPV6,
    };
    if checksum::checksum6(msg, None, Some(&pseudo)) != 0 {
        return Err(PacketDrop::Malformed);
    }

    let message_type = view.message_type();
    let code = view.code();
    let rest = view.rest_of_header();
    let body_len = msg.len() - HEADER_SIZE;

    if (message_type == v6::ECHO_REQUEST || message_type == v6::ECHO_REPLY) && code == 0 {
        let new_type = if message_type == v6::ECHO_REQUEST {
            v4::ECHO_REQUEST
        } else {
            v4::ECHO_REPLY
        };
        if 20 + HEADER_SIZE + body_len > usize::from(state.cfg.mtu_ipv4) {
            return Err(PacketDrop::Mtu);
        }

        let mut icmp = [0u8; HEADER_SIZE];
        icmp[0] = new_type;
        icmp[4..8].copy_from_slice(&rest);
        let body = &pkt[msg_start + HEADER_SIZE..];
        let sum = checksum::checksum4(&icmp, Some(body), None);
        icmp[2..4].copy_from_slice(&sum.to_be_bytes());

        let ip = Ipv4Fields {
            dscp_ecn,
            total_length: (20 + HEADER_SIZE + body_len) as u16,
            identification: state.next_ipv4_fragment_id(),
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl,
            protocol: PROTO_ICMP,
            src: *src4,
            dst: *dst4,
        }
        .to_bytes();
        out.push(&[&ip, &icmp], msg_start + HEADER_SIZE..pkt.len());
        return Ok(());
    }

    let (new_type, new_code, new_rest) = match (message_type, code) {
        (v6::DEST_UNREACHABLE, v6::CODE_NO_ROUTE | 2) => {
            (v4::DEST_UNREACHABLE, v4::CODE_HOST_UNREACHABLE, [0; 4])
        }
        (v6::DEST_UNREACHABLE, v6::CODE_ADMIN_PROHIBITED) => {
            (v4::DEST_UNREACHABLE, v4::CODE_COMM_PROHIBITED, [0; 4])
        }
        (v6::DEST_UNREACHABLE, v6::CODE_ADDR_UNREACHABLE) => {
            (v4::DEST_UNREACHABLE, v4::CODE_HOST_UNREACHABLE, [0; 4])
        }
        (v6::DEST_UNREACHABLE, v6::CODE_PORT_UNREACHABLE) => {
            (v4::DEST_UNREACHABLE, v4::CODE_PORT_UNREACHABLE, [0; 4])
        }
        (v6::PACKET_TOO_BIG, 0) => {
            // The IPv4 path has 20 fewer header bytes to carry.
            let mtu = u32::from_be_bytes(rest).min(u32::from(u16::MAX) + 20);
            let mtu = (mtu.saturating_sub(20)) as u16;
            let mut new_rest = [0u8; 4];
            new_rest[2..4].copy_from_slice(&mtu.to_be_bytes());
            (v4::DEST_UNREACHABLE, v4::CODE_FRAG_NEEDED, new_rest)
        }
        (v6::TIME_EXCEEDED, code @ (0 | 1)) => (v4::TIME_EXCEEDED, code, [0; 4]),
        _ => return Err(PacketDrop::Unsupported),
    };

    let emb_start = msg_start + HEADER_SIZE;
    let (emb_header, emb_payload) = embedded_6to4(pkt, emb_start, state)?;

    let icmp_len = HEADER_SIZE + 20 + (emb_payload.1 - emb_payload.0);
    if 20 + icmp_len > usize::from(state.cfg.mtu_ipv4) {
        return Err(PacketDrop::Mtu);
    }

    let mut front = [0u8; HEADER_SIZE + 20];
    front[0] = new_type;
    front[1] = new_code;
    front[4..8].copy_from_slice(&new_rest);
    front[HEADER_SIZE..].copy_from_slice(&emb_header);
    let sum = checksum::checksum4(&front, Some(&pkt[emb_payload.0..emb_payload.1]), None);
    front[2..4].copy_from_slice(&sum.to_be_bytes());

    let ip = Ipv4Fields {
        dscp_ecn,
        total_length: (20 + icmp_len) as u16,
        identification: state.next_ipv4_fragment_id(),
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl,
        protocol: PROTO_ICMP,
        src: *src4,
        dst: *dst4,
    }
    .to_bytes();
    out.push(&[&ip, &front], emb_payload.0..emb_payload.1);
    Ok(())
}

fn embedded_6to4(
    pkt: &mut [u8],
    emb_start: usize,
    state: &mut XlatState,
) -> Result<([u8; 20], (usize, usize)), PacketDrop> {
    let emb = &pkt[emb_start..];
    let view = Ipv6View::parse(emb).map_err(|_| PacketDrop::Malformed)?;

    let next = view.next_header();
    if next == PROTO_FRAGMENT {
        return Err(PacketDrop::Unsupported);
    }
    if protocol::is_protocol_forbidden(next) {
        return Err(PacketDrop::Unsupported);
    }

    let logical_payload = usize::from(view.payload_length());
    let hop_limit = view.hop_limit();
    let traffic_class = view.traffic_class();
    let src6 = view.src_addr();
    let dst6 = view.dst_addr();

    let src4 = state.addr.translate_addr_6to4_icmp_error(&src6)?;
    let dst4 = state.addr.translate_addr_6to4_icmp_error(&dst6)?;

    let available = (emb.len() - V6_HEADER_SIZE)
        .min(logical_payload)
        .min(MAX_EMBEDDED_PAYLOAD_V4);
    let complete = available == logical_payload;
    let payload_start = emb_start + V6_HEADER_SIZE;
    let payload_end = payload_start + available;

    let protocol4 = match next {
        PROTO_ICMPV6 => {
            if available < 2 {
                return Err(PacketDrop::Unsupported);
            }
            let new_type = match pkt[payload_start] {
                v6::ECHO_REQUEST => v4::ECHO_REQUEST,
                v6::ECHO_REPLY => v4::ECHO_REPLY,
                _ => return Err(PacketDrop::Unsupported),
            };
            pkt[payload_start] = new_type;
            if complete && available >= HEADER_SIZE {
                pkt[payload_start + 2] = 0;
                pkt[payload_start + 3] = 0;
                let sum =
                    checksum::checksum4(&pkt[payload_start..payload_start + available], None, None);
                pkt[payload_start + 2..payload_start + 4].copy_from_slice(&sum.to_be_bytes());
            }
            PROTO_ICMP
        }
        PROTO_TCP | PROTO_UDP => {
            let at = payload_start + if next == PROTO_TCP { 16 } else { 6 };
            if at + 2 <= payload_end {
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                if next != PROTO_UDP || old != 0 {
                    let old_pseudo = Ipv6Pseudo {
                        src: src6,
                        dst: dst6,
                        length: logical_payload as u32,
                        next_header: next,
                    };
                    let new_pseudo = crate::checksum::Ipv4Pseudo {
                        src: src4,
                        dst: dst4,
                        protocol: next,
                        length: logical_payload as u16,
                    };
                    let mut new = checksum::recalc_checksum_6to4(old, &old_pseudo, &new_pseudo);
                    if next == PROTO_UDP {
                        new = checksum::udp_fixup(new);
                    }
                    pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
                }
            }
            next
        }
        other => other,
    };

    let header = Ipv4Fields {
        dscp_ecn: if state.cfg.copy_dscp_ecn { traffic_class } else { 0 },
        // An embedded payload length near 65535 would overflow the IPv4
        // field once the 20 header bytes are added; pin it at the maximum.
        total_length: (20 + logical_payload).min(usize::from(u16::MAX)) as u16,
        identification: 0,
        dont_fragment: false,
        more_fragments: false,
        fragment_offset: 0,
        ttl: hop_limit,
        protocol: protocol4,
        src: src4,
        dst: dst4,
    }
    .to_bytes();

    Ok((header, (payload_start, payload_end)))
}
