//! IPv4 to IPv6 translation pipeline - RFC 7915
//!
//! Validates the inbound IPv4 packet, rewrites the transport checksum in
//! place (the pseudo-header swap never rescans the payload), then emits one
//! or more IPv6 packets depending on the outbound MTU.

use super::{icmp, OutPackets, PacketDrop, XlatState};
use crate::checksum::{self, Ipv4Pseudo, Ipv6Pseudo};
use crate::config::FragmentPolicy;
use crate::protocol::ipv4::Ipv4View;
use crate::protocol::ipv6::{self, Ipv6Fields};
use crate::protocol::{self, PROTO_FRAGMENT, PROTO_ICMP, PROTO_TCP, PROTO_UDP};

/// Minimum first-fragment payload that still contains the TCP checksum
/// field (offset 16, two bytes).
const TCP_CHECKSUM_END: usize = 18;
/// UDP header size; also the end of the UDP checksum field.
const UDP_HEADER_SIZE: usize = 8;

pub fn translate(
    pkt: &mut [u8],
    state: &mut XlatState,
    out: &mut OutPackets,
) -> Result<(), PacketDrop> {
    out.clear();

    let view = Ipv4View::parse(pkt).map_err(|_| PacketDrop::Malformed)?;
    if usize::from(view.total_length()) != pkt.len() {
        return Err(PacketDrop::Malformed);
    }
    if !view.validate_checksum() {
        return Err(PacketDrop::Malformed);
    }

    let header_len = view.header_len();
    let proto = view.protocol();
    let ttl = view.ttl();
    let dscp_ecn = view.dscp_ecn();
    let src4 = view.src_addr();
    let dst4 = view.dst_addr();
    let identification = view.identification();
    let dont_fragment = view.dont_fragment();
    let more_fragments = view.more_fragments();
    let fragment_offset = view.fragment_offset();
    let is_fragment = view.is_fragment();

    if protocol::is_protocol_forbidden(proto) {
        return Err(PacketDrop::ForbiddenProtocol);
    }
    if ttl <= state.cfg.ttl_decrement {
        return Err(PacketDrop::TtlExpired);
    }
    let hop_limit = ttl - state.cfg.ttl_decrement;

    let (src6, dst6) = state.addr.translate_4to6(&src4, &dst4)?;
    let traffic_class = if state.cfg.copy_dscp_ecn { dscp_ecn } else { 0 };

    if proto == PROTO_ICMP {
        // The ICMPv6 checksum covers the whole message; a fragment does
        // not carry enough of it to compute one.
        if is_fragment {
            return Err(PacketDrop::Unsupported);
        }
        return icmp::translate_4to6(
            pkt,
            header_len,
            state,
            hop_limit,
            traffic_class,
            &src6,
            &dst6,
            out,
        );
    }

    // Pseudo-header swap, in place in the receive buffer. Both sides use
    // the local payload length; since the length words cancel between the
    // old and new pseudo-header the true datagram length (unknown for
    // fragments) never matters.
    let payload_len = pkt.len() - header_len;
    let old_pseudo = Ipv4Pseudo {
        src: src4,
        dst: dst4,
        protocol: proto,
        length: payload_len as u16,
    };
    let new_pseudo = Ipv6Pseudo {
        src: src6,
        dst: dst6,
        length: payload_len as u32,
        next_header: proto,
    };

    if fragment_offset == 0 {
        match proto {
            PROTO_TCP if payload_len >= TCP_CHECKSUM_END => {
                let at = header_len + 16;
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                let new = checksum::recalc_checksum_4to6(old, &old_pseudo, &new_pseudo);
                pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
            }
            PROTO_UDP if payload_len >= UDP_HEADER_SIZE => {
                let at = header_len + 6;
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                let new = if old == 0 {
                    // Zero means "no checksum" over IPv4, but UDP over
                    // IPv6 makes the checksum mandatory. A full
                    // computation needs the whole datagram.
                    if more_fragments {
                        return Err(PacketDrop::Unsupported);
                    }
                    checksum::udp_fixup(checksum::checksum6(
                        &pkt[header_len..],
                        None,
                        Some(&new_pseudo),
                    ))
                } else {
                    checksum::udp_fixup(checksum::recalc_checksum_4to6(
                        old,
                        &old_pseudo,
                        &new_pseudo,
                    ))
                };
                pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
            }
            // A first fragment cut off before its checksum field cannot be
            // rewritten; forwarding it would carry the IPv4 checksum into
            // the IPv6 packet.
            PROTO_TCP | PROTO_UDP => return Err(PacketDrop::Malformed),
            _ => {}
        }
    }

    emit(
        pkt,
        header_len,
        state,
        &Ipv6Out {
            traffic_class,
            hop_limit,
            src: src6,
            dst: dst6,
            next_header: proto,
            dont_fragment,
            is_fragment,
            fragment_offset,
            more_fragments,
            identification,
        },
        out,
    )
}

struct Ipv6Out {
    traffic_class: u8,
    hop_limit: u8,
    src: [u8; 16],
    dst: [u8; 16],
    next_header: u8,
    dont_fragment: bool,
    is_fragment: bool,
    /// In 8-byte units, taken from the inbound header.
    fragment_offset: u16,
    more_fragments: bool,
    identification: u16,
}

/// Builds the outbound packet(s): plain header when the payload fits,
/// fragment extension header when the input already was a fragment, and a
/// fragment train when the result exceeds the IPv6 MTU.
fn emit(
    pkt: &[u8],
    header_len: usize,
    state: &mut XlatState,
    p: &Ipv6Out,
    out: &mut OutPackets,
) -> Result<(), PacketDrop> {
    let payload_len = pkt.len() - header_len;
    let mtu = usize::from(state.cfg.mtu_ipv6);

    if !p.is_fragment && ipv6::HEADER_SIZE + payload_len <= mtu {
        let header = Ipv6Fields {
            traffic_class: p.traffic_class,
            flow_label: 0,
            payload_length: payload_len as u16,
            next_header: p.next_header,
            hop_limit: p.hop_limit,
            src: p.src,
            dst: p.dst,
        }
        .to_bytes();
        out.push(&[&header], header_len..pkt.len());
        return Ok(());
    }

    if p.is_fragment
        && ipv6::HEADER_SIZE + ipv6::FRAGMENT_HEADER_SIZE + payload_len <= mtu
    {
        let fragment = ipv6::fragment_header(
            p.next_header,
            p.fragment_offset,
            p.more_fragments,
            u32::from(p.identification),
        );
        let header = Ipv6Fields {
            traffic_class: p.traffic_class,
            flow_label: 0,
            payload_length: (ipv6::FRAGMENT_HEADER_SIZE + payload_len) as u16,
            next_header: PROTO_FRAGMENT,
            hop_limit: p.hop_limit,
            src: p.src,
            dst: p.dst,
        }
        .to_bytes();
        out.push(&[&header, &fragment], header_len..pkt.len());
        return Ok(());
    }

    // Too big for the outbound link.
    if p.dont_fragment || state.cfg.fragmentation == FragmentPolicy::Drop {
        return Err(PacketDrop::Mtu);
    }

    let chunk = (mtu - ipv6::HEADER_SIZE - ipv6::FRAGMENT_HEADER_SIZE) & !7;
    let identification = if p.is_fragment {
        u32::from(p.identification)
    } else {
        state.next_ipv6_fragment_id()
    };

    let mut done = 0;
    while done < payload_len {
        let this = chunk.min(payload_len - done);
        let last = done + this == payload_len;
        let fragment = ipv6::fragment_header(
            p.next_header,
            p.fragment_offset + (done / 8) as u16,
            !last || p.more_fragments,
            identification,
        );
        let header = Ipv6Fields {
            traffic_class: p.traffic_class,
            flow_label: 0,
            payload_length: (ipv6::FRAGMENT_HEADER_SIZE + this) as u16,
            next_header: PROTO_FRAGMENT,
            hop_limit: p.hop_limit,
            src: p.src,
            dst: p.dst,
        }
        .to_bytes();
        out.push(
            &[&header, &fragment],
            header_len + done..header_len + done + this,
        );
        done += this;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressingMode, IoMode, RuntimeConfig};
    use crate::protocol::ipv4::Ipv4Fields;
    use crate::protocol::ipv6::{FragmentView, Ipv6View};
    use crate::xlat::addr::AddressTranslator;
    use std::sync::Arc;

    const PREFIX: [u8; 12] = [0x00, 0x64, 0xff, 0x9b, 0, 0, 0, 0, 0, 0, 0, 0];
    const XLAT4: [u8; 4] = [192, 0, 2, 1];
    const XLAT6: [u8; 16] = [
        0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
    ];
    const REMOTE4: [u8; 4] = [198, 51, 100, 7];

    fn nat64_config() -> RuntimeConfig {
        RuntimeConfig {
            threads: 1,
            mode: AddressingMode::Nat64,
            io_mode: IoMode::InheritedFds,
            tun_multi_queue: false,
            prefix: PREFIX,
            translator_ipv4: XLAT4,
            translator_ipv6: XLAT6,
            // Fixtures use documentation-space addresses.
            allow_private_ipv4: true,
            external: None,
            mtu_ipv4: 1500,
            mtu_ipv6: 1500,
            ttl_decrement: 1,
            copy_dscp_ecn: true,
            fragmentation: crate::config::FragmentPolicy::Allow,
        }
    }

    fn state_with(cfg: RuntimeConfig) -> XlatState {
        let cfg = Arc::new(cfg);
        let addr = AddressTranslator::new(&cfg, None);
        XlatState::new(cfg, addr).unwrap()
    }

    fn embedded(v4: [u8; 4]) -> [u8; 16] {
        let mut v6 = [0u8; 16];
        v6[..12].copy_from_slice(&PREFIX);
        v6[12..].copy_from_slice(&v4);
        v6
    }

    fn udp_packet(payload: &[u8]) -> Vec<u8> {
        let udp_len = 8 + payload.len();
        let mut udp = vec![0u8; udp_len];
        udp[0..2].copy_from_slice(&5000u16.to_be_bytes());
        udp[2..4].copy_from_slice(&7000u16.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        udp[8..].copy_from_slice(payload);
        let pseudo = Ipv4Pseudo {
            src: REMOTE4,
            dst: XLAT4,
            protocol: PROTO_UDP,
            length: udp_len as u16,
        };
        let sum = checksum::udp_fixup(checksum::checksum4(&udp, None, Some(&pseudo)));
        udp[6..8].copy_from_slice(&sum.to_be_bytes());

        let header = Ipv4Fields {
            dscp_ecn: 0,
            total_length: (20 + udp_len) as u16,
            identification: 0x4242,
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: PROTO_UDP,
            src: REMOTE4,
            dst: XLAT4,
        }
        .to_bytes();

        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&udp);
        pkt
    }

    fn collect(out: &OutPackets, input: &[u8]) -> Vec<Vec<u8>> {
        out.packets(input)
            .map(|(header, payload)| {
                let mut pkt = header.to_vec();
                pkt.extend_from_slice(payload);
                pkt
            })
            .collect()
    }

    #[test]
    fn test_udp_packet_translates() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"hello world");

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert_eq!(packets.len(), 1);

        let view = Ipv6View::parse(&packets[0]).unwrap();
        assert_eq!(view.next_header(), PROTO_UDP);
        assert_eq!(view.hop_limit(), 63);
        assert_eq!(view.src_addr(), embedded(REMOTE4));
        assert_eq!(view.dst_addr(), XLAT6);
        assert_eq!(usize::from(view.payload_length()), 8 + 11);

        // The rewritten checksum must verify against the IPv6 pseudo-header.
        let pseudo = Ipv6Pseudo {
            src: view.src_addr(),
            dst: view.dst_addr(),
            length: u32::from(view.payload_length()),
            next_header: PROTO_UDP,
        };
        assert_eq!(checksum::checksum6(view.payload(), None, Some(&pseudo)), 0);
    }

    #[test]
    fn test_ttl_expiry_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt[8] = 1; // TTL
        let sum = checksum::ipv4_header_checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::TtlExpired)
        );
    }

    #[test]
    fn test_bad_header_checksum_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt[10] ^= 0xFF;

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }

    #[test]
    fn test_length_mismatch_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt.push(0); // trailing garbage not covered by total_length

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }

    #[test]
    fn test_forbidden_protocol_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt[9] = 2; // IGMP
        let sum = checksum::ipv4_header_checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::ForbiddenProtocol)
        );
    }

    #[test]
    fn test_oversize_fragments_to_mtu() {
        let mut cfg = nat64_config();
        cfg.mtu_ipv6 = 1280;
        let mut state = state_with(cfg);
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(&vec![0xA5; 2000]);

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert!(packets.len() >= 2);

        let mut reassembled = Vec::new();
        let mut last_more = true;
        for (i, fragment) in packets.iter().enumerate() {
            assert!(fragment.len() <= 1280);
            let view = Ipv6View::parse(fragment).unwrap();
            assert_eq!(view.next_header(), PROTO_FRAGMENT);
            let frag = FragmentView::parse(view.payload()).unwrap();
            assert_eq!(frag.next_header(), PROTO_UDP);
            assert_eq!(usize::from(frag.fragment_offset()) * 8, reassembled.len());
            last_more = frag.more_fragments();
            if i + 1 < packets.len() {
                assert!(last_more);
                assert_eq!(frag.payload().len() % 8, 0);
            }
            reassembled.extend_from_slice(frag.payload());
        }
        assert!(!last_more);
        assert_eq!(reassembled.len(), 8 + 2000);
    }

    #[test]
    fn test_oversize_df_drops() {
        let mut cfg = nat64_config();
        cfg.mtu_ipv6 = 1280;
        let mut state = state_with(cfg);
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(&vec![0xA5; 2000]);
        pkt[6] |= 0x40; // DF
        let sum = checksum::ipv4_header_checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&sum.to_be_bytes());

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Mtu)
        );
    }

    #[test]
    fn test_inbound_fragment_gets_fragment_header() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        // Non-first fragment: raw payload bytes, offset 185, MF set.
        let payload = [0x5A_u8; 64];
        let header = Ipv4Fields {
            dscp_ecn: 0,
            total_length: (20 + payload.len()) as u16,
            identification: 0x77AA,
            dont_fragment: false,
            more_fragments: true,
            fragment_offset: 185,
            ttl: 64,
            protocol: PROTO_UDP,
            src: REMOTE4,
            dst: XLAT4,
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&payload);

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert_eq!(packets.len(), 1);

        let view = Ipv6View::parse(&packets[0]).unwrap();
        assert_eq!(view.next_header(), PROTO_FRAGMENT);
        let frag = FragmentView::parse(view.payload()).unwrap();
        assert_eq!(frag.next_header(), PROTO_UDP);
        assert_eq!(frag.fragment_offset(), 185);
        assert!(frag.more_fragments());
        assert_eq!(frag.identification(), 0x77AA);
        assert_eq!(frag.payload(), &payload);
    }

    #[test]
    fn test_short_first_fragment_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        // First fragment with only 4 bytes of UDP header: the checksum
        // field is missing, so it cannot be rewritten.
        let payload = [0x13u8, 0x88, 0x1B, 0x58];
        let header = Ipv4Fields {
            dscp_ecn: 0,
            total_length: (20 + payload.len()) as u16,
            identification: 0x9001,
            dont_fragment: false,
            more_fragments: true,
            fragment_offset: 0,
            ttl: 64,
            protocol: PROTO_UDP,
            src: REMOTE4,
            dst: XLAT4,
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&payload);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }

    #[test]
    fn test_icmp_fragment_unsupported() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        let header = Ipv4Fields {
            dscp_ecn: 0,
            total_length: 28,
            identification: 1,
            dont_fragment: false,
            more_fragments: true,
            fragment_offset: 0,
            ttl: 64,
            protocol: PROTO_ICMP,
            src: REMOTE4,
            dst: XLAT4,
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&[8, 0, 0, 0, 0, 0, 0, 0]);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Unsupported)
        );
    }

    #[test]
    fn test_dscp_ecn_copy_policy() {
        let mut cfg = nat64_config();
        cfg.copy_dscp_ecn = false;
        let mut state = state_with(cfg);
        let mut out = OutPackets::new();

        let mut pkt = udp_packet(b"x");
        pkt[1] = 0xB8;
        let sum = checksum::ipv4_header_checksum(&pkt[..20]);
        pkt[10..12].copy_from_slice(&sum.to_be_bytes());

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        let view = Ipv6View::parse(&packets[0]).unwrap();
        assert_eq!(view.traffic_class(), 0);
    }
}
