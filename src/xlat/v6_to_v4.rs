//! IPv6 to IPv4 translation pipeline - RFC 7915
//!
//! Accepts a plain IPv6 header optionally followed by one fragment
//! extension header; every other extension header is in the forbidden set
//! and drops the packet. Transport checksums are rewritten in place before
//! the IPv4 header is built.

use super::{icmp, OutPackets, PacketDrop, XlatState};
use crate::checksum::{self, Ipv4Pseudo, Ipv6Pseudo};
use crate::config::FragmentPolicy;
use crate::protocol::ipv4::Ipv4Fields;
use crate::protocol::ipv6::{FragmentView, Ipv6View, FRAGMENT_HEADER_SIZE, HEADER_SIZE};
use crate::protocol::{self, PROTO_FRAGMENT, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP};

/// Below this total IPv6 size the IPv4 result is sent with DF clear, so
/// an on-path IPv4 router may fragment it further; at or above it PMTUD
/// is assumed to be in charge and DF is set.
const DF_THRESHOLD: usize = 1280;

const TCP_CHECKSUM_END: usize = 18;
const UDP_HEADER_SIZE: usize = 8;

pub fn translate(
    pkt: &mut [u8],
    state: &mut XlatState,
    out: &mut OutPackets,
) -> Result<(), PacketDrop> {
    out.clear();

    let view = Ipv6View::parse(pkt).map_err(|_| PacketDrop::Malformed)?;
    if HEADER_SIZE + usize::from(view.payload_length()) != pkt.len() {
        return Err(PacketDrop::Malformed);
    }

    let mut next = view.next_header();
    let hop_limit = view.hop_limit();
    let traffic_class = view.traffic_class();
    let src6 = view.src_addr();
    let dst6 = view.dst_addr();

    let mut transport_start = HEADER_SIZE;
    let mut inbound_fragment = None;
    if next == PROTO_FRAGMENT {
        let fragment = FragmentView::parse(&pkt[HEADER_SIZE..]).map_err(|_| PacketDrop::Malformed)?;
        inbound_fragment = Some((
            fragment.fragment_offset(),
            fragment.more_fragments(),
            fragment.identification(),
        ));
        next = fragment.next_header();
        transport_start = HEADER_SIZE + FRAGMENT_HEADER_SIZE;
    }

    // Catches chained extension headers too: a second fragment header,
    // hop-by-hop, routing and destination options are all forbidden.
    if protocol::is_protocol_forbidden(next) {
        return Err(PacketDrop::ForbiddenProtocol);
    }
    if hop_limit <= state.cfg.ttl_decrement {
        return Err(PacketDrop::TtlExpired);
    }
    let ttl = hop_limit - state.cfg.ttl_decrement;

    let (src4, dst4) = state.addr.translate_6to4(&src6, &dst6)?;
    let dscp_ecn = if state.cfg.copy_dscp_ecn { traffic_class } else { 0 };

    let (fragment_offset, more_fragments, identification) = match inbound_fragment {
        Some((offset, more, id)) => (offset, more, id as u16),
        None => (0, false, state.next_ipv4_fragment_id()),
    };

    if next == PROTO_ICMPV6 {
        if inbound_fragment.is_some() {
            return Err(PacketDrop::Unsupported);
        }
        return icmp::translate_6to4(
            pkt,
            transport_start,
            state,
            ttl,
            dscp_ecn,
            &src4,
            &dst4,
            out,
        );
    }

    let payload_len = pkt.len() - transport_start;
    let old_pseudo = Ipv6Pseudo {
        src: src6,
        dst: dst6,
        length: payload_len as u32,
        next_header: next,
    };
    let new_pseudo = Ipv4Pseudo {
        src: src4,
        dst: dst4,
        protocol: next,
        length: payload_len as u16,
    };

    if fragment_offset == 0 {
        match next {
            PROTO_TCP if payload_len >= TCP_CHECKSUM_END => {
                let at = transport_start + 16;
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                let new = checksum::recalc_checksum_6to4(old, &old_pseudo, &new_pseudo);
                pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
            }
            PROTO_UDP if payload_len >= UDP_HEADER_SIZE => {
                let at = transport_start + 6;
                let old = u16::from_be_bytes([pkt[at], pkt[at + 1]]);
                if old == 0 {
                    // Zero is never valid over IPv6.
                    return Err(PacketDrop::Malformed);
                }
                let new =
                    checksum::udp_fixup(checksum::recalc_checksum_6to4(old, &old_pseudo, &new_pseudo));
                pkt[at..at + 2].copy_from_slice(&new.to_be_bytes());
            }
            // A first fragment cut off before its checksum field cannot be
            // rewritten; forwarding it would carry the IPv6 checksum into
            // the IPv4 packet.
            PROTO_TCP | PROTO_UDP => return Err(PacketDrop::Malformed),
            _ => {}
        }
    }

    let mtu = usize::from(state.cfg.mtu_ipv4);
    let total = Ipv4Fields {
        dscp_ecn,
        total_length: (20 + payload_len) as u16,
        identification,
        dont_fragment: inbound_fragment.is_none() && pkt.len() >= DF_THRESHOLD,
        more_fragments,
        fragment_offset,
        ttl,
        protocol: next,
        src: src4,
        dst: dst4,
    };

    if 20 + payload_len <= mtu {
        out.push(&[&total.to_bytes()], transport_start..pkt.len());
        return Ok(());
    }

    if total.dont_fragment || state.cfg.fragmentation == FragmentPolicy::Drop {
        return Err(PacketDrop::Mtu);
    }

    let chunk = (mtu - 20) & !7;
    let mut done = 0;
    while done < payload_len {
        let this = chunk.min(payload_len - done);
        let last = done + this == payload_len;
        let header = Ipv4Fields {
            total_length: (20 + this) as u16,
            more_fragments: !last || more_fragments,
            fragment_offset: fragment_offset + (done / 8) as u16,
            ..total
        }
        .to_bytes();
        out.push(
            &[&header],
            transport_start + done..transport_start + done + this,
        );
        done += this;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AddressingMode, IoMode, RuntimeConfig};
    use crate::protocol::ipv4::Ipv4View;
    use crate::protocol::ipv6::{fragment_header, Ipv6Fields};
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
        udp[0..2].copy_from_slice(&7000u16.to_be_bytes());
        udp[2..4].copy_from_slice(&5000u16.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        udp[8..].copy_from_slice(payload);
        let pseudo = Ipv6Pseudo {
            src: XLAT6,
            dst: embedded(REMOTE4),
            length: udp_len as u32,
            next_header: PROTO_UDP,
        };
        let sum = checksum::udp_fixup(checksum::checksum6(&udp, None, Some(&pseudo)));
        udp[6..8].copy_from_slice(&sum.to_be_bytes());

        let header = Ipv6Fields {
            traffic_class: 0,
            flow_label: 0x12345,
            payload_length: udp_len as u16,
            next_header: PROTO_UDP,
            hop_limit: 64,
            src: XLAT6,
            dst: embedded(REMOTE4),
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
        let mut pkt = udp_packet(b"hello");

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert_eq!(packets.len(), 1);

        let view = Ipv4View::parse(&packets[0]).unwrap();
        assert!(view.validate_checksum());
        assert_eq!(view.protocol(), PROTO_UDP);
        assert_eq!(view.ttl(), 63);
        assert_eq!(view.src_addr(), XLAT4);
        assert_eq!(view.dst_addr(), REMOTE4);
        assert_eq!(usize::from(view.total_length()), 20 + 8 + 5);
        // Small packet: further IPv4 fragmentation stays possible.
        assert!(!view.dont_fragment());

        let pseudo = Ipv4Pseudo {
            src: view.src_addr(),
            dst: view.dst_addr(),
            protocol: PROTO_UDP,
            length: (8 + 5) as u16,
        };
        assert_eq!(checksum::checksum4(view.payload(), None, Some(&pseudo)), 0);
    }

    #[test]
    fn test_large_packet_sets_df() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(&vec![7u8; 1300]);

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        let view = Ipv4View::parse(&packets[0]).unwrap();
        assert!(view.dont_fragment());
    }

    #[test]
    fn test_hop_limit_expiry_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt[7] = 1;

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::TtlExpired)
        );
    }

    #[test]
    fn test_extension_header_forbidden() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        // Hop-by-hop options right after the fixed header.
        let header = Ipv6Fields {
            traffic_class: 0,
            flow_label: 0,
            payload_length: 8,
            next_header: 0,
            hop_limit: 64,
            src: XLAT6,
            dst: embedded(REMOTE4),
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&[PROTO_UDP, 0, 0, 0, 0, 0, 0, 0]);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::ForbiddenProtocol)
        );
    }

    #[test]
    fn test_udp_zero_checksum_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt[40 + 6] = 0;
        pkt[40 + 7] = 0;

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }

    #[test]
    fn test_inbound_fragment_carries_over() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        let payload = [0xC3_u8; 64];
        let header = Ipv6Fields {
            traffic_class: 0,
            flow_label: 0,
            payload_length: (FRAGMENT_HEADER_SIZE + payload.len()) as u16,
            next_header: PROTO_FRAGMENT,
            hop_limit: 64,
            src: XLAT6,
            dst: embedded(REMOTE4),
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&fragment_header(PROTO_UDP, 42, true, 0x0005_BEEF));
        pkt.extend_from_slice(&payload);

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert_eq!(packets.len(), 1);

        let view = Ipv4View::parse(&packets[0]).unwrap();
        assert_eq!(view.protocol(), PROTO_UDP);
        assert_eq!(view.fragment_offset(), 42);
        assert!(view.more_fragments());
        assert!(!view.dont_fragment());
        // Low 16 bits of the IPv6 identification survive.
        assert_eq!(view.identification(), 0xBEEF);
        assert_eq!(view.payload(), &payload);
    }

    #[test]
    fn test_short_first_fragment_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();

        // First fragment with only 4 bytes of UDP header: the checksum
        // field is missing, so it cannot be rewritten.
        let payload = [0x1Bu8, 0x58, 0x13, 0x88];
        let header = Ipv6Fields {
            traffic_class: 0,
            flow_label: 0,
            payload_length: (FRAGMENT_HEADER_SIZE + payload.len()) as u16,
            next_header: PROTO_FRAGMENT,
            hop_limit: 64,
            src: XLAT6,
            dst: embedded(REMOTE4),
        }
        .to_bytes();
        let mut pkt = header.to_vec();
        pkt.extend_from_slice(&fragment_header(PROTO_UDP, 0, true, 0x0005_BEEF));
        pkt.extend_from_slice(&payload);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }

    #[test]
    fn test_oversize_fragments_to_mtu() {
        let mut cfg = nat64_config();
        cfg.mtu_ipv4 = 576;
        let mut state = state_with(cfg);
        let mut out = OutPackets::new();
        // Below the DF threshold so fragmentation stays allowed.
        let mut pkt = udp_packet(&vec![0x11; 1000]);

        translate(&mut pkt, &mut state, &mut out).unwrap();
        let packets = collect(&out, &pkt);
        assert!(packets.len() >= 2);

        let first = Ipv4View::parse(&packets[0]).unwrap();
        let ident = first.identification();
        let mut reassembled = Vec::new();
        for (i, fragment) in packets.iter().enumerate() {
            assert!(fragment.len() <= 576);
            let view = Ipv4View::parse(fragment).unwrap();
            assert!(view.validate_checksum());
            assert_eq!(view.identification(), ident);
            assert_eq!(usize::from(view.fragment_offset()) * 8, reassembled.len());
            assert_eq!(view.more_fragments(), i + 1 < packets.len());
            reassembled.extend_from_slice(view.payload());
        }
        assert_eq!(reassembled.len(), 8 + 1000);
    }

    #[test]
    fn test_oversize_drop_policy() {
        let mut cfg = nat64_config();
        cfg.mtu_ipv4 = 576;
        cfg.fragmentation = FragmentPolicy::Drop;
        let mut state = state_with(cfg);
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(&vec![0x11; 1000]);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Mtu)
        );
    }

    #[test]
    fn test_length_mismatch_drops() {
        let mut state = state_with(nat64_config());
        let mut out = OutPackets::new();
        let mut pkt = udp_packet(b"x");
        pkt.push(0);

        assert_eq!(
            translate(&mut pkt, &mut state, &mut out),
            Err(PacketDrop::Malformed)
        );
    }
}
