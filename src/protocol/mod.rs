//! IP header parsing and construction
//!
//! Zero-copy views over packet buffers plus small builders used by the
//! translation pipelines to emit fresh headers. Also home to the address
//! and protocol-number screens every translated packet must pass.

pub mod icmp;
pub mod ipv4;
pub mod ipv6;

/// Upper-layer protocol numbers the translator deals with by name.
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_FRAGMENT: u8 = 44;
pub const PROTO_ICMPV6: u8 = 58;

/// Upper-layer protocols that are never translated. These are either IPv6
/// extension headers with no IPv4 counterpart, protocols whose payload
/// embeds addresses (IGMP, Mobility, HIP, Shim6), or AH, whose integrity
/// check would break under address rewriting.
pub fn is_protocol_forbidden(protocol: u8) -> bool {
    matches!(protocol, 0 | 2 | 43 | 44 | 51 | 60 | 135 | 139 | 140)
}

/// Unusable IPv4 blocks: 0.0.0.0/8, 127.0.0.0/8, 224.0.0.0/4 and the
/// limited broadcast address.
pub fn is_ipv4_address_unusable(addr: &[u8; 4]) -> bool {
    addr[0] == 0
        || addr[0] == 127
        || (addr[0] >= 224 && addr[0] <= 239)
        || *addr == [255, 255, 255, 255]
}

/// Extended screen used when translating private addresses is disallowed:
/// everything from [`is_ipv4_address_unusable`] plus RFC 1918, CGNAT,
/// link-local, documentation and benchmarking space.
pub fn is_ipv4_address_unusable_or_private(addr: &[u8; 4]) -> bool {
    addr[0] == 0 // 0.0.0.0/8
        || addr[0] == 10 // 10.0.0.0/8
        || (addr[0] == 100 && (64..=127).contains(&addr[1])) // 100.64.0.0/10
        || addr[0] == 127 // 127.0.0.0/8
        || (addr[0] == 169 && addr[1] == 254) // 169.254.0.0/16
        || (addr[0] == 172 && (16..=31).contains(&addr[1])) // 172.16.0.0/12
        || (addr[0] == 192 && addr[1] == 0 && addr[2] == 0) // 192.0.0.0/24
        || (addr[0] == 192 && addr[1] == 0 && addr[2] == 2) // 192.0.2.0/24
        || (addr[0] == 192 && addr[1] == 88 && addr[2] == 99) // 192.88.99.0/24
        || (addr[0] == 192 && addr[1] == 168) // 192.168.0.0/16
        || (addr[0] == 198 && (addr[1] == 18 || addr[1] == 19)) // 198.18.0.0/15
        || (addr[0] == 198 && addr[1] == 51 && addr[2] == 100) // 198.51.100.0/24
        || (addr[0] == 203 && addr[1] == 0 && addr[2] == 113) // 203.0.113.0/24
        || addr[0] >= 224 // 224.0.0.0/4 and 240.0.0.0/4
}

/// Unusable IPv6 blocks: ::/128, ::1/128 and ff00::/8.
pub fn is_ipv6_address_unusable(addr: &[u8; 16]) -> bool {
    if addr[0] == 0xFF {
        return true;
    }
    let mut loopback = [0u8; 16];
    loopback[15] = 1;
    *addr == [0u8; 16] || *addr == loopback
}
