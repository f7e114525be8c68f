//! Address translation - RFC 6052
//!
//! Maps source/destination pairs between families according to the
//! configured addressing mode. The fixed modes (nat64, clat, siit) are pure
//! prefix arithmetic; external mode asks the resolver process and caches
//! its answers per worker.

use super::cache::AddressCache;
use super::external::{Outcome, ResolverClient};
use super::{AddressRole, PacketDrop};
use crate::config::{AddressingMode, RuntimeConfig};
use crate::protocol;
use tracing::trace;

fn ipv4_screen(allow_private: bool, addr: &[u8; 4]) -> bool {
    if allow_private {
        !protocol::is_ipv4_address_unusable(addr)
    } else {
        !protocol::is_ipv4_address_unusable_or_private(addr)
    }
}

struct ExternalState {
    client: ResolverClient,
    cache_4to6_main: AddressCache<4, 16>,
    cache_6to4_main: AddressCache<16, 4>,
    cache_4to6_icmp_error: AddressCache<4, 16>,
    cache_6to4_icmp_error: AddressCache<16, 4>,
}

pub struct AddressTranslator {
    mode: AddressingMode,
    prefix: [u8; 12],
    translator_ipv4: [u8; 4],
    translator_ipv6: [u8; 16],
    allow_private_ipv4: bool,
    external: Option<ExternalState>,
}

impl AddressTranslator {
    pub fn new(cfg: &RuntimeConfig, client: Option<ResolverClient>) -> Self {
        let external = match (&cfg.external, client) {
            (Some(ext), Some(client)) => Some(ExternalState {
                client,
                cache_4to6_main: AddressCache::new(ext.cache_size_main),
                cache_6to4_main: AddressCache::new(ext.cache_size_main),
                cache_4to6_icmp_error: AddressCache::new(ext.cache_size_icmp_error),
                cache_6to4_icmp_error: AddressCache::new(ext.cache_size_icmp_error),
            }),
            _ => None,
        };

        Self {
            mode: cfg.mode,
            prefix: cfg.prefix,
            translator_ipv4: cfg.translator_ipv4,
            translator_ipv6: cfg.translator_ipv6,
            allow_private_ipv4: cfg.allow_private_ipv4,
            external,
        }
    }

    fn ipv4_usable(&self, addr: &[u8; 4]) -> bool {
        ipv4_screen(self.allow_private_ipv4, addr)
    }

    fn embed(&self, addr: &[u8; 4]) -> [u8; 16] {
        let mut v6 = [0u8; 16];
        v6[..12].copy_from_slice(&self.prefix);
        v6[12..].copy_from_slice(addr);
        v6
    }

    /// Extracts the embedded IPv4 address if `addr` is inside the prefix.
    fn extract(&self, addr: &[u8; 16]) -> Option<[u8; 4]> {
        if addr[..12] != self.prefix {
            return None;
        }
        let mut v4 = [0u8; 4];
        v4.copy_from_slice(&addr[12..]);
        Some(v4)
    }

    /// Translates the (src, dst) pair of a packet arriving from the IPv4
    /// side.
    pub fn translate_4to6(
        &mut self,
        src: &[u8; 4],
        dst: &[u8; 4],
    ) -> std::result::Result<([u8; 16], [u8; 16]), PacketDrop> {
        match self.mode {
            AddressingMode::Nat64 => {
                // Remote host -> embedded; the packet must target the
                // translator's fixed IPv4 address.
                if *dst != self.translator_ipv4 || !self.ipv4_usable(src) {
                    return Err(PacketDrop::Address);
                }
                Ok((self.embed(src), self.translator_ipv6))
            }
            AddressingMode::Clat => {
                // Local host -> fixed; the destination is any usable
                // remote IPv4 address.
                if *src != self.translator_ipv4 || !self.ipv4_usable(dst) {
                    return Err(PacketDrop::Address);
                }
                Ok((self.translator_ipv6, self.embed(dst)))
            }
            AddressingMode::Siit => {
                if !self.ipv4_usable(src) || !self.ipv4_usable(dst) {
                    return Err(PacketDrop::Address);
                }
                Ok((self.embed(src), self.embed(dst)))
            }
            AddressingMode::External => {
                let src6 = self.resolve_4to6(src, AddressRole::Main)?;
                let dst6 = self.resolve_4to6(dst, AddressRole::Main)?;
                Ok((src6, dst6))
            }
        }
    }

    /// Translates the (src, dst) pair of a packet arriving from the IPv6
    /// side.
    pub fn translate_6to4(
        &mut self,
        src: &[u8; 16],
        dst: &[u8; 16],
    ) -> std::result::Result<([u8; 4], [u8; 4]), PacketDrop> {
        match self.mode {
            AddressingMode::Nat64 => {
                if *src != self.translator_ipv6 {
                    return Err(PacketDrop::Address);
                }
                let dst4 = self.extract(dst).ok_or(PacketDrop::Address)?;
                if !self.ipv4_usable(&dst4) {
                    return Err(PacketDrop::Address);
                }
                Ok((self.translator_ipv4, dst4))
            }
            AddressingMode::Clat => {
                let src4 = self.extract(src).ok_or(PacketDrop::Address)?;
                if !self.ipv4_usable(&src4) || *dst != self.translator_ipv6 {
                    return Err(PacketDrop::Address);
                }
                Ok((src4, self.translator_ipv4))
            }
            AddressingMode::Siit => {
                let src4 = self.extract(src).ok_or(PacketDrop::Address)?;
                let dst4 = self.extract(dst).ok_or(PacketDrop::Address)?;
                if !self.ipv4_usable(&src4) || !self.ipv4_usable(&dst4) {
                    return Err(PacketDrop::Address);
                }
                Ok((src4, dst4))
            }
            AddressingMode::External => {
                let src4 = self.resolve_6to4(src, AddressRole::Main)?;
                let dst4 = self.resolve_6to4(dst, AddressRole::Main)?;
                Ok((src4, dst4))
            }
        }
    }

    /// Translates one address of the packet embedded in an ICMP error.
    /// Embedded packets travel in the opposite direction, so the usual
    /// side checks do not apply; only representability matters.
    pub fn translate_addr_4to6_icmp_error(
        &mut self,
        addr: &[u8; 4],
    ) -> std::result::Result<[u8; 16], PacketDrop> {
        match self.mode {
            AddressingMode::External => self.resolve_4to6(addr, AddressRole::IcmpError),
            AddressingMode::Nat64 | AddressingMode::Clat if *addr == self.translator_ipv4 => {
                Ok(self.translator_ipv6)
            }
            _ => {
                if !self.ipv4_usable(addr) {
                    return Err(PacketDrop::Address);
                }
                Ok(self.embed(addr))
            }
        }
    }

    pub fn translate_addr_6to4_icmp_error(
        &mut self,
        addr: &[u8; 16],
    ) -> std::result::Result<[u8; 4], PacketDrop> {
        match self.mode {
            AddressingMode::External => self.resolve_6to4(addr, AddressRole::IcmpError),
            AddressingMode::Nat64 | AddressingMode::Clat if *addr == self.translator_ipv6 => {
                Ok(self.translator_ipv4)
            }
            _ => {
                let v4 = self.extract(addr).ok_or(PacketDrop::Address)?;
                if !self.ipv4_usable(&v4) {
                    return Err(PacketDrop::Address);
                }
                Ok(v4)
            }
        }
    }

    fn resolve_4to6(
        &mut self,
        addr: &[u8; 4],
        role: AddressRole,
    ) -> std::result::Result<[u8; 16], PacketDrop> {
        let state = self.external.as_mut().ok_or(PacketDrop::Address)?;
        let cache = match role {
            AddressRole::Main => &mut state.cache_4to6_main,
            AddressRole::IcmpError => &mut state.cache_4to6_icmp_error,
        };

        if let Some(v6) = cache.lookup(addr) {
            return Ok(v6);
        }

        match state.client.resolve_4(addr, role) {
            Ok(Outcome::MappedV6(v6)) => {
                if protocol::is_ipv6_address_unusable(&v6) {
                    return Err(PacketDrop::Address);
                }
                cache.store(addr, &v6);
                Ok(v6)
            }
            Ok(Outcome::Unmapped) => Err(PacketDrop::Address),
            Ok(Outcome::Interrupted) => Err(PacketDrop::Interrupted),
            Ok(Outcome::MappedV4(_)) => Err(PacketDrop::Resolver),
            Err(err) => {
                trace!(%err, "address resolution failed");
                Err(PacketDrop::Resolver)
            }
        }
    }

    fn resolve_6to4(
        &mut self,
        addr: &[u8; 16],
        role: AddressRole,
    ) -> std::result::Result<[u8; 4], PacketDrop> {
        let allow_private = self.allow_private_ipv4;
        let state = self.external.as_mut().ok_or(PacketDrop::Address)?;
        let cache = match role {
            AddressRole::Main => &mut state.cache_6to4_main,
            AddressRole::IcmpError => &mut state.cache_6to4_icmp_error,
        };

        if let Some(v4) = cache.lookup(addr) {
            return Ok(v4);
        }

        match state.client.resolve_6(addr, role) {
            Ok(Outcome::MappedV4(v4)) => {
                // The resolver's output passes the same screen as any
                // other translated IPv4 address.
                if !ipv4_screen(allow_private, &v4) {
                    return Err(PacketDrop::Address);
                }
                cache.store(addr, &v4);
                Ok(v4)
            }
            Ok(Outcome::Unmapped) => Err(PacketDrop::Address),
            Ok(Outcome::Interrupted) => Err(PacketDrop::Interrupted),
            Ok(Outcome::MappedV6(_)) => Err(PacketDrop::Resolver),
            Err(err) => {
                trace!(%err, "address resolution failed");
                Err(PacketDrop::Resolver)
            }
        }
    }
}
