//! Effective-configuration report
//!
//! Renders the fully resolved configuration, compile-time ceilings
//! included, so a deployment can be diffed against what the translator
//! actually runs with.

use super::types::*;
use std::net::{Ipv4Addr, Ipv6Addr};

fn yes_no(value: bool) -> &'static str {
    if value {
        "<yes>"
    } else {
        "<no>"
    }
}

fn prefix_repr(prefix: &[u8; 12]) -> String {
    let mut octets = [0u8; 16];
    octets[..12].copy_from_slice(prefix);
    format!("{}/96", Ipv6Addr::from(octets))
}

/// Prints the effective configuration to stdout.
pub fn print_effective(config: &RuntimeConfig) {
    println!("Built-in limits:");
    println!("* MAX_TRANSLATOR_THREADS = {}", MAX_TRANSLATOR_THREADS);
    println!("* MAX_EXTERNAL_CACHE_SIZE = {}", MAX_EXTERNAL_CACHE_SIZE);
    println!("* MAX_PACKET_SIZE = {}", MAX_PACKET_SIZE);
    println!("* MTU_IPV4 = {}..={}", MIN_MTU_IPV4, MAX_MTU);
    println!("* MTU_IPV6 = {}..={}", MIN_MTU_IPV6, MAX_MTU);
    println!("* TIMEOUT_MS = {}..={}", MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
    println!();

    println!("Translator:");
    println!("* threads = {}", config.threads);
    println!("* mode = {:?}", config.mode);
    println!(
        "* io = {:?}, multi-queue {}",
        config.io_mode,
        yes_no(config.tun_multi_queue)
    );
    println!();

    println!("Addressing:");
    match config.mode {
        AddressingMode::External => {
            let external = config.external.as_ref().expect("external mode");
            println!("* transport = {:?}", external.transport);
            println!("* timeout = {:?}", external.timeout);
            println!("* cache_size_main = {}", external.cache_size_main);
            println!("* cache_size_icmp_error = {}", external.cache_size_icmp_error);
        }
        mode => {
            println!("* prefix = {}", prefix_repr(&config.prefix));
            if matches!(mode, AddressingMode::Nat64 | AddressingMode::Clat) {
                println!("* translator_ipv4 = {}", Ipv4Addr::from(config.translator_ipv4));
                println!("* translator_ipv6 = {}", Ipv6Addr::from(config.translator_ipv6));
            }
        }
    }
    println!("* allow_private_ipv4 = {}", yes_no(config.allow_private_ipv4));
    println!();

    println!("Packet handling:");
    println!("* mtu_ipv4 = {}", config.mtu_ipv4);
    println!("* mtu_ipv6 = {}", config.mtu_ipv6);
    println!("* ttl_decrement = {}", config.ttl_decrement);
    println!("* copy_dscp_ecn = {}", yes_no(config.copy_dscp_ecn));
    println!("* fragmentation = {:?}", config.fragmentation);
}
