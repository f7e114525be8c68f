//! Configuration validation and resolution

use super::types::*;
use crate::{Error, Result};
use std::net::Ipv6Addr;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

/// Parses a `"addr/96"` translation prefix into its fixed 12 bytes.
pub fn parse_prefix(text: &str) -> std::result::Result<[u8; 12], String> {
    let (addr_text, len_text) = text
        .split_once('/')
        .ok_or_else(|| format!("'{}' is missing a prefix length", text))?;

    let addr: Ipv6Addr = addr_text
        .parse()
        .map_err(|_| format!("'{}' is not an IPv6 address", addr_text))?;
    if len_text.trim() != "96" {
        return Err(format!("prefix length must be 96, got '{}'", len_text));
    }

    let octets = addr.octets();
    if octets[12..] != [0, 0, 0, 0] {
        return Err(format!("'{}' has non-zero bits below /96", addr_text));
    }

    Ok(octets[..12].try_into().unwrap())
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_translator(config, &mut result);
    validate_addressing(config, &mut result);
    validate_packet(config, &mut result);

    result
}

fn validate_translator(config: &Config, result: &mut ValidationResult) {
    let threads = config.translator.threads;
    if threads < 1 || threads > MAX_TRANSLATOR_THREADS {
        result.error(format!(
            "translator.threads must be 1..={}, got {}",
            MAX_TRANSLATOR_THREADS, threads
        ));
    }

    if config.io.tun_multi_queue && config.io.mode != IoMode::Tun {
        result.warn("io.tun_multi_queue has no effect outside tun mode".to_string());
    }
}

fn validate_addressing(config: &Config, result: &mut ValidationResult) {
    let addressing = &config.addressing;
    let mode = config.translator.mode;

    if mode == AddressingMode::External {
        if addressing.prefix.is_some() {
            result.warn("addressing.prefix is ignored in external mode".to_string());
        }
        match &addressing.external {
            None => result.error("external mode requires an [addressing.external] section"),
            Some(external) => validate_external(external, result),
        }
        return;
    }

    match &addressing.prefix {
        None => result.error(format!("addressing.prefix is required in {:?} mode", mode)),
        Some(prefix) => {
            if let Err(msg) = parse_prefix(prefix) {
                result.error(format!("addressing.prefix: {}", msg));
            }
        }
    }

    let needs_translator_pair = matches!(mode, AddressingMode::Nat64 | AddressingMode::Clat);
    if needs_translator_pair {
        if addressing.translator_ipv4.is_none() {
            result.error(format!("addressing.translator_ipv4 is required in {:?} mode", mode));
        }
        if addressing.translator_ipv6.is_none() {
            result.error(format!("addressing.translator_ipv6 is required in {:?} mode", mode));
        }
    } else if addressing.translator_ipv4.is_some() || addressing.translator_ipv6.is_some() {
        result.warn("translator addresses are ignored in siit mode".to_string());
    }

    if addressing.external.is_some() {
        result.warn(format!(
            "[addressing.external] is ignored in {:?} mode",
            mode
        ));
    }
}

fn validate_external(external: &ExternalSection, result: &mut ValidationResult) {
    match external.transport {
        ExternalTransport::Unix => {
            if external.unix_path.is_none() {
                result.error("addressing.external.unix_path is required for the unix transport");
            }
        }
        ExternalTransport::Tcp => match &external.tcp_addr {
            None => result.error("addressing.external.tcp_addr is required for the tcp transport"),
            Some(addr) => {
                if addr.parse::<std::net::SocketAddr>().is_err() {
                    result.error(format!(
                        "addressing.external.tcp_addr: '{}' is not a socket address",
                        addr
                    ));
                }
            }
        },
        ExternalTransport::InheritedFds => {}
    }

    if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&external.timeout_ms) {
        result.error(format!(
            "addressing.external.timeout_ms must be {}..={}, got {}",
            MIN_TIMEOUT_MS, MAX_TIMEOUT_MS, external.timeout_ms
        ));
    }

    for (name, size) in [
        ("cache_size_main", external.cache_size_main),
        ("cache_size_icmp_error", external.cache_size_icmp_error),
    ] {
        if size > MAX_EXTERNAL_CACHE_SIZE {
            result.error(format!(
                "addressing.external.{} must be at most {}, got {}",
                name, MAX_EXTERNAL_CACHE_SIZE, size
            ));
        }
        if size == 0 {
            result.warn(format!(
                "addressing.external.{} is 0; that table is disabled and every lookup will miss",
                name
            ));
        }
    }
}

fn validate_packet(config: &Config, result: &mut ValidationResult) {
    let packet = &config.packet;

    if !(MIN_MTU_IPV4..=MAX_MTU).contains(&packet.mtu_ipv4) {
        result.error(format!(
            "packet.mtu_ipv4 must be {}..={}, got {}",
            MIN_MTU_IPV4, MAX_MTU, packet.mtu_ipv4
        ));
    }
    if !(MIN_MTU_IPV6..=MAX_MTU).contains(&packet.mtu_ipv6) {
        result.error(format!(
            "packet.mtu_ipv6 must be {}..={}, got {}",
            MIN_MTU_IPV6, MAX_MTU, packet.mtu_ipv6
        ));
    }
}

/// Resolves a raw config into the immutable [`RuntimeConfig`] workers share.
/// Fails with the accumulated validation errors.
pub fn resolve(config: &Config) -> Result<RuntimeConfig> {
    let validation = validate(config);
    if validation.has_errors() {
        return Err(Error::Config(validation.errors.join("; ")));
    }

    let addressing = &config.addressing;
    let mode = config.translator.mode;

    let prefix = match (&addressing.prefix, mode) {
        (_, AddressingMode::External) => [0u8; 12],
        (Some(prefix), _) => parse_prefix(prefix).map_err(Error::Config)?,
        (None, _) => unreachable!("validated above"),
    };

    let external = if mode == AddressingMode::External {
        let section = addressing.external.as_ref().expect("validated above");
        let transport = match section.transport {
            ExternalTransport::InheritedFds => ResolverTransportConfig::InheritedFds,
            ExternalTransport::Unix => ResolverTransportConfig::Unix(
                section.unix_path.clone().expect("validated above"),
            ),
            ExternalTransport::Tcp => ResolverTransportConfig::Tcp(
                section
                    .tcp_addr
                    .as_ref()
                    .expect("validated above")
                    .parse()
                    .expect("validated above"),
            ),
        };
        Some(ExternalRuntime {
            transport,
            timeout: Duration::from_millis(section.timeout_ms),
            cache_size_main: section.cache_size_main,
            cache_size_icmp_error: section.cache_size_icmp_error,
        })
    } else {
        None
    };

    Ok(RuntimeConfig {
        threads: config.translator.threads,
        mode,
        io_mode: config.io.mode,
        tun_multi_queue: config.io.tun_multi_queue,
        prefix,
        translator_ipv4: addressing.translator_ipv4.map(|a| a.octets()).unwrap_or([0; 4]),
        translator_ipv6: addressing.translator_ipv6.map(|a| a.octets()).unwrap_or([0; 16]),
        allow_private_ipv4: addressing.allow_private_ipv4,
        external,
        mtu_ipv4: config.packet.mtu_ipv4,
        mtu_ipv6: config.packet.mtu_ipv6,
        ttl_decrement: config.packet.ttl_decrement,
        copy_dscp_ecn: config.packet.copy_dscp_ecn,
        fragmentation: config.packet.fragmentation,
    })
}
