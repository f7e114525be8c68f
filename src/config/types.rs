//! Configuration types

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Hard ceiling on worker threads.
pub const MAX_TRANSLATOR_THREADS: usize = 256;
/// Hard ceiling per address-cache table.
pub const MAX_EXTERNAL_CACHE_SIZE: usize = 16384;
/// Largest packet the translator will read or emit.
pub const MAX_PACKET_SIZE: usize = 65535;

pub const MIN_MTU_IPV4: u16 = 96;
pub const MIN_MTU_IPV6: u16 = 1280;
pub const MAX_MTU: u16 = 65515;

pub const MIN_TIMEOUT_MS: u64 = 10;
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub translator: TranslatorSection,
    #[serde(default)]
    pub io: IoSection,
    pub addressing: AddressingSection,
    #[serde(default)]
    pub packet: PacketSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranslatorSection {
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub mode: AddressingMode,
}

fn default_threads() -> usize {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressingMode {
    Nat64,
    Clat,
    Siit,
    External,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IoSection {
    pub mode: IoMode,
    pub tun_multi_queue: bool,
}

impl Default for IoSection {
    fn default() -> Self {
        Self {
            mode: IoMode::InheritedFds,
            tun_multi_queue: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoMode {
    InheritedFds,
    Tun,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddressingSection {
    /// NAT64 /96 prefix, e.g. "64:ff9b::/96". Required for every mode
    /// except external.
    pub prefix: Option<String>,
    /// Fixed translator-side IPv4 address (nat64/clat).
    pub translator_ipv4: Option<std::net::Ipv4Addr>,
    /// Fixed translator-side IPv6 address (nat64/clat).
    pub translator_ipv6: Option<std::net::Ipv6Addr>,
    #[serde(default)]
    pub allow_private_ipv4: bool,
    pub external: Option<ExternalSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExternalSection {
    pub transport: ExternalTransport,
    pub unix_path: Option<PathBuf>,
    pub tcp_addr: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_cache_main")]
    pub cache_size_main: usize,
    #[serde(default = "default_cache_icmp")]
    pub cache_size_icmp_error: usize,
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_cache_main() -> usize {
    256
}

fn default_cache_icmp() -> usize {
    32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalTransport {
    InheritedFds,
    Unix,
    Tcp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacketSection {
    pub mtu_ipv4: u16,
    pub mtu_ipv6: u16,
    pub ttl_decrement: u8,
    pub copy_dscp_ecn: bool,
    pub fragmentation: FragmentPolicy,
}

impl Default for PacketSection {
    fn default() -> Self {
        Self {
            mtu_ipv4: 1500,
            mtu_ipv6: 1500,
            ttl_decrement: 1,
            copy_dscp_ecn: true,
            fragmentation: FragmentPolicy::Allow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FragmentPolicy {
    /// Oversized fragmentable packets are split to fit the outbound MTU.
    Allow,
    /// Oversized packets are dropped.
    Drop,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// error, warn, info, debug, trace
    pub level: String,
    /// pretty, compact, json
    pub format: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

// ============================================================================
// Resolved runtime configuration (validated, addresses parsed, immutable)
// ============================================================================

/// Validated configuration shared read-only by every worker.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub threads: usize,
    pub mode: AddressingMode,
    pub io_mode: IoMode,
    pub tun_multi_queue: bool,
    /// First 12 bytes of the translation /96 prefix.
    pub prefix: [u8; 12],
    pub translator_ipv4: [u8; 4],
    pub translator_ipv6: [u8; 16],
    pub allow_private_ipv4: bool,
    pub external: Option<ExternalRuntime>,
    pub mtu_ipv4: u16,
    pub mtu_ipv6: u16,
    pub ttl_decrement: u8,
    pub copy_dscp_ecn: bool,
    pub fragmentation: FragmentPolicy,
}

#[derive(Debug, Clone)]
pub struct ExternalRuntime {
    pub transport: ResolverTransportConfig,
    pub timeout: Duration,
    pub cache_size_main: usize,
    pub cache_size_icmp_error: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverTransportConfig {
    /// Descriptor pairs inherited from the parent, one per worker.
    InheritedFds,
    Unix(PathBuf),
    Tcp(SocketAddr),
}
