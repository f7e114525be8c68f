//! xlat64 - Stateless IPv4/IPv6 Translator
//!
//! A stateless NAT64/CLAT/SIIT packet translator in Rust. Packets are
//! rewritten between address families header-by-header; there is no
//! connection tracking and no cross-packet state.

pub mod checksum;
pub mod config;
pub mod error;
pub mod io;
pub mod protocol;
pub mod signal;
pub mod supervisor;
pub mod telemetry;
pub mod xlat;

pub use error::{Error, Result};
