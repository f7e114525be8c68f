//! Configuration management
//!
//! TOML file in, validated immutable [`RuntimeConfig`] out. The runtime
//! config is created once before any worker starts and shared read-only
//! for the lifetime of the process.

mod print;
mod types;
pub mod validation;

pub use print::print_effective;
pub use types::*;
pub use validation::{resolve, validate, ValidationResult};

use crate::{Error, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let config: Config = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
    Ok(config)
}
