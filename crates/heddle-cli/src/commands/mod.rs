//! Command implementations for `heddle`.
//!
//! Each subcommand is implemented in its own module:
//!
//! - [`serve`] -- Run the gateway.
//! - [`token`] -- Mint a signed development credential.
//! - [`config_cmd`] -- Inspect resolved configuration.

pub mod config_cmd;
pub mod serve;
pub mod token;

use anyhow::Context;
use heddle_types::config::GatewayConfig;

/// Load and validate the gateway config file.
pub fn load_config(path: &str) -> anyhow::Result<GatewayConfig> {
    GatewayConfig::load(path).with_context(|| format!("failed to load config from {path}"))
}
