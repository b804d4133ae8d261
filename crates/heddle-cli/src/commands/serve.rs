//! `heddle serve` -- run the gateway.
//!
//! Loads the config file, builds the admission pipeline, and serves the
//! HTTP surface until the process is stopped.
//!
//! # Example
//!
//! ```text
//! heddle serve
//! heddle serve --config /etc/heddle/heddle.toml
//! ```

use clap::Args;
use tracing::info;

use super::load_config;

/// Arguments for the `heddle serve` subcommand.
#[derive(Args)]
pub struct ServeArgs {
    /// Config file path.
    #[arg(short, long, default_value = "heddle.toml")]
    pub config: String,
}

/// Run the serve command.
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    info!(
        config = %args.config,
        providers = config.providers.len(),
        rules = config.routing.rules.len(),
        "starting heddle gateway"
    );
    heddle_server::serve(config).await?;
    Ok(())
}
