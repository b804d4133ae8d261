//! `heddle` -- CLI binary for the heddle gateway.
//!
//! Provides the following subcommands:
//!
//! - `heddle serve` -- Run the gateway until interrupted.
//! - `heddle token` -- Mint a signed development credential.
//! - `heddle config` -- Inspect resolved configuration.

use clap::{Parser, Subcommand};

mod commands;

/// heddle LLM gateway CLI.
#[derive(Parser)]
#[command(name = "heddle", about = "heddle LLM gateway CLI", version)]
struct Cli {
    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted.
    Serve(commands::serve::ServeArgs),

    /// Mint a signed development credential.
    Token(commands::token::TokenArgs),

    /// Inspect resolved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

/// Subcommands for `heddle config`.
#[derive(Subcommand)]
enum ConfigCmd {
    /// Show the resolved configuration with secrets redacted.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "heddle.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args).await?,
        Commands::Token(args) => commands::token::run(args)?,
        Commands::Config { action } => match action {
            ConfigCmd::Show { config } => commands::config_cmd::show(&config)?,
        },
    }

    Ok(())
}
