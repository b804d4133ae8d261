//! `heddle token` -- mint a signed development credential.
//!
//! Signs an HS256 credential the configured gateway will accept, for
//! local testing and smoke checks. The signing secret comes from
//! `--secret` or from `auth.secret` in the config file; `iss`/`aud` are
//! filled from the config so the minted credential passes the gateway's
//! issuer and audience checks.
//!
//! # Examples
//!
//! ```text
//! heddle token --sub advisor@wealth.example.com --lob wealth \
//!     --model openai/gpt-4.1 --rate-limit 100
//! heddle token --sub smoke-test --model openai/gpt-4.1 --secret dev-secret
//! ```

use anyhow::Context;
use clap::Args;
use jsonwebtoken::{EncodingKey, Header, encode};

use heddle_core::TokenClaims;
use heddle_types::config::AuthAlgorithm;

use super::load_config;

/// Arguments for the `heddle token` subcommand.
#[derive(Args)]
pub struct TokenArgs {
    /// Caller identifier placed in the `sub` claim.
    #[arg(long)]
    pub sub: String,

    /// Line of business placed in the `lob` claim.
    #[arg(long)]
    pub lob: Option<String>,

    /// Model id the credential may request (repeatable).
    #[arg(long = "model")]
    pub models: Vec<String>,

    /// Permission string granted to the credential (repeatable).
    #[arg(long = "permission")]
    pub permissions: Vec<String>,

    /// Explicit per-window quota claim.
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Credential lifetime in hours.
    #[arg(long, default_value = "24")]
    pub expires_in_hours: i64,

    /// `iss` claim; defaults to `auth.issuer` from the config file.
    #[arg(long)]
    pub issuer: Option<String>,

    /// `aud` claim; defaults to `auth.audience` from the config file.
    #[arg(long)]
    pub audience: Option<String>,

    /// Signing secret; defaults to `auth.secret` from the config file.
    #[arg(long)]
    pub secret: Option<String>,

    /// Config file path.
    #[arg(short, long, default_value = "heddle.toml")]
    pub config: String,
}

/// Run the token command.
pub fn run(args: TokenArgs) -> anyhow::Result<()> {
    let (secret, issuer, audience) = match &args.secret {
        Some(secret) => (secret.clone(), args.issuer.clone(), args.audience.clone()),
        None => {
            let config = load_config(&args.config)?;
            anyhow::ensure!(
                config.auth.algorithm == AuthAlgorithm::Hs256,
                "only HS256 credentials can be minted and the config uses RS256; \
                 pass --secret to sign with an explicit shared key"
            );
            (
                config.auth.secret.expose().to_string(),
                args.issuer.clone().or(config.auth.issuer),
                args.audience.clone().or(config.auth.audience),
            )
        }
    };
    anyhow::ensure!(!secret.is_empty(), "signing secret is empty");

    let claims = build_claims(&args, issuer, audience, chrono::Utc::now().timestamp());
    let token = sign(&claims, &secret)?;

    println!("{token}");
    println!();
    println!("claims:");
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

fn build_claims(
    args: &TokenArgs,
    issuer: Option<String>,
    audience: Option<String>,
    now: i64,
) -> TokenClaims {
    TokenClaims {
        sub: args.sub.clone(),
        lob: args.lob.clone(),
        models: args.models.clone(),
        permissions: args.permissions.clone(),
        rate_limit: args.rate_limit,
        iat: now,
        exp: now + args.expires_in_hours * 3600,
        nbf: None,
        iss: issuer,
        aud: audience,
    }
}

fn sign(claims: &TokenClaims, secret: &str) -> anyhow::Result<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .context("failed to sign credential")
}
