//! # heddle-types
//!
//! Core type definitions for the heddle LLM gateway.
//!
//! This crate is the foundation of the dependency graph -- all other
//! heddle crates depend on it. It contains:
//!
//! - **[`identity`]** -- [`Identity`], [`QuotaKey`], [`RateDecision`] and
//!   the per-request context
//! - **[`config`]** -- Gateway configuration schema and the TOML loader
//! - **[`secret`]** -- [`SecretString`] and masking helpers
//! - **[`error`]** -- Stable wire error codes and config errors
//!
//! [`Identity`]: identity::Identity
//! [`QuotaKey`]: identity::QuotaKey
//! [`RateDecision`]: identity::RateDecision
//! [`SecretString`]: secret::SecretString

pub mod config;
pub mod error;
pub mod identity;
pub mod secret;

pub use error::{ConfigError, ErrorCode};
pub use identity::{Identity, QuotaKey, RateDecision, RequestContext};
pub use secret::SecretString;
