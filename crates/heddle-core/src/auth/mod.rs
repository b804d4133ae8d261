//! Credential validation.
//!
//! Inbound bearer credentials are decoded, signature-checked, and mapped
//! to an [`Identity`](heddle_types::Identity) before any other pipeline
//! stage runs. Raw credentials never leave this module in cleartext.

pub mod claims;

pub use claims::{AuthError, ClaimsValidator, TokenClaims};
