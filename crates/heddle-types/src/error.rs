//! Stable wire error codes and configuration errors.
//!
//! [`ErrorCode`] is the machine-readable code carried in every error
//! envelope. Codes are part of the wire contract: clients key their
//! backoff and retry behavior off them, so variants are append-only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error code for the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No credential was supplied.
    AuthMissingCredential,
    /// The credential was supplied but could not be parsed.
    AuthMalformedCredential,
    /// The credential's signature did not verify.
    AuthSignatureInvalid,
    /// The credential has expired.
    AuthExpired,
    /// The credential is not valid yet.
    AuthNotYetValid,
    /// The identity may not request this model.
    ModelNotPermitted,
    /// The identity's quota is exhausted for this window.
    RateLimited,
    /// The quota store could not be reached (fail-closed policy only).
    QuotaStoreUnavailable,
    /// The upstream provider rejected the request.
    UpstreamRejected,
    /// The upstream provider did not answer within its deadline.
    UpstreamTimeout,
    /// Every provider in the fallback chain failed or was circuit-open.
    AllProvidersUnavailable,
    /// The request itself was malformed (bad body, missing parameter).
    InvalidRequest,
}

impl ErrorCode {
    /// The wire representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthMissingCredential => "AUTH_MISSING_CREDENTIAL",
            Self::AuthMalformedCredential => "AUTH_MALFORMED_CREDENTIAL",
            Self::AuthSignatureInvalid => "AUTH_SIGNATURE_INVALID",
            Self::AuthExpired => "AUTH_EXPIRED",
            Self::AuthNotYetValid => "AUTH_NOT_YET_VALID",
            Self::ModelNotPermitted => "MODEL_NOT_PERMITTED",
            Self::RateLimited => "RATE_LIMITED",
            Self::QuotaStoreUnavailable => "QUOTA_STORE_UNAVAILABLE",
            Self::UpstreamRejected => "UPSTREAM_REJECTED",
            Self::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            Self::AllProvidersUnavailable => "ALL_PROVIDERS_UNAVAILABLE",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while loading or validating gateway configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file is not valid TOML.
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but is semantically invalid.
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"RATE_LIMITED\"");
        let json = serde_json::to_string(&ErrorCode::AuthNotYetValid).unwrap();
        assert_eq!(json, "\"AUTH_NOT_YET_VALID\"");
    }

    #[test]
    fn error_code_as_str_matches_serde() {
        for code in [
            ErrorCode::AuthMissingCredential,
            ErrorCode::AuthMalformedCredential,
            ErrorCode::AuthSignatureInvalid,
            ErrorCode::AuthExpired,
            ErrorCode::AuthNotYetValid,
            ErrorCode::ModelNotPermitted,
            ErrorCode::RateLimited,
            ErrorCode::QuotaStoreUnavailable,
            ErrorCode::UpstreamRejected,
            ErrorCode::UpstreamTimeout,
            ErrorCode::AllProvidersUnavailable,
            ErrorCode::InvalidRequest,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::Invalid("fallback chain names unknown provider \"azure\"".into());
        assert_eq!(
            err.to_string(),
            "invalid config: fallback chain names unknown provider \"azure\""
        );
    }
}
