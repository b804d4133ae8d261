//! HTTP mapping for pipeline failures and server startup errors.

use axum::http::StatusCode;
use heddle_types::{ConfigError, ErrorCode};
use thiserror::Error;

/// Errors that stop the server from starting or keep running.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bind or accept failure on the listen socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The HTTP status each wire error code maps to.
///
/// This table is the whole HTTP-level error contract; the envelope body
/// carries the code itself, so clients never need to parse statuses
/// more finely than this.
pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::AuthMissingCredential
        | ErrorCode::AuthMalformedCredential
        | ErrorCode::AuthSignatureInvalid
        | ErrorCode::AuthExpired
        | ErrorCode::AuthNotYetValid => StatusCode::UNAUTHORIZED,
        ErrorCode::ModelNotPermitted => StatusCode::FORBIDDEN,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::UpstreamRejected => StatusCode::BAD_GATEWAY,
        ErrorCode::QuotaStoreUnavailable | ErrorCode::AllProvidersUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorCode::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::InvalidRequest => StatusCode::BAD_REQUEST,
    }
}
