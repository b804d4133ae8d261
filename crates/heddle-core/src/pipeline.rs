//! Request admission and routing pipeline.
//!
//! [`Pipeline::handle`] runs the admission stages in a fixed order:
//! credential validation, the model permission gate, rate limiting,
//! then routing. Each stage is terminal on failure -- later stages do
//! not run, so a rejected credential or a forbidden model never charges
//! quota, and a rate-denied request never reaches an upstream. Quota
//! charged at admission stays charged even when routing later fails.

use std::sync::Arc;

use heddle_types::config::GatewayConfig;
use heddle_types::{ConfigError, ErrorCode, RateDecision, RequestContext, SecretString};
use heddle_upstream::{ChatRequest, ModelRouter, RouteError};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::audit;
use crate::auth::{AuthError, ClaimsValidator};
use crate::envelope::{CompletionOutcome, Envelope, ErrorBody, QuotaSnapshot, QuotaStatus};
use crate::quota::{MemoryQuotaStore, QuotaError};
use crate::ratelimit::RateLimiter;

/// Every way a request can fail, across all pipeline stages.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Denied by the rate limiter; carries the decision so transports
    /// can render limit headers.
    #[error("rate limit exceeded")]
    RateLimited(RateDecision),

    #[error(transparent)]
    QuotaStore(#[from] QuotaError),

    #[error(transparent)]
    Route(#[from] RouteError),

    /// The request itself was unusable (bad body, missing parameter).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// The stable wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(AuthError::MissingCredential) => ErrorCode::AuthMissingCredential,
            Self::Auth(AuthError::MalformedCredential(_)) => ErrorCode::AuthMalformedCredential,
            Self::Auth(AuthError::SignatureInvalid) => ErrorCode::AuthSignatureInvalid,
            Self::Auth(AuthError::Expired) => ErrorCode::AuthExpired,
            Self::Auth(AuthError::NotYetValid) => ErrorCode::AuthNotYetValid,
            Self::RateLimited(_) => ErrorCode::RateLimited,
            Self::QuotaStore(_) => ErrorCode::QuotaStoreUnavailable,
            Self::Route(RouteError::ModelNotPermitted { .. }) => ErrorCode::ModelNotPermitted,
            Self::Route(RouteError::UpstreamRejected { .. }) => ErrorCode::UpstreamRejected,
            Self::Route(RouteError::UpstreamTimeout { .. }) => ErrorCode::UpstreamTimeout,
            Self::Route(RouteError::AllProvidersUnavailable { .. }) => {
                ErrorCode::AllProvidersUnavailable
            }
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    /// The rate decision behind this failure, when one was made.
    pub fn rate_decision(&self) -> Option<&RateDecision> {
        match self {
            Self::RateLimited(decision) => Some(decision),
            _ => None,
        }
    }

    /// Machine-readable specifics for the error envelope.
    pub fn details(&self) -> serde_json::Map<String, serde_json::Value> {
        let value = match self {
            Self::RateLimited(decision) => json!({
                "limit": decision.limit,
                "reset_at": decision.reset_at,
            }),
            Self::Route(RouteError::ModelNotPermitted { model }) => json!({ "model": model }),
            Self::Route(RouteError::UpstreamRejected {
                provider,
                status,
                body,
            }) => json!({
                "provider": provider,
                "status": status,
                "body": body,
            }),
            Self::Route(RouteError::UpstreamTimeout {
                provider,
                timeout_ms,
            }) => json!({
                "provider": provider,
                "timeout_ms": timeout_ms,
            }),
            Self::Route(RouteError::AllProvidersUnavailable { model, attempts }) => json!({
                "model": model,
                "attempts": attempts
                    .iter()
                    .map(|(provider, err)| json!({
                        "provider": provider,
                        "error": err.to_string(),
                    }))
                    .collect::<Vec<_>>(),
            }),
            _ => return serde_json::Map::new(),
        };
        value.as_object().cloned().unwrap_or_default()
    }
}

/// Outcome of one handled request, before any transport mapping.
#[derive(Debug)]
pub struct PipelineResponse {
    /// Correlation id (client-supplied or generated).
    pub request_id: String,

    /// The terminal result of the staged flow.
    pub result: Result<CompletionOutcome, GatewayError>,
}

impl PipelineResponse {
    /// Assemble the wire envelope for this outcome.
    pub fn envelope(&self) -> Envelope {
        match &self.result {
            Ok(outcome) => Envelope::ok(&self.request_id, outcome.clone()),
            Err(err) => Envelope::err(
                &self.request_id,
                ErrorBody {
                    code: err.code(),
                    message: err.to_string(),
                    details: err.details(),
                },
            ),
        }
    }

    /// The wire error code, when the request failed.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.result.as_ref().err().map(GatewayError::code)
    }

    /// The rate decision to render as limit headers, when one exists.
    pub fn rate_decision(&self) -> Option<&RateDecision> {
        self.result.as_ref().err().and_then(GatewayError::rate_decision)
    }
}

/// The staged admission flow, shared by every transport.
pub struct Pipeline {
    validator: ClaimsValidator,
    limiter: RateLimiter,
    router: ModelRouter,
}

impl Pipeline {
    /// Assemble a pipeline from parts.
    pub fn new(validator: ClaimsValidator, limiter: RateLimiter, router: ModelRouter) -> Self {
        Self {
            validator,
            limiter,
            router,
        }
    }

    /// Wire a pipeline from configuration, with an in-process quota store.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let validator = ClaimsValidator::from_config(&config.auth)?;
        let limiter = RateLimiter::new(
            Arc::new(MemoryQuotaStore::new()),
            &config.quota,
            config.auth.default_quota_per_hour,
        );
        let router = ModelRouter::from_config(config);
        Ok(Self::new(validator, limiter, router))
    }

    /// The router backing this pipeline.
    pub fn router(&self) -> &ModelRouter {
        &self.router
    }

    /// Handle one chat completion request end to end.
    ///
    /// `credential` is the bearer value with the HTTP scheme stripped;
    /// `override_key` replaces the routed provider's configured API key
    /// for this call only. A blank or absent `request_id` gets a fresh
    /// UUID.
    pub async fn handle(
        &self,
        credential: Option<&str>,
        request: ChatRequest,
        override_key: Option<SecretString>,
        request_id: Option<String>,
    ) -> PipelineResponse {
        let request_id = request_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut ctx = RequestContext::new(request_id);

        let identity = match self.validator.validate(credential) {
            Ok(identity) => identity,
            Err(err) => {
                audit::auth_failed(&ctx.request_id, &err);
                return PipelineResponse {
                    request_id: ctx.request_id,
                    result: Err(err.into()),
                };
            }
        };

        // The permission gate runs before the rate limiter so a
        // forbidden model never charges quota.
        if let Err(err) = self.router.check_access(&identity, &request.model) {
            audit::access_denied(&ctx.request_id, &identity, &request.model);
            return PipelineResponse {
                request_id: ctx.request_id,
                result: Err(err.into()),
            };
        }

        let decision = match self.limiter.admit(&identity, &request.model).await {
            Ok(decision) if decision.allowed => decision,
            Ok(decision) => {
                audit::rate_limit_exceeded(&ctx.request_id, &identity, &request.model, &decision);
                return PipelineResponse {
                    request_id: ctx.request_id,
                    result: Err(GatewayError::RateLimited(decision)),
                };
            }
            Err(err) => {
                return PipelineResponse {
                    request_id: ctx.request_id,
                    result: Err(err.into()),
                };
            }
        };
        audit::request_admitted(&ctx.request_id, &identity, &request.model, &decision);
        ctx.identity = Some(identity.clone());

        match self
            .router
            .route(&identity, &request, override_key.as_ref())
            .await
        {
            Ok(routed) => {
                ctx.attempts = routed.attempts;
                ctx.chosen_provider = Some(routed.provider.clone());
                audit::request_completed(&ctx, &request.model, "ok");
                let latency_ms = ctx.elapsed_ms();
                PipelineResponse {
                    request_id: ctx.request_id,
                    result: Ok(CompletionOutcome {
                        model: request.model,
                        provider: routed.provider,
                        attempts: routed.attempts,
                        latency_ms,
                        response: routed.response,
                        quota: QuotaSnapshot {
                            limit: decision.limit,
                            remaining: decision.remaining,
                            reset_at: decision.reset_at,
                        },
                    }),
                }
            }
            Err(err) => {
                ctx.attempts = match &err {
                    RouteError::AllProvidersUnavailable { attempts, .. } => attempts.len() as u32,
                    RouteError::UpstreamRejected { .. } | RouteError::UpstreamTimeout { .. } => 1,
                    RouteError::ModelNotPermitted { .. } => 0,
                };
                let err = GatewayError::from(err);
                audit::request_completed(&ctx, &request.model, err.code().as_str());
                PipelineResponse {
                    request_id: ctx.request_id,
                    result: Err(err),
                }
            }
        }
    }

    /// Read-only quota standing for the credential on one model.
    ///
    /// Validates the credential with the same rules as [`handle`] but
    /// never charges quota and never calls an upstream.
    ///
    /// [`handle`]: Pipeline::handle
    pub async fn limits(
        &self,
        credential: Option<&str>,
        model: &str,
    ) -> Result<QuotaStatus, GatewayError> {
        let identity = self.validator.validate(credential)?;
        let decision = self.limiter.status(&identity, model).await?;
        Ok(QuotaStatus {
            limit: decision.limit,
            used: decision.used(),
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use heddle_upstream::UpstreamError;

    use super::*;

    fn decision() -> RateDecision {
        RateDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Utc::now(),
        }
    }

    #[test]
    fn every_failure_maps_to_its_wire_code() {
        let cases: Vec<(GatewayError, ErrorCode)> = vec![
            (
                AuthError::MissingCredential.into(),
                ErrorCode::AuthMissingCredential,
            ),
            (
                AuthError::MalformedCredential("bad".into()).into(),
                ErrorCode::AuthMalformedCredential,
            ),
            (
                AuthError::SignatureInvalid.into(),
                ErrorCode::AuthSignatureInvalid,
            ),
            (AuthError::Expired.into(), ErrorCode::AuthExpired),
            (AuthError::NotYetValid.into(), ErrorCode::AuthNotYetValid),
            (
                GatewayError::RateLimited(decision()),
                ErrorCode::RateLimited,
            ),
            (
                QuotaError::StoreUnavailable("down".into()).into(),
                ErrorCode::QuotaStoreUnavailable,
            ),
            (
                RouteError::ModelNotPermitted {
                    model: "openai/o3".into(),
                }
                .into(),
                ErrorCode::ModelNotPermitted,
            ),
            (
                RouteError::UpstreamRejected {
                    provider: "openai-primary".into(),
                    status: 422,
                    body: "bad request".into(),
                }
                .into(),
                ErrorCode::UpstreamRejected,
            ),
            (
                RouteError::UpstreamTimeout {
                    provider: "openai-primary".into(),
                    timeout_ms: 30_000,
                }
                .into(),
                ErrorCode::UpstreamTimeout,
            ),
            (
                RouteError::AllProvidersUnavailable {
                    model: "openai/gpt-4.1".into(),
                    attempts: vec![],
                }
                .into(),
                ErrorCode::AllProvidersUnavailable,
            ),
            (
                GatewayError::InvalidRequest("missing model".into()),
                ErrorCode::InvalidRequest,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
        }
    }

    #[test]
    fn rate_limited_details_carry_the_reset_instant() {
        let err = GatewayError::RateLimited(decision());
        let details = err.details();
        assert_eq!(details["limit"], 10);
        assert!(details.contains_key("reset_at"));
        assert!(err.rate_decision().is_some());
    }

    #[test]
    fn exhaustion_details_list_each_provider() {
        let err: GatewayError = RouteError::AllProvidersUnavailable {
            model: "openai/gpt-4.1".into(),
            attempts: vec![
                (
                    "openai-primary".into(),
                    UpstreamError::Timeout { timeout_ms: 100 },
                ),
                ("openai-secondary".into(), UpstreamError::CircuitOpen),
            ],
        }
        .into();

        let details = err.details();
        let attempts = details["attempts"].as_array().unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0]["provider"], "openai-primary");
        assert_eq!(attempts[1]["error"], "circuit open");
    }

    #[test]
    fn auth_failures_have_no_details() {
        let err: GatewayError = AuthError::Expired.into();
        assert!(err.details().is_empty());
        assert!(err.rate_decision().is_none());
    }
}
