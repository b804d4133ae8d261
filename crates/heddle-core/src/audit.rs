//! Audit event stream.
//!
//! Admission decisions and request outcomes are emitted as structured
//! `tracing` events under the `heddle::audit` target, so deployments can
//! split the audit trail from diagnostics with a filter directive such
//! as `heddle::audit=info`. Raw credentials never appear in these
//! events; identities are represented by their subject and line of
//! business only.

use heddle_types::{Identity, RateDecision, RequestContext};

use crate::auth::AuthError;

/// Target every audit event is emitted under.
pub const AUDIT_TARGET: &str = "heddle::audit";

/// A credential failed validation before an identity existed.
pub fn auth_failed(request_id: &str, error: &AuthError) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event = "auth_failed",
        request_id,
        error = %error,
        "credential rejected"
    );
}

/// A verified identity asked for a model outside its grant.
pub fn access_denied(request_id: &str, identity: &Identity, model: &str) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event = "access_denied",
        request_id,
        subject = %identity.subject,
        lob = %identity.line_of_business,
        model,
        "model not permitted"
    );
}

/// The rate limiter denied an admission.
pub fn rate_limit_exceeded(
    request_id: &str,
    identity: &Identity,
    model: &str,
    decision: &RateDecision,
) {
    tracing::warn!(
        target: AUDIT_TARGET,
        event = "rate_limit_exceeded",
        request_id,
        subject = %identity.subject,
        lob = %identity.line_of_business,
        model,
        limit = decision.limit,
        reset_at = %decision.reset_at,
        "quota exhausted"
    );
}

/// A request cleared every admission stage and is being routed.
pub fn request_admitted(
    request_id: &str,
    identity: &Identity,
    model: &str,
    decision: &RateDecision,
) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "request_admitted",
        request_id,
        subject = %identity.subject,
        lob = %identity.line_of_business,
        model,
        remaining = decision.remaining,
        "request admitted"
    );
}

/// Routing finished, successfully or not. `outcome` is "ok" or the
/// wire error code.
pub fn request_completed(ctx: &RequestContext, model: &str, outcome: &str) {
    let (subject, lob) = match &ctx.identity {
        Some(identity) => (identity.subject.as_str(), identity.line_of_business.as_str()),
        None => ("unknown", "unknown"),
    };
    tracing::info!(
        target: AUDIT_TARGET,
        event = "request_completed",
        request_id = %ctx.request_id,
        subject,
        lob,
        model,
        provider = ctx.chosen_provider.as_deref().unwrap_or("none"),
        attempts = ctx.attempts,
        latency_ms = ctx.elapsed_ms(),
        outcome,
        "request completed"
    );
}
