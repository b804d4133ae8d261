//! Identity and admission types.
//!
//! [`Identity`] is the decoded, verified representation of a caller's
//! credential claims. It is produced once per request by the claims
//! validator and treated as immutable data everywhere downstream.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verified caller identity, decoded from a bearer credential.
///
/// Immutable once decoded; its lifetime is a single request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Stable caller identifier (the `sub` claim).
    pub subject: String,

    /// Line of business the caller belongs to (the `lob` claim).
    pub line_of_business: String,

    /// Model identifiers this caller may request.
    pub allowed_models: HashSet<String>,

    /// Permission strings granted to the caller.
    pub permissions: HashSet<String>,

    /// Explicit per-window quota from the credential's `rate_limit` claim,
    /// always >= 1 when present. `None` defers to per-model overrides and
    /// the configured default at admission time.
    pub quota_per_hour: Option<u32>,

    /// When the credential was issued.
    pub issued_at: DateTime<Utc>,

    /// When the credential expires.
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// Whether the identity may request the given model.
    pub fn may_request(&self, model: &str) -> bool {
        self.allowed_models.contains(model)
    }

    /// Whether the identity holds the given permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Key identifying one rate-limit counter series.
///
/// Composite of the subject and, depending on the configured quota scope,
/// the requested model. Collision-free by construction: the two parts are
/// separate fields, never joined into a delimited string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuotaKey {
    /// Caller identifier.
    pub subject: String,

    /// Model the counter is scoped to, if the scope is per-model.
    pub model: Option<String>,
}

impl QuotaKey {
    /// Counter series covering every model the subject requests.
    pub fn subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            model: None,
        }
    }

    /// Counter series for one subject+model pair.
    pub fn subject_model(subject: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            model: Some(model.into()),
        }
    }
}

impl fmt::Display for QuotaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}/{}", self.subject, model),
            None => write!(f, "{}", self.subject),
        }
    }
}

/// Outcome of one rate-limit check.
///
/// Produced fresh per check and never mutated after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateDecision {
    /// Whether the request was admitted.
    pub allowed: bool,

    /// The quota the decision was made against.
    pub limit: u32,

    /// Units of quota left after this decision.
    pub remaining: u32,

    /// When the counter resets (window expiry / bucket refill).
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Units of quota consumed so far, derived from limit and remaining.
    pub fn used(&self) -> u32 {
        self.limit.saturating_sub(self.remaining)
    }

    /// Whole seconds until the counter resets, clamped at zero.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.reset_at - now).num_seconds().max(0)
    }
}

/// Per-request bookkeeping carried through the pipeline.
///
/// Created when a request enters the pipeline and discarded after the
/// envelope is produced; never persisted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for this request (client-supplied or generated).
    pub request_id: String,

    /// Verified identity, present once the auth stage has passed.
    pub identity: Option<Identity>,

    /// Upstream attempts made so far.
    pub attempts: u32,

    /// Provider that served the request, once routing succeeded.
    pub chosen_provider: Option<String>,

    /// When the pipeline started handling the request.
    pub start_time: DateTime<Utc>,
}

impl RequestContext {
    /// Start a fresh context for the given request id.
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            identity: None,
            attempts: 0,
            chosen_provider: None,
            start_time: Utc::now(),
        }
    }

    /// Milliseconds elapsed since the context was created.
    pub fn elapsed_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }
}
