//! Admission rate limiting.
//!
//! Two interchangeable algorithms decide admissions over persisted
//! [`QuotaState`](crate::quota::QuotaState): [`SlidingWindow`] counts
//! admissions in the trailing window, [`TokenBucket`] drains and
//! continuously refills a token level. Both are pure functions over
//! (params, prior state, now); the [`QuotaStore`] owns atomicity.
//!
//! [`RateLimiter`] is the piece the pipeline talks to. It resolves the
//! effective limit (credential claim, then model override, then the
//! configured default), picks the counter key for the configured scope,
//! and applies the store-failure policy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use heddle_types::config::{QuotaAlgorithmKind, QuotaConfig, QuotaScope, StoreErrorPolicy};
use heddle_types::{Identity, QuotaKey, RateDecision};
use tracing::{error, warn};

use crate::quota::{QuotaError, QuotaState, QuotaStore};

mod bucket;
mod window;

pub use bucket::TokenBucket;
pub use window::SlidingWindow;

/// Inputs to one admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaParams {
    /// Admissions allowed per window.
    pub limit: u32,

    /// Window length in seconds.
    pub window_secs: u64,
}

/// A rate-limit algorithm: a pure decision over prior counter state.
///
/// `admit` returns the decision together with the state to persist;
/// a deny returns `None` so the store writes nothing. `peek` is the
/// read-only form backing status lookups.
///
/// Implementations treat a prior state of the other algorithm's variant
/// as absent, so switching algorithms in config resets counters instead
/// of misreading them.
pub trait QuotaAlgorithm: Send + Sync {
    fn admit(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> (Option<QuotaState>, RateDecision);

    fn peek(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> RateDecision;
}

/// Admission gate combining limit resolution, counter scope, the
/// configured algorithm, and the store-failure policy.
pub struct RateLimiter {
    store: Arc<dyn QuotaStore>,
    algorithm: Box<dyn QuotaAlgorithm>,
    window_secs: u64,
    scope: QuotaScope,
    default_quota: u32,
    model_overrides: HashMap<String, u32>,
    on_store_error: StoreErrorPolicy,
}

impl RateLimiter {
    /// Wire a limiter from the quota section of the gateway config.
    ///
    /// `default_quota` is the fallback when neither the credential nor a
    /// model override names a limit (`auth.default_quota_per_hour`).
    pub fn new(store: Arc<dyn QuotaStore>, quota: &QuotaConfig, default_quota: u32) -> Self {
        let algorithm: Box<dyn QuotaAlgorithm> = match quota.algorithm {
            QuotaAlgorithmKind::SlidingWindow => Box::new(SlidingWindow),
            QuotaAlgorithmKind::TokenBucket => Box::new(TokenBucket),
        };
        Self {
            store,
            algorithm,
            window_secs: quota.window_secs,
            scope: quota.scope,
            default_quota,
            model_overrides: quota.model_overrides.clone(),
            on_store_error: quota.on_store_error,
        }
    }

    /// Effective quota for one identity+model pair.
    ///
    /// An explicit `rate_limit` claim wins, then a per-model override,
    /// then the configured default.
    pub fn limit_for(&self, identity: &Identity, model: &str) -> u32 {
        identity
            .quota_per_hour
            .or_else(|| self.model_overrides.get(model).copied())
            .unwrap_or(self.default_quota)
    }

    /// The counter series this request charges.
    pub fn quota_key(&self, identity: &Identity, model: &str) -> QuotaKey {
        match self.scope {
            QuotaScope::Subject => QuotaKey::subject(identity.subject.clone()),
            QuotaScope::SubjectModel => {
                QuotaKey::subject_model(identity.subject.clone(), model)
            }
        }
    }

    /// Decide one admission, charging the counter when allowed.
    ///
    /// A store failure resolves per the configured policy: fail-open
    /// admits with a synthesized full-quota decision, fail-closed
    /// surfaces the error.
    pub async fn admit(&self, identity: &Identity, model: &str) -> Result<RateDecision, QuotaError> {
        let key = self.quota_key(identity, model);
        let params = self.params_for(identity, model);
        let now = Utc::now();
        match self
            .store
            .admit(&key, &params, self.algorithm.as_ref(), now)
            .await
        {
            Ok(decision) => Ok(decision),
            Err(err) => self.apply_store_policy(err, &params, now),
        }
    }

    /// Read-only standing for one identity+model pair; never charges.
    pub async fn status(&self, identity: &Identity, model: &str) -> Result<RateDecision, QuotaError> {
        let key = self.quota_key(identity, model);
        let params = self.params_for(identity, model);
        self.store
            .peek(&key, &params, self.algorithm.as_ref(), Utc::now())
            .await
    }

    fn params_for(&self, identity: &Identity, model: &str) -> QuotaParams {
        QuotaParams {
            limit: self.limit_for(identity, model),
            window_secs: self.window_secs,
        }
    }

    fn apply_store_policy(
        &self,
        err: QuotaError,
        params: &QuotaParams,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, QuotaError> {
        match self.on_store_error {
            StoreErrorPolicy::Allow => {
                warn!(error = %err, "quota store unavailable, admitting request unmetered");
                Ok(RateDecision {
                    allowed: true,
                    limit: params.limit,
                    remaining: params.limit,
                    reset_at: now,
                })
            }
            StoreErrorPolicy::Deny => {
                error!(error = %err, "quota store unavailable, rejecting request");
                Err(err)
            }
        }
    }
}
