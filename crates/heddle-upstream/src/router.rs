//! Model-to-provider routing with retry, failover, and circuit breaking.
//!
//! [`ModelRouter`] owns the provider table, the prefix routing rules, and a
//! [`CircuitRegistry`] with one breaker per provider. A routed call resolves
//! the model to its primary provider, then walks that provider's fallback
//! chain in order: OPEN circuits are skipped without waiting, transient
//! failures are retried against the same provider with capped exponential
//! backoff, and anything a different provider could fix moves the call to
//! the next chain entry.
//!
//! The matched routing prefix is NOT stripped: upstreams receive the model
//! id exactly as the client sent it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use heddle_types::config::{GatewayConfig, RouteRule};
use heddle_types::{Identity, SecretString};
use tracing::{debug, warn};

use crate::circuit::{CircuitBreaker, CircuitRegistry, CircuitState};
use crate::error::{RouteError, UpstreamError};
use crate::openai_compat::OpenAiCompatProvider;
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// Backoff tuning for same-provider retries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on the exponential delay.
    pub max_delay: Duration,
    /// Random 0..jitter_fraction of the capped delay is added.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.25,
        }
    }
}

/// Calculate the delay before retry `attempt` (0-indexed).
///
/// The delay is `min(base_delay * 2^attempt, max_delay)` plus a random
/// jitter of `0..jitter_fraction * delay`.
pub fn compute_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt);
    let base_ms = config.base_delay.as_millis() as u64;
    let capped_ms = base_ms
        .saturating_mul(exp)
        .min(config.max_delay.as_millis() as u64);

    let jitter_max_ms = (capped_ms as f64 * config.jitter_fraction) as u64;
    let jitter_ms = if jitter_max_ms > 0 {
        // Pseudo-random from the clock's nanosecond field; enough to
        // de-synchronize concurrent retries.
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as u64;
        seed % (jitter_max_ms + 1)
    } else {
        0
    };

    Duration::from_millis(capped_ms + jitter_ms)
}

/// A successful routing outcome.
#[derive(Debug)]
pub struct RoutedResponse {
    /// Provider that served the request.
    pub provider: String,
    /// Total upstream attempts made, including failed ones on other
    /// providers in the chain.
    pub attempts: u32,
    /// The upstream's response, forwarded unchanged.
    pub response: ChatResponse,
}

/// One provider's transport plus the routing metadata from its config.
struct ProviderEntry {
    provider: Arc<dyn Provider>,
    max_retries: u32,
    fallback: Vec<String>,
}

/// Routes model ids to providers and drives retry/failover around them.
///
/// Rules are prefix matches sorted longest-first, so `"openai/o1"` beats
/// `"openai/"`. When no rule matches, the configured default provider (if
/// any) takes the request.
pub struct ModelRouter {
    entries: HashMap<String, ProviderEntry>,
    /// Prefix rules, longest prefix first.
    rules: Vec<RouteRule>,
    default_provider: Option<String>,
    retry: RetryConfig,
    circuits: CircuitRegistry,
}

impl ModelRouter {
    /// Build a router over the configured provider table, with an
    /// OpenAI-compatible HTTP transport per provider.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut entries = HashMap::new();
        for target in &config.providers {
            debug!(
                provider = %target.id,
                base_url = %target.base_url,
                api_key = %target.api_key.masked(),
                timeout_ms = target.timeout_ms,
                "provider configured"
            );
            entries.insert(
                target.id.clone(),
                ProviderEntry {
                    provider: Arc::new(OpenAiCompatProvider::new(target.clone()))
                        as Arc<dyn Provider>,
                    max_retries: target.max_retries,
                    fallback: target.fallback.clone(),
                },
            );
        }

        let mut rules = config.routing.rules.clone();
        // Longest prefix first for greedy matching.
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            entries,
            rules,
            default_provider: config.routing.default_provider.clone(),
            retry: RetryConfig::default(),
            circuits: CircuitRegistry::new(config.circuit.clone()),
        }
    }

    /// Replace the transport for one provider id, keeping its configured
    /// retries and fallback chain. Ids absent from the config are added
    /// with no retries and no fallbacks.
    pub fn with_provider(mut self, id: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        let id = id.into();
        match self.entries.get_mut(&id) {
            Some(entry) => entry.provider = provider,
            None => {
                self.entries.insert(
                    id,
                    ProviderEntry {
                        provider,
                        max_retries: 0,
                        fallback: Vec::new(),
                    },
                );
            }
        }
        self
    }

    /// Override the retry backoff tuning.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Configured provider ids, sorted.
    pub fn providers(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// The per-provider circuit breakers, for status output.
    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    /// The provider id `model` resolves to, before any health checks.
    pub fn resolve(&self, model: &str) -> Option<&str> {
        self.matching_rule(model)
            .map(|rule| rule.provider.as_str())
            .or(self.default_provider.as_deref())
    }

    fn matching_rule(&self, model: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .find(|rule| model.starts_with(rule.prefix.as_str()))
    }

    /// Whether `identity` may call `model` at all: the model must be in the
    /// identity's allowed set, and the matching routing rule's permission
    /// (if any) must be held.
    ///
    /// The admission pipeline runs this before charging any quota;
    /// [`route`](Self::route) re-checks it on entry.
    pub fn check_access(&self, identity: &Identity, model: &str) -> Result<(), RouteError> {
        if !identity.may_request(model) {
            return Err(RouteError::ModelNotPermitted {
                model: model.to_string(),
            });
        }
        if let Some(rule) = self.matching_rule(model)
            && let Some(permission) = &rule.require_permission
            && !identity.has_permission(permission)
        {
            return Err(RouteError::ModelNotPermitted {
                model: model.to_string(),
            });
        }
        Ok(())
    }

    /// Candidate providers for `model`: the resolved primary followed by
    /// its fallback chain, deduplicated, order preserved.
    fn candidates(&self, model: &str) -> Vec<String> {
        let Some(primary) = self.resolve(model) else {
            return Vec::new();
        };
        let mut chain = vec![primary.to_string()];
        if let Some(entry) = self.entries.get(primary) {
            for fallback in &entry.fallback {
                if !chain.contains(fallback) {
                    chain.push(fallback.clone());
                }
            }
        }
        chain
    }

    /// Route one request to a healthy provider.
    ///
    /// `override_key`, when present, replaces the configured upstream
    /// credential for this call only.
    ///
    /// # Errors
    ///
    /// - [`RouteError::ModelNotPermitted`] when the identity may not call
    ///   the model.
    /// - [`RouteError::UpstreamRejected`] when an upstream rejected the
    ///   request itself (non-429 4xx); no failover, another provider cannot
    ///   fix a malformed request.
    /// - [`RouteError::UpstreamTimeout`] when every recorded failure was a
    ///   timeout.
    /// - [`RouteError::AllProvidersUnavailable`] when the chain is
    ///   exhausted (or empty), carrying the last error per provider.
    pub async fn route(
        &self,
        identity: &Identity,
        request: &ChatRequest,
        override_key: Option<&SecretString>,
    ) -> Result<RoutedResponse, RouteError> {
        self.check_access(identity, &request.model)?;

        let candidates = self.candidates(&request.model);
        if candidates.is_empty() {
            warn!(model = %request.model, "no provider configured for model");
        }

        let mut failures: Vec<(String, UpstreamError)> = Vec::new();
        let mut attempts: u32 = 0;

        for id in &candidates {
            let Some(entry) = self.entries.get(id) else {
                warn!(provider = %id, "fallback chain names unknown provider");
                continue;
            };
            let breaker = self.circuits.breaker(id);
            if !breaker.try_acquire() {
                debug!(provider = %id, "circuit open, skipping provider");
                failures.push((id.clone(), UpstreamError::CircuitOpen));
                continue;
            }

            match self
                .call_with_retries(id, entry, &breaker, request, override_key, &mut attempts)
                .await
            {
                Ok(response) => {
                    return Ok(RoutedResponse {
                        provider: id.clone(),
                        attempts,
                        response,
                    });
                }
                Err(UpstreamError::Rejected { status, body }) => {
                    return Err(RouteError::UpstreamRejected {
                        provider: id.clone(),
                        status,
                        body,
                    });
                }
                Err(err) => {
                    warn!(
                        provider = %id,
                        error = %err,
                        "provider exhausted, trying next in fallback chain"
                    );
                    failures.push((id.clone(), err));
                }
            }
        }

        if !failures.is_empty()
            && failures
                .iter()
                .all(|(_, err)| matches!(err, UpstreamError::Timeout { .. }))
            && let Some((provider, UpstreamError::Timeout { timeout_ms })) = failures.last()
        {
            return Err(RouteError::UpstreamTimeout {
                provider: provider.clone(),
                timeout_ms: *timeout_ms,
            });
        }

        Err(RouteError::AllProvidersUnavailable {
            model: request.model.clone(),
            attempts: failures,
        })
    }

    /// Call one provider up to `1 + max_retries` times.
    ///
    /// The caller has already acquired the breaker, so if the circuit is
    /// HALF_OPEN this call is the trial. A failure that opens (or re-opens)
    /// the circuit stops further retries against this provider.
    async fn call_with_retries(
        &self,
        id: &str,
        entry: &ProviderEntry,
        breaker: &CircuitBreaker,
        request: &ChatRequest,
        override_key: Option<&SecretString>,
        attempts: &mut u32,
    ) -> Result<ChatResponse, UpstreamError> {
        let mut last_err = None;

        for attempt in 0..=entry.max_retries {
            *attempts += 1;
            match entry.provider.complete(request, override_key).await {
                Ok(response) => {
                    breaker.record_success();
                    if attempt > 0 {
                        debug!(provider = %id, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) => {
                    // Timeouts, transport errors, 5xx and 429 count against
                    // the circuit; any other outcome proves the provider
                    // answered.
                    if err.is_circuit_failure() {
                        breaker.record_failure();
                    } else {
                        breaker.record_success();
                    }

                    if !err.is_retryable()
                        || attempt == entry.max_retries
                        || breaker.state() != CircuitState::Closed
                    {
                        return Err(err);
                    }

                    // Rate-limited upstreams suggest a wait; honor it as a
                    // floor under the computed backoff.
                    let delay = match err.suggested_delay_ms() {
                        Some(ms) => compute_delay(&self.retry, attempt)
                            .max(Duration::from_millis(ms)),
                        None => compute_delay(&self.retry, attempt),
                    };
                    warn!(
                        provider = %id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient upstream error"
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(err);
                }
            }
        }

        // Not reachable: the final iteration always returns. Handle it
        // defensively anyway.
        Err(last_err.unwrap_or(UpstreamError::CircuitOpen))
    }
}

impl std::fmt::Debug for ModelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRouter")
            .field("providers", &self.providers())
            .field("rules", &self.rules.len())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}
