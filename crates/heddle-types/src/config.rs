//! Gateway configuration schema and TOML loader.
//!
//! All settings the core consumes are loaded once at process start and
//! treated as read-only afterwards. Every field has a serde default so a
//! minimal config file (or an empty one, for tests) parses cleanly;
//! [`GatewayConfig::validate`] catches semantic mistakes -- unknown
//! fallback references, empty signing secrets -- before the gateway
//! starts serving.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secret::SecretString;

// ── Root config ──────────────────────────────────────────────────────────

/// Root configuration for the heddle gateway.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GatewayConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Credential verification settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate limiting settings.
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Circuit breaker settings, shared by all providers.
    #[serde(default)]
    pub circuit: CircuitConfig,

    /// Upstream provider table.
    #[serde(default)]
    pub providers: Vec<UpstreamTarget>,

    /// Model-to-provider routing rules.
    #[serde(default)]
    pub routing: RoutingConfig,
}

impl GatewayConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate config from a TOML string.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a provider by id.
    pub fn provider(&self, id: &str) -> Option<&UpstreamTarget> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Semantic validation of the parsed config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota.window_secs == 0 {
            return Err(ConfigError::Invalid("quota.window_secs must be >= 1".into()));
        }
        if self.auth.default_quota_per_hour == 0 {
            return Err(ConfigError::Invalid(
                "auth.default_quota_per_hour must be >= 1".into(),
            ));
        }
        if let Some((model, _)) = self.quota.model_overrides.iter().find(|(_, q)| **q == 0) {
            return Err(ConfigError::Invalid(format!(
                "quota.model_overrides[\"{model}\"] must be >= 1"
            )));
        }
        match self.auth.algorithm {
            AuthAlgorithm::Hs256 => {
                if self.auth.secret.is_empty() {
                    return Err(ConfigError::Invalid(
                        "auth.secret is required for HS256".into(),
                    ));
                }
            }
            AuthAlgorithm::Rs256 => {
                if self.auth.public_key_path.is_none() {
                    return Err(ConfigError::Invalid(
                        "auth.public_key_path is required for RS256".into(),
                    ));
                }
            }
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "circuit.failure_threshold must be >= 1".into(),
            ));
        }
        if self.circuit.cooldown_cap_secs < self.circuit.cooldown_secs {
            return Err(ConfigError::Invalid(
                "circuit.cooldown_cap_secs must be >= circuit.cooldown_secs".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.is_empty() {
                return Err(ConfigError::Invalid("provider id must not be empty".into()));
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate provider id \"{}\"",
                    provider.id
                )));
            }
            if provider.base_url.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "provider \"{}\" has an empty base_url",
                    provider.id
                )));
            }
            if provider.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider \"{}\" timeout_ms must be >= 1",
                    provider.id
                )));
            }
        }
        for provider in &self.providers {
            for fallback in &provider.fallback {
                if fallback == &provider.id {
                    return Err(ConfigError::Invalid(format!(
                        "provider \"{}\" lists itself as a fallback",
                        provider.id
                    )));
                }
                if !seen.contains(fallback.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "fallback chain of \"{}\" names unknown provider \"{fallback}\"",
                        provider.id
                    )));
                }
            }
        }
        for rule in &self.routing.rules {
            if rule.prefix.is_empty() {
                return Err(ConfigError::Invalid("routing rule prefix must not be empty".into()));
            }
            if !seen.contains(rule.provider.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "routing rule \"{}\" names unknown provider \"{}\"",
                    rule.prefix, rule.provider
                )));
            }
        }
        if let Some(default) = &self.routing.default_provider
            && !seen.contains(default.as_str())
        {
            return Err(ConfigError::Invalid(format!(
                "routing.default_provider names unknown provider \"{default}\""
            )));
        }
        Ok(())
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty means permissive.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

// ── Auth ─────────────────────────────────────────────────────────────────

/// Signature algorithm for credential verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthAlgorithm {
    /// Shared-secret HMAC.
    #[serde(rename = "HS256")]
    Hs256,
    /// RSA public key (PEM).
    #[serde(rename = "RS256")]
    Rs256,
}

/// Credential verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Signature algorithm.
    #[serde(default = "default_algorithm")]
    pub algorithm: AuthAlgorithm,

    /// Shared secret for HS256.
    #[serde(default)]
    pub secret: SecretString,

    /// Path to a PEM-encoded RSA public key for RS256.
    #[serde(default)]
    pub public_key_path: Option<String>,

    /// Clock-skew leeway in seconds for expiry/issue-time comparisons.
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// Quota applied when a credential carries no rate_limit claim and no
    /// model override matches.
    #[serde(default = "default_quota_per_hour")]
    pub default_quota_per_hour: u32,

    /// Required `iss` claim value, when set.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Required `aud` claim value, when set.
    #[serde(default)]
    pub audience: Option<String>,

    /// Reject credentials whose `iat` lies in the future (beyond leeway).
    #[serde(default)]
    pub reject_future_iat: bool,
}

fn default_algorithm() -> AuthAlgorithm {
    AuthAlgorithm::Hs256
}
fn default_leeway_secs() -> u64 {
    30
}
fn default_quota_per_hour() -> u32 {
    100
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            secret: SecretString::default(),
            public_key_path: None,
            leeway_secs: default_leeway_secs(),
            default_quota_per_hour: default_quota_per_hour(),
            issuer: None,
            audience: None,
            reject_future_iat: false,
        }
    }
}

// ── Quota ────────────────────────────────────────────────────────────────

/// Rate-limit algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaAlgorithmKind {
    /// Count admissions in the trailing window.
    SlidingWindow,
    /// Continuously refilled token bucket.
    TokenBucket,
}

/// Which counter series a request charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaScope {
    /// One counter per subject, shared across models.
    Subject,
    /// One counter per subject+model pair.
    SubjectModel,
}

/// What to do when the quota store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// Fail open: admit the request and log a warning.
    Allow,
    /// Fail closed: reject the request with QUOTA_STORE_UNAVAILABLE.
    Deny,
}

/// Rate limiting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Which algorithm decides admissions.
    #[serde(default = "default_quota_algorithm")]
    pub algorithm: QuotaAlgorithmKind,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Counter scope.
    #[serde(default = "default_scope")]
    pub scope: QuotaScope,

    /// Store-failure policy.
    #[serde(default = "default_store_error_policy")]
    pub on_store_error: StoreErrorPolicy,

    /// Per-model quota overrides, applied when the credential carries no
    /// explicit rate_limit claim.
    #[serde(default)]
    pub model_overrides: HashMap<String, u32>,
}

fn default_quota_algorithm() -> QuotaAlgorithmKind {
    QuotaAlgorithmKind::SlidingWindow
}
fn default_window_secs() -> u64 {
    3600
}
fn default_scope() -> QuotaScope {
    QuotaScope::SubjectModel
}
fn default_store_error_policy() -> StoreErrorPolicy {
    StoreErrorPolicy::Allow
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            algorithm: default_quota_algorithm(),
            window_secs: default_window_secs(),
            scope: default_scope(),
            on_store_error: default_store_error_policy(),
            model_overrides: HashMap::new(),
        }
    }
}

// ── Circuit ──────────────────────────────────────────────────────────────

/// Circuit breaker settings, applied per provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Failures within the window that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Length of the trailing failure window, in seconds.
    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// Base cooldown before an OPEN circuit allows a trial, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Upper bound for the doubling cooldown, in seconds.
    #[serde(default = "default_cooldown_cap_secs")]
    pub cooldown_cap_secs: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_secs() -> u64 {
    60
}
fn default_cooldown_secs() -> u64 {
    30
}
fn default_cooldown_cap_secs() -> u64 {
    300
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            cooldown_cap_secs: default_cooldown_cap_secs(),
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// One upstream provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamTarget {
    /// Unique provider id, referenced by routing rules and fallback chains.
    pub id: String,

    /// Base URL of the OpenAI-compatible API (e.g. "https://api.openai.com/v1").
    pub base_url: String,

    /// API key. Takes precedence over `api_key_env` when non-empty.
    #[serde(default)]
    pub api_key: SecretString,

    /// Environment variable holding the API key (e.g. "OPENAI_API_KEY").
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Header the key is sent in.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,

    /// Scheme prepended to the key ("Bearer"). Empty sends the bare key.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    /// Extra headers sent with every request to this provider.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries against this provider after the first attempt fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Providers tried, in order, after this one is exhausted or open.
    #[serde(default)]
    pub fallback: Vec<String>,
}

fn default_auth_header() -> String {
    "authorization".into()
}
fn default_auth_scheme() -> String {
    "Bearer".into()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    2
}

// ── Routing ──────────────────────────────────────────────────────────────

/// One model-prefix routing rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Model id prefix this rule matches (e.g. "openai/").
    pub prefix: String,

    /// Provider the matched models route to.
    pub provider: String,

    /// Permission the identity must hold to use this route, when set.
    #[serde(default)]
    pub require_permission: Option<String>,
}

/// Model-to-provider routing table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingConfig {
    /// Provider used when no rule matches, when set.
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Prefix rules, matched longest-first.
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}
