//! OpenAI-compatible provider implementation.
//!
//! [`OpenAiCompatProvider`] talks to any endpoint that accepts the OpenAI
//! chat completion format, which covers every provider the gateway fronts.
//! One instance wraps one [`UpstreamTarget`] from the provider table.

use std::time::Duration;

use async_trait::async_trait;
use heddle_types::SecretString;
use heddle_types::config::UpstreamTarget;
use tracing::{debug, warn};

use crate::error::{Result, UpstreamError};
use crate::provider::Provider;
use crate::types::{ChatRequest, ChatResponse};

/// A provider that uses the OpenAI-compatible chat completion API.
///
/// The per-call deadline, auth header name/scheme, and extra headers all
/// come from the [`UpstreamTarget`]. The API key resolves per call:
/// explicit override > configured `api_key` > `api_key_env` variable.
#[derive(Debug)]
pub struct OpenAiCompatProvider {
    target: UpstreamTarget,
    http: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from its configuration entry.
    pub fn new(target: UpstreamTarget) -> Self {
        Self {
            target,
            http: reqwest::Client::new(),
        }
    }

    /// Returns the provider's configuration entry.
    pub fn target(&self) -> &UpstreamTarget {
        &self.target
    }

    /// Returns the chat completions endpoint URL.
    fn completions_url(&self) -> String {
        let base = self.target.base_url.trim_end_matches('/');
        format!("{base}/chat/completions")
    }

    /// Resolve the API key: explicit override > configured > environment.
    fn resolve_api_key(&self, override_key: Option<&SecretString>) -> Result<SecretString> {
        if let Some(key) = override_key
            && !key.is_empty()
        {
            return Ok(key.clone());
        }
        if !self.target.api_key.is_empty() {
            return Ok(self.target.api_key.clone());
        }
        if let Some(env_name) = &self.target.api_key_env {
            return match std::env::var(env_name) {
                Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
                _ => Err(UpstreamError::NotConfigured(format!(
                    "set {env_name} env var"
                ))),
            };
        }
        Err(UpstreamError::NotConfigured(format!(
            "provider \"{}\" has neither api_key nor api_key_env",
            self.target.id
        )))
    }

    /// The value sent in the configured auth header.
    fn auth_header_value(&self, key: &SecretString) -> String {
        if self.target.auth_scheme.is_empty() {
            key.expose().to_string()
        } else {
            format!("{} {}", self.target.auth_scheme, key.expose())
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.target.id
    }

    async fn complete(
        &self,
        request: &ChatRequest,
        api_key: Option<&SecretString>,
    ) -> Result<ChatResponse> {
        let key = self.resolve_api_key(api_key)?;
        let url = self.completions_url();

        debug!(
            provider = %self.target.id,
            model = %request.model,
            messages = request.messages.len(),
            key = %key.hash_prefix(),
            "sending chat completion request"
        );

        let mut req = self
            .http
            .post(&url)
            .timeout(Duration::from_millis(self.target.timeout_ms))
            .header(self.target.auth_header.as_str(), self.auth_header_value(&key))
            .header("Content-Type", "application/json");

        for (k, v) in &self.target.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req.json(request).send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout {
                    timeout_ms: self.target.timeout_ms,
                }
            } else {
                UpstreamError::Http(e)
            }
        })?;
        let status = response.status();

        if !status.is_success() {
            if status.as_u16() == 429 {
                // Retry-After header first, then body JSON, then default.
                let header_ms = parse_retry_after_header(&response);
                let body = response.text().await.unwrap_or_default();
                let retry_ms = header_ms
                    .or_else(|| parse_retry_after_ms(&body))
                    .unwrap_or(1000);
                warn!(
                    provider = %self.target.id,
                    retry_after_ms = retry_ms,
                    "upstream rate limited"
                );
                return Err(UpstreamError::RateLimited {
                    retry_after_ms: retry_ms,
                });
            }

            let body = response.text().await.unwrap_or_default();

            if status.as_u16() == 401 || status.as_u16() == 403 {
                warn!(provider = %self.target.id, status = status.as_u16(), "upstream auth rejected");
                return Err(UpstreamError::AuthRejected(body));
            }

            if status.is_client_error() {
                return Err(UpstreamError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            return Err(UpstreamError::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("failed to parse response: {e}")))?;

        debug!(
            provider = %self.target.id,
            model = %chat_response.model,
            choices = chat_response.choices.len(),
            "chat completion response received"
        );

        Ok(chat_response)
    }
}

/// Try to extract a retry-after value from the HTTP `Retry-After` or
/// `X-RateLimit-Reset-After` header.
///
/// Only the numeric form (integer or float seconds) is handled; the
/// HTTP-date form is rare for API providers.
fn parse_retry_after_header(response: &reqwest::Response) -> Option<u64> {
    let header_val = response
        .headers()
        .get("retry-after")
        .or_else(|| response.headers().get("x-ratelimit-reset-after"))
        .and_then(|v| v.to_str().ok())?;

    if let Ok(secs) = header_val.parse::<f64>() {
        return Some((secs * 1000.0).max(0.0) as u64);
    }

    None
}

/// Try to extract a retry-after value from a JSON error response body.
fn parse_retry_after_ms(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("retry_after_ms")
        .and_then(|v| v.as_u64())
        .or_else(|| {
            value
                .get("retry_after")
                .and_then(|v| v.as_f64())
                .map(|secs| (secs * 1000.0) as u64)
        })
}
