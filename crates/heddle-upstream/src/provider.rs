//! The [`Provider`] trait for upstream chat completion calls.

use async_trait::async_trait;
use heddle_types::SecretString;

use crate::error::Result;
use crate::types::{ChatRequest, ChatResponse};

/// An upstream endpoint that can execute chat completion requests.
///
/// Implementations own the protocol details for one provider endpoint:
/// authentication, request formatting, response parsing, and the per-call
/// deadline. The main implementation is
/// [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider).
///
/// `api_key` is a per-request credential override. When present it replaces
/// the provider's configured key for that single call; it is never stored
/// and never logged in cleartext.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider id as configured (e.g. "openai-primary").
    fn name(&self) -> &str;

    /// Execute a chat completion request and return the response.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`](crate::error::UpstreamError) when the call
    /// fails; the variant carries the retry/failover classification.
    async fn complete(
        &self,
        request: &ChatRequest,
        api_key: Option<&SecretString>,
    ) -> Result<ChatResponse>;
}
