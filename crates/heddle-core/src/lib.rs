//! Admission pipeline for the heddle gateway.
//!
//! Everything between a raw bearer credential and a routed upstream
//! call lives here: claims validation, quota accounting, rate limiting,
//! the staged admission flow, and the response envelope.
//!
//! # Architecture
//!
//! - [`ClaimsValidator`] verifies credentials and produces an identity
//! - [`RateLimiter`] decides admissions over a [`QuotaStore`], using a
//!   [`SlidingWindow`] or [`TokenBucket`] algorithm
//! - [`Pipeline`] runs the stages in order (validate, permission gate,
//!   rate limit, route) and assembles the [`Envelope`]
//! - [`audit`] emits the structured decision trail under `heddle::audit`
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use heddle_core::Pipeline;
//! use heddle_types::config::GatewayConfig;
//! use heddle_upstream::{ChatMessage, ChatRequest};
//!
//! let config = GatewayConfig::load("heddle.toml")?;
//! let pipeline = Pipeline::from_config(&config)?;
//!
//! let request = ChatRequest::new("openai/gpt-4.1", vec![ChatMessage::user("hi")]);
//! let handled = pipeline.handle(Some(bearer), request, None, None).await;
//! println!("{}", serde_json::to_string(&handled.envelope())?);
//! ```

pub mod audit;
pub mod auth;
pub mod envelope;
pub mod pipeline;
pub mod quota;
pub mod ratelimit;

pub use auth::{AuthError, ClaimsValidator, TokenClaims};
pub use envelope::{
    CompletionOutcome, Envelope, EnvelopeResult, ErrorBody, QuotaSnapshot, QuotaStatus,
};
pub use pipeline::{GatewayError, Pipeline, PipelineResponse};
pub use quota::{MemoryQuotaStore, QuotaError, QuotaState, QuotaStore};
pub use ratelimit::{QuotaAlgorithm, QuotaParams, RateLimiter, SlidingWindow, TokenBucket};
