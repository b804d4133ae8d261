//! Upstream provider layer for heddle.
//!
//! This crate owns everything between the admission pipeline and the
//! provider HTTP APIs: the OpenAI-compatible client, per-provider circuit
//! breakers, and the model router that drives retry and failover.
//!
//! # Architecture
//!
//! - [`Provider`] trait defines the chat completion interface
//! - [`OpenAiCompatProvider`] implements it for any OpenAI-compatible API
//! - [`CircuitRegistry`] tracks one [`CircuitBreaker`] per provider
//! - [`ModelRouter`] resolves model ids to providers by longest prefix and
//!   walks fallback chains with bounded retries
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use heddle_types::config::GatewayConfig;
//! use heddle_upstream::{ChatMessage, ChatRequest, ModelRouter};
//!
//! let config = GatewayConfig::load("heddle.toml")?;
//! let router = ModelRouter::from_config(&config);
//!
//! let request = ChatRequest::new("openai/gpt-4.1", vec![
//!     ChatMessage::user("What is a heddle?"),
//! ]);
//!
//! let routed = router.route(&identity, &request, None).await?;
//! println!("{} answered in {} attempt(s)", routed.provider, routed.attempts);
//! ```

pub mod circuit;
pub mod error;
pub mod openai_compat;
pub mod provider;
pub mod router;
pub mod types;

pub use circuit::{CircuitBreaker, CircuitRegistry, CircuitState};
pub use error::{Result, RouteError, UpstreamError};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::Provider;
pub use router::{ModelRouter, RetryConfig, RoutedResponse};
pub use types::{ChatMessage, ChatRequest, ChatResponse, Choice, Usage};
