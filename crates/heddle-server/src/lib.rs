//! HTTP surface for the heddle gateway.
//!
//! Exposes the admission pipeline from [`heddle_core`] over axum: a
//! chat completion endpoint, a read-only limits endpoint, and a health
//! probe. All admission decisions live in the pipeline; this crate only
//! translates them into statuses, headers, and JSON envelopes.

pub mod api;
pub mod error;

pub use api::{ApiState, build_router, serve};
pub use error::{ServerError, status_for};
