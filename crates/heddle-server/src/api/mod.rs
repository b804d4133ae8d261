//! The gateway's axum application.
//!
//! Three routes: the chat completion endpoint, the read-only limits
//! endpoint, and a health probe. Handlers translate pipeline outcomes
//! into statuses and headers; they contain no admission logic of their
//! own.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use heddle_core::Pipeline;
use heddle_types::config::GatewayConfig;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServerError;

/// Shared state accessible by all handlers.
#[derive(Clone)]
pub struct ApiState {
    /// The staged admission flow every request runs through.
    pub pipeline: Arc<Pipeline>,
}

/// Build the gateway router with CORS and request tracing.
pub fn build_router(state: ApiState, cors_origins: &[String]) -> Router {
    let cors = if cors_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .merge(handlers::gateway_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the gateway until the process is stopped.
pub async fn serve(config: GatewayConfig) -> Result<(), ServerError> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let pipeline = Pipeline::from_config(&config)?;
    let app = build_router(
        ApiState {
            pipeline: Arc::new(pipeline),
        },
        &config.server.cors_origins,
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "heddle gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}
