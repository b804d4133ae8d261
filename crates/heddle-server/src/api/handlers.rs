//! HTTP handlers for the gateway endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use heddle_core::envelope::{Envelope, ErrorBody};
use heddle_core::pipeline::GatewayError;
use heddle_types::{RateDecision, SecretString};
use heddle_upstream::ChatRequest;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiState;
use crate::error::status_for;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const UPSTREAM_KEY: HeaderName = HeaderName::from_static("x-upstream-api-key");
const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Build all gateway routes.
pub fn gateway_routes() -> Router<ApiState> {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/limits", get(limits))
        .route("/health", get(health_check))
}

async fn chat_completions(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request_id = header_value(&headers, &REQUEST_ID);

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return error_response(
                request_id.unwrap_or_else(fresh_request_id),
                &GatewayError::InvalidRequest(rejection.body_text()),
            );
        }
    };
    if request.model.trim().is_empty() {
        return error_response(
            request_id.unwrap_or_else(fresh_request_id),
            &GatewayError::InvalidRequest("model must not be empty".into()),
        );
    }

    let credential = bearer(&headers);
    let override_key = header_value(&headers, &UPSTREAM_KEY).map(SecretString::new);

    let handled = state
        .pipeline
        .handle(credential.as_deref(), request, override_key, request_id)
        .await;

    let status = handled
        .error_code()
        .map_or(StatusCode::OK, status_for);
    let decision = handled.rate_decision().cloned();
    respond(status, handled.envelope(), decision.as_ref())
}

#[derive(Debug, Deserialize)]
struct LimitsQuery {
    model: Option<String>,
}

async fn limits(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<LimitsQuery>,
) -> Response {
    let request_id = header_value(&headers, &REQUEST_ID).unwrap_or_else(fresh_request_id);

    let Some(model) = query.model.filter(|model| !model.trim().is_empty()) else {
        return error_response(
            request_id,
            &GatewayError::InvalidRequest("model query parameter is required".into()),
        );
    };

    let credential = bearer(&headers);
    match state.pipeline.limits(credential.as_deref(), &model).await {
        Ok(standing) => {
            let mut response = (StatusCode::OK, Json(standing)).into_response();
            set_request_id(response.headers_mut(), &request_id);
            response
        }
        Err(err) => error_response(request_id, &err),
    }
}

/// Server start time, set once at process start.
static START_TIME: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();

/// Returns basic health status, version, and uptime.
async fn health_check() -> Json<serde_json::Value> {
    let start = START_TIME.get_or_init(std::time::Instant::now);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs(),
    }))
}

// ── Response assembly ────────────────────────────────────────────────────

/// Render an envelope with the response headers the contract promises:
/// the correlation id on every response, a challenge on 401, and limit
/// headers whenever a rate decision was made.
fn respond(status: StatusCode, envelope: Envelope, decision: Option<&RateDecision>) -> Response {
    let request_id = envelope.request_id.clone();
    let mut response = (status, Json(envelope)).into_response();
    let headers = response.headers_mut();

    set_request_id(headers, &request_id);
    if status == StatusCode::UNAUTHORIZED {
        headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    if let Some(decision) = decision {
        headers.insert(
            header::RETRY_AFTER,
            HeaderValue::from(decision.retry_after_secs(Utc::now())),
        );
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
        headers.insert(
            RATELIMIT_RESET,
            HeaderValue::from(decision.reset_at.timestamp()),
        );
    }
    response
}

fn error_response(request_id: String, err: &GatewayError) -> Response {
    let envelope = Envelope::err(
        request_id,
        ErrorBody {
            code: err.code(),
            message: err.to_string(),
            details: err.details(),
        },
    );
    respond(status_for(err.code()), envelope, err.rate_decision())
}

fn fresh_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn set_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID, value);
    }
}

/// Bearer credential from the Authorization header, scheme stripped.
///
/// A value that does not parse as `Bearer <credential>` passes through
/// whole, so validation rejects it as malformed rather than missing.
fn bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    match raw.split_once(' ') {
        Some((scheme, value)) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(value.trim().to_string())
        }
        _ => Some(raw.trim().to_string()),
    }
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
