//! End-to-end tests over a live gateway.
//!
//! Each test boots the real axum app on an ephemeral port, with
//! [`wiremock`] servers standing in for the upstream providers, and
//! drives it over HTTP the way a client would. Coverage:
//! - Success envelope, quota snapshot, and correlation id round trip
//! - 429 with Retry-After and X-RateLimit-* headers
//! - 401/403 ordering: auth and permission failures never reach upstream
//! - Circuit opening: the second request skips a failed primary
//! - 502/503 mapping for upstream rejection and chain exhaustion
//! - The limits endpoint, health probe, and caller key override

use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use heddle_core::Pipeline;
use heddle_server::{ApiState, build_router};
use heddle_types::config::GatewayConfig;

const SECRET: &str = "e2e-signing-secret";

/// Boot the gateway on an ephemeral port. Returns its base URL.
async fn spawn_gateway(config_toml: &str) -> String {
    let config = GatewayConfig::from_toml_str(config_toml).expect("config parses");
    let pipeline = Pipeline::from_config(&config).expect("pipeline builds");
    let app = build_router(
        ApiState {
            pipeline: Arc::new(pipeline),
        },
        &config.server.cors_origins,
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("ephemeral port binds");
    let addr = listener.local_addr().expect("addr resolves");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server runs");
    });
    format!("http://{addr}")
}

/// One provider, one routing rule, HS256 auth.
fn single_provider_config(upstream_url: &str, default_quota: u32) -> String {
    format!(
        r#"
        [auth]
        secret = "{SECRET}"
        default_quota_per_hour = {default_quota}

        [[providers]]
        id = "primary"
        base_url = "{upstream_url}"
        api_key = "sk-primary"
        max_retries = 0

        [[routing.rules]]
        prefix = "openai/"
        provider = "primary"
        "#
    )
}

fn mint(claims: &Value) -> String {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("token encodes")
}

fn token_for(models: &[&str]) -> String {
    let now = chrono::Utc::now().timestamp();
    mint(&json!({
        "sub": "svc-search",
        "lob": "search",
        "models": models,
        "iat": now,
        "exp": now + 3600,
    }))
}

fn chat_body(model: &str) -> Value {
    json!({
        "model": model,
        "messages": [{"role": "user", "content": "Hello"}],
    })
}

fn completion_body() -> Value {
    json!({
        "id": "chatcmpl-e2e-001",
        "object": "chat.completion",
        "model": "openai/gpt-4.1",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello back"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 8, "total_tokens": 18}
    })
}

async fn mount_healthy(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn post_chat(base: &str, token: &str, model: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(token)
        .json(&chat_body(model))
        .send()
        .await
        .expect("request sends")
}

async fn get_limits(base: &str, token: &str, model: &str) -> Value {
    let response = reqwest::Client::new()
        .get(format!("{base}/v1/limits?model={model}"))
        .bearer_auth(token)
        .send()
        .await
        .expect("request sends");
    assert_eq!(response.status(), 200);
    response.json().await.expect("limits body parses")
}

// ── Happy path ───────────────────────────────────────────────────────────

#[tokio::test]
async fn completion_round_trips_with_a_quota_snapshot() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-primary"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&upstream)
        .await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));

    let body: Value = response.json().await.unwrap();
    let ok = &body["result"]["ok"];
    assert_eq!(ok["model"], "openai/gpt-4.1");
    assert_eq!(ok["provider"], "primary");
    assert_eq!(ok["attempts"], 1);
    assert_eq!(ok["response"]["id"], "chatcmpl-e2e-001");
    assert_eq!(ok["quota"]["limit"], 5);
    assert_eq!(ok["quota"]["remaining"], 4);
}

#[tokio::test]
async fn client_request_id_round_trips() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 1).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(&token)
        .header("x-request-id", "trace-e2e-42")
        .json(&chat_body("openai/gpt-4.1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "trace-e2e-42"
    );
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request_id"], "trace-e2e-42");
}

#[tokio::test]
async fn caller_key_override_reaches_the_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-caller-supplied"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body()))
        .expect(1)
        .mount(&upstream)
        .await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(&token)
        .header("x-upstream-api-key", "sk-caller-supplied")
        .json(&chat_body("openai/gpt-4.1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

// ── Rate limiting ────────────────────────────────────────────────────────

#[tokio::test]
async fn third_request_over_a_quota_of_two_is_429() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 2).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 2)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    assert_eq!(post_chat(&base, &token, "openai/gpt-4.1").await.status(), 200);
    assert_eq!(post_chat(&base, &token, "openai/gpt-4.1").await.status(), 200);

    let denied = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(denied.status(), 429);

    let headers = denied.headers();
    assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "2");
    assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
    let retry_after: i64 = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after is numeric");
    assert!(retry_after > 0 && retry_after <= 3600);
    let reset: i64 = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("reset is an epoch timestamp");
    assert!(reset > chrono::Utc::now().timestamp());

    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "RATE_LIMITED");
    assert_eq!(body["result"]["err"]["details"]["limit"], 2);
}

#[tokio::test]
async fn limits_reports_consumption_without_charging() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 1).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let fresh = get_limits(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(fresh["limit"], 5);
    assert_eq!(fresh["used"], 0);
    assert_eq!(fresh["remaining"], 5);

    post_chat(&base, &token, "openai/gpt-4.1").await;

    // Two reads in a row: the second proves reading never consumes.
    let after = get_limits(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(after["used"], 1);
    let again = get_limits(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(again["used"], 1);
    assert_eq!(again["remaining"], 4);
}

#[tokio::test]
async fn limits_without_a_model_parameter_is_400() {
    let upstream = MockServer::start().await;
    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = reqwest::Client::new()
        .get(format!("{base}/v1/limits"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "INVALID_REQUEST");
}

// ── Admission ordering ───────────────────────────────────────────────────

#[tokio::test]
async fn forbidden_model_is_403_and_never_reaches_the_upstream() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 0).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = post_chat(&base, &token, "openai/o3").await;
    assert_eq!(response.status(), 403);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "MODEL_NOT_PERMITTED");
    assert_eq!(body["result"]["err"]["details"]["model"], "openai/o3");

    // Rejected before the limiter: the denied model's counter is untouched.
    let standing = get_limits(&base, &token, "openai/o3").await;
    assert_eq!(standing["used"], 0);
}

#[tokio::test]
async fn expired_credential_is_401_with_a_challenge() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 0).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let now = chrono::Utc::now().timestamp();
    let stale = mint(&json!({
        "sub": "svc-search",
        "models": ["openai/gpt-4.1"],
        "iat": now - 7200,
        "exp": now - 3600,
    }));

    let response = post_chat(&base, &stale, "openai/gpt-4.1").await;
    assert_eq!(response.status(), 401);
    assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "AUTH_EXPIRED");
}

#[tokio::test]
async fn missing_credential_is_401() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 0).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .json(&chat_body("openai/gpt-4.1"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "AUTH_MISSING_CREDENTIAL");
}

#[tokio::test]
async fn malformed_json_body_is_a_400_envelope() {
    let upstream = MockServer::start().await;
    mount_healthy(&upstream, 0).await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/chat/completions"))
        .bearer_auth(&token)
        .header("content-type", "application/json")
        .header("x-request-id", "req-e2e-bad")
        .body("{this is not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-e2e-bad");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request_id"], "req-e2e-bad");
    assert_eq!(body["result"]["err"]["code"], "INVALID_REQUEST");
}

// ── Upstream failures ────────────────────────────────────────────────────

#[tokio::test]
async fn open_circuit_skips_the_primary_on_the_next_request() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&primary)
        .await;
    mount_healthy(&backup, 2).await;

    let config = format!(
        r#"
        [auth]
        secret = "{SECRET}"
        default_quota_per_hour = 10

        [circuit]
        failure_threshold = 1
        failure_window_secs = 60
        cooldown_secs = 60
        cooldown_cap_secs = 60

        [[providers]]
        id = "primary"
        base_url = "{}"
        api_key = "sk-primary"
        max_retries = 0
        fallback = ["backup"]

        [[providers]]
        id = "backup"
        base_url = "{}"
        api_key = "sk-backup"
        max_retries = 0

        [[routing.rules]]
        prefix = "openai/"
        provider = "primary"
        "#,
        primary.uri(),
        backup.uri()
    );
    let base = spawn_gateway(&config).await;
    let token = token_for(&["openai/gpt-4.1"]);

    // First request burns an attempt on the primary, opening its circuit.
    let first = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(first.status(), 200);
    let body: Value = first.json().await.unwrap();
    assert_eq!(body["result"]["ok"]["provider"], "backup");
    assert_eq!(body["result"]["ok"]["attempts"], 2);

    // Second request skips the open primary without an HTTP call.
    let second = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(second.status(), 200);
    let body: Value = second.json().await.unwrap();
    assert_eq!(body["result"]["ok"]["provider"], "backup");
    assert_eq!(body["result"]["ok"]["attempts"], 1);
}

#[tokio::test]
async fn upstream_4xx_maps_to_502_upstream_rejected() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(422)
                .set_body_string("{\"error\":{\"message\":\"unknown parameter\"}}"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "UPSTREAM_REJECTED");
    assert_eq!(body["result"]["err"]["details"]["provider"], "primary");
    assert_eq!(body["result"]["err"]["details"]["status"], 422);
}

#[tokio::test]
async fn exhausted_chain_is_503_and_keeps_the_quota_charged() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&upstream)
        .await;

    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;
    let token = token_for(&["openai/gpt-4.1"]);

    let response = post_chat(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["result"]["err"]["code"], "ALL_PROVIDERS_UNAVAILABLE");
    let attempts = body["result"]["err"]["details"]["attempts"]
        .as_array()
        .expect("details list per-provider attempts");
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0]["provider"], "primary");

    // Admission already charged the window; the failed route does not
    // refund it.
    let standing = get_limits(&base, &token, "openai/gpt-4.1").await;
    assert_eq!(standing["used"], 1);
}

// ── Operational endpoints ────────────────────────────────────────────────

#[tokio::test]
async fn health_answers_without_credentials() {
    let upstream = MockServer::start().await;
    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn permissive_cors_answers_cross_origin_probes() {
    let upstream = MockServer::start().await;
    let base = spawn_gateway(&single_provider_config(&upstream.uri(), 5)).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/health"))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
