//! Response envelope assembly.
//!
//! Every response the gateway produces, success or failure, is one
//! [`Envelope`]: the correlation id plus exactly one of `ok` or `err`.
//! Error payloads carry a stable [`ErrorCode`] so clients key retry
//! behavior off the code, never the message text.

use chrono::{DateTime, Utc};
use heddle_types::ErrorCode;
use heddle_upstream::ChatResponse;
use serde::{Deserialize, Serialize};

/// Wire envelope for every gateway response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation id (client-supplied or generated).
    pub request_id: String,

    /// The outcome.
    pub result: EnvelopeResult,
}

impl Envelope {
    pub fn ok(request_id: impl Into<String>, outcome: CompletionOutcome) -> Self {
        Self {
            request_id: request_id.into(),
            result: EnvelopeResult::Ok(outcome),
        }
    }

    pub fn err(request_id: impl Into<String>, body: ErrorBody) -> Self {
        Self {
            request_id: request_id.into(),
            result: EnvelopeResult::Err(body),
        }
    }
}

/// Success or error payload; serializes as `{"ok": …}` / `{"err": …}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeResult {
    Ok(CompletionOutcome),
    Err(ErrorBody),
}

/// Payload of a request that made it through the whole pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    /// Model id exactly as the client requested it.
    pub model: String,

    /// Provider that served the request.
    pub provider: String,

    /// Upstream attempts spent, failed ones included.
    pub attempts: u32,

    /// Wall-clock milliseconds spent in the pipeline.
    pub latency_ms: u64,

    /// The upstream response, forwarded unmodified.
    pub response: ChatResponse,

    /// Quota standing after this request was charged.
    pub quota: QuotaSnapshot,
}

/// Rate-limit standing carried in success envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Read-only quota standing, served by the limits endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Error payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: ErrorCode,

    /// Human-readable summary. Not a contract; clients match on `code`.
    pub message: String,

    /// Machine-readable specifics (reset instant, per-provider errors).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "openai/gpt-4.1",
            "choices": [],
        }))
        .unwrap();
        let envelope = Envelope::ok(
            "req-42",
            CompletionOutcome {
                model: "openai/gpt-4.1".into(),
                provider: "openai-primary".into(),
                attempts: 1,
                latency_ms: 240,
                response,
                quota: QuotaSnapshot {
                    limit: 100,
                    remaining: 99,
                    reset_at: Utc::now(),
                },
            },
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["request_id"], "req-42");
        assert_eq!(value["result"]["ok"]["provider"], "openai-primary");
        assert_eq!(value["result"]["ok"]["quota"]["remaining"], 99);
        assert!(value["result"].get("err").is_none());
    }

    #[test]
    fn error_envelope_shape() {
        let envelope = Envelope::err(
            "req-43",
            ErrorBody {
                code: ErrorCode::RateLimited,
                message: "rate limit exceeded".into(),
                details: serde_json::Map::new(),
            },
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["result"]["err"]["code"], "RATE_LIMITED");
        // Empty details are omitted entirely.
        assert!(value["result"]["err"].get("details").is_none());
        assert!(value["result"].get("ok").is_none());
    }

    #[test]
    fn details_serialize_when_present() {
        let mut details = serde_json::Map::new();
        details.insert("model".into(), "openai/o3-preview".into());
        let envelope = Envelope::err(
            "req-44",
            ErrorBody {
                code: ErrorCode::ModelNotPermitted,
                message: "model not permitted".into(),
                details,
            },
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["result"]["err"]["details"]["model"], "openai/o3-preview");
    }
}
