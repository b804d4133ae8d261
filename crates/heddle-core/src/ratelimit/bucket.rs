//! Token-bucket admission.

use chrono::{DateTime, Duration, Utc};
use heddle_types::RateDecision;

use crate::quota::QuotaState;

use super::{QuotaAlgorithm, QuotaParams};

/// Continuously refilled token bucket.
///
/// Capacity is the quota and the refill rate is `limit / window`, so a
/// full window of inactivity restores the full quota. One admission
/// costs one token. Cheaper to store than the window (one level, one
/// instant) and tolerant of short bursts after idle periods.
pub struct TokenBucket;

impl TokenBucket {
    /// Token level after refilling `prior` up to `now`, capped at capacity.
    fn level(params: &QuotaParams, prior: Option<&QuotaState>, now: DateTime<Utc>) -> f64 {
        let capacity = params.limit as f64;
        match prior {
            Some(QuotaState::Bucket { tokens, updated_at }) => {
                let elapsed_ms = (now - *updated_at).num_milliseconds().max(0) as f64;
                let refilled = elapsed_ms * params.limit as f64 / window_ms(params);
                (tokens + refilled).min(capacity)
            }
            // Absent, or left behind by the sliding window.
            _ => capacity,
        }
    }

    /// The instant at which `missing` more tokens will have accrued.
    fn accrual_instant(missing: f64, params: &QuotaParams, now: DateTime<Utc>) -> DateTime<Utc> {
        let ms = (missing * window_ms(params) / params.limit as f64).ceil() as i64;
        now + Duration::milliseconds(ms.max(0))
    }
}

fn window_ms(params: &QuotaParams) -> f64 {
    params.window_secs as f64 * 1000.0
}

impl QuotaAlgorithm for TokenBucket {
    fn admit(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> (Option<QuotaState>, RateDecision) {
        let capacity = params.limit as f64;
        let tokens = Self::level(params, prior, now);

        if tokens < 1.0 {
            return (
                None,
                RateDecision {
                    allowed: false,
                    limit: params.limit,
                    remaining: 0,
                    // When the next whole token has accrued.
                    reset_at: Self::accrual_instant(1.0 - tokens, params, now),
                },
            );
        }

        let tokens = tokens - 1.0;
        let decision = RateDecision {
            allowed: true,
            limit: params.limit,
            remaining: tokens.floor() as u32,
            // When the bucket is full again.
            reset_at: Self::accrual_instant(capacity - tokens, params, now),
        };
        (
            Some(QuotaState::Bucket {
                tokens,
                updated_at: now,
            }),
            decision,
        )
    }

    fn peek(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let capacity = params.limit as f64;
        let tokens = Self::level(params, prior, now);
        let allowed = tokens >= 1.0;
        let missing = if allowed { capacity - tokens } else { 1.0 - tokens };
        RateDecision {
            allowed,
            limit: params.limit,
            remaining: tokens.floor() as u32,
            reset_at: Self::accrual_instant(missing, params, now),
        }
    }
}
