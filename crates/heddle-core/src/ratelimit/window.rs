//! Sliding-window admission counting.

use chrono::{DateTime, Duration, Utc};
use heddle_types::RateDecision;

use crate::quota::QuotaState;

use super::{QuotaAlgorithm, QuotaParams};

/// Counts admissions in the trailing window ending at `now`.
///
/// State is the list of admission instants still inside the window,
/// oldest first. An instant stays countable while `now < instant + W`,
/// so `reset_at = oldest + W` is exactly when the next slot frees.
/// Smooth and exact, at the cost of one stored instant per admission.
pub struct SlidingWindow;

impl SlidingWindow {
    fn window(params: &QuotaParams) -> Duration {
        Duration::seconds(params.window_secs as i64)
    }

    /// Admissions still inside the window, oldest first.
    fn live(
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Utc>> {
        let cutoff = now - Self::window(params);
        match prior {
            Some(QuotaState::Window { timestamps }) => timestamps
                .iter()
                .copied()
                .filter(|instant| *instant > cutoff)
                .collect(),
            // Absent, or left behind by the token bucket.
            _ => Vec::new(),
        }
    }
}

impl QuotaAlgorithm for SlidingWindow {
    fn admit(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> (Option<QuotaState>, RateDecision) {
        let window = Self::window(params);
        let mut timestamps = Self::live(params, prior, now);
        let used = timestamps.len() as u32;

        if used >= params.limit {
            let reset_at = timestamps.first().map_or(now, |oldest| *oldest + window);
            return (
                None,
                RateDecision {
                    allowed: false,
                    limit: params.limit,
                    remaining: 0,
                    reset_at,
                },
            );
        }

        timestamps.push(now);
        let reset_at = timestamps.first().map_or(now, |oldest| *oldest + window);
        let decision = RateDecision {
            allowed: true,
            limit: params.limit,
            remaining: params.limit - used - 1,
            reset_at,
        };
        (Some(QuotaState::Window { timestamps }), decision)
    }

    fn peek(
        &self,
        params: &QuotaParams,
        prior: Option<&QuotaState>,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let timestamps = Self::live(params, prior, now);
        let used = timestamps.len() as u32;
        RateDecision {
            allowed: used < params.limit,
            limit: params.limit,
            remaining: params.limit.saturating_sub(used),
            reset_at: timestamps
                .first()
                .map_or(now, |oldest| *oldest + Self::window(params)),
        }
    }
}
