//! Quota counter storage.
//!
//! Counters live behind the [`QuotaStore`] trait so the in-process
//! [`MemoryQuotaStore`] can later be swapped for a shared backend
//! without touching the algorithms: [`QuotaState`] is plain serde data,
//! and the admit step is expressed as one atomic read-decide-write per
//! key. The store owns atomicity; the algorithm stays a pure function.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use heddle_types::{QuotaKey, RateDecision};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ratelimit::{QuotaAlgorithm, QuotaParams};

/// Failure talking to the counter store.
#[derive(Debug, Error)]
pub enum QuotaError {
    /// The store could not be reached or failed mid-operation.
    #[error("quota store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Persisted counter state for one [`QuotaKey`].
///
/// Tagged and serde-able so an external store can hold it as a value
/// blob. A key only ever holds the variant of the configured algorithm;
/// algorithms treat a foreign variant as absent state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuotaState {
    /// Sliding-window admission instants, oldest first.
    Window { timestamps: Vec<DateTime<Utc>> },

    /// Token-bucket level and the instant it was computed at.
    Bucket {
        tokens: f64,
        updated_at: DateTime<Utc>,
    },
}

/// Keyed storage for quota counters.
///
/// Implementations guarantee per-key atomicity: concurrent [`admit`]
/// calls for one key behave as if totally ordered, so two requests can
/// never both consume the last unit of a quota.
///
/// [`admit`]: QuotaStore::admit
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Run one admission decision for `key` as a single atomic step.
    ///
    /// The algorithm sees the current state and returns the decision
    /// plus the state to persist; `None` state (every deny) leaves the
    /// stored value untouched.
    async fn admit(
        &self,
        key: &QuotaKey,
        params: &QuotaParams,
        algorithm: &dyn QuotaAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, QuotaError>;

    /// Read-only decision for `key`; never writes.
    async fn peek(
        &self,
        key: &QuotaKey,
        params: &QuotaParams,
        algorithm: &dyn QuotaAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, QuotaError>;
}

/// In-process counter store backed by a [`DashMap`].
///
/// The map's entry guard is the per-key arbitration point: the decide
/// step runs while the guard is held, which is what makes concurrent
/// admits for one key serialize.
#[derive(Debug, Default)]
pub struct MemoryQuotaStore {
    entries: DashMap<QuotaKey, QuotaState>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counter series currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn admit(
        &self,
        key: &QuotaKey,
        params: &QuotaParams,
        algorithm: &dyn QuotaAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, QuotaError> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let (state, decision) = algorithm.admit(params, Some(occupied.get()), now);
                if let Some(state) = state {
                    occupied.insert(state);
                }
                Ok(decision)
            }
            Entry::Vacant(vacant) => {
                let (state, decision) = algorithm.admit(params, None, now);
                if let Some(state) = state {
                    vacant.insert(state);
                }
                Ok(decision)
            }
        }
    }

    async fn peek(
        &self,
        key: &QuotaKey,
        params: &QuotaParams,
        algorithm: &dyn QuotaAlgorithm,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, QuotaError> {
        let prior = self.entries.get(key);
        Ok(algorithm.peek(params, prior.as_deref(), now))
    }
}
