//! Per-provider circuit breaking.
//!
//! Each provider gets one [`CircuitBreaker`], shared by every concurrent
//! request targeting it. CLOSED passes calls and counts failures in a
//! rolling window; reaching the threshold opens the circuit, which
//! short-circuits calls until a cooldown elapses; then exactly one trial
//! call probes the provider (HALF_OPEN). A successful trial closes the
//! circuit and resets the cooldown to its base; a failed trial re-opens it
//! with the cooldown doubled, up to a cap.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use heddle_types::config::CircuitConfig;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Health state of one provider's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass; failures accumulate in the rolling window.
    Closed,
    /// Calls short-circuit until the cooldown elapses.
    Open,
    /// The cooldown elapsed; one trial call is probing the provider.
    HalfOpen,
}

struct CircuitInner {
    state: CircuitState,
    /// Timestamps of recent failures, oldest first.
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Current cooldown; doubles on failed trials, resets on success.
    cooldown: Duration,
    trial_started_at: Option<Instant>,
}

/// Failure-isolation state machine for one provider.
///
/// All transitions happen under one mutex, so they are total-ordered and
/// at most one HALF_OPEN trial is issued per cooldown.
pub struct CircuitBreaker {
    provider: String,
    failure_threshold: u32,
    failure_window: Duration,
    base_cooldown: Duration,
    cooldown_cap: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for the given provider.
    pub fn new(provider: impl Into<String>, config: &CircuitConfig) -> Self {
        let base_cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            provider: provider.into(),
            failure_threshold: config.failure_threshold,
            failure_window: Duration::from_secs(config.failure_window_secs),
            base_cooldown,
            cooldown_cap: Duration::from_secs(config.cooldown_cap_secs),
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                cooldown: base_cooldown,
                trial_started_at: None,
            }),
        }
    }

    /// The provider this breaker guards.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Whether a call may proceed right now.
    ///
    /// Returning `true` on an OPEN circuit whose cooldown has elapsed makes
    /// the caller the HALF_OPEN trial; its `record_success` or
    /// `record_failure` decides the next state. A trial that never reports
    /// back goes stale after one cooldown and the slot is handed out again.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|t| now.duration_since(t) >= inner.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_started_at = Some(now);
                    debug!(provider = %self.provider, "circuit half-open, issuing trial");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => match inner.trial_started_at {
                Some(started) if now.duration_since(started) < inner.cooldown => false,
                _ => {
                    // Stale trial; hand the slot to this caller.
                    inner.trial_started_at = Some(now);
                    debug!(provider = %self.provider, "stale trial replaced");
                    true
                }
            },
        }
    }

    /// Report a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            debug!(provider = %self.provider, "trial succeeded, circuit closed");
            inner.state = CircuitState::Closed;
            inner.failures.clear();
            inner.opened_at = None;
            inner.trial_started_at = None;
            inner.cooldown = self.base_cooldown;
        }
        // Closed: nothing to reset. Open: a late success from a call that
        // started before the circuit opened; the trial decides recovery.
    }

    /// Report a failed call (only failures that indicate provider health;
    /// see `UpstreamError::is_circuit_failure`).
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => {
                inner.failures.push_back(now);
                while let Some(front) = inner.failures.front() {
                    if now.duration_since(*front) >= self.failure_window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 >= self.failure_threshold {
                    warn!(
                        provider = %self.provider,
                        failures = inner.failures.len(),
                        cooldown_ms = inner.cooldown.as_millis() as u64,
                        "failure threshold reached, circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.cooldown = (inner.cooldown * 2).min(self.cooldown_cap);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_started_at = None;
                warn!(
                    provider = %self.provider,
                    cooldown_ms = inner.cooldown.as_millis() as u64,
                    "trial failed, circuit re-opened"
                );
            }
            // Late failure from a call that started before the circuit
            // opened; the window is moot while open.
            CircuitState::Open => {}
        }
    }

    /// Current state, for routing decisions and status output.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("provider", &self.provider)
            .field("state", &inner.state)
            .field("failures", &inner.failures.len())
            .field("cooldown", &inner.cooldown)
            .finish()
    }
}

/// Shared map of breakers, one per provider, created on first use.
pub struct CircuitRegistry {
    config: CircuitConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitRegistry {
    /// Create an empty registry; breakers inherit `config`.
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for `provider`, created closed if absent.
    pub fn breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(provider, &self.config)))
            .clone()
    }

    /// Peek at a provider's state without creating a breaker.
    pub fn state(&self, provider: &str) -> Option<CircuitState> {
        self.breakers.get(provider).map(|b| b.state())
    }
}

impl std::fmt::Debug for CircuitRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitRegistry")
            .field("providers", &self.breakers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    // CircuitConfig carries whole seconds; tests build breakers directly
    // with millisecond durations to stay fast.
    fn fast_breaker(threshold: u32, window: Duration, cooldown: Duration, cap: Duration) -> CircuitBreaker {
        CircuitBreaker {
            provider: "test".into(),
            failure_threshold: threshold,
            failure_window: window,
            base_cooldown: cooldown,
            cooldown_cap: cap,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
                cooldown,
                trial_started_at: None,
            }),
        }
    }

    #[test]
    fn starts_closed_and_passes() {
        let breaker = CircuitBreaker::new("p", &CircuitConfig::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
        assert_eq!(breaker.provider(), "p");
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = fast_breaker(
            3,
            Duration::from_secs(10),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn failures_outside_window_expire() {
        let breaker = fast_breaker(
            2,
            Duration::from_millis(30),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(40));
        breaker.record_failure();
        // The first failure aged out of the window; still closed.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn cooldown_gates_exactly_one_trial() {
        let breaker = fast_breaker(
            1,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());

        sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        // Second concurrent caller is not a trial.
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn successful_trial_closes_and_resets() {
        let breaker = fast_breaker(
            1,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire());
        // Counters were cleared: one new failure re-opens (threshold 1),
        // and the cooldown is back at its base.
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.inner.lock().cooldown, Duration::from_millis(20));
    }

    #[test]
    fn failed_trial_doubles_cooldown_up_to_cap() {
        let breaker = fast_breaker(
            1,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.inner.lock().cooldown, Duration::from_millis(30));

        // Another failed trial stays at the cap.
        sleep(Duration::from_millis(35));
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.inner.lock().cooldown, Duration::from_millis(30));
    }

    #[test]
    fn stale_trial_slot_is_reissued() {
        let breaker = fast_breaker(
            1,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        // Trial never reports. After one cooldown it is stale.
        sleep(Duration::from_millis(25));
        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn success_while_closed_is_a_noop() {
        let breaker = fast_breaker(
            2,
            Duration::from_secs(10),
            Duration::from_millis(20),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        breaker.record_success();
        // Success does not clear the window outside recovery.
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn late_reports_while_open_are_ignored() {
        let breaker = fast_breaker(
            1,
            Duration::from_secs(10),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn registry_returns_shared_instance() {
        let registry = CircuitRegistry::new(CircuitConfig::default());
        let a = registry.breaker("openai-primary");
        let b = registry.breaker("openai-primary");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.state("openai-primary"), Some(CircuitState::Closed));
        assert_eq!(registry.state("never-seen"), None);
    }

    #[test]
    fn concurrent_failures_open_once() {
        let breaker = Arc::new(fast_breaker(
            10,
            Duration::from_secs(10),
            Duration::from_millis(50),
            Duration::from_millis(200),
        ));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let breaker = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..5 {
                        breaker.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }
}
