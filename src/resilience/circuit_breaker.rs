//! Circuit breaker for the upstream dependency
//!
//! Implements the circuit breaker pattern so the relay sheds load instead
//! of hammering an upstream that is persistently failing.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use crate::error::{RelayError, Result};

use super::CircuitState;

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens
    pub failure_threshold: u32,

    /// Cool-down before an open circuit admits one trial attempt
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// A thread-safe circuit breaker
///
/// Transitions: Closed → Open when the consecutive-failure count reaches
/// the threshold; Open → HalfOpen once the recovery timeout elapses,
/// admitting exactly one trial attempt; the trial's success closes the
/// circuit, its failure reopens it and restarts the timer. While Closed,
/// each success decrements the failure counter toward zero.
pub struct CircuitBreaker {
    /// Current state
    state: RwLock<CircuitState>,

    /// Time when the circuit was opened
    opened_at: RwLock<Option<Instant>>,

    /// Count of consecutive transient failures in the closed state
    failure_count: AtomicU32,

    /// Whether the single half-open trial slot is still available
    trial_pending: AtomicBool,

    /// When the in-flight trial was claimed, if any
    trial_started: RwLock<Option<Instant>>,

    /// Total failures observed
    total_failures: AtomicU64,

    /// Total successes observed
    total_successes: AtomicU64,

    /// Configuration
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the specified configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: RwLock::new(CircuitState::Closed),
            opened_at: RwLock::new(None),
            failure_count: AtomicU32::new(0),
            trial_pending: AtomicBool::new(false),
            trial_started: RwLock::new(None),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            config,
        }
    }

    /// Check whether the circuit admits a request
    ///
    /// Returns `RelayError::CircuitOpen` with the remaining cool-down when
    /// the request must be shed without touching the upstream.
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = {
                    let opened_at = self.opened_at.read().unwrap();
                    opened_at.map(|instant| {
                        self.config
                            .recovery_timeout
                            .saturating_sub(instant.elapsed())
                    })
                };

                match remaining {
                    Some(remaining) if remaining > Duration::ZERO => {
                        Err(RelayError::CircuitOpen {
                            retry_after: remaining,
                        })
                    }
                    _ => {
                        // Cool-down elapsed: admit one trial attempt.
                        self.transition_to_half_open();
                        self.take_trial()
                    }
                }
            }
            CircuitState::HalfOpen => self.take_trial(),
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::SeqCst);

        match self.state() {
            CircuitState::Closed => {
                // Failure streak decays on success, never below zero.
                let _ = self.failure_count.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |count| Some(count.saturating_sub(1)),
                );
            }
            CircuitState::HalfOpen => self.close_circuit(),
            CircuitState::Open => {
                log::warn!("Received success while circuit is Open, ignoring");
            }
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);

        match self.state() {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open_circuit();
                }
            }
            CircuitState::HalfOpen => {
                // The trial failed: reopen and restart the timer.
                self.open_circuit();
            }
            CircuitState::Open => {
                log::debug!("Received failure while circuit is Open, ignoring");
            }
        }
    }

    /// Reset the circuit breaker to the closed state
    pub fn reset(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        *self.opened_at.write().unwrap() = None;
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_pending.store(false, Ordering::SeqCst);
        *self.trial_started.write().unwrap() = None;
    }

    /// Get the current state
    pub fn state(&self) -> CircuitState {
        *self.state.read().unwrap()
    }

    /// Get the current number of consecutive failures
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Get metrics about the circuit breaker
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let opened_duration = {
            let opened_at = self.opened_at.read().unwrap();
            opened_at.map(|instant| instant.elapsed())
        };

        CircuitBreakerMetrics {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            total_successes: self.total_successes.load(Ordering::SeqCst),
            opened_duration,
        }
    }

    // Private methods

    /// Claim the single half-open trial slot
    ///
    /// A trial whose outcome is never reported (client disconnect, relay
    /// deadline) must not pin the circuit half-open: a claimed slot older
    /// than the recovery timeout counts as abandoned and is handed out
    /// again.
    fn take_trial(&self) -> Result<()> {
        if self.trial_pending.swap(false, Ordering::SeqCst) {
            *self.trial_started.write().unwrap() = Some(Instant::now());
            return Ok(());
        }

        let mut started = self.trial_started.write().unwrap();
        match *started {
            Some(instant) if instant.elapsed() >= self.config.recovery_timeout => {
                log::warn!("Half-open trial was abandoned, admitting a new one");
                *started = Some(Instant::now());
                Ok(())
            }
            Some(instant) => Err(RelayError::CircuitOpen {
                retry_after: self
                    .config
                    .recovery_timeout
                    .saturating_sub(instant.elapsed()),
            }),
            None => Err(RelayError::CircuitOpen {
                retry_after: self.config.recovery_timeout,
            }),
        }
    }

    fn open_circuit(&self) {
        log::warn!("Circuit breaker transitioning to Open");
        *self.state.write().unwrap() = CircuitState::Open;
        *self.opened_at.write().unwrap() = Some(Instant::now());
        self.trial_pending.store(false, Ordering::SeqCst);
        *self.trial_started.write().unwrap() = None;
    }

    fn close_circuit(&self) {
        log::info!("Circuit breaker transitioning to Closed");
        *self.state.write().unwrap() = CircuitState::Closed;
        *self.opened_at.write().unwrap() = None;
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_pending.store(false, Ordering::SeqCst);
        *self.trial_started.write().unwrap() = None;
    }

    /// Move an open circuit to half-open, exactly once
    ///
    /// The transition happens under the state write lock with a re-check,
    /// so concurrent callers racing past an elapsed cool-down publish the
    /// trial slot a single time; `take_trial` then admits one of them.
    fn transition_to_half_open(&self) {
        let mut state = self.state.write().unwrap();
        if *state != CircuitState::Open {
            return;
        }
        log::info!("Circuit breaker transitioning to HalfOpen");
        *state = CircuitState::HalfOpen;
        self.trial_pending.store(true, Ordering::SeqCst);
    }
}

/// Metrics for a circuit breaker
#[derive(Debug)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,

    /// Current consecutive-failure count
    pub failure_count: u32,

    /// Total failures seen
    pub total_failures: u64,

    /// Total successes seen
    pub total_successes: u64,

    /// Duration the circuit has been open, if applicable
    pub opened_duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn config(threshold: u32, recovery_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_millis(recovery_ms),
        }
    }

    #[test]
    fn test_circuit_closed_initially() {
        let cb = CircuitBreaker::new(CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_circuit_opens_after_failures() {
        let cb = CircuitBreaker::new(config(3, 60_000));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        match cb.check() {
            Err(RelayError::CircuitOpen { retry_after }) => {
                assert!(retry_after <= Duration::from_secs(60));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
    }

    #[test]
    fn test_success_decays_failure_streak() {
        let cb = CircuitBreaker::new(config(3, 60_000));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);

        cb.record_success();
        assert_eq!(cb.failure_count(), 1);

        // Never goes negative
        cb.record_success();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_admits_single_trial_after_cooldown() {
        let cb = CircuitBreaker::new(config(1, 50));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        thread::sleep(Duration::from_millis(100));

        // First check claims the trial slot, a concurrent second check is
        // still rejected.
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_trial_success_closes_circuit() {
        let cb = CircuitBreaker::new(config(1, 10));

        cb.record_failure();
        thread::sleep(Duration::from_millis(50));
        assert!(cb.check().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[test]
    fn test_trial_failure_reopens_circuit() {
        let cb = CircuitBreaker::new(config(1, 10));

        cb.record_failure();
        thread::sleep(Duration::from_millis(50));
        assert!(cb.check().is_ok());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        // Timer restarted: immediately after reopening the circuit rejects
        assert!(cb.check().is_err());
    }

    #[test]
    fn test_abandoned_trial_readmitted_after_cooldown() {
        let cb = CircuitBreaker::new(config(1, 50));

        cb.record_failure();
        thread::sleep(Duration::from_millis(100));

        // Claim the trial and walk away without reporting an outcome
        assert!(cb.check().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        thread::sleep(Duration::from_millis(500));

        // The breaker must recover: another trial is admitted
        assert!(cb.check().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_concurrent_checks_admit_single_trial() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Barrier;

        let cb = CircuitBreaker::new(config(1, 200));
        cb.record_failure();
        thread::sleep(Duration::from_millis(250));

        let admitted = AtomicUsize::new(0);
        let barrier = Barrier::new(8);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    if cb.check().is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_reset() {
        let cb = CircuitBreaker::new(config(1, 60_000));

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.check().is_ok());
    }
}
