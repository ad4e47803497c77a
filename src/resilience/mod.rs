//! Fault-tolerance for the upstream dependency
//!
//! The relay stops hammering a persistently failing upstream by routing
//! every attempt through a per-service circuit breaker. Only endpoints
//! that actually depend on the upstream consult a breaker; session and
//! validation paths never do.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::Result;

/// State of a circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,

    /// Circuit is open, rejecting requests
    Open,

    /// Circuit is half-open, allowing a single trial request
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::HalfOpen => write!(f, "HalfOpen"),
        }
    }
}

/// Per-service-key collection of circuit breakers
///
/// Breakers are created lazily, one per logical upstream, and shared by
/// every concurrent relay task targeting that upstream.
pub struct BreakerRegistry {
    /// Configuration applied to newly created breakers
    config: CircuitBreakerConfig,

    /// Breakers keyed by logical upstream service
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry with the given breaker configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or create) the breaker for a service key
    pub fn breaker(&self, key: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap();
        Arc::clone(
            breakers
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone()))),
        )
    }

    /// Run one attempt through the breaker for a service key
    ///
    /// Short-circuits with `RelayError::CircuitOpen` without invoking the
    /// attempt when the circuit is open. Successes and transient failures
    /// are recorded; permanent failures pass through without counting
    /// against the breaker.
    pub async fn guard<F, Fut, T>(&self, key: &str, attempt: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breaker(key);
        breaker.check()?;

        match attempt().await {
            Ok(value) => {
                breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                if err.is_transient() {
                    breaker.record_failure();
                }
                Err(err)
            }
        }
    }

    /// Current state of every known breaker, for stats endpoints
    pub fn states(&self) -> HashMap<String, CircuitState> {
        let breakers = self.breakers.lock().unwrap();
        breakers
            .iter()
            .map(|(key, breaker)| (key.clone(), breaker.state()))
            .collect()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
