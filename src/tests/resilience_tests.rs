//! Tests for the breaker registry

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::error::{RelayError, Result};
    use crate::resilience::{BreakerRegistry, CircuitBreakerConfig, CircuitState};

    fn registry(threshold: u32) -> BreakerRegistry {
        BreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            recovery_timeout: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn test_guard_passes_successes_through() {
        let registry = registry(2);

        let value: Result<i32> = registry.guard("upstream", || async { Ok(42) }).await;
        assert_eq!(value.unwrap(), 42);
        assert_eq!(
            registry.states().get("upstream"),
            Some(&CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_guard_opens_on_transient_failures() {
        let registry = registry(2);

        for _ in 0..2 {
            let result: Result<()> = registry
                .guard("upstream", || async {
                    Err(RelayError::network("connection refused"))
                })
                .await;
            assert!(result.is_err());
        }

        assert_eq!(registry.states().get("upstream"), Some(&CircuitState::Open));

        // Next call is shed without running the attempt
        let result: Result<()> = registry
            .guard("upstream", || async {
                panic!("attempt must not run while the circuit is open")
            })
            .await;
        assert!(matches!(result, Err(RelayError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn test_guard_ignores_permanent_failures() {
        let registry = registry(1);

        for _ in 0..5 {
            let result: Result<()> = registry
                .guard("upstream", || async {
                    Err(RelayError::validation("bad payload"))
                })
                .await;
            assert!(matches!(result, Err(RelayError::Validation(_))));
        }

        // Permanent failures never count toward opening
        assert_eq!(
            registry.states().get("upstream"),
            Some(&CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_breakers_are_isolated_per_key() {
        let registry = registry(1);

        let _: Result<()> = registry
            .guard("broken.example.com", || async {
                Err(RelayError::timeout("deadline"))
            })
            .await;
        let _: Result<i32> = registry
            .guard("healthy.example.com", || async { Ok(1) })
            .await;

        let states = registry.states();
        assert_eq!(states.get("broken.example.com"), Some(&CircuitState::Open));
        assert_eq!(
            states.get("healthy.example.com"),
            Some(&CircuitState::Closed)
        );
    }

    #[tokio::test]
    async fn test_breaker_instance_is_shared_per_key() {
        let registry = registry(2);

        let first = registry.breaker("upstream");
        first.record_failure();

        let second = registry.breaker("upstream");
        assert_eq!(second.failure_count(), 1);
    }
}
