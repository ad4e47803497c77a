//! Tests for configuration loading and validation

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::config::{
        ConfigProvider, ConfigProviderExt, EnvConfigProvider, MemoryConfigProvider, RelayConfig,
    };

    fn provider_with_url() -> MemoryConfigProvider {
        let mut provider = MemoryConfigProvider::new();
        provider.set("upstream_url", "https://upstream.example.com/webhook");
        provider
    }

    #[test]
    fn test_memory_provider_get_and_missing() {
        let mut provider = MemoryConfigProvider::new();
        provider.set("key", "value");

        assert_eq!(provider.get_string("key").unwrap(), "value");
        assert!(provider.get_string("absent").is_err());
    }

    #[test]
    fn test_provider_ext_int_and_bool() {
        let mut provider = MemoryConfigProvider::new();
        provider.set("count", 42);
        provider.set("enabled", "yes");
        provider.set("disabled", "off");
        provider.set("garbage", "not-a-number");

        assert_eq!(provider.get_int("count").unwrap(), 42);
        assert!(provider.get_bool("enabled").unwrap());
        assert!(!provider.get_bool("disabled").unwrap());
        assert!(provider.get_int("garbage").is_err());
        assert_eq!(provider.get_int_or("garbage", 7), 7);
        assert_eq!(provider.get_int_or("absent", 9), 9);
    }

    #[test]
    fn test_provider_ext_durations() {
        let mut provider = MemoryConfigProvider::new();
        provider.set("delay_ms", 250);
        provider.set("window_secs", 10);

        assert_eq!(
            provider.get_millis_or("delay_ms", 1000),
            Duration::from_millis(250)
        );
        assert_eq!(
            provider.get_secs_or("window_secs", 60),
            Duration::from_secs(10)
        );
        assert_eq!(
            provider.get_secs_or("absent", 60),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_env_provider_key_formatting() {
        let provider = EnvConfigProvider::new().with_prefix("RELAY");
        std::env::set_var("RELAY_TEST_FORMAT_KEY", "hello");
        assert_eq!(provider.get_string("test.format-key").unwrap(), "hello");
        std::env::remove_var("RELAY_TEST_FORMAT_KEY");
    }

    #[test]
    fn test_config_defaults_applied() {
        let config = RelayConfig::from_provider(&provider_with_url()).unwrap();

        assert_eq!(config.upstream_url, "https://upstream.example.com/webhook");
        assert_eq!(config.upstream_api_key, None);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(30));
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.max_connections, 10_000);
        assert!(config.forward_lifecycle);
    }

    #[test]
    fn test_config_overrides_from_provider() {
        let mut provider = provider_with_url();
        provider.set("max_attempts", 5);
        provider.set("retry_base_delay_ms", 100);
        provider.set("retry_max_delay_ms", 400);
        provider.set("forward_lifecycle", "false");
        provider.set("upstream_api_key", "secret");

        let config = RelayConfig::from_provider(&provider).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base_delay, Duration::from_millis(100));
        assert_eq!(config.retry_max_delay, Duration::from_millis(400));
        assert!(!config.forward_lifecycle);
        assert_eq!(config.upstream_api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn test_config_requires_upstream_url() {
        let provider = MemoryConfigProvider::new();
        assert!(RelayConfig::from_provider(&provider).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = RelayConfig {
            upstream_url: "not a url".to_string(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            upstream_url: "ftp://example.com".to_string(),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let config = RelayConfig {
            upstream_url: "https://example.com".to_string(),
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(1),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_request_timeout() {
        let config = RelayConfig {
            upstream_url: "https://example.com".to_string(),
            attempt_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            ..RelayConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upstream_key_is_host() {
        let config = RelayConfig {
            upstream_url: "https://upstream.example.com:8443/webhook/chat".to_string(),
            ..RelayConfig::default()
        };
        assert_eq!(config.upstream_key(), "upstream.example.com");
    }
}
