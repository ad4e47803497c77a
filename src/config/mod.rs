//! Configuration management for the relay
//!
//! This module provides utilities for loading and validating relay
//! configuration, with support for environment variables. All settings in
//! `RelayConfig` are environment-sourced under the `RELAY_` prefix, with
//! sensible defaults for everything except the upstream URL.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use url::Url;

use crate::error::{RelayError, Result};

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value.parse::<i64>().map_err(|e| {
            RelayError::configuration(format!("Invalid integer for key {}: {}", key, e))
        })
    }

    /// Get a boolean configuration value
    fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get_string(key)?;
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(RelayError::configuration(format!(
                "Invalid boolean value for key {}: {}",
                key, value
            ))),
        }
    }

    /// Get a string configuration value with a default
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get an integer configuration value with a default
    fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    /// Get a boolean configuration value with a default
    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Get a duration in seconds with a default
    fn get_secs_or(&self, key: &str, default: u64) -> Duration {
        Duration::from_secs(self.get_int(key).map(|v| v.max(0) as u64).unwrap_or(default))
    }

    /// Get a duration in milliseconds with a default
    fn get_millis_or(&self, key: &str, default: u64) -> Duration {
        Duration::from_millis(self.get_int(key).map(|v| v.max(0) as u64).unwrap_or(default))
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Format a configuration key as an environment variable
    fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        env_key.push_str(
            &key.to_uppercase()
                .replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
        );

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                RelayError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => RelayError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    /// Configuration values
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty memory config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory config provider with initial values
    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| RelayError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// Global default configuration provider (environment, `RELAY_` prefix)
pub static DEFAULT_PROVIDER: Lazy<Arc<EnvConfigProvider>> =
    Lazy::new(|| Arc::new(EnvConfigProvider::new().with_prefix("RELAY")));

/// Relay configuration
///
/// Covers the upstream endpoint, the retry policy, circuit breaker
/// settings, and connection registry housekeeping intervals.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream webhook URL the relay forwards messages to
    pub upstream_url: String,

    /// Optional bearer token for the upstream
    pub upstream_api_key: Option<String>,

    /// Timeout for connecting and receiving the initial response of one attempt
    pub attempt_timeout: Duration,

    /// Overall deadline for a whole relay (attempts + backoff delays)
    pub request_timeout: Duration,

    /// Maximum number of attempts per relay (first try included)
    pub max_attempts: u32,

    /// Initial backoff delay between attempts
    pub retry_base_delay: Duration,

    /// Cap on the backoff delay
    pub retry_max_delay: Duration,

    /// Consecutive transient failures before the circuit opens
    pub breaker_failure_threshold: u32,

    /// Cool-down before an open circuit admits a trial attempt
    pub breaker_recovery_timeout: Duration,

    /// Ceiling on concurrent relay connections
    pub max_connections: usize,

    /// Interval between keep-alive frames on quiet connections
    pub heartbeat_interval: Duration,

    /// Idle duration after which a connection is evicted
    pub idle_timeout: Duration,

    /// Interval between idle-eviction sweeps
    pub cleanup_interval: Duration,

    /// How long shutdown waits for active relays to drain
    pub shutdown_deadline: Duration,

    /// Whether begin/end lifecycle events are forwarded to clients
    pub forward_lifecycle: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            upstream_url: String::new(),
            upstream_api_key: None,
            attempt_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
            max_connections: 10_000,
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
            shutdown_deadline: Duration::from_secs(30),
            forward_lifecycle: true,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default environment provider
    pub fn from_env() -> Result<Self> {
        Self::from_provider(&**DEFAULT_PROVIDER)
    }

    /// Load configuration from a provider
    pub fn from_provider(provider: &dyn ConfigProvider) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            upstream_url: provider.get_string("upstream_url")?,
            upstream_api_key: provider.get_string("upstream_api_key").ok(),
            attempt_timeout: provider.get_secs_or("attempt_timeout_secs", 30),
            request_timeout: provider.get_secs_or("request_timeout_secs", 300),
            max_attempts: provider.get_int_or("max_attempts", 3).max(1) as u32,
            retry_base_delay: provider.get_millis_or("retry_base_delay_ms", 1000),
            retry_max_delay: provider.get_millis_or("retry_max_delay_ms", 30_000),
            breaker_failure_threshold: provider
                .get_int_or("breaker_failure_threshold", 5)
                .max(1) as u32,
            breaker_recovery_timeout: provider.get_secs_or("breaker_recovery_timeout_secs", 60),
            max_connections: provider
                .get_int_or("max_connections", defaults.max_connections as i64)
                .max(1) as usize,
            heartbeat_interval: provider.get_secs_or("heartbeat_interval_secs", 30),
            idle_timeout: provider.get_secs_or("idle_timeout_secs", 300),
            cleanup_interval: provider.get_secs_or("cleanup_interval_secs", 60),
            shutdown_deadline: provider.get_secs_or("shutdown_deadline_secs", 30),
            forward_lifecycle: provider.get_bool_or("forward_lifecycle", true),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate this configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.upstream_url).map_err(|e| {
            RelayError::configuration(format!("Invalid upstream URL {}: {}", self.upstream_url, e))
        })?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(RelayError::configuration(format!(
                    "Unsupported upstream URL scheme: {}",
                    other
                )))
            }
        }

        if self.retry_base_delay > self.retry_max_delay {
            return Err(RelayError::configuration(
                "retry_base_delay_ms must not exceed retry_max_delay_ms",
            ));
        }

        if self.request_timeout < self.attempt_timeout {
            return Err(RelayError::configuration(
                "request_timeout_secs must not be shorter than attempt_timeout_secs",
            ));
        }

        Ok(())
    }

    /// The circuit breaker key for this upstream (the host part of the URL)
    pub fn upstream_key(&self) -> String {
        Url::parse(&self.upstream_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.upstream_url.clone())
    }
}
