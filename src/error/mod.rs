//! Error handling for the chat relay
//!
//! This module provides the error system for the relay core:
//! - Categorizes errors by type (network, upstream status, capacity, etc.)
//! - Separates transient failures (retryable) from permanent ones
//! - Adds context to errors for better debugging
//! - Provides a convenient Result type alias

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod mapping;

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the chat relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Network or connection errors reaching the upstream
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout errors (connect, attempt, or whole-relay deadline)
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Upstream answered with a non-success HTTP status
    #[error("Upstream returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Retry budget exhausted without a successful attempt
    #[error("Upstream unavailable after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },

    /// Circuit breaker is open for the upstream
    #[error("Circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Connection ceiling reached, relay rejected before any upstream call
    #[error("Connection capacity exceeded: {0}")]
    Capacity(String),

    /// Registry is draining for shutdown, no new relays accepted
    #[error("Relay is shutting down: {0}")]
    Draining(String),

    /// Client went away mid-relay
    #[error("Client disconnected: {0}")]
    Disconnected(String),

    /// Byte or JSON decoding problems (recovered locally, logged)
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session missing or invalid
    #[error("Session error: {0}")]
    Session(String),

    /// Authentication failures from the collaborator layer
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Rate limit denial from the collaborator layer
    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Content rejected by the guard
    #[error("Content rejected: {0}")]
    ContentRejected(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<RelayError>,
        context: ErrorContext,
    },
}

impl RelayError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        RelayError::Network(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        RelayError::Timeout(message.into())
    }

    /// Create an upstream status error
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        RelayError::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Create an exhausted-retries error
    pub fn exhausted(attempts: u32, message: impl Into<String>) -> Self {
        RelayError::Exhausted {
            attempts,
            message: message.into(),
        }
    }

    /// Create a capacity error
    pub fn capacity(message: impl Into<String>) -> Self {
        RelayError::Capacity(message.into())
    }

    /// Create a draining error
    pub fn draining(message: impl Into<String>) -> Self {
        RelayError::Draining(message.into())
    }

    /// Create a client-disconnect error
    pub fn disconnected(message: impl Into<String>) -> Self {
        RelayError::Disconnected(message.into())
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        RelayError::Decode(message.into())
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Validation(message.into())
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        RelayError::Session(message.into())
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        RelayError::Authentication(message.into())
    }

    /// Create a content-rejected error
    pub fn content_rejected(message: impl Into<String>) -> Self {
        RelayError::ContentRejected(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        RelayError::Configuration(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RelayError::Internal(message.into())
    }

    /// Add context to an existing error
    pub fn with_context(self, context: ErrorContext) -> Self {
        RelayError::WithContext {
            inner: Box::new(self),
            context,
        }
    }

    /// Add a single context key/value to an existing error
    pub fn with_context_value(self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        let mut context = ErrorContext::new();
        context.add(key, value);
        self.with_context(context)
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RelayError::Upstream { status, .. } => Some(*status),
            RelayError::WithContext { inner, context } => {
                context.status_code.or_else(|| inner.status_code())
            }
            _ => None,
        }
    }

    /// Check whether this failure is transient (worth another attempt)
    ///
    /// Transient failures are connection-level problems and any non-success
    /// initial response status, both seen before content was forwarded.
    /// Everything else is permanent for a given relay.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Network(_) => true,
            RelayError::Timeout(_) => true,
            RelayError::Upstream { status, .. } => mapping::is_transient_status(*status),
            RelayError::WithContext { inner, .. } => inner.is_transient(),
            _ => false,
        }
    }

    /// Check whether this failure is permanent (not retryable)
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Error context information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Timestamp the error was captured
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Relay attempt number if applicable
    pub attempt: Option<u32>,

    /// Connection id for tracing
    pub connection_id: Option<String>,

    /// Endpoint that was called
    pub endpoint: Option<String>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: Some(chrono::Utc::now()),
            status_code: None,
            attempt: None,
            connection_id: None,
            endpoint: None,
            data: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add the relay attempt number
    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    /// Add a connection id
    pub fn connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    /// Add an endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }

    /// Add a context value and return self (builder pattern)
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.add(key, value);
        self
    }
}

/// Convert reqwest errors to RelayError
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let relay_error = if err.is_timeout() {
            RelayError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            RelayError::network(format!("Connection error: {}", err))
        } else if err.is_request() {
            RelayError::validation(format!("Invalid request: {}", err))
        } else if err.is_body() || err.is_decode() {
            // Body read failures are connection-level, the transport dropped
            RelayError::network(format!("Stream read error: {}", err))
        } else {
            RelayError::internal(format!("HTTP client error: {}", err))
        };

        if let Some(status) = err.status() {
            relay_error.with_context(ErrorContext::new().status_code(status.as_u16()))
        } else {
            relay_error
        }
    }
}

/// Convert serde_json errors to RelayError
impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::decode(format!("JSON error: {}", err))
    }
}
