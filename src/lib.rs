//! # chat-relay
//!
//! The streaming core of the chat proxy: relays an upstream webhook's
//! newline-delimited JSON stream to browser clients as Server-Sent Events.
//!
//! This crate provides:
//!
//! - Incremental UTF-8 and line reassembly over arbitrary byte chunks
//! - Typed interpretation of upstream events (`begin`/`item`/`end`/`error`,
//!   plain-text fallback)
//! - Outbound SSE framing, terminated by a single `[DONE]` sentinel
//! - Retry with exponential backoff and a per-upstream circuit breaker
//! - A connection registry with heartbeats, idle eviction, and graceful
//!   drain
//! - Collaborator interfaces (sessions, tokens, rate limiting, content
//!   vetting) consumed as black boxes before a relay begins
//!
//! ## Architecture
//!
//! One lightweight task per active relay pumps the pipeline
//! `Utf8Decoder → LineFramer → interpret → SseEncoder` over the live
//! upstream byte stream, forwarding frames in order as they are produced.
//! `RelayClient` owns admission (capacity, circuit state) and the retry
//! policy; `ConnectionRegistry` owns connection lifecycle and its
//! background housekeeping tasks.

// Configuration management
pub mod config;
pub use config::{ConfigProvider, ConfigProviderExt, EnvConfigProvider, MemoryConfigProvider, RelayConfig};

// Error handling
pub mod error;
pub use error::{ErrorContext, RelayError, Result};

// Collaborator interfaces
pub mod core;
pub use core::{Authenticator, ContentGuard, RateLimiter, SessionStore};

// Byte-stream reassembly
pub mod stream;
pub use stream::{LineFramer, Utf8Decoder};

// Upstream event interpretation
pub mod event;
pub use event::{interpret, UpstreamEvent};

// Outbound SSE framing
pub mod sse;
pub use sse::{OutboundFrame, SseEncoder};

// Resilience patterns
pub mod resilience;
pub use resilience::{BreakerRegistry, CircuitBreaker, CircuitState};

// Connection tracking
pub mod registry;
pub use registry::{ConnectionRegistry, RegistryStats};

// The relay orchestrator
pub mod relay;
pub use relay::{RelayClient, RelayRequest, RelayStream};

// Unit and mock tests
#[cfg(test)]
mod tests;
