//! Collaborator interfaces consumed by the relay core
//!
//! Session storage, token issuance, rate limiting, and content vetting are
//! external concerns. The relay consumes them as black boxes through these
//! traits, called synchronously before a relay begins; their internals
//! live elsewhere. Decisions are explicit variants rather than exceptions
//! so the failure paths show up in the signatures.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{RelayError, Result};

/// One client session
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub origin_domain: String,
    pub page_url: Option<String>,
    pub client_ip: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Claims carried by an upstream token
#[derive(Debug, Clone)]
pub struct Claims {
    pub session_id: String,
    pub origin_domain: String,
    pub client_ip: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Rate limiter decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

/// Content guard decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Accept,
    Reject { reason: String },
}

/// Session creation and lookup
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session for an origin domain
    async fn create(&self, origin_domain: &str, client_ip: &str, user_agent: &str)
        -> Result<Session>;

    /// Look up a session by id
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Refresh a session's activity timestamp
    async fn touch(&self, session_id: &str) -> Result<()>;
}

/// Token issuance and verification for the upstream hop
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Issue a short-lived token carrying the given claims
    async fn issue(&self, claims: &Claims, ttl: Duration) -> Result<String>;

    /// Verify a token and return its claims
    async fn verify(&self, token: &str) -> Result<Claims>;
}

/// Request-level rate limiting
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check whether another request is allowed for a key within a window
    async fn check(&self, key: &str, limit: u32, window: Duration) -> Result<RateDecision>;
}

/// Input sanitization and bot/spam heuristics
#[async_trait]
pub trait ContentGuard: Send + Sync {
    /// Vet one message before it is forwarded upstream
    async fn check(&self, text: &str) -> Result<GuardDecision>;
}

/// Run the pre-relay checks in order: session, rate limit, content
///
/// Returns the validated session on success and the first rejection
/// otherwise, before any upstream contact happens. Token issuance for the
/// upstream hop is the caller's next step via `Authenticator::issue`.
pub async fn preflight(
    sessions: &dyn SessionStore,
    rate_limiter: &dyn RateLimiter,
    content_guard: &dyn ContentGuard,
    session_id: &str,
    client_ip: &str,
    message: &str,
    rate_limit: u32,
    rate_window: Duration,
) -> Result<Session> {
    let session = sessions
        .get(session_id)
        .await?
        .ok_or_else(|| RelayError::session("invalid or missing session"))?;
    sessions.touch(session_id).await?;

    match rate_limiter.check(client_ip, rate_limit, rate_window).await? {
        RateDecision::Allowed => {}
        RateDecision::Denied { retry_after } => {
            return Err(RelayError::RateLimited { retry_after });
        }
    }

    match content_guard.check(message).await? {
        GuardDecision::Accept => {}
        GuardDecision::Reject { reason } => {
            return Err(RelayError::content_rejected(reason));
        }
    }

    Ok(session)
}

/// In-memory session store
///
/// Reference implementation behind the injected interface, suitable for
/// single-process deployments and tests. Production deployments plug in a
/// shared store instead.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        origin_domain: &str,
        client_ip: &str,
        user_agent: &str,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            origin_domain: origin_domain.to_string(),
            page_url: None,
            client_ip: client_ip.to_string(),
            user_agent: user_agent.to_string(),
            created_at: now,
            last_activity: now,
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }

    async fn touch(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| RelayError::session(format!("unknown session {}", session_id)))?;
        session.last_activity = Utc::now();
        Ok(())
    }
}
