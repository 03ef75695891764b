//! Login session model and session storage.

use crate::config::ttl_from_seconds;
use crate::error::{OidcError, OidcResult};
use crate::pkce;
use crate::types::TokenSet;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Opaque key of a server-side session, carried by the session cookie.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(pkce::random_token(32))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Debug for SessionId {
    // Session ids are bearer credentials; only a prefix goes to logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionId({prefix}…)")
    }
}

/// The single-use values bound to one authorization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowArtifacts {
    pub state: String,
    pub nonce: String,
    pub code_verifier: String,
}

impl FlowArtifacts {
    pub fn generate() -> Self {
        Self {
            state: pkce::new_state(),
            nonce: pkce::new_nonce(),
            code_verifier: pkce::new_code_verifier(),
        }
    }
}

/// A login whose authorization redirect has been issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    /// `None` once a callback has consumed them.
    pub artifacts: Option<FlowArtifacts>,
    pub original_url: String,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingLogin {
    pub fn new(artifacts: FlowArtifacts, original_url: String, ttl: Duration) -> Self {
        let started_at = Utc::now();
        Self {
            artifacts: Some(artifacts),
            original_url,
            started_at,
            expires_at: started_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub tokens: TokenSet,
    pub original_url: String,
    pub authenticated_at: DateTime<Utc>,
}

impl AuthenticatedSession {
    pub fn subject(&self) -> &str {
        &self.tokens.claims.sub
    }
}

/// Where a browser session stands in the login flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum AuthSession {
    #[default]
    PreFlow,
    AwaitingCallback(PendingLogin),
    Authenticated(AuthenticatedSession),
}

impl AuthSession {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    pub fn pending(&self) -> Option<&PendingLogin> {
        match self {
            Self::AwaitingCallback(pending) => Some(pending),
            _ => None,
        }
    }

    pub fn authenticated(&self) -> Option<&AuthenticatedSession> {
        match self {
            Self::Authenticated(session) => Some(session),
            _ => None,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            Self::PreFlow => "pre_flow",
            Self::AwaitingCallback(_) => "awaiting_callback",
            Self::Authenticated(_) => "authenticated",
        }
    }
}

/// Storage for login sessions, keyed by the cookie's session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a live session.
    async fn get(&self, id: &SessionId) -> OidcResult<Option<AuthSession>>;

    /// Persist a session, refreshing its expiry.
    async fn set(&self, id: &SessionId, session: AuthSession) -> OidcResult<()>;

    /// Forget a session, e.g. when its id is rotated.
    async fn remove(&self, id: &SessionId) -> OidcResult<()>;

    /// Clean up expired sessions
    async fn cleanup_expired(&self) -> OidcResult<usize>;
}

#[derive(Debug, Clone)]
struct StoredSession {
    session: AuthSession,
    expires_at: DateTime<Utc>,
}

/// In-memory implementation of SessionStore with an idle timeout.
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, StoredSession>>>,
    idle_ttl: Duration,
}

impl InMemorySessionStore {
    /// Fails with [`OidcError::Configuration`] unless the TTL is positive and
    /// within [`MAX_TTL_SECONDS`](crate::MAX_TTL_SECONDS).
    pub fn new(idle_ttl_seconds: u64) -> OidcResult<Self> {
        if idle_ttl_seconds == 0 {
            return Err(OidcError::Configuration(
                "session idle TTL must be positive".to_string(),
            ));
        }
        let idle_ttl = ttl_from_seconds("session idle TTL", idle_ttl_seconds)?;
        Ok(Self::with_idle_ttl(idle_ttl))
    }

    fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_ttl,
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_idle_ttl(Duration::hours(24))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> OidcResult<Option<AuthSession>> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        if sessions.get(id).is_some_and(|stored| now > stored.expires_at) {
            sessions.remove(id);
            return Ok(None);
        }

        Ok(sessions.get(id).map(|stored| stored.session.clone()))
    }

    async fn set(&self, id: &SessionId, session: AuthSession) -> OidcResult<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            id.clone(),
            StoredSession {
                session,
                expires_at: Utc::now() + self.idle_ttl,
            },
        );
        Ok(())
    }

    async fn remove(&self, id: &SessionId) -> OidcResult<()> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn cleanup_expired(&self) -> OidcResult<usize> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();

        let before = sessions.len();
        sessions.retain(|_, stored| stored.expires_at >= now);
        Ok(before - sessions.len())
    }
}
