//! OpenID Connect relying party for browser sessions.
//!
//! This crate drives the Authorization Code flow with PKCE for one configured
//! issuer. Every request is routed through a small state machine: a session
//! without a login is redirected to the provider, the provider's callback is
//! checked (state, code, ID token signature and claims, nonce), and an
//! authenticated session is passed on to the application.
//!
//! The HTTP layer stays outside: feed [`Authenticator::handle`] the stored
//! [`AuthSession`] and an [`InboundRequest`], then persist the returned session
//! and answer with its result.

mod authenticator;
mod authorize;
mod callback;
mod client;
mod config;
mod discovery;
mod error;
mod machine;
mod pkce;
mod session;
mod types;

#[cfg(test)]
mod tests;

pub use authenticator::{AuthOutcome, AuthResponse, Authenticator, InboundRequest};
pub use authorize::{AuthorizationRequestBuilder, PreparedLogin};
pub use callback::CallbackValidator;
pub use client::OidcClient;
pub use config::{MAX_TTL_SECONDS, OidcConfig, SigningAlgorithm, ttl_from_seconds};
pub use discovery::ProviderDirectory;
pub use error::{OidcError, OidcResult};
pub use machine::{AuthEffect, AuthEvent, transition};
pub use pkce::{PkceChallenge, code_challenge, new_code_verifier, new_nonce, new_state};
pub use session::{
    AuthSession, AuthenticatedSession, FlowArtifacts, InMemorySessionStore, PendingLogin,
    SessionId, SessionStore,
};
pub use types::{
    Audience, CallbackParams, IdTokenClaims, ProviderMetadata, TokenResponse, TokenSet,
};

// Re-exported so callers can pin an algorithm without depending on jsonwebtoken.
pub use jsonwebtoken::Algorithm;
