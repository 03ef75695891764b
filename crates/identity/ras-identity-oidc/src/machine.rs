//! Login state machine.
//!
//! [`transition`] is a pure function from the current session and an event to
//! the next session and the effect the caller must carry out. Network work
//! (discovery, token exchange) happens outside and is fed back in as events.

use crate::error::OidcError;
use crate::session::{AuthSession, AuthenticatedSession, FlowArtifacts, PendingLogin};
use crate::types::TokenSet;
use chrono::{DateTime, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum AuthEvent {
    /// A browser request arrived. `callback` is set for the redirect URI path.
    Request { url: String, callback: bool },
    /// Artifacts were generated and the authorization URL built.
    LoginPrepared {
        login: PendingLogin,
        authorization_url: String,
    },
    /// The callback passed every check.
    CallbackAccepted(TokenSet),
    /// The callback failed one of its checks.
    CallbackRejected(OidcError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEffect {
    /// Hand the request to the application.
    PassThrough(AuthenticatedSession),
    /// Build an authorization request for this URL.
    BeginLogin { original_url: String },
    /// Check the callback against these artifacts.
    ValidateCallback(FlowArtifacts),
    /// Send the browser elsewhere.
    Redirect(String),
    /// End the request with this error.
    Fail(OidcError),
}

pub fn transition(
    session: AuthSession,
    event: AuthEvent,
    now: DateTime<Utc>,
) -> (AuthSession, AuthEffect) {
    let from = session.phase();
    let (next, effect) = step(session, event, now);
    debug!("Login transition {} -> {}", from, next.phase());
    (next, effect)
}

fn step(session: AuthSession, event: AuthEvent, now: DateTime<Utc>) -> (AuthSession, AuthEffect) {
    match (session, event) {
        (AuthSession::Authenticated(auth), AuthEvent::Request { .. }) => {
            let effect = AuthEffect::PassThrough(auth.clone());
            (AuthSession::Authenticated(auth), effect)
        }

        (AuthSession::AwaitingCallback(mut pending), AuthEvent::Request { callback: true, .. }) => {
            if pending.is_expired_at(now) {
                return (AuthSession::PreFlow, AuthEffect::Fail(OidcError::LoginExpired));
            }
            // Single use: whatever the outcome, these artifacts never validate again.
            match pending.artifacts.take() {
                Some(artifacts) => (
                    AuthSession::AwaitingCallback(pending),
                    AuthEffect::ValidateCallback(artifacts),
                ),
                None => (
                    AuthSession::AwaitingCallback(pending),
                    AuthEffect::Fail(OidcError::StateMismatch),
                ),
            }
        }

        // No login is waiting for this callback.
        (AuthSession::PreFlow, AuthEvent::Request { callback: true, .. }) => {
            (AuthSession::PreFlow, AuthEffect::Fail(OidcError::StateMismatch))
        }

        // A fresh attempt replaces whatever half-finished one was there.
        (
            AuthSession::PreFlow | AuthSession::AwaitingCallback(_),
            AuthEvent::Request {
                url,
                callback: false,
            },
        ) => (
            AuthSession::PreFlow,
            AuthEffect::BeginLogin { original_url: url },
        ),

        (
            AuthSession::PreFlow | AuthSession::AwaitingCallback(_),
            AuthEvent::LoginPrepared {
                login,
                authorization_url,
            },
        ) => (
            AuthSession::AwaitingCallback(login),
            AuthEffect::Redirect(authorization_url),
        ),

        (AuthSession::AwaitingCallback(pending), AuthEvent::CallbackAccepted(tokens)) => {
            let original_url = pending.original_url;
            (
                AuthSession::Authenticated(AuthenticatedSession {
                    tokens,
                    original_url: original_url.clone(),
                    authenticated_at: now,
                }),
                AuthEffect::Redirect(original_url),
            )
        }

        (AuthSession::AwaitingCallback(pending), AuthEvent::CallbackRejected(err)) => {
            (AuthSession::AwaitingCallback(pending), AuthEffect::Fail(err))
        }

        // Results for a flow this session no longer holds.
        (session, _) => (session, AuthEffect::Fail(OidcError::StateMismatch)),
    }
}
