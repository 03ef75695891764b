//! Puts an OpenID Connect login in front of an axum router.
//!
//! Every request passes through [`middleware::authenticate`], which loads the
//! browser's session from the `SESSION` cookie, advances the login with
//! [`Authenticator`], stores the session again and either redirects or hands
//! the request to the wrapped router with an [`AuthenticatedSession`]
//! extension.

pub mod config;
pub mod error;
pub mod middleware;

use axum::{Extension, Router, routing::get};
use ras_identity_oidc::{AuthenticatedSession, Authenticator, SessionStore, TokenSet};
use std::sync::Arc;
use tracing::debug;

pub use config::{CookieSettings, ServerConfig};
pub use error::AppError;

/// Shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub store: Arc<dyn SessionStore>,
    pub cookie: CookieSettings,
}

impl AppState {
    pub fn new(
        authenticator: Authenticator,
        store: Arc<dyn SessionStore>,
        cookie: CookieSettings,
    ) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            store,
            cookie,
        }
    }
}

/// Wrap `downstream` so that it only ever sees authenticated requests.
pub fn protect(downstream: Router, state: AppState) -> Router {
    downstream.layer(axum::middleware::from_fn_with_state(
        state,
        middleware::authenticate,
    ))
}

/// The demo application: every path answers for the logged-in user.
pub fn app(state: AppState) -> Router {
    let downstream = Router::new()
        .route("/whoami", get(whoami_handler))
        .fallback(ok_handler);
    protect(downstream, state)
}

async fn ok_handler(Extension(session): Extension<AuthenticatedSession>) -> String {
    debug!(
        "Serving {} for {} ({})",
        session.original_url,
        session.subject(),
        token_summary(&session.tokens)
    );
    format!("OK {}", session.subject())
}

/// Token metadata that is safe to log; never the tokens themselves.
fn token_summary(tokens: &TokenSet) -> String {
    format!(
        "token_type={}, scope={}, expires_in={:?}, refresh_token={}",
        tokens.token_type,
        tokens.scope.as_deref().unwrap_or("-"),
        tokens.expires_in,
        tokens.refresh_token.is_some()
    )
}

async fn whoami_handler(
    Extension(session): Extension<AuthenticatedSession>,
) -> axum::Json<serde_json::Value> {
    let claims = &session.tokens.claims;
    axum::Json(serde_json::json!({
        "sub": claims.sub,
        "name": claims.name,
        "email": claims.email,
        "authenticated_at": session.authenticated_at,
    }))
}
