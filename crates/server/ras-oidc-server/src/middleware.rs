//! Session cookie handling around the login state machine.

use crate::{AppState, error::AppError};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use ras_identity_oidc::{AuthResponse, AuthSession, OidcResult, SessionId};
use tracing::debug;

pub async fn authenticate(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let (session_id, session) = match load_session(&state, &jar).await {
        Ok(loaded) => loaded,
        Err(err) => return AppError(err).into_response(),
    };

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let inbound = state.authenticator.inbound(target);
    let was_authenticated = session.is_authenticated();
    let outcome = state.authenticator.handle(session, inbound).await;

    // A completed login gets a new id so that a planted pre-login id is worthless.
    let session_id = if outcome.session.is_authenticated() && !was_authenticated {
        match rotate(&state, &session_id).await {
            Ok(rotated) => rotated,
            Err(err) => return AppError(err).into_response(),
        }
    } else {
        session_id
    };

    // Stored even on failure: a rejected callback has still spent its artifacts.
    if let Err(err) = state.store.set(&session_id, outcome.session).await {
        return AppError(err).into_response();
    }
    let jar = jar.add(state.cookie.session_cookie(&session_id));

    let response = match outcome.result {
        Ok(AuthResponse::PassThrough(authenticated)) => {
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Ok(AuthResponse::Redirect(location)) => Redirect::to(&location).into_response(),
        Err(err) => AppError(err).into_response(),
    };

    (jar, response).into_response()
}

async fn rotate(state: &AppState, old: &SessionId) -> OidcResult<SessionId> {
    state.store.remove(old).await?;
    let new = SessionId::generate();
    debug!("Rotated session {:?} to {:?} after login", old, new);
    Ok(new)
}

/// The session named by the cookie, or a fresh one under a new id.
async fn load_session(state: &AppState, jar: &CookieJar) -> OidcResult<(SessionId, AuthSession)> {
    if let Some(cookie) = jar.get(&state.cookie.name) {
        let id = SessionId::from(cookie.value());
        if let Some(session) = state.store.get(&id).await? {
            debug!("Resuming session {:?} in phase {}", id, session.phase());
            return Ok((id, session));
        }
        debug!("Ignoring unknown session {:?}", id);
    }

    Ok((SessionId::generate(), AuthSession::default()))
}
