//! Runs the login state machine for one request at a time.

use crate::authorize::AuthorizationRequestBuilder;
use crate::callback::CallbackValidator;
use crate::client::OidcClient;
use crate::config::OidcConfig;
use crate::discovery::ProviderDirectory;
use crate::error::{OidcError, OidcResult};
use crate::machine::{AuthEffect, AuthEvent, transition};
use crate::session::{AuthSession, AuthenticatedSession};
use crate::types::{CallbackParams, ProviderMetadata};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the HTTP layer needs to know about an incoming request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRequest {
    /// Path and query, as the browser asked for them.
    pub url: String,
    /// Present when the request hit the redirect URI path.
    pub callback: Option<CallbackParams>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthResponse {
    /// Continue to the application with this session.
    PassThrough(AuthenticatedSession),
    /// Redirect the browser.
    Redirect(String),
}

/// The session to persist and what to answer.
///
/// The session must be stored whether or not `result` is an error: a failed
/// callback still consumes the login's artifacts.
#[derive(Debug)]
pub struct AuthOutcome {
    pub session: AuthSession,
    pub result: OidcResult<AuthResponse>,
}

pub struct Authenticator {
    config: OidcConfig,
    directory: Arc<ProviderDirectory>,
    builder: AuthorizationRequestBuilder,
    validator: CallbackValidator,
}

impl Authenticator {
    pub fn new(config: OidcConfig) -> OidcResult<Self> {
        let discovery_ttl = config.discovery_ttl()?;
        let pending_login_ttl = config.pending_login_ttl()?;
        let client = Arc::new(OidcClient::new(&config)?);
        let directory = Arc::new(ProviderDirectory::new(
            client.http_client().clone(),
            config.discovery_url(),
            discovery_ttl,
        ));

        Ok(Self {
            builder: AuthorizationRequestBuilder::new(
                client.clone(),
                directory.clone(),
                pending_login_ttl,
            ),
            validator: CallbackValidator::new(client),
            directory,
            config,
        })
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    pub fn directory(&self) -> &ProviderDirectory {
        &self.directory
    }

    /// Classify a request target as callback or ordinary request.
    pub fn inbound(&self, path_and_query: &str) -> InboundRequest {
        let (path, query) = path_and_query
            .split_once('?')
            .unwrap_or((path_and_query, ""));

        let callback = (path == self.config.callback_path()).then(|| parse_callback(query));

        InboundRequest {
            url: same_origin_path(path_and_query),
            callback,
        }
    }

    /// Advance `session` for one request, performing discovery, the
    /// authorization redirect or the callback checks as the state machine asks.
    pub async fn handle(&self, session: AuthSession, request: InboundRequest) -> AuthOutcome {
        let InboundRequest { url, callback } = request;
        let event = AuthEvent::Request {
            url,
            callback: callback.is_some(),
        };
        let params = callback.unwrap_or_default();

        // Resolve the provider before the machine spends the login's artifacts,
        // so that a discovery outage leaves the callback retryable.
        let mut metadata = None;
        if is_live_callback(&session, &event) {
            match self.directory.metadata().await {
                Ok(resolved) => metadata = Some(resolved),
                Err(err) => return AuthOutcome::fail(session, err),
            }
        }

        let mut step = transition(session, event, Utc::now());
        loop {
            let (session, effect) = step;
            step = match effect {
                AuthEffect::PassThrough(auth) => {
                    debug!("Session for {} is authenticated", auth.subject());
                    return AuthOutcome::respond(session, AuthResponse::PassThrough(auth));
                }
                AuthEffect::Redirect(url) => {
                    return AuthOutcome::respond(session, AuthResponse::Redirect(url));
                }
                AuthEffect::Fail(err) => return AuthOutcome::fail(session, err),
                AuthEffect::BeginLogin { original_url } => {
                    match self.builder.prepare(original_url).await {
                        Ok(prepared) => transition(
                            session,
                            AuthEvent::LoginPrepared {
                                login: prepared.login,
                                authorization_url: prepared.authorization_url,
                            },
                            Utc::now(),
                        ),
                        Err(err) => return AuthOutcome::fail(session, err),
                    }
                }
                AuthEffect::ValidateCallback(artifacts) => {
                    let verdict = match self.callback_metadata(metadata.take()).await {
                        Ok(metadata) => {
                            self.validator
                                .validate(&metadata, &artifacts, &params)
                                .await
                        }
                        Err(err) => Err(err),
                    };
                    let event = match verdict {
                        Ok(tokens) => AuthEvent::CallbackAccepted(tokens),
                        Err(err) => AuthEvent::CallbackRejected(err),
                    };
                    transition(session, event, Utc::now())
                }
            };
        }
    }

    async fn callback_metadata(
        &self,
        prefetched: Option<Arc<ProviderMetadata>>,
    ) -> OidcResult<Arc<ProviderMetadata>> {
        match prefetched {
            Some(metadata) => Ok(metadata),
            None => self.directory.metadata().await,
        }
    }
}

/// A callback the machine will validate, i.e. one that would spend artifacts.
fn is_live_callback(session: &AuthSession, event: &AuthEvent) -> bool {
    let is_callback = matches!(event, AuthEvent::Request { callback: true, .. });
    is_callback
        && session
            .pending()
            .is_some_and(|pending| pending.artifacts.is_some() && !pending.is_expired_at(Utc::now()))
}

impl AuthOutcome {
    fn respond(session: AuthSession, response: AuthResponse) -> Self {
        Self {
            session,
            result: Ok(response),
        }
    }

    fn fail(session: AuthSession, err: OidcError) -> Self {
        warn!("Login request failed in phase {}: {}", session.phase(), err);
        Self {
            session,
            result: Err(err),
        }
    }
}

fn parse_callback(query: &str) -> CallbackParams {
    let mut params = CallbackParams::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let slot = match key.as_ref() {
            "code" => &mut params.code,
            "state" => &mut params.state,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            _ => continue,
        };
        slot.get_or_insert_with(|| value.into_owned());
    }
    params
}

/// Restrict the post-login target to a local path.
fn same_origin_path(target: &str) -> String {
    let local = target.starts_with('/') && !target.starts_with("//") && !target.starts_with("/\\");
    if local { target.to_string() } else { "/".to_string() }
}
