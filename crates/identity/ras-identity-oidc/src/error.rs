//! OIDC login error types.

use http::StatusCode;
use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

/// Everything that can end a login request.
///
/// Variants carry rendered messages rather than source errors so that the
/// state machine can hand an error back as a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OidcError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Provider discovery failed: {0}")]
    Discovery(String),

    #[error("State parameter does not match the pending login")]
    StateMismatch,

    #[error("Missing authorization code")]
    MissingAuthorizationCode,

    #[error("Pending login expired")]
    LoginExpired,

    #[error("Provider returned error {error}: {description}")]
    ProviderError { error: String, description: String },

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("ID token validation failed: {0}")]
    TokenValidation(String),

    #[error("Nonce claim does not match the pending login")]
    NonceMismatch,

    #[error("Session store error: {0}")]
    SessionStore(String),
}

impl OidcError {
    /// Whether the user can simply try again.
    ///
    /// Callback failures are final for the login attempt they belong to; a retry
    /// has to start a new flow.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::SessionStore(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Discovery(_) | Self::SessionStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::StateMismatch
            | Self::MissingAuthorizationCode
            | Self::LoginExpired
            | Self::NonceMismatch => StatusCode::BAD_REQUEST,
            Self::ProviderError { .. } | Self::TokenExchange(_) | Self::TokenValidation(_) => {
                StatusCode::UNAUTHORIZED
            }
        }
    }

    /// Message safe to show to the browser.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Login is not configured correctly",
            Self::Discovery(_) | Self::SessionStore(_) => {
                "Login is temporarily unavailable, please try again"
            }
            Self::LoginExpired => "Login attempt expired, please start again",
            Self::ProviderError { .. } => "The identity provider rejected the login",
            _ => "Login attempt could not be verified",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for OidcError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::TokenValidation(err.to_string())
    }
}
