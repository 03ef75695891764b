use axum::{
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use ras_identity_oidc::OidcError;
use tracing::{error, warn};

/// Seconds a browser should wait before retrying a temporarily failed login.
const RETRY_AFTER_SECONDS: &str = "5";

/// A login failure rendered for the browser.
///
/// Only the generic message is sent; the underlying error goes to the log.
#[derive(Debug)]
pub struct AppError(pub OidcError);

impl From<OidcError> for AppError {
    fn from(err: OidcError) -> Self {
        Self(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            error!("Login failed with {}: {}", status, self.0);
        } else {
            warn!("Login rejected with {}: {}", status, self.0);
        }

        let mut response = (status, self.0.public_message()).into_response();
        if self.0.is_retryable() {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(RETRY_AFTER_SECONDS),
            );
        }
        response
    }
}
