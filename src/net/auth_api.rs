//! Auth endpoints: session verification, login URL, logout.
//!
//! ERROR HANDLING
//! ==============
//! Verification never returns `Err`. Every outcome is folded into a
//! [`VerifyResult`], classified in priority order:
//! 1. no response reached us -> `Failure(network)`
//! 2. 400/401/403 -> `Invalid` (expected, not an error)
//! 3. 5xx -> `Failure(server)`
//! 4. any other non-2xx or malformed body -> `Failure(unknown)`

#[cfg(test)]
#[path = "auth_api_test.rs"]
mod auth_api_test;

use super::api::{ApiClient, ApiError, error_from_response};
use super::http::{HttpResponse, Method};
use super::types::{Impersonation, LoginUrlResponse, User, VerifyResponse};
use crate::state::auth::AuthErrorKind;

pub const VERIFY_ENDPOINT: &str = "/auth/github/verify";
pub const LOGIN_ENDPOINT: &str = "/auth/github/login";
pub const LOGOUT_ENDPOINT: &str = "/auth/github/logout";

const NETWORK_MESSAGE: &str = "Unable to connect to server. Please check your connection.";

/// Normalized outcome of a session verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyResult {
    Valid { user: User, impersonation: Option<Impersonation> },
    /// The session is absent, expired, or rejected.
    Invalid,
    Failure { kind: AuthErrorKind, message: String },
}

/// Validates a session id against the backend.
#[async_trait::async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, session_id: &str) -> VerifyResult;
}

/// Login/logout calls the session controller delegates to.
#[async_trait::async_trait]
pub trait AuthBackend: Send + Sync {
    /// Fetch the OAuth authorization URL to navigate to.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails or the URL is missing.
    async fn login_url(&self) -> Result<String, ApiError>;

    /// End the session server-side.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] if the request fails.
    async fn logout(&self) -> Result<(), ApiError>;
}

/// Backend auth endpoints over an [`ApiClient`].
#[derive(Clone)]
pub struct AuthApi {
    api: ApiClient,
}

impl AuthApi {
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[must_use]
pub fn verify_endpoint(session_id: &str) -> String {
    format!("{VERIFY_ENDPOINT}?session_id={}", urlencoding::encode(session_id))
}

/// Short, log-safe prefix of a session id.
#[must_use]
pub fn session_tag(session_id: &str) -> &str {
    let end = session_id
        .char_indices()
        .nth(8)
        .map_or(session_id.len(), |(i, _)| i);
    &session_id[..end]
}

#[async_trait::async_trait]
impl SessionVerifier for AuthApi {
    async fn verify(&self, session_id: &str) -> VerifyResult {
        let outcome = self
            .api
            .fetch(Method::Get, &verify_endpoint(session_id), None)
            .await;
        let result = classify_verify_outcome(outcome);
        match &result {
            VerifyResult::Valid { .. } => tracing::debug!(session = session_tag(session_id), "session verified"),
            VerifyResult::Invalid => tracing::debug!(session = session_tag(session_id), "session rejected"),
            VerifyResult::Failure { kind, message } => {
                tracing::warn!(session = session_tag(session_id), %kind, %message, "session verification failed");
            }
        }
        result
    }
}

#[async_trait::async_trait]
impl AuthBackend for AuthApi {
    async fn login_url(&self) -> Result<String, ApiError> {
        let body: LoginUrlResponse = self.api.get(LOGIN_ENDPOINT).await?;
        if body.auth_url.trim().is_empty() {
            return Err(ApiError::Decode("empty auth_url".to_owned()));
        }
        Ok(body.auth_url)
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.api
            .send_checked(Method::Get, LOGOUT_ENDPOINT, None)
            .await
            .map(|_| ())
    }
}

/// Classify a raw verify round-trip.
#[must_use]
pub fn classify_verify_outcome(outcome: Result<HttpResponse, ApiError>) -> VerifyResult {
    let resp = match outcome {
        Ok(resp) => resp,
        Err(ApiError::Network(_)) => {
            return VerifyResult::Failure { kind: AuthErrorKind::Network, message: NETWORK_MESSAGE.to_owned() };
        }
        Err(e) => return VerifyResult::Failure { kind: AuthErrorKind::Unknown, message: e.to_string() },
    };

    match resp.status {
        400 | 401 | 403 => return VerifyResult::Invalid,
        status if status >= 500 => {
            return VerifyResult::Failure {
                kind: AuthErrorKind::Server,
                message: format!("Server error: {}", error_from_response(&resp)),
            };
        }
        _ if !resp.is_success() => {
            return VerifyResult::Failure {
                kind: AuthErrorKind::Unknown,
                message: format!("Unexpected response from server (HTTP {})", resp.status),
            };
        }
        _ => {}
    }

    let body: VerifyResponse = match serde_json::from_slice(&resp.body) {
        Ok(body) => body,
        Err(e) => {
            return VerifyResult::Failure {
                kind: AuthErrorKind::Unknown,
                message: format!("Malformed verification response: {e}"),
            };
        }
    };

    match (body.valid, body.user) {
        (true, Some(user)) => VerifyResult::Valid { user: user.into_user(), impersonation: body.impersonation },
        _ => VerifyResult::Invalid,
    }
}
