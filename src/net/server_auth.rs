//! Server-rendering auth load.
//!
//! Runs once per rendered request: reads the session cookie, verifies it,
//! and hands the resulting snapshot to the client controller's `hydrate`
//! so the first paint shows the right user without a loading flash.

#[cfg(test)]
#[path = "server_auth_test.rs"]
mod server_auth_test;

use axum_extra::extract::cookie::CookieJar;

use super::auth_api::{SessionVerifier, VerifyResult, session_tag};
use super::types::AuthSnapshot;
use crate::state::controller::SESSION_COOKIE_NAME;

/// Session id carried by the request's cookies, if any.
#[must_use]
pub fn session_id_from_jar(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|cookie| cookie.value().to_owned())
        .filter(|value| !value.is_empty())
}

/// Verify `session_id` and produce the snapshot to hydrate with.
///
/// Anything short of a valid session yields the unauthenticated snapshot.
pub async fn load_server_auth(session_id: Option<&str>, verifier: &dyn SessionVerifier) -> AuthSnapshot {
    let Some(session_id) = session_id.filter(|sid| !sid.is_empty()) else {
        return AuthSnapshot::default();
    };

    match verifier.verify(session_id).await {
        VerifyResult::Valid { user, impersonation } => AuthSnapshot::authenticated(session_id, user, impersonation),
        VerifyResult::Invalid => AuthSnapshot::default(),
        VerifyResult::Failure { kind, message } => {
            tracing::warn!(session = session_tag(session_id), %kind, %message, "server auth load failed");
            AuthSnapshot::default()
        }
    }
}

pub async fn load_server_auth_from_jar(jar: &CookieJar, verifier: &dyn SessionVerifier) -> AuthSnapshot {
    let session_id = session_id_from_jar(jar);
    load_server_auth(session_id.as_deref(), verifier).await
}
