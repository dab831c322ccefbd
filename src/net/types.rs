//! Shared auth wire/model types.
//!
//! SYSTEM CONTEXT
//! ==============
//! `User`, `Impersonation`, and `AuthSnapshot` are the client-side model of a
//! verified session. `VerifyResponse` is the raw backend payload; it is
//! normalized into the model by the verifier and never stored as-is.

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;

use serde::{Deserialize, Serialize};

/// Authenticated user as seen by the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub github_id: i64,
    /// Resolved display name; `None` when the backend had neither a name nor a login.
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    /// 0 for regular users; higher values grant admin capabilities.
    pub admin_level: i32,
}

impl User {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.admin_level > 0
    }
}

/// Identity of an administrator currently acting as the session's user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impersonation {
    pub admin_id: i64,
    #[serde(default)]
    pub admin_name: Option<String>,
    #[serde(default)]
    pub admin_avatar_url: Option<String>,
}

/// Last-verified auth result, cached per session id.
///
/// The default value is the unauthenticated snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSnapshot {
    pub session_id: Option<String>,
    pub user: Option<User>,
    pub impersonation: Option<Impersonation>,
}

impl AuthSnapshot {
    #[must_use]
    pub fn authenticated(session_id: impl Into<String>, user: User, impersonation: Option<Impersonation>) -> Self {
        Self { session_id: Some(session_id.into()), user: Some(user), impersonation }
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Body of `GET /auth/github/verify`.
#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default)]
    pub user: Option<VerifyUser>,
    #[serde(default)]
    pub impersonation: Option<Impersonation>,
}

/// User record inside a verify response.
#[derive(Debug, Deserialize)]
pub struct VerifyUser {
    pub id: i64,
    pub github_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub admin_level: i32,
}

impl VerifyUser {
    /// Display name first, login second. Blank values count as absent.
    #[must_use]
    pub fn resolve_name(&self) -> Option<String> {
        non_blank(self.name.as_deref())
            .or_else(|| non_blank(self.username.as_deref()))
            .map(str::to_owned)
    }

    #[must_use]
    pub fn into_user(self) -> User {
        let name = self.resolve_name();
        User { id: self.id, github_id: self.github_id, name, avatar_url: self.avatar_url, admin_level: self.admin_level }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Body of `GET /auth/github/login`.
#[derive(Debug, Deserialize)]
pub struct LoginUrlResponse {
    pub auth_url: String,
}
