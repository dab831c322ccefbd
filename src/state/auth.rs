//! Auth-session state for the current client context.
//!
//! SYSTEM CONTEXT
//! ==============
//! Owned and written only by `AuthSessionController`; route guards and
//! user-aware views read it through a `watch` subscription.
//!
//! Errors are an overlay: a network or server error can sit on top of a
//! still-authenticated state restored from a prior snapshot.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use time::OffsetDateTime;

use crate::net::types::{AuthSnapshot, Impersonation, User};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthErrorKind {
    /// Session rejected where a caller expected it to be valid.
    Unauthorized,
    /// Backend unreachable.
    Network,
    /// Backend answered with a 5xx.
    Server,
    /// Anything else, including malformed responses.
    Unknown,
}

impl AuthErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::Network => "network",
            Self::Server => "server",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory error shown as a banner; never blocks reads of the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    pub timestamp: OffsetDateTime,
}

impl AuthError {
    #[must_use]
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), timestamp: OffsetDateTime::now_utc() }
    }
}

/// Coarse lifecycle derived from [`AuthState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthStatus {
    /// Nothing hydrated or verified yet.
    #[default]
    Uninitialized,
    /// A verification request is outstanding.
    Loading,
    Authenticated,
    Unauthenticated,
}

/// Authentication state tracking the current user and verification status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<User>,
    pub session_id: Option<String>,
    /// True only while at least one verification request is outstanding.
    pub is_loading: bool,
    pub error: Option<AuthError>,
    pub impersonation: Option<Impersonation>,
    /// Set once the state has been hydrated or verified at least once.
    pub initialized: bool,
}

impl AuthState {
    /// Settled state seeded from a snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: AuthSnapshot) -> Self {
        let mut state = Self { initialized: true, ..Self::default() };
        match snapshot.user {
            Some(user) => state.sign_in(snapshot.session_id, user, snapshot.impersonation),
            None => state.sign_out(),
        }
        state
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    #[must_use]
    pub fn is_impersonating(&self) -> bool {
        self.impersonation.is_some()
    }

    #[must_use]
    pub fn error_kind(&self) -> Option<AuthErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    #[must_use]
    pub fn status(&self) -> AuthStatus {
        if self.is_loading {
            AuthStatus::Loading
        } else if !self.initialized {
            AuthStatus::Uninitialized
        } else if self.is_authenticated() {
            AuthStatus::Authenticated
        } else {
            AuthStatus::Unauthenticated
        }
    }

    /// The persistable part of the state.
    #[must_use]
    pub fn snapshot(&self) -> AuthSnapshot {
        AuthSnapshot {
            session_id: self.session_id.clone(),
            user: self.user.clone(),
            impersonation: self.impersonation.clone(),
        }
    }

    pub(crate) fn sign_in(&mut self, session_id: Option<String>, user: User, impersonation: Option<Impersonation>) {
        self.user = Some(user);
        self.session_id = session_id;
        self.impersonation = impersonation;
    }

    /// Clear identity. Impersonation never outlives the user.
    pub(crate) fn sign_out(&mut self) {
        self.user = None;
        self.session_id = None;
        self.impersonation = None;
    }
}
