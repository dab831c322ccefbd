//! Shared route auth helpers.
//!
//! SYSTEM CONTEXT
//! ==============
//! Protected pages apply identical redirect and load-on-ready behavior, so
//! the decision lives here and each page only acts on the result.

#[cfg(test)]
#[path = "auth_test.rs"]
mod auth_test;

use crate::state::auth::{AuthState, AuthStatus};

/// Where non-admins land when a page requires admin.
pub const ADMIN_FALLBACK: &str = "/dashboard";

/// True once auth has settled and no user is present.
#[must_use]
pub fn should_redirect_unauth(state: &AuthState) -> bool {
    state.status() == AuthStatus::Unauthenticated
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateRequirements {
    pub require_admin: bool,
    /// Destination for unauthenticated visitors.
    pub redirect_to: &'static str,
}

impl Default for GateRequirements {
    fn default() -> Self {
        Self { require_admin: false, redirect_to: "/" }
    }
}

/// What the page's own data loader currently holds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageLoad {
    pub has_data: bool,
    pub loading: bool,
    pub has_error: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Auth not settled yet.
    Wait,
    Redirect(&'static str),
    /// Authorized and nothing loaded yet; start the page load.
    Load,
    Ready,
}

#[must_use]
pub fn auth_gate(state: &AuthState, requirements: GateRequirements, page: PageLoad) -> GateDecision {
    match state.status() {
        AuthStatus::Uninitialized | AuthStatus::Loading => return GateDecision::Wait,
        AuthStatus::Unauthenticated => return GateDecision::Redirect(requirements.redirect_to),
        AuthStatus::Authenticated => {}
    }

    if requirements.require_admin && !state.user.as_ref().is_some_and(crate::net::types::User::is_admin) {
        return GateDecision::Redirect(ADMIN_FALLBACK);
    }

    if !page.has_data && !page.loading && !page.has_error {
        GateDecision::Load
    } else {
        GateDecision::Ready
    }
}
