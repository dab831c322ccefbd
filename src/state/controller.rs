//! Auth session controller.
//!
//! SYSTEM CONTEXT
//! ==============
//! One controller per client context owns the observable [`AuthState`].
//! It reconciles three sources of truth:
//! - the session cookie (`rustytime_session`) in the injected store,
//! - the cached [`AuthSnapshot`] for that session,
//! - live verification against the backend.
//!
//! Consumers read through [`AuthSessionController::subscribe`]; only the
//! controller writes.
//!
//! CONCURRENCY
//! ===========
//! Verifications may overlap. Each one is tagged with the session id it was
//! issued for and the logout epoch at issue time; a completion is applied
//! only if the cookie still holds that session and no logout happened in
//! between. `is_loading` stays set while any verification is outstanding.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here returns an error. Rejected sessions clear state silently;
//! network and server failures become an advisory `error` on top of the
//! last known identity.

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::auth::{AuthError, AuthErrorKind, AuthState};
use super::snapshot::SessionSnapshotStore;
use crate::config::ClientConfig;
use crate::net::api::ApiError;
use crate::net::auth_api::{AuthBackend, SessionVerifier, VerifyResult, session_tag};
use crate::net::types::AuthSnapshot;
use crate::util::cookie_store::{KeyValueStore, remove_or_expire};
use crate::util::refresh::{DEFAULT_REFRESH_INTERVAL, RefreshOptions};

pub const SESSION_COOKIE_NAME: &str = "rustytime_session";

const NETWORK_MESSAGE: &str = "Unable to connect to server. Please check your connection.";

/// Page-level navigation capabilities.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    /// Full navigation away from the app (e.g. to the OAuth provider).
    fn navigate(&self, url: &str);

    /// Reload all data that depends on the session.
    async fn invalidate_all(&self);
}

/// Capabilities the controller is built on.
#[derive(Clone)]
pub struct AuthPorts {
    pub store: Arc<dyn KeyValueStore>,
    pub verifier: Arc<dyn SessionVerifier>,
    pub backend: Arc<dyn AuthBackend>,
    pub navigator: Arc<dyn Navigator>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub secure_cookies: bool,
    /// Linked from the login failure message.
    pub status_page_url: String,
    pub refresh_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            secure_cookies: false,
            status_page_url: "/status".to_owned(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl From<&ClientConfig> for ControllerSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            secure_cookies: config.cookie_secure,
            status_page_url: config.status_page_url.clone(),
            refresh_interval: config.refresh_interval,
        }
    }
}

pub struct AuthSessionController {
    state: watch::Sender<AuthState>,
    ports: AuthPorts,
    snapshots: SessionSnapshotStore,
    settings: ControllerSettings,
    /// Bumped by every logout; verifications issued before it are stale.
    logout_epoch: AtomicU64,
    pending: AtomicUsize,
    disposed: AtomicBool,
    error_listener: Mutex<Option<JoinHandle<()>>>,
}

impl AuthSessionController {
    #[must_use]
    pub fn new(ports: AuthPorts, settings: ControllerSettings) -> Self {
        let snapshots = SessionSnapshotStore::new(Arc::clone(&ports.store), settings.secure_cookies);
        let (state, _) = watch::channel(AuthState::default());
        Self {
            state,
            ports,
            snapshots,
            settings,
            logout_epoch: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            error_listener: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn snapshots(&self) -> &SessionSnapshotStore {
        &self.snapshots
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Session id from the cookie store. Empty or unreadable counts as absent.
    #[must_use]
    pub fn current_session_id(&self) -> Option<String> {
        match self.ports.store.get(SESSION_COOKIE_NAME) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "session cookie unreadable");
                None
            }
        }
    }

    // =========================================================================
    // RECONCILIATION
    // =========================================================================

    /// Seed state from a snapshot produced elsewhere (typically the server
    /// rendering phase) without touching the network. `None` seeds the
    /// unauthenticated state. Any error is cleared.
    pub fn hydrate(&self, snapshot: Option<AuthSnapshot>) {
        if self.is_disposed() {
            return;
        }
        let snapshot = snapshot.unwrap_or_default();
        let still_loading = self.pending.load(Ordering::SeqCst) > 0;
        self.state.send_modify(|state| {
            *state = AuthState::from_snapshot(snapshot);
            state.is_loading = still_loading;
        });
    }

    /// Per-navigation entry point: snapshot fast path, verification otherwise.
    pub async fn resolve(&self) {
        if self.is_disposed() {
            return;
        }
        let session_id = self.current_session_id();
        if let Some(snapshot) = self.snapshots.read() {
            if session_id.is_some() && snapshot.session_id == session_id && snapshot.is_authenticated() {
                tracing::debug!(session = session_tag(session_id.as_deref().unwrap_or_default()), "auth snapshot hit");
                self.hydrate(Some(snapshot));
                return;
            }
            tracing::debug!("auth snapshot does not match session; dropping it");
            self.snapshots.clear();
        }
        self.verify().await;
    }

    /// Verify the current session against the backend.
    pub async fn verify(&self) {
        if self.is_disposed() {
            return;
        }

        let Some(session_id) = self.current_session_id() else {
            self.snapshots.clear();
            self.state.send_modify(|state| {
                state.sign_out();
                state.initialized = true;
            });
            return;
        };

        let epoch = self.logout_epoch.load(Ordering::SeqCst);
        let pending = PendingVerification::begin(self);
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });

        let result = self.ports.verifier.verify(&session_id).await;
        let still_loading = pending.finish();

        if self.is_disposed() {
            return;
        }
        let superseded = epoch != self.logout_epoch.load(Ordering::SeqCst)
            || self.current_session_id().as_deref() != Some(session_id.as_str());
        if superseded {
            tracing::debug!(session = session_tag(&session_id), "discarding stale verification");
            self.publish_loading(still_loading);
            return;
        }

        match result {
            VerifyResult::Valid { user, impersonation } => {
                self.snapshots.write(&AuthSnapshot::authenticated(
                    session_id.clone(),
                    user.clone(),
                    impersonation.clone(),
                ));
                self.state.send_modify(|state| {
                    state.sign_in(Some(session_id), user, impersonation);
                    state.initialized = true;
                    state.is_loading = still_loading;
                });
            }
            VerifyResult::Invalid => {
                self.snapshots.clear();
                self.state.send_modify(|state| {
                    state.sign_out();
                    state.error = None;
                    state.initialized = true;
                    state.is_loading = still_loading;
                });
            }
            VerifyResult::Failure { kind, message } => {
                self.state.send_modify(|state| {
                    state.error = Some(AuthError::new(kind, message));
                    state.initialized = true;
                    state.is_loading = still_loading;
                });
            }
        }
    }

    fn publish_loading(&self, still_loading: bool) {
        self.state.send_if_modified(|state| {
            let changed = state.is_loading != still_loading;
            state.is_loading = still_loading;
            changed
        });
    }

    /// Clear the error, then reload session-dependent data.
    pub async fn retry_verification(&self) {
        if self.is_disposed() {
            return;
        }
        self.state.send_modify(|state| {
            state.is_loading = true;
            state.error = None;
        });
        self.ports.navigator.invalidate_all().await;
        let still_loading = self.pending.load(Ordering::SeqCst) > 0;
        self.state.send_modify(|state| state.is_loading = still_loading);
    }

    // =========================================================================
    // LOGIN / LOGOUT
    // =========================================================================

    pub async fn login(&self) {
        if self.is_disposed() {
            return;
        }
        match self.ports.backend.login_url().await {
            Ok(url) => self.ports.navigator.navigate(&url),
            Err(e) => {
                tracing::error!(error = %e, "login failed");
                let message = format!(
                    "Unable to start login. Please try again, or check {} for service status.",
                    self.settings.status_page_url
                );
                self.set_error(AuthErrorKind::Unknown, message);
            }
        }
    }

    /// End the session. Local state is cleared whether or not the backend
    /// call succeeds.
    pub async fn logout(&self) {
        if self.is_disposed() {
            return;
        }
        if let Err(e) = self.ports.backend.logout().await {
            tracing::warn!(error = %e, "backend logout failed; clearing local session anyway");
        }

        self.logout_epoch.fetch_add(1, Ordering::SeqCst);
        remove_or_expire(self.ports.store.as_ref(), SESSION_COOKIE_NAME, self.settings.secure_cookies);
        self.snapshots.clear();
        let still_loading = self.pending.load(Ordering::SeqCst) > 0;
        self.state.send_modify(|state| {
            state.sign_out();
            state.error = None;
            state.initialized = true;
            state.is_loading = still_loading;
        });

        self.ports.navigator.invalidate_all().await;
    }

    // =========================================================================
    // ERRORS
    // =========================================================================

    pub fn clear_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    pub fn set_error(&self, kind: AuthErrorKind, message: impl Into<String>) {
        if self.is_disposed() {
            return;
        }
        let error = AuthError::new(kind, message);
        self.state.send_modify(|state| state.error = Some(error));
    }

    /// Raise an advisory banner for a failed API call.
    ///
    /// Only network and 5xx failures count, and an existing error is never
    /// overwritten.
    pub fn report_api_error(&self, error: &ApiError) {
        if self.is_disposed() {
            return;
        }
        let advisory = if error.is_network() {
            AuthError::new(AuthErrorKind::Network, NETWORK_MESSAGE)
        } else if error.is_server() {
            AuthError::new(AuthErrorKind::Server, format!("Server error: {error}"))
        } else {
            return;
        };
        self.state.send_if_modified(|state| {
            if state.error.is_some() {
                return false;
            }
            state.error = Some(advisory);
            true
        });
    }

    /// Drain an `ApiClient` error channel into [`Self::report_api_error`].
    /// Replaces any previous listener.
    pub fn spawn_error_listener(self: &Arc<Self>, mut errors: mpsc::UnboundedReceiver<ApiError>) {
        let this = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(error) = errors.recv().await {
                let Some(controller) = this.upgrade() else {
                    break;
                };
                controller.report_api_error(&error);
            }
        });
        let previous = self
            .error_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Terminal. Stops the error listener; later completions and calls are
    /// ignored.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let listener = self
            .error_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            listener.abort();
        }
        tracing::debug!("auth controller disposed");
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Scheduler options that periodically re-verify the session.
    #[must_use]
    pub fn refresh_options(self: &Arc<Self>) -> RefreshOptions<Infallible> {
        let this = Arc::clone(self);
        RefreshOptions::new(move || {
            let this = Arc::clone(&this);
            async move {
                this.verify().await;
                Ok(())
            }
        })
        .interval(self.settings.refresh_interval)
    }
}

/// Counts one outstanding verification. If the verifying future is dropped
/// before it completes, the count is released and `is_loading` republished.
struct PendingVerification<'a> {
    controller: &'a AuthSessionController,
    armed: bool,
}

impl<'a> PendingVerification<'a> {
    fn begin(controller: &'a AuthSessionController) -> Self {
        controller.pending.fetch_add(1, Ordering::SeqCst);
        Self { controller, armed: true }
    }

    /// Release the count; returns whether other verifications remain.
    fn finish(mut self) -> bool {
        self.armed = false;
        self.controller.pending.fetch_sub(1, Ordering::SeqCst) > 1
    }
}

impl Drop for PendingVerification<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let still_loading = self.controller.pending.fetch_sub(1, Ordering::SeqCst) > 1;
        tracing::debug!("verification cancelled before completion");
        if !self.controller.is_disposed() {
            self.controller.publish_loading(still_loading);
        }
    }
}

impl Drop for AuthSessionController {
    fn drop(&mut self) {
        if let Some(listener) = self
            .error_listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
    }
}
