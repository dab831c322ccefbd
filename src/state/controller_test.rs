use std::sync::atomic::Ordering;

use super::*;
use crate::state::auth::AuthStatus;
use crate::test_support::{
    FakeBackend, FakeVerifier, RecordingNavigator, sample_impersonation, sample_user,
};
use crate::util::cookie_store::{CookieOptions, MemoryStore};
use crate::util::refresh::VisibilityRefresh;
use crate::util::visibility::VisibilityWatch;

struct Harness {
    controller: Arc<AuthSessionController>,
    store: Arc<MemoryStore>,
    verifier: Arc<FakeVerifier>,
    backend: Arc<FakeBackend>,
    navigator: Arc<RecordingNavigator>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let verifier = FakeVerifier::new();
        let backend = FakeBackend::new();
        let navigator = RecordingNavigator::new();
        let ports = AuthPorts {
            store: store.clone(),
            verifier: verifier.clone(),
            backend: backend.clone(),
            navigator: navigator.clone(),
        };
        let controller = Arc::new(AuthSessionController::new(ports, ControllerSettings::default()));
        Self { controller, store, verifier, backend, navigator }
    }

    fn set_session(&self, session_id: &str) {
        self.store
            .set(SESSION_COOKIE_NAME, session_id, CookieOptions::persistent(false))
            .unwrap();
    }

    fn spawn_verify(&self) -> JoinHandle<()> {
        let controller = self.controller.clone();
        tokio::spawn(async move { controller.verify().await })
    }
}

fn valid(id: i64) -> VerifyResult {
    VerifyResult::Valid { user: sample_user(id), impersonation: None }
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// =============================================================
// verify
// =============================================================

#[tokio::test]
async fn verify_without_session_skips_network() {
    let h = Harness::new();
    h.controller.verify().await;

    let state = h.controller.state();
    assert_eq!(state.status(), AuthStatus::Unauthenticated);
    assert_eq!(h.verifier.call_count(), 0);
}

#[tokio::test]
async fn verify_valid_signs_in_and_writes_snapshot() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.verifier.push(VerifyResult::Valid { user: sample_user(1), impersonation: Some(sample_impersonation()) });

    h.controller.verify().await;

    let state = h.controller.state();
    assert_eq!(state.status(), AuthStatus::Authenticated);
    assert_eq!(state.session_id.as_deref(), Some("sid-1"));
    assert!(state.is_impersonating());
    assert_eq!(
        h.controller.snapshots().read(),
        Some(AuthSnapshot::authenticated("sid-1", sample_user(1), Some(sample_impersonation())))
    );
    assert_eq!(h.verifier.calls(), vec!["sid-1".to_owned()]);
}

#[tokio::test]
async fn verify_invalid_clears_state_and_snapshot_silently() {
    let h = Harness::new();
    h.set_session("sid-1");
    let snapshot = AuthSnapshot::authenticated("sid-1", sample_user(1), Some(sample_impersonation()));
    h.controller.snapshots().write(&snapshot);
    h.controller.hydrate(Some(snapshot));
    h.controller.set_error(AuthErrorKind::Server, "earlier");
    h.verifier.push(VerifyResult::Invalid);

    h.controller.verify().await;

    let state = h.controller.state();
    assert!(!state.is_authenticated());
    assert!(state.user.is_none());
    assert!(state.impersonation.is_none());
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert_eq!(h.controller.snapshots().read(), None);
}

#[tokio::test]
async fn network_failure_keeps_last_known_identity() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.controller
        .hydrate(Some(AuthSnapshot::authenticated("sid-1", sample_user(1), Some(sample_impersonation()))));
    h.verifier.push(VerifyResult::Failure { kind: AuthErrorKind::Network, message: "offline".to_owned() });

    h.controller.verify().await;

    let state = h.controller.state();
    assert_eq!(state.user, Some(sample_user(1)));
    assert_eq!(state.impersonation, Some(sample_impersonation()));
    assert_eq!(state.error_kind(), Some(AuthErrorKind::Network));
    assert_eq!(state.status(), AuthStatus::Authenticated);
    assert!(!state.is_loading);
}

#[tokio::test]
async fn server_failure_sets_server_error() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.verifier.push(VerifyResult::Failure { kind: AuthErrorKind::Server, message: "Server error: HTTP 502".to_owned() });

    h.controller.verify().await;

    let state = h.controller.state();
    assert_eq!(state.error_kind(), Some(AuthErrorKind::Server));
    assert_eq!(state.status(), AuthStatus::Unauthenticated);
}

#[tokio::test]
async fn server_and_unknown_failures_keep_last_known_identity() {
    for kind in [AuthErrorKind::Server, AuthErrorKind::Unknown] {
        let h = Harness::new();
        h.set_session("sid-1");
        h.controller
            .hydrate(Some(AuthSnapshot::authenticated("sid-1", sample_user(1), Some(sample_impersonation()))));
        h.verifier.push(VerifyResult::Failure { kind, message: "backend hiccup".to_owned() });

        h.controller.verify().await;

        let state = h.controller.state();
        assert_eq!(state.user, Some(sample_user(1)), "{kind:?}");
        assert_eq!(state.session_id.as_deref(), Some("sid-1"), "{kind:?}");
        assert_eq!(state.impersonation, Some(sample_impersonation()), "{kind:?}");
        assert_eq!(state.error_kind(), Some(kind));
        assert_eq!(state.status(), AuthStatus::Authenticated);
    }
}

#[tokio::test]
async fn loading_tracks_outstanding_verification() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.controller.set_error(AuthErrorKind::Network, "stale banner");
    let gate = h.verifier.push_gated();

    let task = h.spawn_verify();
    settle().await;
    let state = h.controller.state();
    assert!(state.is_loading);
    assert_eq!(state.status(), AuthStatus::Loading);
    assert!(state.error.is_none());

    gate.send(valid(1)).unwrap();
    task.await.unwrap();
    assert!(!h.controller.state().is_loading);
}

#[tokio::test]
async fn cancelled_verification_releases_loading() {
    let h = Harness::new();
    h.set_session("sid-1");
    let _gate = h.verifier.push_gated();

    let task = h.spawn_verify();
    settle().await;
    assert!(h.controller.state().is_loading);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let state = h.controller.state();
    assert!(!state.is_loading);
    assert_ne!(state.status(), AuthStatus::Loading);

    h.verifier.push(valid(1));
    h.controller.verify().await;
    let state = h.controller.state();
    assert!(!state.is_loading);
    assert_eq!(state.status(), AuthStatus::Authenticated);
}

#[tokio::test]
async fn cancelled_verification_leaves_overlapping_one_loading() {
    let h = Harness::new();
    h.set_session("sid-1");
    let _first = h.verifier.push_gated();
    let second = h.verifier.push_gated();

    let cancelled = h.spawn_verify();
    settle().await;
    let outstanding = h.spawn_verify();
    settle().await;

    cancelled.abort();
    let _ = cancelled.await;
    assert!(h.controller.state().is_loading);

    second.send(valid(1)).unwrap();
    outstanding.await.unwrap();
    assert!(!h.controller.state().is_loading);
}

#[tokio::test]
async fn verification_cut_short_by_timeout_releases_loading() {
    let h = Harness::new();
    h.set_session("sid-1");
    let _gate = h.verifier.push_gated();

    let outcome = tokio::time::timeout(Duration::from_millis(10), h.controller.verify()).await;
    assert!(outcome.is_err());
    assert!(!h.controller.state().is_loading);
}

// =============================================================
// Stale completions
// =============================================================

#[tokio::test]
async fn completion_for_replaced_session_is_discarded() {
    let h = Harness::new();
    h.set_session("sid-old");
    let gate = h.verifier.push_gated();
    h.verifier.push(valid(2));

    let stale = h.spawn_verify();
    settle().await;

    h.set_session("sid-new");
    h.controller.verify().await;
    assert_eq!(h.controller.state().user, Some(sample_user(2)));
    assert!(h.controller.state().is_loading);

    gate.send(valid(1)).unwrap();
    stale.await.unwrap();

    let state = h.controller.state();
    assert_eq!(state.user, Some(sample_user(2)));
    assert_eq!(state.session_id.as_deref(), Some("sid-new"));
    assert!(!state.is_loading);
    assert_eq!(h.verifier.calls(), vec!["sid-old".to_owned(), "sid-new".to_owned()]);
}

#[tokio::test]
async fn logout_during_verification_is_not_undone() {
    let h = Harness::new();
    h.set_session("sid-1");
    let gate = h.verifier.push_gated();

    let pending = h.spawn_verify();
    settle().await;
    h.controller.logout().await;

    gate.send(valid(1)).unwrap();
    pending.await.unwrap();

    let state = h.controller.state();
    assert!(!state.is_authenticated());
    assert!(!state.is_loading);
    assert_eq!(h.controller.snapshots().read(), None);
}

#[tokio::test]
async fn relogin_with_same_session_id_still_discards_pre_logout_completion() {
    let h = Harness::new();
    h.set_session("sid-1");
    let gate = h.verifier.push_gated();

    let pending = h.spawn_verify();
    settle().await;
    h.controller.logout().await;
    h.set_session("sid-1");

    gate.send(valid(1)).unwrap();
    pending.await.unwrap();
    assert!(!h.controller.state().is_authenticated());
}

// =============================================================
// hydrate / resolve
// =============================================================

#[tokio::test]
async fn hydrate_reflects_snapshot_without_network() {
    let h = Harness::new();
    let snapshot = AuthSnapshot::authenticated("sid-1", sample_user(5), Some(sample_impersonation()));

    h.controller.hydrate(Some(snapshot));

    let state = h.controller.state();
    assert_eq!(state.user, Some(sample_user(5)));
    assert_eq!(state.impersonation, Some(sample_impersonation()));
    assert_eq!(state.status(), AuthStatus::Authenticated);
    assert_eq!(h.verifier.call_count(), 0);
}

#[test]
fn hydrate_clears_previous_error() {
    let h = Harness::new();
    h.controller.set_error(AuthErrorKind::Network, "offline");

    h.controller.hydrate(Some(AuthSnapshot::authenticated("sid-1", sample_user(1), None)));

    let state = h.controller.state();
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert_eq!(state.status(), AuthStatus::Authenticated);
}

#[test]
fn hydrate_none_is_unauthenticated() {
    let h = Harness::new();
    h.controller.hydrate(Some(AuthSnapshot::authenticated("sid-1", sample_user(1), None)));
    h.controller.hydrate(None);

    let state = h.controller.state();
    assert_eq!(state.status(), AuthStatus::Unauthenticated);
    assert!(state.session_id.is_none());
}

#[tokio::test]
async fn resolve_uses_matching_snapshot() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.controller
        .snapshots()
        .write(&AuthSnapshot::authenticated("sid-1", sample_user(1), None));

    h.controller.resolve().await;

    assert_eq!(h.controller.state().user, Some(sample_user(1)));
    assert_eq!(h.verifier.call_count(), 0);
}

#[tokio::test]
async fn resolve_reverifies_on_session_mismatch() {
    let h = Harness::new();
    h.set_session("sid-new");
    h.controller
        .snapshots()
        .write(&AuthSnapshot::authenticated("sid-old", sample_user(1), None));
    h.verifier.push(valid(2));

    h.controller.resolve().await;

    assert_eq!(h.verifier.calls(), vec!["sid-new".to_owned()]);
    assert_eq!(h.controller.state().user, Some(sample_user(2)));
    let snapshot = h.controller.snapshots().read().unwrap();
    assert_eq!(snapshot.session_id.as_deref(), Some("sid-new"));
}

#[tokio::test]
async fn resolve_without_session_drops_snapshot() {
    let h = Harness::new();
    h.controller
        .snapshots()
        .write(&AuthSnapshot::authenticated("sid-1", sample_user(1), None));

    h.controller.resolve().await;

    assert_eq!(h.controller.snapshots().read(), None);
    assert_eq!(h.verifier.call_count(), 0);
    assert_eq!(h.controller.state().status(), AuthStatus::Unauthenticated);
}

// =============================================================
// login / logout
// =============================================================

#[tokio::test]
async fn login_navigates_to_auth_url() {
    let h = Harness::new();
    h.controller.login().await;

    assert_eq!(
        h.navigator.navigations(),
        vec!["https://github.com/login/oauth/authorize?client_id=x".to_owned()]
    );
    assert!(h.controller.state().error.is_none());
}

#[tokio::test]
async fn login_failure_points_at_status_page() {
    let h = Harness::new();
    *h.backend.login.lock().unwrap() = Err(ApiError::Network("refused".to_owned()));

    h.controller.login().await;

    let state = h.controller.state();
    let error = state.error.unwrap();
    assert_eq!(error.kind, AuthErrorKind::Unknown);
    assert!(error.message.contains("/status"));
    assert!(h.navigator.navigations().is_empty());
    assert!(!state.initialized);
}

#[tokio::test]
async fn logout_clears_everything_even_when_backend_fails() {
    let h = Harness::new();
    h.set_session("sid-1");
    let snapshot = AuthSnapshot::authenticated("sid-1", sample_user(1), Some(sample_impersonation()));
    h.controller.snapshots().write(&snapshot);
    h.controller.hydrate(Some(snapshot));
    h.controller.set_error(AuthErrorKind::Network, "offline");
    *h.backend.logout.lock().unwrap() = Err(ApiError::Network("refused".to_owned()));

    h.controller.logout().await;

    let state = h.controller.state();
    assert!(!state.is_authenticated());
    assert!(state.impersonation.is_none());
    assert!(state.error.is_none());
    assert_eq!(h.backend.logout_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.current_session_id(), None);
    assert_eq!(h.controller.snapshots().read(), None);
    assert_eq!(h.navigator.invalidation_count(), 1);
}

#[tokio::test]
async fn retry_verification_clears_error_and_reloads() {
    let h = Harness::new();
    h.controller.set_error(AuthErrorKind::Server, "down");

    h.controller.retry_verification().await;

    let state = h.controller.state();
    assert!(state.error.is_none());
    assert!(!state.is_loading);
    assert_eq!(h.navigator.invalidation_count(), 1);
}

// =============================================================
// Error overlay
// =============================================================

#[test]
fn set_and_clear_error() {
    let h = Harness::new();
    h.controller.set_error(AuthErrorKind::Unauthorized, "nope");
    assert_eq!(h.controller.state().error_kind(), Some(AuthErrorKind::Unauthorized));
    h.controller.clear_error();
    assert!(h.controller.state().error.is_none());
}

#[test]
fn api_errors_raise_banner_without_overwriting() {
    let h = Harness::new();

    h.controller.report_api_error(&ApiError::Status { status: 404, message: "missing".to_owned(), body: None });
    assert!(h.controller.state().error.is_none());

    h.controller.report_api_error(&ApiError::Status { status: 503, message: "HTTP 503".to_owned(), body: None });
    let error = h.controller.state().error.unwrap();
    assert_eq!(error.kind, AuthErrorKind::Server);
    assert_eq!(error.message, "Server error: HTTP 503");

    h.controller.report_api_error(&ApiError::Network("refused".to_owned()));
    assert_eq!(h.controller.state().error_kind(), Some(AuthErrorKind::Server));

    h.controller.clear_error();
    h.controller.report_api_error(&ApiError::Network("refused".to_owned()));
    let error = h.controller.state().error.unwrap();
    assert_eq!(error.kind, AuthErrorKind::Network);
    assert!(error.message.starts_with("Unable to connect"));
}

#[tokio::test]
async fn error_listener_forwards_until_disposed() {
    let h = Harness::new();
    let (tx, rx) = mpsc::unbounded_channel();
    h.controller.spawn_error_listener(rx);

    tx.send(ApiError::Network("refused".to_owned())).unwrap();
    settle().await;
    assert_eq!(h.controller.state().error_kind(), Some(AuthErrorKind::Network));

    h.controller.clear_error();
    h.controller.dispose();
    let _ = tx.send(ApiError::Network("refused".to_owned()));
    settle().await;
    assert!(h.controller.state().error.is_none());
}

// =============================================================
// Lifecycle
// =============================================================

#[tokio::test]
async fn disposed_controller_ignores_operations() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.controller.dispose();
    h.controller.dispose();

    h.controller.verify().await;
    h.controller.login().await;
    h.controller.hydrate(Some(AuthSnapshot::authenticated("sid-1", sample_user(1), None)));

    assert!(h.controller.is_disposed());
    assert_eq!(h.verifier.call_count(), 0);
    assert!(h.navigator.navigations().is_empty());
    assert_eq!(h.controller.state(), AuthState::default());
}

#[tokio::test]
async fn completion_after_dispose_is_dropped() {
    let h = Harness::new();
    h.set_session("sid-1");
    let gate = h.verifier.push_gated();

    let pending = h.spawn_verify();
    settle().await;
    h.controller.dispose();
    gate.send(valid(1)).unwrap();
    pending.await.unwrap();

    assert!(!h.controller.state().is_authenticated());
}

#[tokio::test]
async fn subscribers_see_transitions() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.verifier.push(valid(1));
    let mut rx = h.controller.subscribe();

    h.controller.verify().await;

    assert!(rx.has_changed().unwrap());
    assert!(rx.borrow_and_update().is_authenticated());
}

#[tokio::test(start_paused = true)]
async fn refresh_options_reverify_on_interval() {
    let h = Harness::new();
    h.set_session("sid-1");
    h.verifier.push(valid(1));
    h.verifier.push(valid(1));

    let options = h.controller.refresh_options();
    let interval = options.interval_duration();
    assert_eq!(interval, DEFAULT_REFRESH_INTERVAL);
    let refresh = VisibilityRefresh::new(options, Arc::new(VisibilityWatch::default()));
    refresh.start();

    tokio::time::sleep(interval + Duration::from_millis(1)).await;
    assert_eq!(h.verifier.call_count(), 1);
    assert!(h.controller.state().is_authenticated());

    tokio::time::sleep(interval).await;
    assert_eq!(h.verifier.call_count(), 2);
    refresh.dispose();
}
