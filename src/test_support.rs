//! Fakes for the crate's ports, shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::net::api::ApiError;
use crate::net::auth_api::{AuthBackend, SessionVerifier, VerifyResult};
use crate::net::http::{HttpRequest, HttpResponse, HttpTransport, TransportError};
use crate::net::types::{Impersonation, User};
use crate::state::controller::Navigator;

#[must_use]
pub fn sample_user(id: i64) -> User {
    User {
        id,
        github_id: 1000 + id,
        name: Some(format!("user-{id}")),
        avatar_url: Some(format!("https://avatars.example/{id}")),
        admin_level: 0,
    }
}

#[must_use]
pub fn sample_impersonation() -> Impersonation {
    Impersonation { admin_id: 1, admin_name: Some("admin".to_owned()), admin_avatar_url: None }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, response: Result<HttpResponse, TransportError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.push(Ok(response));
    }

    pub fn push_network_failure(&self) {
        self.push(Err(TransportError("connection refused".to_owned())));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError("no scripted response".to_owned())))
    }
}

// =============================================================================
// VERIFIER
// =============================================================================

enum Scripted {
    Ready(VerifyResult),
    Gated(oneshot::Receiver<VerifyResult>),
}

/// Verifier returning scripted results; gated results wait for the test to release them.
#[derive(Default)]
pub struct FakeVerifier {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
}

impl FakeVerifier {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, result: VerifyResult) {
        self.script.lock().unwrap().push_back(Scripted::Ready(result));
    }

    /// Queue a result that is only delivered once the returned sender fires.
    #[must_use]
    pub fn push_gated(&self) -> oneshot::Sender<VerifyResult> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().unwrap().push_back(Scripted::Gated(rx));
        tx
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl SessionVerifier for FakeVerifier {
    async fn verify(&self, session_id: &str) -> VerifyResult {
        self.calls.lock().unwrap().push(session_id.to_owned());
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Ready(result)) => result,
            Some(Scripted::Gated(rx)) => rx.await.unwrap_or(VerifyResult::Invalid),
            None => VerifyResult::Invalid,
        }
    }
}

// =============================================================================
// BACKEND + NAVIGATOR
// =============================================================================

pub struct FakeBackend {
    pub login: Mutex<Result<String, ApiError>>,
    pub logout: Mutex<Result<(), ApiError>>,
    pub logout_calls: AtomicUsize,
}

impl FakeBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            login: Mutex::new(Ok("https://github.com/login/oauth/authorize?client_id=x".to_owned())),
            logout: Mutex::new(Ok(())),
            logout_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait::async_trait]
impl AuthBackend for FakeBackend {
    async fn login_url(&self) -> Result<String, ApiError> {
        self.login.lock().unwrap().clone()
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub navigations: Mutex<Vec<String>>,
    pub invalidations: AtomicUsize,
}

impl RecordingNavigator {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    #[must_use]
    pub fn invalidation_count(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &str) {
        self.navigations.lock().unwrap().push(url.to_owned());
    }

    async fn invalidate_all(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
