//! REST API client for the time-tracking backend.
//!
//! DESIGN
//! ======
//! One client type serves both the browser-side context and the
//! server-rendering phase; the only difference is the forwarded `Cookie`
//! header, set with [`ApiClient::with_cookie_header`].
//!
//! ERROR HANDLING
//! ==============
//! Every failed request is returned as an [`ApiError`] and, when an error
//! reporter is attached, also pushed onto that channel. The auth controller
//! drains the channel to raise advisory network/server banners.

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::http::{HttpRequest, HttpResponse, HttpTransport, Method};

pub const DEFAULT_API_BASE: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// No response reached the client.
    #[error("network error: {0}")]
    Network(String),
    /// The backend answered with a non-success status.
    #[error("{message}")]
    Status { status: u16, message: String, body: Option<serde_json::Value> },
    /// A success response whose body did not match the expected shape.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The request payload could not be serialized.
    #[error("request encode failed: {0}")]
    Encode(String),
}

impl ApiError {
    /// HTTP status, when a response was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        self.status().is_some_and(|s| s >= 500)
    }
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    cookie_header: Option<String>,
    error_reporter: Option<mpsc::UnboundedSender<ApiError>>,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn HttpTransport>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { base_url, transport, cookie_header: None, error_reporter: None }
    }

    /// Forward the incoming request's cookies (server-rendering context).
    #[must_use]
    pub fn with_cookie_header(mut self, cookie_header: impl Into<String>) -> Self {
        let cookie_header = cookie_header.into();
        self.cookie_header = (!cookie_header.is_empty()).then_some(cookie_header);
        self
    }

    /// Push every request failure onto `reporter` in addition to returning it.
    #[must_use]
    pub fn with_error_reporter(mut self, reporter: mpsc::UnboundedSender<ApiError>) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http") {
            endpoint.to_owned()
        } else {
            format!("{}{endpoint}", self.base_url)
        }
    }

    /// `GET` and decode the body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure, non-2xx status, or undecodable body.
    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request(Method::Get, endpoint, None).await
    }

    /// `POST` an optional JSON payload and decode the body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on encode failure, transport failure, non-2xx status, or undecodable body.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        data: Option<&B>,
    ) -> Result<T, ApiError> {
        let body = self.encode(data)?;
        self.request(Method::Post, endpoint, body).await
    }

    /// `PUT` an optional JSON payload and decode the body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on encode failure, transport failure, non-2xx status, or undecodable body.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        data: Option<&B>,
    ) -> Result<T, ApiError> {
        let body = self.encode(data)?;
        self.request(Method::Put, endpoint, body).await
    }

    /// `DELETE` and decode the body.
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure, non-2xx status, or undecodable body.
    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, ApiError> {
        self.request(Method::Delete, endpoint, None).await
    }

    /// Send a request and return the raw response for any status.
    ///
    /// Only transport failures are errors (and reported); status handling is
    /// left to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Network`] when no response arrived.
    pub async fn fetch(&self, method: Method, endpoint: &str, body: Option<Vec<u8>>) -> Result<HttpResponse, ApiError> {
        let mut req =
            HttpRequest::new(method, self.endpoint_url(endpoint)).header("Content-Type", "application/json");
        if let Some(cookie) = &self.cookie_header {
            req = req.header("Cookie", cookie.as_str());
        }
        if let Some(body) = body {
            req = req.body(body);
        }

        self.transport
            .send(req)
            .await
            .map_err(|e| self.report(ApiError::Network(e.0)))
    }

    /// Like [`ApiClient::fetch`] but non-2xx responses become [`ApiError::Status`].
    ///
    /// # Errors
    ///
    /// Returns an [`ApiError`] on transport failure or non-2xx status.
    pub async fn send_checked(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Vec<u8>>,
    ) -> Result<HttpResponse, ApiError> {
        let resp = self.fetch(method, endpoint, body).await?;
        if !resp.is_success() {
            return Err(self.report(error_from_response(&resp)));
        }
        Ok(resp)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Vec<u8>>,
    ) -> Result<T, ApiError> {
        let resp = self.send_checked(method, endpoint, body).await?;
        decode_body(&resp).map_err(|e| self.report(e))
    }

    fn encode<B: Serialize + ?Sized>(&self, data: Option<&B>) -> Result<Option<Vec<u8>>, ApiError> {
        data.map(|d| serde_json::to_vec(d).map_err(|e| self.report(ApiError::Encode(e.to_string()))))
            .transpose()
    }

    fn report(&self, error: ApiError) -> ApiError {
        if let Some(reporter) = &self.error_reporter {
            // A closed channel only means nobody is listening any more.
            let _ = reporter.send(error.clone());
        }
        error
    }
}

/// Build the error for a non-2xx response.
///
/// Plain-text bodies become the message; JSON bodies are kept for callers.
pub(crate) fn error_from_response(resp: &HttpResponse) -> ApiError {
    let status = resp.status;
    let mut message = format!("HTTP {status}");
    let mut body = None;

    if resp.is_json() {
        body = serde_json::from_slice(&resp.body).ok();
    } else {
        let text = String::from_utf8_lossy(&resp.body);
        let text = text.trim();
        if !text.is_empty() {
            message = text.to_owned();
            body = Some(serde_json::Value::String(text.to_owned()));
        }
    }

    ApiError::Status { status, message, body }
}

/// Decode a success body.
///
/// JSON bodies decode directly. Anything else is treated as a JSON string so
/// `T = String` receives raw text, and an empty body as `null`.
pub(crate) fn decode_body<T: DeserializeOwned>(resp: &HttpResponse) -> Result<T, ApiError> {
    if resp.is_json() {
        return serde_json::from_slice(&resp.body).map_err(|e| ApiError::Decode(e.to_string()));
    }
    if resp.body.is_empty() {
        return serde_json::from_value(serde_json::Value::Null).map_err(|e| ApiError::Decode(e.to_string()));
    }
    let text = String::from_utf8_lossy(&resp.body).into_owned();
    serde_json::from_value(serde_json::Value::String(text)).map_err(|e| ApiError::Decode(e.to_string()))
}
