//! Client configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::str::FromStr;
use std::time::Duration;

use crate::net::api::DEFAULT_API_BASE;

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_STATUS_PAGE_URL: &str = "/status";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be an http(s) URL, got {value:?}")]
    InvalidUrl { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_HTTP_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_HTTP_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub backend_api_url: String,
    pub refresh_interval: Duration,
    pub timeouts: HttpTimeouts,
    pub cookie_secure: bool,
    pub status_page_url: String,
}

impl ClientConfig {
    /// Build typed client config from environment variables.
    ///
    /// Optional:
    /// - `BACKEND_API_URL` (or `PUBLIC_BACKEND_API_URL`): default `http://localhost:3000`
    /// - `AUTH_REFRESH_INTERVAL_SECS`: default 300
    /// - `HTTP_REQUEST_TIMEOUT_SECS`: default 30
    /// - `HTTP_CONNECT_TIMEOUT_SECS`: default 10
    /// - `COOKIE_SECURE`: overrides production detection
    /// - `ENVIRONMENT` / `PRODUCTION`: production enables secure cookies
    /// - `STATUS_PAGE_URL`: default `/status`
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unparsable numbers, a zero refresh
    /// interval, or a non-http(s) backend URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let (url_var, raw_url) = match std::env::var("BACKEND_API_URL") {
            Ok(url) => ("BACKEND_API_URL", url),
            Err(_) => (
                "PUBLIC_BACKEND_API_URL",
                std::env::var("PUBLIC_BACKEND_API_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_owned()),
            ),
        };
        let backend_api_url = parse_backend_url(url_var, &raw_url)?;

        let refresh_secs: u64 = env_parse("AUTH_REFRESH_INTERVAL_SECS", DEFAULT_REFRESH_INTERVAL_SECS)?;
        if refresh_secs == 0 {
            return Err(ConfigError::Zero { var: "AUTH_REFRESH_INTERVAL_SECS" });
        }

        let timeouts = HttpTimeouts {
            request_secs: env_parse("HTTP_REQUEST_TIMEOUT_SECS", DEFAULT_HTTP_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse("HTTP_CONNECT_TIMEOUT_SECS", DEFAULT_HTTP_CONNECT_TIMEOUT_SECS)?,
        };

        let status_page_url = std::env::var("STATUS_PAGE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STATUS_PAGE_URL.to_owned());

        Ok(Self {
            backend_api_url,
            refresh_interval: Duration::from_secs(refresh_secs),
            timeouts,
            cookie_secure: cookie_secure(),
            status_page_url,
        })
    }
}

fn parse_backend_url(var: &'static str, raw: &str) -> Result<String, ConfigError> {
    let url = raw.trim().trim_end_matches('/');
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(url.to_owned())
    } else {
        Err(ConfigError::InvalidUrl { var, value: raw.to_owned() })
    }
}

fn env_parse<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(default),
    }
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
}

fn is_production() -> bool {
    let environment = std::env::var("ENVIRONMENT").unwrap_or_default();
    environment.trim().eq_ignore_ascii_case("production") || env_bool("PRODUCTION").unwrap_or(false)
}

pub(crate) fn cookie_secure() -> bool {
    if let Some(value) = env_bool("COOKIE_SECURE") {
        return value;
    }
    is_production()
}
