//! Cookie-style key/value persistence.
//!
//! SYSTEM CONTEXT
//! ==============
//! The browser keeps the session cookie and the cached auth snapshot in the
//! same origin-scoped cookie space. `KeyValueStore` is that space as a port:
//! the server-rendering phase backs it with the request's `CookieJar`,
//! headless contexts and tests use `MemoryStore`.
//!
//! ERROR HANDLING
//! ==============
//! Store failures are reported as `StoreError` but every caller in this crate
//! treats them as absence. `DeleteUnsupported` is the one actionable case:
//! callers fall back to overwriting with an empty, already-expired value.

#[cfg(test)]
#[path = "cookie_store_test.rs"]
mod cookie_store_test;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

/// All auth cookies are scoped to the origin root.
pub const COOKIE_PATH: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("delete not supported in this context")]
    DeleteUnsupported,
}

/// Attributes applied when a key is written.
///
/// Path (`/`) and same-site policy (`Lax`) are fixed for every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub max_age: Option<Duration>,
}

impl CookieOptions {
    /// Session-lifetime cookie; `secure` should be false only in local development.
    #[must_use]
    pub fn persistent(secure: bool) -> Self {
        Self { http_only: true, secure, max_age: None }
    }

    /// Attributes for an empty value that expires immediately.
    #[must_use]
    pub fn expired(secure: bool) -> Self {
        Self { http_only: true, secure, max_age: Some(Duration::ZERO) }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.max_age.is_some_and(|age| age <= Duration::ZERO)
    }

    /// Build the cookie these attributes describe.
    #[must_use]
    pub fn build_cookie(&self, key: &str, value: &str) -> Cookie<'static> {
        let mut builder = Cookie::build((key.to_owned(), value.to_owned()))
            .path(COOKIE_PATH)
            .http_only(self.http_only)
            .same_site(SameSite::Lax)
            .secure(self.secure);
        if let Some(age) = self.max_age {
            builder = builder.max_age(age);
        }
        builder.build()
    }
}

/// Origin-scoped key/value persistence with cookie semantics.
///
/// Operations are synchronous; callers never suspend on them.
pub trait KeyValueStore: Send + Sync {
    /// Read a key. `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the store cannot be read in this context.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key with the given attributes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the store cannot be written in this context.
    fn set(&self, key: &str, value: &str, options: CookieOptions) -> Result<(), StoreError>;

    /// Remove a key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DeleteUnsupported` when the context cannot delete,
    /// or `StoreError::Unavailable` when the store is unreachable.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Best-effort removal: delete, or overwrite with an empty expired value when
/// deletion is unsupported. Never fails.
pub fn remove_or_expire(store: &dyn KeyValueStore, key: &str, secure: bool) {
    match store.delete(key) {
        Ok(()) => {}
        Err(StoreError::DeleteUnsupported) => {
            if let Err(e) = store.set(key, "", CookieOptions::expired(secure)) {
                tracing::debug!(key, error = %e, "expire fallback failed");
            }
        }
        Err(e) => tracing::debug!(key, error = %e, "delete failed"),
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// In-process store for headless contexts and tests.
///
/// Writes with a zero max-age drop the entry, mirroring a browser discarding
/// an already-expired cookie.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, CookieOptions)>>,
    delete_unsupported: bool,
    unavailable: bool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose `delete` always reports `DeleteUnsupported`.
    #[must_use]
    pub fn without_delete() -> Self {
        Self { delete_unsupported: true, ..Self::default() }
    }

    /// A store where every operation fails with `Unavailable`.
    #[must_use]
    pub fn unavailable() -> Self {
        Self { unavailable: true, ..Self::default() }
    }

    /// Attributes of the last write to `key`, if it is still present.
    #[must_use]
    pub fn options(&self, key: &str) -> Option<CookieOptions> {
        self.lock().get(key).map(|(_, options)| *options)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (String, CookieOptions)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store disabled".to_owned()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check_available()?;
        Ok(self.lock().get(key).map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &str, options: CookieOptions) -> Result<(), StoreError> {
        self.check_available()?;
        let mut entries = self.lock();
        if options.is_expired() {
            entries.remove(key);
        } else {
            entries.insert(key.to_owned(), (value.to_owned(), options));
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        if self.delete_unsupported {
            return Err(StoreError::DeleteUnsupported);
        }
        self.lock().remove(key);
        Ok(())
    }
}

// =============================================================================
// COOKIE JAR STORE
// =============================================================================

/// Store backed by the request's cookie jar during server rendering.
///
/// Writes accumulate as jar deltas; hand the jar back with [`CookieJarStore::into_jar`]
/// so they reach the response.
#[derive(Debug, Default)]
pub struct CookieJarStore {
    jar: Mutex<CookieJar>,
}

impl CookieJarStore {
    #[must_use]
    pub fn new(jar: CookieJar) -> Self {
        Self { jar: Mutex::new(jar) }
    }

    #[must_use]
    pub fn into_jar(self) -> CookieJar {
        self.jar.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(CookieJar) -> CookieJar) {
        let mut guard = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let jar = std::mem::take(&mut *guard);
        *guard = f(jar);
    }
}

impl KeyValueStore for CookieJarStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(jar.get(key).map(|cookie| cookie.value().to_owned()))
    }

    fn set(&self, key: &str, value: &str, options: CookieOptions) -> Result<(), StoreError> {
        let cookie = options.build_cookie(key, value);
        self.update(|jar| jar.add(cookie));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removal = Cookie::build((key.to_owned(), "")).path(COOKIE_PATH);
        self.update(|jar| jar.remove(removal));
        Ok(())
    }
}
