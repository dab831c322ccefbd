//! Persisted auth snapshot.
//!
//! The snapshot is a cache keyed by session id, never a source of truth.
//! It is stored as hex-encoded JSON so the value is always cookie-safe.
//! Corrupt, empty, or unreadable values read back as `None`.

#[cfg(test)]
#[path = "snapshot_test.rs"]
mod snapshot_test;

use std::fmt::Write;
use std::sync::Arc;

use crate::net::types::AuthSnapshot;
use crate::util::cookie_store::{CookieOptions, KeyValueStore, remove_or_expire};

pub const SNAPSHOT_COOKIE_NAME: &str = "rustytime_auth";

#[derive(Clone)]
pub struct SessionSnapshotStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    secure: bool,
}

impl SessionSnapshotStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, secure: bool) -> Self {
        Self::with_key(store, SNAPSHOT_COOKIE_NAME, secure)
    }

    #[must_use]
    pub fn with_key(store: Arc<dyn KeyValueStore>, key: impl Into<String>, secure: bool) -> Self {
        Self { store, key: key.into(), secure }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn read(&self) -> Option<AuthSnapshot> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "snapshot store unavailable");
                return None;
            }
        };

        let Some(bytes) = hex_to_bytes(&raw) else {
            tracing::debug!(key = %self.key, "snapshot is not valid hex");
            return None;
        };
        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::debug!(key = %self.key, error = %e, "snapshot is corrupt");
                None
            }
        }
    }

    pub fn write(&self, snapshot: &AuthSnapshot) {
        let json = match serde_json::to_vec(snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(error = %e, "snapshot encode failed");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key, &bytes_to_hex(&json), CookieOptions::persistent(self.secure)) {
            tracing::debug!(key = %self.key, error = %e, "snapshot write skipped");
        }
    }

    pub fn clear(&self) {
        remove_or_expire(self.store.as_ref(), &self.key, self.secure);
    }
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}
