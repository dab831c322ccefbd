//! Per-page data loader.
//!
//! Fetches one endpoint and publishes `{data, loading, error}` through a
//! `watch` channel. Pair with the refresh scheduler via
//! [`DataLoader::refresh_options`] to keep the page fresh.

#[cfg(test)]
#[path = "data_loader_test.rs"]
mod data_loader_test;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::net::api::{ApiClient, ApiError};
use crate::util::refresh::RefreshOptions;

/// User-facing message for any failed load.
pub const LOAD_ERROR_MESSAGE: &str = "Failed to load data";

#[derive(Clone, Debug, PartialEq)]
pub struct LoadState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for LoadState<T> {
    fn default() -> Self {
        Self { data: None, loading: false, error: None }
    }
}

pub struct DataLoader<T> {
    api: ApiClient,
    endpoint: String,
    state: watch::Sender<LoadState<T>>,
}

impl<T> DataLoader<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(api: ApiClient, endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(LoadState::default());
        Self { api, endpoint: endpoint.into(), state }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadState<T>> {
        self.state.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> LoadState<T> {
        self.state.borrow().clone()
    }

    /// Fetch the endpoint. Previous data is kept on failure.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`ApiError`]; the published state carries
    /// [`LOAD_ERROR_MESSAGE`] instead.
    pub async fn load(&self) -> Result<(), ApiError> {
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        match self.api.get::<T>(&self.endpoint).await {
            Ok(data) => {
                self.state.send_modify(|state| {
                    state.data = Some(data);
                    state.loading = false;
                });
                Ok(())
            }
            Err(e) => {
                tracing::warn!(endpoint = %self.endpoint, error = %e, "data load failed");
                self.state.send_modify(|state| {
                    state.error = Some(LOAD_ERROR_MESSAGE.to_owned());
                    state.loading = false;
                });
                Err(e)
            }
        }
    }

    /// Scheduler options that reload this endpoint.
    #[must_use]
    pub fn refresh_options(self: &Arc<Self>) -> RefreshOptions<ApiError> {
        let this = Arc::clone(self);
        RefreshOptions::new(move || {
            let this = Arc::clone(&this);
            async move { this.load().await }
        })
    }
}
