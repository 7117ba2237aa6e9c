//! Credential broker: hands out a verified bearer token, refreshing on demand.
//!
//! Policy:
//!
//! - no cached token → refresh immediately;
//! - cached token → verify remotely; only an explicit `401 Unauthorized`
//!   counts as invalid and triggers a refresh;
//! - any other verify outcome (network error, timeout, 5xx) is treated as
//!   valid, so transient flakiness never causes a refresh storm.

use crate::config::CoachConfig;
use crate::credentials::{SecureStore, StoreError};
use crate::error::{CoachError, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// An opaque bearer token. Replaced wholesale, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"[REDACTED]").finish()
    }
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(default, alias = "token")]
    access_token: Option<String>,
}

/// Obtains, verifies and refreshes the access credential.
pub struct CredentialBroker {
    store: Arc<dyn SecureStore>,
    client: reqwest::Client,
    verify_url: Url,
    refresh_url: Url,
    token_key: String,
    user_id_key: String,
    role: String,
    timeout: Duration,
}

impl fmt::Debug for CredentialBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBroker")
            .field("verify_url", &self.verify_url.as_str())
            .field("refresh_url", &self.refresh_url.as_str())
            .field("token_key", &self.token_key)
            .finish_non_exhaustive()
    }
}

impl CredentialBroker {
    /// Create a broker using the configured endpoints and store keys.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the base URL is invalid.
    pub fn new(
        config: &CoachConfig,
        store: Arc<dyn SecureStore>,
        client: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            store,
            client,
            verify_url: config.api.endpoint(&config.api.verify_path)?,
            refresh_url: config.api.endpoint(&config.api.refresh_path)?,
            token_key: config.auth.token_key.clone(),
            user_id_key: config.auth.user_id_key.clone(),
            role: config.auth.role.clone(),
            timeout: config.api.request_timeout(),
        })
    }

    /// The stable user identifier, if one is stored.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Storage`] if the store cannot be read.
    pub fn user_id(&self) -> Result<Option<String>> {
        self.store
            .get(&self.user_id_key)
            .map(|id| id.filter(|id| !id.trim().is_empty()))
            .map_err(|e| CoachError::Storage(e.to_string()))
    }

    /// Run a store call on the blocking pool; keyring backends do OS I/O.
    async fn with_store<T, F>(&self, call: F) -> std::result::Result<T, StoreError>
    where
        F: FnOnce(&dyn SecureStore) -> std::result::Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StoreError::StorageError(format!("store task failed: {e}")))?
    }

    async fn cached(&self) -> Option<Credential> {
        let key = self.token_key.clone();
        match self.with_store(move |store| store.get(&key)).await {
            Ok(Some(token)) if !token.trim().is_empty() => Some(Credential::new(token)),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "failed to read cached credential; treating as absent");
                None
            }
        }
    }

    /// Return a credential usable for the next request.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::CredentialUnavailable`] when no credential is
    /// cached (or the cached one is rejected) and the refresh fails.
    pub async fn valid_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.cached().await {
            if self.verify(&credential).await {
                return Ok(credential);
            }
            info!("cached credential rejected by server; refreshing");
        } else {
            info!("no cached credential; refreshing");
        }

        self.refresh()
            .await
            .map_err(|e| CoachError::CredentialUnavailable(e.message()))
    }

    /// Lightweight remote check. `false` only on an explicit 401.
    pub async fn verify(&self, credential: &Credential) -> bool {
        let response = self
            .client
            .get(self.verify_url.clone())
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                debug!("credential verify: unauthorized");
                false
            }
            Ok(response) => {
                if !response.status().is_success() {
                    warn!(
                        status = response.status().as_u16(),
                        "credential verify returned unexpected status; keeping credential"
                    );
                }
                true
            }
            Err(e) => {
                warn!(error = %e, "credential verify failed; keeping credential");
                true
            }
        }
    }

    /// Exchange the stable user identifier for a new credential and persist it.
    ///
    /// Nothing is persisted unless the refresh succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::RefreshFailed`] on a missing identifier, a
    /// transport error, a non-success status, or a response without a token.
    pub async fn refresh(&self) -> Result<Credential> {
        let key = self.user_id_key.clone();
        let user_id = self
            .with_store(move |store| store.get(&key))
            .await
            .map_err(|e| CoachError::RefreshFailed(format!("failed to read user id: {e}")))?
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| CoachError::RefreshFailed("no stored user id".into()))?;

        let body = serde_json::json!({
            "user_id": user_id,
            "role": self.role,
        });

        let response = self
            .client
            .post(self.refresh_url.clone())
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoachError::RefreshFailed(format!("refresh request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "credential refresh rejected");
            return Err(CoachError::RefreshFailed(format!(
                "refresh HTTP {}: {detail}",
                status.as_u16()
            )));
        }

        let parsed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| CoachError::RefreshFailed(format!("invalid refresh response: {e}")))?;

        let token = parsed
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| CoachError::RefreshFailed("refresh response had no token".into()))?;

        let (key, value) = (self.token_key.clone(), token.clone());
        if let Err(e) = self.with_store(move |store| store.set(&key, &value)).await {
            warn!(error = %e, "failed to persist refreshed credential");
        }
        info!("credential refreshed");
        Ok(Credential::new(token))
    }
}
