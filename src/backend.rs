//! Fire-and-report calls to the conversation backend: conversation reset and
//! client-side log commits.

use crate::config::CoachConfig;
use crate::credentials::CredentialBroker;
use crate::error::{CoachError, Result};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct Backend {
    broker: Arc<CredentialBroker>,
    client: reqwest::Client,
    reset_url: Url,
    commit_url: Url,
    timeout: Duration,
}

impl Backend {
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the base URL is invalid.
    pub fn new(
        config: &CoachConfig,
        broker: Arc<CredentialBroker>,
        client: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            broker,
            client,
            reset_url: config.api.endpoint(&config.api.reset_path)?,
            commit_url: config.api.endpoint(&config.api.commit_log_path)?,
            timeout: config.api.request_timeout(),
        })
    }

    /// Tell the server to drop its conversation state for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::SideEffectFailed`] on any failure.
    pub async fn reset_conversation(&self, user_id: &str) -> Result<()> {
        self.post("conversation reset", &self.reset_url, &json!({ "user_id": user_id }))
            .await
    }

    /// Commit a log entry the server asked the client to persist.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::SideEffectFailed`] on any failure.
    pub async fn commit_log_entry(&self, user_id: &str, entry: &Value) -> Result<()> {
        let body = json!({ "user_id": user_id, "entry": entry });
        self.post("log commit", &self.commit_url, &body).await
    }

    async fn post(&self, what: &str, url: &Url, body: &Value) -> Result<()> {
        let credential = self
            .broker
            .valid_credential()
            .await
            .map_err(|e| CoachError::SideEffectFailed(format!("{what}: {}", e.message())))?;

        let response = self
            .client
            .post(url.clone())
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .json(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CoachError::SideEffectFailed(format!("{what} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "{what} rejected");
            return Err(CoachError::SideEffectFailed(format!(
                "{what} HTTP {}",
                status.as_u16()
            )));
        }
        debug!("{what} accepted");
        Ok(())
    }
}
