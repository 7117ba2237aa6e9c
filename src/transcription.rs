//! Remote speech-to-text for recorded voice messages.
//!
//! The endpoint answers in one of several JSON shapes. Rather than probing
//! fields ad hoc, the adapter walks an ordered list of extraction strategies
//! and keeps the first non-empty result.

use crate::config::CoachConfig;
use crate::credentials::CredentialBroker;
use crate::error::{CoachError, Result};
use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

/// A captured audio artifact, as produced by the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Bytes,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(
        bytes: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            bytes: bytes.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Guess the mime type from the file extension.
    pub fn from_file_name(bytes: impl Into<Bytes>, file_name: impl Into<String>) -> Self {
        let file_name = file_name.into();
        let extension = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        let mime_type = match extension.as_str() {
            "wav" => "audio/wav",
            "mp3" => "audio/mpeg",
            "m4a" | "mp4" => "audio/mp4",
            "ogg" | "oga" => "audio/ogg",
            "webm" => "audio/webm",
            "aac" => "audio/aac",
            _ => "application/octet-stream",
        };
        Self::new(bytes, file_name, mime_type)
    }
}

type Extractor = fn(&Value) -> Option<&str>;

fn direct_transcript(body: &Value) -> Option<&str> {
    body.get("transcript")?.as_str()
}

fn generic_text(body: &Value) -> Option<&str> {
    body.get("text")?.as_str()
}

fn nested_data_text(body: &Value) -> Option<&str> {
    body.get("data")?.get("text")?.as_str()
}

/// Accepted response shapes, tried in order.
const EXTRACTORS: &[Extractor] = &[direct_transcript, generic_text, nested_data_text];

/// Extract transcript text from a response body, or `""` if no shape matches.
pub fn extract_transcript(body: &Value) -> String {
    EXTRACTORS
        .iter()
        .find_map(|extract| extract(body).map(str::trim).filter(|t| !t.is_empty()))
        .unwrap_or_default()
        .to_owned()
}

/// Converts audio into text via the transcription endpoint.
#[derive(Debug)]
pub struct Transcriber {
    client: reqwest::Client,
    broker: Arc<CredentialBroker>,
    url: Url,
    timeout: Duration,
}

impl Transcriber {
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the base URL is invalid.
    pub fn new(
        config: &CoachConfig,
        broker: Arc<CredentialBroker>,
        client: reqwest::Client,
    ) -> Result<Self> {
        Ok(Self {
            client,
            broker,
            url: config.api.endpoint(&config.api.transcribe_path)?,
            timeout: config.api.request_timeout(),
        })
    }

    /// Transcribe a clip. An `Ok("")` means no accepted shape carried text;
    /// callers treat it like a failure.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::TranscriptionFailed`] when no credential is
    /// available (no request is made), on transport errors, or on a
    /// non-success status (with the response body as detail).
    pub async fn transcribe(&self, audio: &AudioClip, user_id: &str) -> Result<String> {
        let credential = self
            .broker
            .valid_credential()
            .await
            .map_err(|e| CoachError::TranscriptionFailed(e.message()))?;

        let started = Instant::now();
        let part = reqwest::multipart::Part::bytes(audio.bytes.to_vec())
            .file_name(audio.file_name.clone())
            .mime_str(&audio.mime_type)
            .map_err(|e| CoachError::TranscriptionFailed(format!("invalid mime type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("user_id", user_id.to_owned());

        let response = self
            .client
            .post(self.url.clone())
            .header(reqwest::header::AUTHORIZATION, credential.bearer())
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                CoachError::TranscriptionFailed(format!("transcription request failed: {e}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            CoachError::TranscriptionFailed(format!("failed to read transcription body: {e}"))
        })?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "transcription rejected");
            return Err(CoachError::TranscriptionFailed(format!(
                "transcription HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let text = match serde_json::from_str::<Value>(&body) {
            Ok(value) => extract_transcript(&value),
            Err(e) => {
                warn!(error = %e, "transcription response is not JSON");
                String::new()
            }
        };

        info!(
            bytes = audio.bytes.len(),
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transcription complete"
        );
        Ok(text)
    }
}
