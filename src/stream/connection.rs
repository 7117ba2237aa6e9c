//! One live server stream per conversation turn.
//!
//! [`SessionConnection::open`] returns a [`SessionHandle`] immediately and
//! drives the request on a spawned task. Everything the task observes is
//! reported as a [`StreamUpdate`] tagged with the generation the stream was
//! opened under, so the receiver can discard events from superseded turns.

use crate::config::CoachConfig;
use crate::credentials::CredentialBroker;
use crate::error::{CoachError, Result};
use crate::mode::{ConversationMode, StreamTarget};
use crate::stream::classifier::{Classified, classify};
use crate::stream::sse::{Signal, SseDecoder, SseMessage};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// What happened on a stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// The server accepted the request; frames follow.
    Opened,
    /// One classified data frame.
    Frame(Classified),
    /// The server signalled the end of the response.
    Terminal,
    /// The stream could not be opened or ended abnormally.
    ///
    /// Carries `CredentialUnavailable`, `ConnectionFailed` or `StreamDropped`.
    Failed(CoachError),
}

/// A [`StreamEvent`] tagged with the generation it belongs to.
#[derive(Debug)]
pub struct StreamUpdate {
    pub generation: u64,
    pub session_id: Uuid,
    pub event: StreamEvent,
}

/// Opens streams against the configured API.
#[derive(Debug, Clone)]
pub struct SessionConnection {
    broker: Arc<CredentialBroker>,
    client: reqwest::Client,
    base: Url,
}

impl SessionConnection {
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
            base: config.api.base()?,
        })
    }

    /// Start streaming `target`. Never fails synchronously: every failure is
    /// delivered as a [`StreamEvent::Failed`] on `events`.
    ///
    /// The caller must close any previous handle first.
    pub fn open<E>(
        &self,
        target: &StreamTarget,
        generation: u64,
        events: mpsc::Sender<E>,
    ) -> SessionHandle
    where
        E: From<StreamUpdate> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let emitter = Emitter {
            events,
            generation,
            session_id: id,
        };

        let url = target.url(&self.base);
        let broker = Arc::clone(&self.broker);
        let client = self.client.clone();
        let task_cancel = cancel.clone();
        let mode = target.mode;

        info!(%id, generation, %mode, "opening stream");
        let task = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = task_cancel.cancelled() => {
                    debug!(%id, generation, "stream task cancelled");
                }
                () = drive(broker, client, url, &emitter, &task_cancel) => {}
            }
        });

        SessionHandle {
            id,
            mode,
            created_at: Utc::now(),
            cancel,
            task: Some(task),
        }
    }
}

/// A live (or finished) stream. Dropping the handle closes it.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    mode: ConversationMode,
    created_at: DateTime<Utc>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Cancel the stream task. Safe to call any number of times.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(id = %self.id, "stream closed");
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Close whatever occupies `slot`. A vacant slot is a no-op.
pub fn close_slot(slot: &mut Option<SessionHandle>) {
    if let Some(mut handle) = slot.take() {
        handle.close();
    }
}

struct Emitter<E> {
    events: mpsc::Sender<E>,
    generation: u64,
    session_id: Uuid,
}

impl<E: From<StreamUpdate>> Emitter<E> {
    /// Returns `false` once the receiver is gone.
    async fn emit(&self, event: StreamEvent) -> bool {
        let update = StreamUpdate {
            generation: self.generation,
            session_id: self.session_id,
            event,
        };
        self.events.send(E::from(update)).await.is_ok()
    }
}

enum Flow {
    Continue,
    Finished,
}

async fn drive<E: From<StreamUpdate>>(
    broker: Arc<CredentialBroker>,
    client: reqwest::Client,
    url: Result<Url>,
    emitter: &Emitter<E>,
    cancel: &CancellationToken,
) {
    let id = emitter.session_id;
    let generation = emitter.generation;

    let credential = match broker.valid_credential().await {
        Ok(credential) => credential,
        Err(e) => {
            warn!(%id, generation, error = %e, "no credential; stream not attempted");
            emitter.emit(StreamEvent::Failed(e)).await;
            return;
        }
    };

    let url = match url {
        Ok(url) => url,
        Err(e) => {
            emitter
                .emit(StreamEvent::Failed(CoachError::ConnectionFailed(e.message())))
                .await;
            return;
        }
    };

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .header(reqwest::header::AUTHORIZATION, credential.bearer())
        .send()
        .await;

    let response = match response {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(%id, generation, status, "stream rejected");
            emitter
                .emit(StreamEvent::Failed(CoachError::ConnectionFailed(format!(
                    "stream HTTP {status}: {body}"
                ))))
                .await;
            return;
        }
        Err(e) => {
            warn!(%id, generation, error = %e, "stream connect failed");
            emitter
                .emit(StreamEvent::Failed(CoachError::ConnectionFailed(format!(
                    "stream request failed: {e}"
                ))))
                .await;
            return;
        }
    };

    if !emitter.emit(StreamEvent::Opened).await {
        return;
    }
    debug!(%id, generation, "stream opened");

    let mut bytes = response.bytes_stream();
    let mut decoder = SseDecoder::new();
    let mut frames = 0usize;

    while !cancel.is_cancelled() {
        match bytes.next().await {
            Some(Ok(chunk)) => {
                for message in decoder.push(&chunk) {
                    match deliver(emitter, &message, &mut frames).await {
                        Some(Flow::Continue) => {}
                        Some(Flow::Finished) | None => return,
                    }
                }
            }
            Some(Err(e)) => {
                warn!(%id, generation, frames, error = %e, "stream transport error");
                emitter
                    .emit(StreamEvent::Failed(CoachError::StreamDropped(format!(
                        "transport error: {e}"
                    ))))
                    .await;
                return;
            }
            None => {
                if let Some(message) = decoder.finish() {
                    match deliver(emitter, &message, &mut frames).await {
                        Some(Flow::Continue) => {}
                        Some(Flow::Finished) | None => return,
                    }
                }
                warn!(%id, generation, frames, "stream ended before completion");
                emitter
                    .emit(StreamEvent::Failed(CoachError::StreamDropped(
                        "stream ended before completion".into(),
                    )))
                    .await;
                return;
            }
        }
    }
}

/// Forward one decoded message. `None` means the receiver is gone.
async fn deliver<E: From<StreamUpdate>>(
    emitter: &Emitter<E>,
    message: &SseMessage,
    frames: &mut usize,
) -> Option<Flow> {
    let (event, flow) = match message.signal() {
        Signal::Data(frame) => {
            *frames += 1;
            (StreamEvent::Frame(classify(frame)), Flow::Continue)
        }
        Signal::Done => {
            info!(
                id = %emitter.session_id,
                generation = emitter.generation,
                frames = *frames,
                "stream complete"
            );
            (StreamEvent::Terminal, Flow::Finished)
        }
        Signal::Error(detail) => {
            warn!(
                id = %emitter.session_id,
                generation = emitter.generation,
                detail,
                "server signalled stream error"
            );
            (
                StreamEvent::Failed(CoachError::StreamDropped(format!("server error: {detail}"))),
                Flow::Finished,
            )
        }
    };
    emitter.emit(event).await.then_some(flow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent() {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(std::future::pending::<()>());
        let mut handle = SessionHandle {
            id: Uuid::new_v4(),
            mode: ConversationMode::General,
            created_at: Utc::now(),
            cancel: cancel.clone(),
            task: Some(task),
        };

        assert!(!handle.is_closed());
        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn closing_vacant_slot_is_noop() {
        let mut slot: Option<SessionHandle> = None;
        close_slot(&mut slot);
        close_slot(&mut slot);
        assert!(slot.is_none());
    }
}
