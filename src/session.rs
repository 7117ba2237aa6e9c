//! Session runtime: an actor that owns the controller and executes its effects.
//!
//! The UI talks to the actor through a cloneable [`SessionClient`]. Commands
//! travel over an mpsc channel with oneshot replies; completions from stream,
//! transcription and log-commit tasks come back on a second channel. Every
//! transition is therefore serialized through [`ChatSession::run`].
//!
//! State is published on a `watch` channel of [`SessionSnapshot`]s, and
//! one-shot UI notifications on a `broadcast` channel of [`UiNotice`]s.

use crate::backend::Backend;
use crate::config::CoachConfig;
use crate::controller::{
    Affordance, AffordanceChoice, Controller, Effect, SessionEvent, SessionSnapshot,
};
use crate::credentials::{CredentialBroker, SecureStore};
use crate::error::{CoachError, Result};
use crate::mode::ConversationMode;
use crate::stream::connection::{SessionConnection, SessionHandle, close_slot};
use crate::transcription::{AudioClip, Transcriber};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Notifications the UI reacts to once, as opposed to rendered state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiNotice {
    ClearInput,
    ScrollToBottom,
    AffordanceOffered(Affordance),
    NavigationRequested { target: String },
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    SubmitText { text: String, reply: Reply<()> },
    SubmitVoice { audio: AudioClip, reply: Reply<()> },
    SwitchMode { mode: ConversationMode, reply: Reply<()> },
    SelectRequiredParameter { value: String, reply: Reply<()> },
    ResolveAffordance { choice: AffordanceChoice, reply: Reply<()> },
    SetRecording(bool),
    SetViewportNearBottom(bool),
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle used by the UI to drive a running [`ChatSession`].
#[derive(Clone)]
pub struct SessionClient {
    command_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    notice_tx: broadcast::Sender<UiNotice>,
}

impl SessionClient {
    async fn request(&self, build: impl FnOnce(Reply<()>) -> Command) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|e| CoachError::Channel(format!("session is not running: {e}")))?;
        response
            .await
            .map_err(|e| CoachError::Channel(format!("session reply dropped: {e}")))?
    }

    async fn notify(&self, command: Command) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|e| CoachError::Channel(format!("session is not running: {e}")))
    }

    /// # Errors
    ///
    /// [`CoachError::SubmissionBlocked`] when the controller refuses the
    /// submission, [`CoachError::Channel`] when the session has stopped.
    pub async fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::SubmitText { text, reply }).await
    }

    /// # Errors
    ///
    /// Same as [`SessionClient::submit_text`].
    pub async fn submit_voice(&self, audio: AudioClip) -> Result<()> {
        self.request(|reply| Command::SubmitVoice { audio, reply })
            .await
    }

    /// # Errors
    ///
    /// [`CoachError::Channel`] when the session has stopped.
    pub async fn switch_mode(&self, mode: ConversationMode) -> Result<()> {
        self.request(|reply| Command::SwitchMode { mode, reply }).await
    }

    /// # Errors
    ///
    /// [`CoachError::SubmissionBlocked`] for a blank value.
    pub async fn select_required_parameter(&self, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        self.request(|reply| Command::SelectRequiredParameter { value, reply })
            .await
    }

    /// # Errors
    ///
    /// [`CoachError::SubmissionBlocked`] when the choice does not answer the
    /// pending affordance.
    pub async fn resolve_affordance(&self, choice: AffordanceChoice) -> Result<()> {
        self.request(|reply| Command::ResolveAffordance { choice, reply })
            .await
    }

    /// # Errors
    ///
    /// [`CoachError::Channel`] when the session has stopped.
    pub async fn set_recording(&self, active: bool) -> Result<()> {
        self.notify(Command::SetRecording(active)).await
    }

    /// # Errors
    ///
    /// [`CoachError::Channel`] when the session has stopped.
    pub async fn set_viewport_near_bottom(&self, near: bool) -> Result<()> {
        self.notify(Command::SetViewportNearBottom(near)).await
    }

    /// Stop the session, closing the stream and resetting the conversation.
    /// Returns once the actor has finished.
    ///
    /// # Errors
    ///
    /// [`CoachError::Channel`] when the session has already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.notify(Command::Shutdown { reply }).await?;
        done.await
            .map_err(|e| CoachError::Channel(format!("shutdown reply dropped: {e}")))
    }

    /// The latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A receiver that observes every published state.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<UiNotice> {
        self.notice_tx.subscribe()
    }
}

/// The session actor.
pub struct ChatSession {
    controller: Controller,
    connection: SessionConnection,
    transcriber: Arc<Transcriber>,
    backend: Arc<Backend>,
    live: Option<SessionHandle>,
    command_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
    event_rx: mpsc::Receiver<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notice_tx: broadcast::Sender<UiNotice>,
}

impl ChatSession {
    /// Wire up a session from configuration and a secure store.
    ///
    /// The stable user id is read from the store once; a missing id is
    /// logged and left empty, so every turn ends in a credential error
    /// until one is provisioned.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] for an invalid configuration or when
    /// the HTTP client cannot be built.
    pub fn new(config: &CoachConfig, store: Arc<dyn SecureStore>) -> Result<(SessionClient, Self)> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.api.connect_timeout())
            .build()
            .map_err(|e| CoachError::Config(format!("failed to build HTTP client: {e}")))?;

        let broker = Arc::new(CredentialBroker::new(config, store, client.clone())?);
        let user_id = match broker.user_id() {
            Ok(Some(id)) => id,
            Ok(None) => {
                warn!("no stored user id; streams will fail until one is provisioned");
                String::new()
            }
            Err(e) => {
                warn!(error = %e, "failed to read stored user id");
                String::new()
            }
        };

        let connection = SessionConnection::new(config, Arc::clone(&broker), client.clone())?;
        let transcriber = Transcriber::new(config, Arc::clone(&broker), client.clone())?;
        let backend = Backend::new(config, broker, client)?;
        let controller = Controller::new(
            config.session.initial_mode,
            user_id,
            config.stream.token_separator.clone(),
        );

        let (command_tx, command_rx) = mpsc::channel(config.session.command_capacity.max(1));
        let (event_tx, event_rx) = mpsc::channel(config.stream.event_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(controller.snapshot());
        let (notice_tx, _notice_rx) = broadcast::channel(config.session.notice_capacity.max(1));

        let client = SessionClient {
            command_tx,
            snapshot_rx,
            notice_tx: notice_tx.clone(),
        };
        let session = Self {
            controller,
            connection,
            transcriber: Arc::new(transcriber),
            backend: Arc::new(backend),
            live: None,
            command_rx,
            event_tx,
            event_rx,
            snapshot_tx,
            notice_tx,
        };
        Ok((client, session))
    }

    /// Build a session and run it on the current runtime.
    ///
    /// # Errors
    ///
    /// See [`ChatSession::new`].
    pub fn spawn(
        config: &CoachConfig,
        store: Arc<dyn SecureStore>,
    ) -> Result<(SessionClient, JoinHandle<()>)> {
        let (client, session) = Self::new(config, store)?;
        Ok((client, tokio::spawn(session.run())))
    }

    /// Run until shutdown or until every client is dropped.
    pub async fn run(mut self) {
        info!(mode = %self.controller.mode(), "chat session started");
        let effects = self.controller.start();
        self.apply(effects).await;

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.stop().await;
                        let _ = reply.send(());
                        return;
                    }
                    Some(command) => self.handle(command).await,
                    None => {
                        debug!("all session clients dropped");
                        self.stop().await;
                        return;
                    }
                },
                Some(event) = self.event_rx.recv() => {
                    let effects = self.controller.dispatch(event);
                    self.apply(effects).await;
                }
            }
        }
    }

    async fn stop(&mut self) {
        let effects = self.controller.shutdown();
        self.apply(effects).await;
        close_slot(&mut self.live);
        info!("chat session stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SubmitText { text, reply } => {
                let result = self.controller.submit_text(&text);
                self.respond(result, reply).await;
            }
            Command::SubmitVoice { audio, reply } => {
                let result = self.controller.submit_voice(audio);
                self.respond(result, reply).await;
            }
            Command::SwitchMode { mode, reply } => {
                let effects = self.controller.switch_mode(mode);
                self.respond(Ok(effects), reply).await;
            }
            Command::SelectRequiredParameter { value, reply } => {
                let result = self.controller.select_required_parameter(&value);
                self.respond(result, reply).await;
            }
            Command::ResolveAffordance { choice, reply } => {
                let result = self.controller.resolve_affordance(choice);
                self.respond(result, reply).await;
            }
            Command::SetRecording(active) => {
                self.controller.set_recording(active);
                self.publish();
            }
            Command::SetViewportNearBottom(near) => {
                self.controller.set_viewport_near_bottom(near);
            }
            Command::Shutdown { .. } => {}
        }
    }

    async fn respond(&mut self, result: Result<Vec<Effect>>, reply: Reply<()>) {
        match result {
            Ok(effects) => {
                self.apply(effects).await;
                let _ = reply.send(Ok(()));
            }
            Err(e) => {
                debug!(error = %e, "command rejected");
                let _ = reply.send(Err(e));
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute(effect).await;
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.controller.snapshot());
    }

    fn notice(&self, notice: UiNotice) {
        // No subscribers is fine.
        let _ = self.notice_tx.send(notice);
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenStream { generation, target } => {
                if self.live.as_ref().is_some_and(|h| !h.is_closed()) {
                    warn!(generation, "closing lingering stream before opening a new one");
                }
                close_slot(&mut self.live);
                self.live = Some(
                    self.connection
                        .open(&target, generation, self.event_tx.clone()),
                );
            }
            Effect::CloseStream => close_slot(&mut self.live),
            Effect::ResetConversation { user_id } => {
                if let Err(e) = self.backend.reset_conversation(&user_id).await {
                    warn!(error = %e, "conversation reset failed");
                }
            }
            Effect::Transcribe {
                generation,
                audio,
                user_id,
            } => {
                let transcriber = Arc::clone(&self.transcriber);
                let events = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = transcriber.transcribe(&audio, &user_id).await;
                    let _ = events
                        .send(SessionEvent::Transcribed { generation, result })
                        .await;
                });
            }
            Effect::CommitLogEntry {
                epoch,
                user_id,
                entry,
            } => {
                let backend = Arc::clone(&self.backend);
                let events = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = backend.commit_log_entry(&user_id, &entry).await;
                    let _ = events
                        .send(SessionEvent::LogCommitted { epoch, result })
                        .await;
                });
            }
            Effect::ClearInput => self.notice(UiNotice::ClearInput),
            Effect::ScrollToBottom => self.notice(UiNotice::ScrollToBottom),
            Effect::OfferAffordance(affordance) => {
                self.notice(UiNotice::AffordanceOffered(affordance));
            }
            Effect::Navigate { target } => {
                info!(%target, "navigation requested");
                self.notice(UiNotice::NavigationRequested { target });
            }
        }
    }
}
