//! Conversation controller: the single source of truth for one chat session.
//!
//! The controller is a synchronous state machine. UI operations return the
//! [`Effect`]s the runtime must execute, in order; asynchronous completions
//! come back as one [`SessionEvent`] enumeration handled by
//! [`Controller::dispatch`]. Nothing here performs I/O.
//!
//! ```text
//!            submit / auto-start            Opened
//!   Idle ─────────────────────────► Thinking ───────► Streaming
//!    ▲                                 │                  │
//!    │      Failed (error message)     │                  │ Terminal / Failed
//!    └─────────────────────────────────┴──────────────────┘
//! ```
//!
//! Every async operation is tagged with the generation that was current
//! when it was issued. Submissions, mode switches and shutdown advance the
//! generation; completions carrying an older one are discarded. Log commits
//! outlive their turn, so they are tagged with the mode epoch instead, which
//! only mode switches and shutdown advance.

use crate::error::{CoachError, Result};
use crate::mode::{AUTO_START_MESSAGE, ConversationMode, StartBehavior, StreamTarget};
use crate::stream::classifier::{Classified, ControlEvent, ControlKind, DropReason};
use crate::stream::connection::{StreamEvent, StreamUpdate};
use crate::transcript::{Message, MessageId, Transcript};
use crate::transcription::AudioClip;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Text of the user bubble shown while a voice message is transcribed.
pub const VOICE_PLACEHOLDER: &str = "Voice message";

pub const CREDENTIAL_UNAVAILABLE_MESSAGE: &str = "Your session has expired. Please sign in again.";
pub const CONNECTION_FAILED_MESSAGE: &str = "Couldn't reach the assistant. Please try again.";
pub const STREAM_DROPPED_MESSAGE: &str = "The response was interrupted and may be incomplete.";
pub const TRANSCRIPTION_FAILED_MESSAGE: &str =
    "Sorry, I couldn't understand the voice message. Please try again.";
pub const LOG_COMMIT_FAILED_MESSAGE: &str = "Couldn't save your log entry. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    /// Request issued, no frame yet.
    Thinking,
    /// Tokens are arriving into the active message.
    Streaming,
}

/// Animation flags. Only phase transitions touch them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Indicators {
    pub thinking: bool,
    pub typing: bool,
}

/// A choice offered to the user by a control event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Affordance {
    /// Save the generated result or keep modifying it.
    SavePoint,
    /// Jump to another screen.
    Navigation { target: String },
}

/// The user's answer to an [`Affordance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffordanceChoice {
    Save,
    Modify,
    Accept,
    Dismiss,
}

/// Work the runtime performs on the controller's behalf, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenStream {
        generation: u64,
        target: StreamTarget,
    },
    /// Close the live stream, if any. Always emitted before `OpenStream`.
    CloseStream,
    ResetConversation {
        user_id: String,
    },
    Transcribe {
        generation: u64,
        audio: AudioClip,
        user_id: String,
    },
    CommitLogEntry {
        epoch: u64,
        user_id: String,
        entry: Value,
    },
    ClearInput,
    ScrollToBottom,
    OfferAffordance(Affordance),
    Navigate {
        target: String,
    },
}

/// Asynchronous completions fed back into [`Controller::dispatch`].
#[derive(Debug)]
pub enum SessionEvent {
    Stream(StreamUpdate),
    Transcribed {
        generation: u64,
        result: Result<String>,
    },
    LogCommitted {
        epoch: u64,
        result: Result<()>,
    },
}

impl From<StreamUpdate> for SessionEvent {
    fn from(update: StreamUpdate) -> Self {
        Self::Stream(update)
    }
}

/// Everything a UI needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub mode: ConversationMode,
    pub phase: Phase,
    pub indicators: Indicators,
    pub messages: Vec<Message>,
    pub thinking_label: &'static str,
    pub typing_label: &'static str,
    pub placeholder: &'static str,
    pub reward_points: Option<i64>,
    pub pending_affordance: Option<Affordance>,
    pub meal: Option<String>,
    pub can_submit: bool,
}

#[derive(Debug)]
struct Deferred {
    message: MessageId,
    tokens: Vec<String>,
}

#[derive(Debug)]
pub struct Controller {
    mode: ConversationMode,
    user_id: String,
    separator: String,
    phase: Phase,
    indicators: Indicators,
    transcript: Transcript,
    active: Option<MessageId>,
    generation: u64,
    epoch: u64,
    meal: Option<String>,
    awaiting_selection: bool,
    recording: bool,
    near_bottom: bool,
    reward_points: Option<i64>,
    pending_affordance: Option<Affordance>,
    deferred: Option<Deferred>,
    voice_placeholder: Option<MessageId>,
}

impl Controller {
    pub fn new(
        mode: ConversationMode,
        user_id: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            user_id: user_id.into(),
            separator: separator.into(),
            phase: Phase::Idle,
            indicators: Indicators::default(),
            transcript: Transcript::new(),
            active: None,
            generation: 0,
            epoch: 0,
            meal: None,
            awaiting_selection: false,
            recording: false,
            near_bottom: true,
            reward_points: None,
            pending_affordance: None,
            deferred: None,
            voice_placeholder: None,
        }
    }

    // ── accessors ─────────────────────────────────────────────

    pub fn mode(&self) -> ConversationMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn indicators(&self) -> Indicators {
        self.indicators
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn active_message(&self) -> Option<MessageId> {
        self.active
    }

    pub fn reward_points(&self) -> Option<i64> {
        self.reward_points
    }

    pub fn pending_affordance(&self) -> Option<&Affordance> {
        self.pending_affordance.as_ref()
    }

    pub fn can_submit(&self) -> bool {
        self.check_can_submit().is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let profile = self.mode.profile();
        SessionSnapshot {
            mode: self.mode,
            phase: self.phase,
            indicators: self.indicators,
            messages: self.transcript.messages().to_vec(),
            thinking_label: profile.thinking_label,
            typing_label: profile.typing_label,
            placeholder: profile.placeholder,
            reward_points: self.reward_points,
            pending_affordance: self.pending_affordance.clone(),
            meal: self.meal.clone(),
            can_submit: self.can_submit(),
        }
    }

    // ── user operations ───────────────────────────────────────

    /// Run the start behaviour of the current mode. Called once when the
    /// session comes up; mode switches do this themselves.
    pub fn start(&mut self) -> Vec<Effect> {
        self.enter_mode()
    }

    /// # Errors
    ///
    /// Returns [`CoachError::SubmissionBlocked`] for blank text, while a
    /// response is in progress, while recording, or before a required
    /// selection is made.
    pub fn submit_text(&mut self, text: &str) -> Result<Vec<Effect>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoachError::SubmissionBlocked("message is empty".into()));
        }
        self.check_can_submit()?;

        self.transcript.push_user(text);
        let mut effects = vec![Effect::ClearInput];
        effects.extend(self.begin_turn(text.to_owned()));
        Ok(effects)
    }

    /// # Errors
    ///
    /// Same gating as [`Controller::submit_text`], plus an empty clip.
    pub fn submit_voice(&mut self, audio: AudioClip) -> Result<Vec<Effect>> {
        if audio.bytes.is_empty() {
            return Err(CoachError::SubmissionBlocked("voice message is empty".into()));
        }
        self.check_can_submit()?;

        self.settle_affordance();
        self.voice_placeholder = Some(self.transcript.push_user(VOICE_PLACEHOLDER));
        self.generation += 1;
        self.enter_thinking();
        let mut effects = vec![Effect::Transcribe {
            generation: self.generation,
            audio,
            user_id: self.user_id.clone(),
        }];
        self.scroll(&mut effects);
        Ok(effects)
    }

    /// Switch modes. Allowed in any state; tears down the live turn first.
    pub fn switch_mode(&mut self, mode: ConversationMode) -> Vec<Effect> {
        info!(from = %self.mode, to = %mode, generation = self.generation + 1, "switching mode");
        let mut effects = vec![
            Effect::CloseStream,
            Effect::ResetConversation {
                user_id: self.user_id.clone(),
            },
        ];
        self.generation += 1;
        self.epoch += 1;
        self.exit_to_idle();
        self.transcript.clear();
        self.pending_affordance = None;
        self.deferred = None;
        self.voice_placeholder = None;
        self.meal = None;
        self.reward_points = None;
        self.mode = mode;
        effects.extend(self.enter_mode());
        effects
    }

    /// Provide the mode's required parameter (the meal, for food logging).
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::SubmissionBlocked`] for a blank value.
    pub fn select_required_parameter(&mut self, value: &str) -> Result<Vec<Effect>> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CoachError::SubmissionBlocked("selection is empty".into()));
        }
        self.meal = Some(value.to_owned());

        let mut effects = Vec::new();
        if self.awaiting_selection {
            self.awaiting_selection = false;
            self.transcript
                .push_assistant(self.mode.welcome_message(Some(value)));
            self.scroll(&mut effects);
        }
        Ok(effects)
    }

    /// Answer the pending affordance.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::SubmissionBlocked`] when the choice does not
    /// match the pending affordance.
    pub fn resolve_affordance(&mut self, choice: AffordanceChoice) -> Result<Vec<Effect>> {
        match (choice, self.pending_affordance.clone()) {
            (AffordanceChoice::Dismiss, _) => {
                self.flush_deferred();
                self.pending_affordance = None;
                Ok(Vec::new())
            }
            (AffordanceChoice::Save | AffordanceChoice::Modify, Some(Affordance::SavePoint)) => {
                self.flush_deferred();
                self.pending_affordance = None;
                self.transcript.remove_loader();
                if let Some(id) = self.active.take() {
                    self.transcript.finalize(id);
                }
                self.exit_to_idle();

                let reply = if choice == AffordanceChoice::Save {
                    "save"
                } else {
                    "modify"
                };
                self.transcript.push_user(reply);
                Ok(self.begin_turn(reply.to_owned()))
            }
            (AffordanceChoice::Accept, Some(Affordance::Navigation { target })) => {
                self.flush_deferred();
                self.pending_affordance = None;
                Ok(vec![Effect::Navigate { target }])
            }
            (choice, pending) => Err(CoachError::SubmissionBlocked(format!(
                "{choice:?} does not answer {pending:?}"
            ))),
        }
    }

    pub fn set_recording(&mut self, active: bool) {
        self.recording = active;
    }

    pub fn set_viewport_near_bottom(&mut self, near: bool) {
        self.near_bottom = near;
    }

    /// Tear down for good: close the stream and reset the server conversation.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        self.generation += 1;
        self.epoch += 1;
        self.transcript.remove_loader();
        if let Some(id) = self.active.take() {
            self.transcript.finalize(id);
        }
        self.exit_to_idle();
        vec![
            Effect::CloseStream,
            Effect::ResetConversation {
                user_id: self.user_id.clone(),
            },
        ]
    }

    // ── event dispatch ────────────────────────────────────────

    /// Apply one asynchronous completion. Stale events are dropped.
    pub fn dispatch(&mut self, event: SessionEvent) -> Vec<Effect> {
        let (tag, current) = match &event {
            SessionEvent::Stream(update) => (update.generation, self.generation),
            SessionEvent::Transcribed { generation, .. } => (*generation, self.generation),
            SessionEvent::LogCommitted { epoch, .. } => (*epoch, self.epoch),
        };
        if tag != current {
            debug!(tag, current, "discarding stale completion");
            return Vec::new();
        }

        match event {
            SessionEvent::Stream(update) => self.on_stream(update.event),
            SessionEvent::Transcribed { result, .. } => self.on_transcribed(result),
            SessionEvent::LogCommitted { result, .. } => self.on_log_committed(result),
        }
    }

    fn on_log_committed(&mut self, result: Result<()>) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Err(e) = result {
            warn!(error = %e, "log entry commit failed");
            self.transcript.push_error(LOG_COMMIT_FAILED_MESSAGE);
            self.scroll(&mut effects);
        }
        effects
    }

    fn on_stream(&mut self, event: StreamEvent) -> Vec<Effect> {
        match event {
            StreamEvent::Opened => self.on_opened(),
            StreamEvent::Frame(classified) => self.on_frame(classified),
            StreamEvent::Terminal => self.on_terminal(),
            StreamEvent::Failed(error) => self.on_failed(&error),
        }
    }

    fn on_opened(&mut self) -> Vec<Effect> {
        if self.phase != Phase::Thinking {
            debug!(phase = ?self.phase, "ignoring open outside thinking");
            return Vec::new();
        }
        self.active = Some(self.transcript.begin_streaming());
        self.enter_streaming();
        let mut effects = Vec::new();
        self.scroll(&mut effects);
        effects
    }

    fn on_frame(&mut self, classified: Classified) -> Vec<Effect> {
        let mut effects = Vec::new();
        match classified {
            Classified::Token { text } => self.on_token(text, &mut effects),
            Classified::Control(event) => self.on_control(event, &mut effects),
            Classified::LoaderStart { label } => {
                let label = if label.is_empty() {
                    self.mode.profile().thinking_label.to_owned()
                } else {
                    label
                };
                self.transcript.set_loader(label);
                self.scroll(&mut effects);
            }
            Classified::LoaderRemove => {
                self.transcript.remove_loader();
            }
            Classified::Dropped(DropReason::Empty) => {}
            Classified::Dropped(DropReason::Malformed) => {
                debug!(generation = self.generation, "malformed control frame ignored");
            }
        }
        effects
    }

    fn on_token(&mut self, text: String, effects: &mut Vec<Effect>) {
        let Some(id) = self.active else {
            debug!("token without an active message");
            return;
        };
        if self.pending_affordance.is_some() {
            self.deferred
                .get_or_insert_with(|| Deferred {
                    message: id,
                    tokens: Vec::new(),
                })
                .tokens
                .push(text);
            return;
        }
        if self.transcript.append_token(id, &text, &self.separator) {
            self.scroll(effects);
        }
    }

    fn on_control(&mut self, event: ControlEvent, effects: &mut Vec<Effect>) {
        debug!(kind = ?event.kind, "control event");
        match &event.kind {
            ControlKind::FoodLog | ControlKind::WorkoutLog => {
                let fallback = if event.kind == ControlKind::FoodLog {
                    "Food logged successfully."
                } else {
                    "Workout logged successfully."
                };
                self.push_standalone(event.display_text().unwrap_or(fallback), effects);
                if let Some(points) = event.reward_point {
                    self.reward_points = Some(points);
                }
            }
            ControlKind::TemplateFinalized => {
                self.push_standalone(
                    event.display_text().unwrap_or("Your template has been saved."),
                    effects,
                );
                if let Some(points) = event.reward_point {
                    self.reward_points = Some(points);
                }
            }
            ControlKind::Prompt => {
                if let Some(text) = event.display_text() {
                    self.push_standalone(text, effects);
                }
            }
            ControlKind::SavePoint => {
                if let Some(text) = event.display_text() {
                    self.push_standalone(text, effects);
                }
                self.offer(Affordance::SavePoint, effects);
            }
            ControlKind::Navigate => {
                if let Some(text) = event.display_text() {
                    self.push_standalone(text, effects);
                }
                match event.target.clone() {
                    Some(target) => self.offer(Affordance::Navigation { target }, effects),
                    None => warn!("navigation event without a target"),
                }
            }
            ControlKind::LogEntry => match event.entry {
                Some(entry) => effects.push(Effect::CommitLogEntry {
                    epoch: self.epoch,
                    user_id: self.user_id.clone(),
                    entry,
                }),
                None => warn!("log entry event without an entry"),
            },
            ControlKind::Unknown(kind) => {
                debug!(kind = %kind, "ignoring unknown control event");
            }
        }
    }

    fn on_terminal(&mut self) -> Vec<Effect> {
        self.transcript.remove_loader();
        self.flush_deferred();
        if let Some(id) = self.active.take() {
            self.transcript.finalize(id);
        }
        self.exit_to_idle();
        debug!(generation = self.generation, "turn complete");
        vec![Effect::CloseStream]
    }

    fn on_failed(&mut self, error: &CoachError) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.phase {
            Phase::Idle => {
                debug!(error = %error, "failure after turn ended");
                return effects;
            }
            Phase::Thinking => {
                warn!(error = %error, generation = self.generation, "stream failed to open");
                self.transcript.remove_loader();
                self.transcript.push_error(failure_message(error));
            }
            Phase::Streaming => {
                warn!(error = %error, generation = self.generation, "stream dropped mid-response");
                self.transcript.remove_loader();
                self.flush_deferred();
                if let Some(id) = self.active.take() {
                    self.transcript.finalize(id);
                }
                self.transcript.push_error(STREAM_DROPPED_MESSAGE);
            }
        }
        self.exit_to_idle();
        effects.push(Effect::CloseStream);
        self.scroll(&mut effects);
        effects
    }

    fn on_transcribed(&mut self, result: Result<String>) -> Vec<Effect> {
        let placeholder = self.voice_placeholder.take();
        let text = match result {
            Ok(text) if !text.trim().is_empty() => text.trim().to_owned(),
            Ok(_) => {
                warn!("transcription returned no text");
                return self.voice_failed();
            }
            Err(e) => {
                warn!(error = %e, "transcription failed");
                return self.voice_failed();
            }
        };

        if let Some(id) = placeholder {
            self.transcript.replace_user_text(id, text.clone());
        }
        let target = self.target(text);
        vec![
            Effect::ClearInput,
            Effect::CloseStream,
            Effect::OpenStream {
                generation: self.generation,
                target,
            },
        ]
    }

    fn voice_failed(&mut self) -> Vec<Effect> {
        self.transcript.push_error(TRANSCRIPTION_FAILED_MESSAGE);
        self.exit_to_idle();
        let mut effects = Vec::new();
        self.scroll(&mut effects);
        effects
    }

    // ── transitions ───────────────────────────────────────────

    fn enter_mode(&mut self) -> Vec<Effect> {
        self.awaiting_selection = false;
        match self.mode.profile().start {
            StartBehavior::Welcome => {
                self.transcript.push_assistant(self.mode.welcome_message(None));
                Vec::new()
            }
            StartBehavior::AutoStart => self.begin_turn(AUTO_START_MESSAGE.to_owned()),
            StartBehavior::AwaitSelection => {
                self.awaiting_selection = true;
                Vec::new()
            }
        }
    }

    fn begin_turn(&mut self, input: String) -> Vec<Effect> {
        self.settle_affordance();
        self.generation += 1;
        self.enter_thinking();
        let target = self.target(input);
        let mut effects = vec![
            Effect::CloseStream,
            Effect::OpenStream {
                generation: self.generation,
                target,
            },
        ];
        self.scroll(&mut effects);
        effects
    }

    fn target(&self, input: String) -> StreamTarget {
        StreamTarget {
            mode: self.mode,
            user_id: self.user_id.clone(),
            input,
            meal: self.meal.clone(),
        }
    }

    fn enter_thinking(&mut self) {
        self.phase = Phase::Thinking;
        self.indicators = Indicators {
            thinking: true,
            typing: false,
        };
    }

    fn enter_streaming(&mut self) {
        self.phase = Phase::Streaming;
        self.indicators = Indicators {
            thinking: false,
            typing: true,
        };
    }

    fn exit_to_idle(&mut self) {
        self.phase = Phase::Idle;
        self.indicators = Indicators::default();
        self.active = None;
    }

    fn check_can_submit(&self) -> Result<()> {
        if self.phase != Phase::Idle {
            return Err(CoachError::SubmissionBlocked(
                "a response is in progress".into(),
            ));
        }
        if self.recording {
            return Err(CoachError::SubmissionBlocked("recording is active".into()));
        }
        if self.awaiting_selection {
            return Err(CoachError::SubmissionBlocked(format!(
                "{} requires a selection first",
                self.mode
            )));
        }
        Ok(())
    }

    fn push_standalone(&mut self, text: &str, effects: &mut Vec<Effect>) {
        self.transcript.push_assistant(text);
        self.scroll(effects);
    }

    fn offer(&mut self, affordance: Affordance, effects: &mut Vec<Effect>) {
        self.pending_affordance = Some(affordance.clone());
        effects.push(Effect::OfferAffordance(affordance));
    }

    /// New input answers any offer the user left open.
    fn settle_affordance(&mut self) {
        self.flush_deferred();
        if let Some(affordance) = self.pending_affordance.take() {
            debug!(?affordance, "unanswered offer dropped by new input");
        }
    }

    fn flush_deferred(&mut self) {
        let Some(deferred) = self.deferred.take() else {
            return;
        };
        let mut appended = 0usize;
        for token in &deferred.tokens {
            if self
                .transcript
                .append_token(deferred.message, token, &self.separator)
            {
                appended += 1;
            }
        }
        if appended < deferred.tokens.len() {
            debug!(
                dropped = deferred.tokens.len() - appended,
                "deferred tokens outlived their message"
            );
        }
    }

    fn scroll(&self, effects: &mut Vec<Effect>) {
        if self.near_bottom && !effects.contains(&Effect::ScrollToBottom) {
            effects.push(Effect::ScrollToBottom);
        }
    }
}

/// User-facing text for a failure before any frame arrived.
fn failure_message(error: &CoachError) -> &'static str {
    match error {
        CoachError::CredentialUnavailable(_) | CoachError::RefreshFailed(_) => {
            CREDENTIAL_UNAVAILABLE_MESSAGE
        }
        CoachError::StreamDropped(_) => STREAM_DROPPED_MESSAGE,
        _ => CONNECTION_FAILED_MESSAGE,
    }
}
