//! fitcoach: streaming conversational session manager for a fitness
//! assistant chat surface.
//!
//! A chat session sends user text (or transcribed voice) to a mode-specific
//! streaming endpoint and renders the reply incrementally. Server frames are
//! either content tokens, loader markers, or structured control events that
//! trigger side effects such as log confirmations, reward points and
//! save/navigate offers.
//!
//! # Architecture
//!
//! - **Credentials**: [`credentials::CredentialBroker`] verifies or refreshes
//!   the bearer token kept in a [`credentials::SecureStore`]
//! - **Stream**: [`stream::SessionConnection`] opens one SSE stream per turn;
//!   frames are decoded by [`stream::SseDecoder`] and classified by
//!   [`stream::classify`]
//! - **Controller**: [`controller::Controller`] is a pure state machine that
//!   owns the transcript and returns effects
//! - **Session**: [`session::ChatSession`] is the actor that executes those
//!   effects; UIs drive it through [`session::SessionClient`]

pub mod backend;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod mode;
pub mod session;
pub mod stream;
pub mod transcript;
pub mod transcription;

pub use config::CoachConfig;
pub use controller::{AffordanceChoice, Controller, Effect, Phase, SessionEvent, SessionSnapshot};
pub use error::{CoachError, Result};
pub use mode::ConversationMode;
pub use session::{ChatSession, SessionClient, UiNotice};
