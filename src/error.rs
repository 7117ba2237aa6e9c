//! Error types for the conversation session core.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`CoachError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// No cached credential and the refresh attempt failed.
    pub const CREDENTIAL_UNAVAILABLE: &str = "CREDENTIAL_UNAVAILABLE";

    /// The refresh endpoint did not hand out a new credential.
    pub const REFRESH_FAILED: &str = "REFRESH_FAILED";

    /// The stream could not be established.
    pub const CONNECTION_FAILED: &str = "CONNECTION_FAILED";

    /// The stream opened but terminated abnormally.
    pub const STREAM_DROPPED: &str = "STREAM_DROPPED";

    /// Voice transcription failed or produced no text.
    pub const TRANSCRIPTION_FAILED: &str = "TRANSCRIPTION_FAILED";

    /// A structured frame failed to parse.
    pub const MALFORMED_CONTROL_EVENT: &str = "MALFORMED_CONTROL_EVENT";

    /// Log commit or conversation reset failed.
    pub const SIDE_EFFECT_FAILED: &str = "SIDE_EFFECT_FAILED";

    /// Submission is not possible in the current state.
    pub const SUBMISSION_BLOCKED: &str = "SUBMISSION_BLOCKED";

    /// Secure value store failure.
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";

    /// Invalid or unreadable configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The session actor is gone or a reply was dropped.
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";

    /// Filesystem I/O error.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the session core.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum CoachError {
    /// No cached credential and refresh failed.
    #[error("[{}] {}", error_codes::CREDENTIAL_UNAVAILABLE, .0)]
    CredentialUnavailable(String),

    /// The refresh endpoint rejected the request or returned no token.
    #[error("[{}] {}", error_codes::REFRESH_FAILED, .0)]
    RefreshFailed(String),

    /// The stream could not be established (network refused, non-2xx).
    #[error("[{}] {}", error_codes::CONNECTION_FAILED, .0)]
    ConnectionFailed(String),

    /// The stream opened but ended abnormally mid-response.
    #[error("[{}] {}", error_codes::STREAM_DROPPED, .0)]
    StreamDropped(String),

    /// Voice transcription failed.
    #[error("[{}] {}", error_codes::TRANSCRIPTION_FAILED, .0)]
    TranscriptionFailed(String),

    /// A frame looked structured but failed to parse.
    #[error("[{}] {}", error_codes::MALFORMED_CONTROL_EVENT, .0)]
    MalformedControlEvent(String),

    /// An external side effect (log commit, conversation reset) failed.
    #[error("[{}] {}", error_codes::SIDE_EFFECT_FAILED, .0)]
    SideEffectFailed(String),

    /// Submission rejected by the controller (busy, recording, missing selection).
    #[error("[{}] {}", error_codes::SUBMISSION_BLOCKED, .0)]
    SubmissionBlocked(String),

    /// Secure value store failure.
    #[error("[{}] {}", error_codes::STORAGE_ERROR, .0)]
    Storage(String),

    /// Configuration error.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Command or reply channel closed.
    #[error("[{}] {}", error_codes::CHANNEL_CLOSED, .0)]
    Channel(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl CoachError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialUnavailable(_) => error_codes::CREDENTIAL_UNAVAILABLE,
            Self::RefreshFailed(_) => error_codes::REFRESH_FAILED,
            Self::ConnectionFailed(_) => error_codes::CONNECTION_FAILED,
            Self::StreamDropped(_) => error_codes::STREAM_DROPPED,
            Self::TranscriptionFailed(_) => error_codes::TRANSCRIPTION_FAILED,
            Self::MalformedControlEvent(_) => error_codes::MALFORMED_CONTROL_EVENT,
            Self::SideEffectFailed(_) => error_codes::SIDE_EFFECT_FAILED,
            Self::SubmissionBlocked(_) => error_codes::SUBMISSION_BLOCKED,
            Self::Storage(_) => error_codes::STORAGE_ERROR,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Channel(_) => error_codes::CHANNEL_CLOSED,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::CredentialUnavailable(m)
            | Self::RefreshFailed(m)
            | Self::ConnectionFailed(m)
            | Self::StreamDropped(m)
            | Self::TranscriptionFailed(m)
            | Self::MalformedControlEvent(m)
            | Self::SideEffectFailed(m)
            | Self::SubmissionBlocked(m)
            | Self::Storage(m)
            | Self::Config(m)
            | Self::Channel(m) => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }

    /// Whether this failure is rendered to the user as a transcript error message.
    ///
    /// Everything else is recovered locally (logged, dropped, or returned to
    /// the caller of a UI command).
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            Self::CredentialUnavailable(_)
                | Self::ConnectionFailed(_)
                | Self::StreamDropped(_)
                | Self::TranscriptionFailed(_)
        )
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CoachError>;
