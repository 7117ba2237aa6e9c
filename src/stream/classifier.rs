//! Frame classification.
//!
//! Each inbound data frame is classified on its own, in arrival order:
//!
//! ```text
//! "{...}"                 → Control (or Dropped(Malformed) if it fails to parse)
//! "[GENERATING] label"    → LoaderStart
//! "[REMOVE_LOADER]"       → LoaderRemove
//! whitespace only         → Dropped(Empty)
//! anything else           → Token (verbatim)
//! ```
//!
//! A frame that looks structured is never reinterpreted as content, so raw
//! protocol payloads cannot leak into the visible transcript.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

/// Prefix announcing that the server started a long generation step.
pub const GENERATING_MARKER: &str = "[GENERATING]";

/// Prefix telling the client to drop the loader placeholder.
pub const REMOVE_LOADER_MARKER: &str = "[REMOVE_LOADER]";

/// Result of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Control(ControlEvent),
    LoaderStart { label: String },
    LoaderRemove,
    Token { text: String },
    Dropped(DropReason),
}

/// Why a frame produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Empty,
    Malformed,
}

/// Discriminator of a control event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlKind {
    /// Food log already committed server-side.
    FoodLog,
    /// Workout log already committed server-side.
    WorkoutLog,
    /// The client must commit the carried entry.
    LogEntry,
    /// Offer the user a save/modify choice.
    SavePoint,
    /// Offer navigation to another screen.
    Navigate,
    /// A diet or workout template was finalized.
    TemplateFinalized,
    /// A standalone question or prompt for the user.
    Prompt,
    Unknown(String),
}

impl ControlKind {
    fn parse(raw: &str) -> Self {
        match raw {
            "food_log" => Self::FoodLog,
            "workout_log" => Self::WorkoutLog,
            "log_entry" => Self::LogEntry,
            "save_point" => Self::SavePoint,
            "navigate" | "navigation" => Self::Navigate,
            "template_finalized" | "template_saved" => Self::TemplateFinalized,
            "prompt" | "question" => Self::Prompt,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

/// A structured instruction carried by a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlEvent {
    pub kind: ControlKind,
    pub message: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<String>,
    pub reward_point: Option<i64>,
    /// Navigation target for `navigate` events.
    pub target: Option<String>,
    /// Entry payload for `log_entry` events.
    pub entry: Option<Value>,
    /// Every other field, untouched.
    pub extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct RawControlEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reward_point: Option<i64>,
    #[serde(default, alias = "screen")]
    target: Option<String>,
    #[serde(default, alias = "data")]
    entry: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ControlEvent {
    /// Parse a structured frame.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the frame is not an object with a string `type`.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        let raw: RawControlEvent = serde_json::from_str(frame)?;
        Ok(Self {
            kind: ControlKind::parse(&raw.kind),
            message: raw.message.filter(|m| !m.trim().is_empty()),
            prompt: raw.prompt.filter(|p| !p.trim().is_empty()),
            status: raw.status,
            reward_point: raw.reward_point,
            target: raw.target,
            entry: raw.entry,
            extra: raw.extra,
        })
    }

    /// Text to show for this event: `message`, falling back to `prompt`.
    pub fn display_text(&self) -> Option<&str> {
        self.message.as_deref().or(self.prompt.as_deref())
    }
}

fn looks_structured(trimmed: &str) -> bool {
    trimmed.starts_with('{') && trimmed.ends_with('}')
}

/// Classify one raw frame. Pure; never buffers across frames.
pub fn classify(frame: &str) -> Classified {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return Classified::Dropped(DropReason::Empty);
    }

    if looks_structured(trimmed) {
        return match ControlEvent::parse(trimmed) {
            Ok(event) => Classified::Control(event),
            Err(e) => {
                debug!(error = %e, len = trimmed.len(), "dropping malformed control frame");
                Classified::Dropped(DropReason::Malformed)
            }
        };
    }

    if let Some(rest) = trimmed.strip_prefix(GENERATING_MARKER) {
        return Classified::LoaderStart {
            label: rest.trim().to_owned(),
        };
    }

    if trimmed.starts_with(REMOVE_LOADER_MARKER) {
        return Classified::LoaderRemove;
    }

    Classified::Token {
        text: frame.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn control(frame: &str) -> ControlEvent {
        match classify(frame) {
            Classified::Control(event) => event,
            other => panic!("expected control event, got {other:?}"),
        }
    }

    // ── tokens ────────────────────────────────────────────────

    #[test]
    fn plain_text_is_token_verbatim() {
        assert_eq!(
            classify(" eggs "),
            Classified::Token {
                text: " eggs ".into()
            }
        );
    }

    #[test]
    fn whitespace_is_dropped() {
        assert_eq!(classify(""), Classified::Dropped(DropReason::Empty));
        assert_eq!(classify(" \n\t"), Classified::Dropped(DropReason::Empty));
    }

    #[test]
    fn brace_only_on_one_side_is_content() {
        assert!(matches!(classify("{not closed"), Classified::Token { .. }));
        assert!(matches!(classify("closed}"), Classified::Token { .. }));
    }

    // ── loaders ───────────────────────────────────────────────

    #[test]
    fn generating_marker_starts_loader() {
        assert_eq!(
            classify("[GENERATING] Building your meal plan"),
            Classified::LoaderStart {
                label: "Building your meal plan".into()
            }
        );
        assert_eq!(
            classify("[GENERATING]"),
            Classified::LoaderStart {
                label: String::new()
            }
        );
    }

    #[test]
    fn remove_marker_removes_loader() {
        assert_eq!(classify("[REMOVE_LOADER]"), Classified::LoaderRemove);
        assert_eq!(classify("  [REMOVE_LOADER] done"), Classified::LoaderRemove);
    }

    // ── control events ────────────────────────────────────────

    #[test]
    fn food_log_event_parses_fields() {
        let event = control(
            r#"{"type":"food_log","status":"logged","reward_point":50,"message":"Logged 2 eggs!"}"#,
        );
        assert_eq!(event.kind, ControlKind::FoodLog);
        assert_eq!(event.status.as_deref(), Some("logged"));
        assert_eq!(event.reward_point, Some(50));
        assert_eq!(event.display_text(), Some("Logged 2 eggs!"));
    }

    #[test]
    fn unknown_fields_are_kept() {
        let event = control(r#"{"type":"save_point","message":"Save?","plan_id":7}"#);
        assert_eq!(event.kind, ControlKind::SavePoint);
        assert_eq!(event.extra.get("plan_id"), Some(&Value::from(7)));
    }

    #[test]
    fn log_entry_accepts_data_alias() {
        let event = control(r#"{"type":"log_entry","data":{"food":"eggs","qty":2}}"#);
        assert_eq!(event.kind, ControlKind::LogEntry);
        assert_eq!(event.entry.unwrap()["food"], "eggs");
    }

    #[test]
    fn navigate_accepts_screen_alias() {
        let event = control(r#"{"type":"navigate","screen":"DietPlan"}"#);
        assert_eq!(event.kind, ControlKind::Navigate);
        assert_eq!(event.target.as_deref(), Some("DietPlan"));
    }

    #[test]
    fn prompt_falls_back_for_display() {
        let event = control(r#"{"type":"question","prompt":"How many meals a day?"}"#);
        assert_eq!(event.kind, ControlKind::Prompt);
        assert_eq!(event.display_text(), Some("How many meals a day?"));
    }

    #[test]
    fn unknown_type_is_preserved() {
        let event = control(r#"{"type":"confetti"}"#);
        assert_eq!(event.kind, ControlKind::Unknown("confetti".into()));
    }

    #[test]
    fn malformed_structured_frame_is_dropped_not_content() {
        assert_eq!(
            classify(r#"{"type": food_log}"#),
            Classified::Dropped(DropReason::Malformed)
        );
        assert_eq!(
            classify(r#"{"status":"logged"}"#),
            Classified::Dropped(DropReason::Malformed)
        );
    }

    #[test]
    fn classification_preserves_order() {
        let frames = ["Two", "[GENERATING] x", "{\"type\":\"prompt\"}", "eggs"];
        let kinds: Vec<_> = frames
            .iter()
            .map(|f| match classify(f) {
                Classified::Token { .. } => "token",
                Classified::LoaderStart { .. } => "loader",
                Classified::Control(_) => "control",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["token", "loader", "control", "token"]);
    }
}
