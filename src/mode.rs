//! Conversation modes and the stream targets they resolve to.
//!
//! Every mode maps deterministically to a [`ModeProfile`]: the stream
//! endpoint path, the copy shown around it, and how a fresh conversation in
//! that mode begins.

use crate::error::{CoachError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A named conversational context sharing the single connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationMode {
    /// Free-form assistant chat.
    #[default]
    General,
    /// Log a meal; requires a meal selection first.
    FoodLog,
    /// Log a workout session.
    WorkoutLog,
    /// Build a diet template through a generated flow.
    DietTemplate,
    /// Build a workout template through a generated flow.
    WorkoutTemplate,
    /// Progress analysis through a generated flow.
    Analysis,
}

/// How a conversation begins right after switching into a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    /// Show the static welcome message.
    Welcome,
    /// Submit a hidden synthetic `start` message so the server drives the flow.
    AutoStart,
    /// Wait for a required selection, then show the welcome message.
    AwaitSelection,
}

/// Static per-mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeProfile {
    /// Stream endpoint path, relative to the API base URL.
    pub path: &'static str,
    /// Welcome message; `{meal}` is replaced by the selected meal.
    pub welcome: &'static str,
    /// Label shown while waiting for the stream to open.
    pub thinking_label: &'static str,
    /// Label shown while tokens are arriving.
    pub typing_label: &'static str,
    /// Input placeholder.
    pub placeholder: &'static str,
    pub start: StartBehavior,
}

/// Text sent (but never shown) when a mode auto-starts its flow.
pub const AUTO_START_MESSAGE: &str = "start";

impl ConversationMode {
    /// All modes in display order.
    pub const ALL: [ConversationMode; 6] = [
        Self::General,
        Self::FoodLog,
        Self::WorkoutLog,
        Self::DietTemplate,
        Self::WorkoutTemplate,
        Self::Analysis,
    ];

    /// The camelCase name used on the wire and in config.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::FoodLog => "foodLog",
            Self::WorkoutLog => "workoutLog",
            Self::DietTemplate => "dietTemplate",
            Self::WorkoutTemplate => "workoutTemplate",
            Self::Analysis => "analysis",
        }
    }

    pub fn profile(self) -> ModeProfile {
        match self {
            Self::General => ModeProfile {
                path: "/ai/stream/general",
                welcome: "Hi! I'm your fitness assistant. Ask me anything about training, nutrition or recovery.",
                thinking_label: "Thinking",
                typing_label: "Typing",
                placeholder: "Ask me anything...",
                start: StartBehavior::Welcome,
            },
            Self::FoodLog => ModeProfile {
                path: "/ai/stream/food-log",
                welcome: "What did you have for {meal}? Describe it and I'll log it for you.",
                thinking_label: "Analyzing your meal",
                typing_label: "Logging",
                placeholder: "e.g. 2 eggs and a slice of toast",
                start: StartBehavior::AwaitSelection,
            },
            Self::WorkoutLog => ModeProfile {
                path: "/ai/stream/workout-log",
                welcome: "Tell me about your workout: exercises, sets, reps and weights.",
                thinking_label: "Reading your workout",
                typing_label: "Logging",
                placeholder: "e.g. 3x10 squats at 80kg",
                start: StartBehavior::Welcome,
            },
            Self::DietTemplate => ModeProfile {
                path: "/ai/stream/diet-template",
                welcome: "Let's build your diet template.",
                thinking_label: "Preparing your plan",
                typing_label: "Planning",
                placeholder: "Answer the question above...",
                start: StartBehavior::AutoStart,
            },
            Self::WorkoutTemplate => ModeProfile {
                path: "/ai/stream/workout-template",
                welcome: "Let's build your workout template.",
                thinking_label: "Preparing your program",
                typing_label: "Planning",
                placeholder: "Answer the question above...",
                start: StartBehavior::AutoStart,
            },
            Self::Analysis => ModeProfile {
                path: "/ai/stream/analysis",
                welcome: "Let's look at your progress.",
                thinking_label: "Crunching your numbers",
                typing_label: "Analyzing",
                placeholder: "Ask about your progress...",
                start: StartBehavior::AutoStart,
            },
        }
    }

    /// Whether a meal must be selected before anything can be submitted.
    pub fn requires_selection(self) -> bool {
        self.profile().start == StartBehavior::AwaitSelection
    }

    /// Render the welcome message, substituting the selected meal if any.
    pub fn welcome_message(self, meal: Option<&str>) -> String {
        let template = self.profile().welcome;
        match meal {
            Some(meal) => template.replace("{meal}", &meal.to_lowercase()),
            None => template.replace("{meal}", "your meal"),
        }
    }
}

impl std::fmt::Display for ConversationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationMode {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoachError::Config(format!("unknown conversation mode: {s}")))
    }
}

/// Everything needed to open one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub mode: ConversationMode,
    pub user_id: String,
    /// Free-text user input (or the auto-start message).
    pub input: String,
    /// Selected meal, sent only for modes that require one.
    pub meal: Option<String>,
}

impl StreamTarget {
    /// Build the stream URL: mode path plus `user_id`, `message` and `meal` query parameters.
    ///
    /// # Errors
    ///
    /// Returns [`CoachError::Config`] if the base URL cannot carry a path.
    pub fn url(&self, base: &Url) -> Result<Url> {
        if base.cannot_be_a_base() {
            return Err(CoachError::Config(format!(
                "base url cannot carry a path: {base}"
            )));
        }
        let mut url = base.clone();
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            self.mode.profile().path.trim_start_matches('/')
        );
        url.set_path(&path);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("user_id", &self.user_id);
            query.append_pair("message", &self.input);
            if self.mode.requires_selection()
                && let Some(meal) = &self.meal
            {
                query.append_pair("meal", meal);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::str::FromStr;

    #[test]
    fn names_round_trip_through_from_str() {
        for mode in ConversationMode::ALL {
            assert_eq!(ConversationMode::from_str(mode.as_str()).unwrap(), mode);
        }
        assert!(ConversationMode::from_str("cardio").is_err());
    }

    #[test]
    fn serde_uses_camel_case() {
        let json = serde_json::to_string(&ConversationMode::DietTemplate).unwrap();
        assert_eq!(json, "\"dietTemplate\"");
        let mode: ConversationMode = serde_json::from_str("\"foodLog\"").unwrap();
        assert_eq!(mode, ConversationMode::FoodLog);
    }

    #[test]
    fn only_food_log_requires_selection() {
        let requiring: Vec<_> = ConversationMode::ALL
            .into_iter()
            .filter(|m| m.requires_selection())
            .collect();
        assert_eq!(requiring, vec![ConversationMode::FoodLog]);
    }

    #[test]
    fn generated_flows_auto_start() {
        for mode in [
            ConversationMode::DietTemplate,
            ConversationMode::WorkoutTemplate,
            ConversationMode::Analysis,
        ] {
            assert_eq!(mode.profile().start, StartBehavior::AutoStart);
        }
        assert_eq!(
            ConversationMode::General.profile().start,
            StartBehavior::Welcome
        );
    }

    #[test]
    fn paths_are_distinct() {
        let mut paths: Vec<_> = ConversationMode::ALL
            .into_iter()
            .map(|m| m.profile().path)
            .collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), ConversationMode::ALL.len());
    }

    #[test]
    fn welcome_substitutes_meal() {
        let text = ConversationMode::FoodLog.welcome_message(Some("Breakfast"));
        assert!(text.contains("for breakfast?"));
        assert!(!text.contains("{meal}"));
    }

    #[test]
    fn url_carries_query_parameters() {
        let base = Url::parse("https://coach.example.com/api").unwrap();
        let target = StreamTarget {
            mode: ConversationMode::General,
            user_id: "u-42".into(),
            input: "2 eggs & toast".into(),
            meal: Some("Lunch".into()),
        };
        let url = target.url(&base).unwrap();
        assert_eq!(url.path(), "/api/ai/stream/general");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("user_id".to_owned(), "u-42".to_owned()),
                ("message".to_owned(), "2 eggs & toast".to_owned()),
            ]
        );
    }

    #[test]
    fn food_log_url_includes_meal() {
        let base = Url::parse("http://localhost:8000").unwrap();
        let target = StreamTarget {
            mode: ConversationMode::FoodLog,
            user_id: "u-1".into(),
            input: "oatmeal".into(),
            meal: Some("Breakfast".into()),
        };
        let url = target.url(&base).unwrap();
        assert_eq!(url.path(), "/ai/stream/food-log");
        assert!(
            url.query_pairs()
                .any(|(k, v)| k == "meal" && v == "Breakfast")
        );
    }
}
