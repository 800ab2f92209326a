//! The structured output of one actor turn.

use serde::{Deserialize, Serialize};

/// Content an actor uses to decline a turn.
pub const PASS_MARKER: &str = "[PASS]";

/// Content marker an actor uses to end the scene.
pub const SCENE_END_MARKER: &str = "[SCENE_END]";

/// Willingness assumed when a reply does not state one.
pub const DEFAULT_WILLINGNESS: u8 = 10;

pub const MAX_WILLINGNESS: u8 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDecision {
    #[serde(default)]
    pub thought: String,
    /// Self-reported eagerness to speak, 0..=10.
    pub willingness: u8,
    pub content: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub is_finished: bool,
}

impl ActorDecision {
    /// A line the actor fully wants to say.
    pub fn speak(content: impl Into<String>) -> Self {
        Self {
            thought: String::new(),
            willingness: DEFAULT_WILLINGNESS,
            content: content.into(),
            action: None,
            is_finished: false,
        }
    }

    /// Declining the turn.
    pub fn pass() -> Self {
        Self {
            thought: String::new(),
            willingness: 0,
            content: PASS_MARKER.to_string(),
            action: None,
            is_finished: false,
        }
    }

    pub fn with_thought(mut self, thought: impl Into<String>) -> Self {
        self.thought = thought.into();
        self
    }

    pub fn with_willingness(mut self, willingness: i64) -> Self {
        self.willingness = clamp_willingness(willingness);
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn finished(mut self) -> Self {
        self.is_finished = true;
        self
    }

    pub fn has_pass_marker(&self) -> bool {
        self.content.contains(PASS_MARKER)
    }

    /// True when the actor asked to end the scene.
    pub fn ends_scene(&self) -> bool {
        self.is_finished || self.content.contains(SCENE_END_MARKER)
    }

    /// Content with control markers removed.
    pub fn spoken_text(&self) -> String {
        self.content.replace(SCENE_END_MARKER, "").trim().to_string()
    }
}

pub fn clamp_willingness(value: i64) -> u8 {
    value.clamp(0, MAX_WILLINGNESS as i64) as u8
}
