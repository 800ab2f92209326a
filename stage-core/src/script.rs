//! Script events: the scripted timeline a performance walks through.

use serde::{Deserialize, Serialize};

/// Default turn budget for a scene.
pub const DEFAULT_MAX_TURNS: usize = 8;

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}

/// How the actors of a scene take turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneMode {
    /// One actor at a time, round-robin.
    #[default]
    Sequential,
    /// Every actor is asked at once; replies land in completion order.
    Free,
}

/// One scripted event of a performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptEvent {
    /// Virtual-time label ("Day 1, dawn").
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub title: String,
    pub description: String,
    /// Actor names expected on stage. Empty means everyone.
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub mode: SceneMode,
}

impl ScriptEvent {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            timeline: String::new(),
            title: title.into(),
            description: description.into(),
            participants: Vec::new(),
            location: String::new(),
            goal: String::new(),
            max_turns: DEFAULT_MAX_TURNS,
            mode: SceneMode::Sequential,
        }
    }

    pub fn with_timeline(mut self, timeline: impl Into<String>) -> Self {
        self.timeline = timeline.into();
        self
    }

    pub fn with_participants<I, S>(mut self, participants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.participants = participants.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = goal.into();
        self
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_mode(mut self, mode: SceneMode) -> Self {
        self.mode = mode;
        self
    }

    /// Display name: the title, or the description when untitled.
    pub fn label(&self) -> &str {
        if self.title.is_empty() {
            &self.description
        } else {
            &self.title
        }
    }

    /// The rewritable part of the event, as handed to adaptation.
    pub fn plan(&self) -> EventPlan {
        EventPlan {
            time: self.timeline.clone(),
            event: self.label().to_string(),
            goal: self.goal.clone(),
        }
    }

    /// Rewrite this event in place from an adapted plan.
    pub fn apply_plan(&mut self, plan: &EventPlan) {
        if !plan.time.is_empty() {
            self.timeline = plan.time.clone();
        }
        if !plan.event.is_empty() {
            self.title = plan.event.clone();
            self.description = plan.event.clone();
        }
        if !plan.goal.is_empty() {
            self.goal = plan.goal.clone();
        }
    }
}

/// Time / event / goal triple exchanged with the adaptation collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPlan {
    #[serde(default, alias = "Time")]
    pub time: String,
    #[serde(default, alias = "Event")]
    pub event: String,
    #[serde(default, alias = "Goal")]
    pub goal: String,
}
