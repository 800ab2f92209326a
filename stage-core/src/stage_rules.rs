//! Stage types and the behavioural rules each one imposes on actors.
//!
//! The stage type is an opaque selector for prompt assembly. Known labels map
//! to built-in rule sets; anything else is carried through as a custom stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of venue a performance takes place in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageType {
    #[default]
    ChatGroup,
    Trpg,
    Forum,
    Court,
    Debate,
    Game,
    Maze,
    Custom(String),
}

impl StageType {
    /// Parse a stage label. Unknown labels become [`StageType::Custom`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "chat_group" | "chat" | "group_chat" => StageType::ChatGroup,
            "trpg" | "tabletop" => StageType::Trpg,
            "forum" => StageType::Forum,
            "court" | "courtroom" => StageType::Court,
            "debate" => StageType::Debate,
            "game" => StageType::Game,
            "maze" | "telephone_maze" => StageType::Maze,
            _ => StageType::Custom(label.trim().to_string()),
        }
    }

    pub fn label(&self) -> &str {
        match self {
            StageType::ChatGroup => "chat_group",
            StageType::Trpg => "trpg",
            StageType::Forum => "forum",
            StageType::Court => "court",
            StageType::Debate => "debate",
            StageType::Game => "game",
            StageType::Maze => "maze",
            StageType::Custom(label) => label,
        }
    }

    /// Soft cap on a single message, stated in the actor's instructions.
    pub fn max_message_length(&self) -> usize {
        match self {
            StageType::ChatGroup => 50,
            _ => 500,
        }
    }

    /// Whether out-of-character table talk is allowed.
    pub fn allows_ooc(&self) -> bool {
        matches!(self, StageType::Trpg)
    }

    /// Speaker name used for narrator lines on the blackboard.
    pub fn narrator_prefix(&self) -> &'static str {
        match self {
            StageType::ChatGroup => "📢 Group Notice",
            StageType::Court => "⚖️ Court Notice",
            StageType::Debate => "🎙️ Moderator",
            _ => "🎬 Narrator",
        }
    }

    /// Behaviour instructions for one actor on this stage.
    pub fn instructions(&self, nickname: &str, members: &[String], group_name: &str) -> String {
        let members = members.join(", ");
        let group = if group_name.is_empty() {
            "the current session"
        } else {
            group_name
        };
        let limit = self.max_message_length();

        match self {
            StageType::ChatGroup => format!(
                "1. You are chatting in the group chat [{group}].\n\
                 2. Your nickname is [{nickname}].\n\
                 3. Other members: {members}. Refer to others only by nickname.\n\
                 4. Write short, casual, fragmented messages, under {limit} characters each.\n\
                 5. No assistant voice: no \"firstly\", \"in summary\" or long essays.\n\
                 6. Keep it light and personal. Interrupt, tease and banter freely."
            ),
            StageType::Trpg => format!(
                "1. You are playing in the tabletop session [{group}].\n\
                 2. Your character is [{nickname}]. Other players: {members}.\n\
                 3. You may speak in character or out of character.\n\
                 4. Describe what you intend to do and wait for the game master's ruling."
            ),
            StageType::Forum => format!(
                "1. You are replying in a thread on the forum [{group}].\n\
                 2. Your handle is [{nickname}]. Other posters: {members}.\n\
                 3. Use forum slang, quote replies when useful, and hold sharp opinions."
            ),
            StageType::Court => format!(
                "1. You are in a courtroom hearing.\n\
                 2. Your role is [{nickname}]. Others present: {members}.\n\
                 3. Be formal and exact. Observe courtroom etiquette and argue from evidence."
            ),
            StageType::Debate => format!(
                "1. You are a speaker in the debate [{group}].\n\
                 2. You are [{nickname}]. Other speakers: {members}.\n\
                 3. Answer the previous argument directly before making your own point.\n\
                 4. Keep each statement under {limit} characters."
            ),
            StageType::Game => format!(
                "1. You are a player in the game [{group}] as [{nickname}].\n\
                 2. Other players: {members}.\n\
                 3. Play to win, but within the rules announced by the narrator."
            ),
            StageType::Maze => format!(
                "1. You are [{nickname}], passing a message along a chain with {members}.\n\
                 2. Repeat what you heard in your own words; details may drift."
            ),
            StageType::Custom(label) => format!(
                "Scene: {label}. You are [{nickname}], together with {members}. Act naturally within the context."
            ),
        }
    }
}

impl From<String> for StageType {
    fn from(label: String) -> Self {
        StageType::from_label(&label)
    }
}

impl From<StageType> for String {
    fn from(stage: StageType) -> Self {
        stage.label().to_string()
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label() {
        assert_eq!(StageType::from_label("Chat Group"), StageType::ChatGroup);
        assert_eq!(StageType::from_label("court"), StageType::Court);
        assert_eq!(
            StageType::from_label("Space Station"),
            StageType::Custom("Space Station".to_string())
        );
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&StageType::Trpg).unwrap();
        assert_eq!(json, "\"trpg\"");
        let parsed: StageType = serde_json::from_str("\"debate\"").unwrap();
        assert_eq!(parsed, StageType::Debate);
    }

    #[test]
    fn test_rules() {
        assert_eq!(StageType::ChatGroup.max_message_length(), 50);
        assert!(StageType::Trpg.allows_ooc());
        assert!(!StageType::Court.allows_ooc());
        assert_eq!(StageType::Forum.narrator_prefix(), "🎬 Narrator");
    }

    #[test]
    fn test_instructions_name_the_actor() {
        let members = vec!["Bob".to_string(), "Cara".to_string()];
        let text = StageType::ChatGroup.instructions("Alice", &members, "Book Club");
        assert!(text.contains("[Alice]"));
        assert!(text.contains("Bob, Cara"));
        assert!(text.contains("Book Club"));

        let custom = StageType::Custom("Lighthouse".into()).instructions("Alice", &members, "");
        assert!(custom.contains("Lighthouse"));
    }
}
