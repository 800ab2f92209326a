//! Everything an actor is shown when asked for a turn.

use crate::script::ScriptEvent;
use llm_client::ChatMessage;
use serde::{Deserialize, Serialize};

/// Reply format every AI actor is asked to follow.
const RESPONSE_FORMAT: &str = r#"## Response Format
Reply with a single JSON object and nothing else:
{"thought": "<private reasoning>", "willingness": <0-10>, "content": "<what you say>", "action": "<optional gesture>", "is_finished": false}

- willingness is how much you want to speak right now (0 = not at all).
- If you have nothing worth adding, set content to "[PASS]".
- If the scene's goal has been reached, add "[SCENE_END]" to content or set is_finished to true.
- Inside content you may write [QUOTE:Name] to reply to someone's last line, [NUDGE:Name] to poke someone, or [RECALL] to withdraw your previous line.
- Never repeat what has already been said."#;

/// The scene as seen by an actor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneBrief {
    pub title: String,
    pub description: String,
    pub timeline: String,
    pub location: String,
    pub goal: String,
}

impl From<&ScriptEvent> for SceneBrief {
    fn from(event: &ScriptEvent) -> Self {
        Self {
            title: event.title.clone(),
            description: event.description.clone(),
            timeline: event.timeline.clone(),
            location: event.location.clone(),
            goal: event.goal.clone(),
        }
    }
}

/// A visible line of recent dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryLine {
    pub speaker: String,
    pub content: String,
}

/// Assembled context for one turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    pub actor: String,
    pub persona: String,
    pub stage_instructions: String,
    pub scene: SceneBrief,
    /// One-based turn number within the scene.
    pub turn: usize,
    pub max_turns: usize,
    /// Rendered fact ledger.
    pub facts: String,
    /// Rendered private memory, including pending directives.
    pub memory: String,
    pub history: Vec<HistoryLine>,
    /// Everyone on stage for this scene.
    pub cast: Vec<String>,
}

impl TurnContext {
    pub fn system_prompt(&self) -> String {
        let mut prompt = String::new();

        if !self.stage_instructions.is_empty() {
            prompt.push_str("## Stage Rules\n");
            prompt.push_str(&self.stage_instructions);
            prompt.push_str("\n\n");
        }

        prompt.push_str("## Your Character\n");
        prompt.push_str(&self.persona);
        prompt.push_str("\n\n");

        prompt.push_str("## Current Scene\n");
        if !self.scene.title.is_empty() {
            prompt.push_str(&format!("Scene: {}\n", self.scene.title));
        }
        prompt.push_str(&format!("Description: {}\n", self.scene.description));
        if !self.scene.timeline.is_empty() {
            prompt.push_str(&format!("Time: {}\n", self.scene.timeline));
        }
        if !self.scene.location.is_empty() {
            prompt.push_str(&format!("Location: {}\n", self.scene.location));
        }
        if !self.scene.goal.is_empty() {
            prompt.push_str(&format!("Goal: {}\n", self.scene.goal));
        }
        prompt.push_str(&format!("Turn {}/{}\n", self.turn, self.max_turns));
        if !self.cast.is_empty() {
            prompt.push_str(&format!("On stage: {}\n", self.cast.join(", ")));
        }
        prompt.push('\n');

        prompt.push_str("## Established Facts\n");
        prompt.push_str(&self.facts);
        prompt.push_str("\n\n");

        if !self.memory.is_empty() {
            prompt.push_str(&self.memory);
            prompt.push('\n');
        }

        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }

    /// Chat messages for an LLM call: the actor's own lines become assistant
    /// turns, everyone else's become user turns.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt()));

        for line in &self.history {
            if line.speaker == self.actor {
                messages.push(ChatMessage::assistant(line.content.clone()));
            } else {
                messages.push(ChatMessage::user(format!("[{}]: {}", line.speaker, line.content)));
            }
        }

        let mut cue = format!("Event: {}\n", self.scene.description);
        if !self.scene.location.is_empty() {
            cue.push_str(&format!("Location: {}\n", self.scene.location));
        }
        cue.push_str(&format!("Respond as {}:", self.actor));
        messages.push(ChatMessage::user(cue));

        messages
    }

    /// Whether `needle` appears anywhere the actor can see.
    pub fn mentions(&self, needle: &str) -> bool {
        self.memory.contains(needle)
            || self.facts.contains(needle)
            || self.scene.description.contains(needle)
            || self.history.iter().any(|l| l.content.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_client::Role;

    fn context() -> TurnContext {
        TurnContext {
            actor: "Alice".into(),
            persona: "You are Alice, a nervous librarian.".into(),
            stage_instructions: "Keep it short.".into(),
            scene: SceneBrief {
                title: "Closing time".into(),
                description: "The lights flicker".into(),
                timeline: "Night".into(),
                location: "Library".into(),
                goal: "Find the missing book".into(),
            },
            turn: 2,
            max_turns: 8,
            facts: "1. [WORLD] The library is haunted".into(),
            memory: "## Recent Memories\n- You said: hello\n".into(),
            history: vec![
                HistoryLine {
                    speaker: "Bob".into(),
                    content: "Did you hear that?".into(),
                },
                HistoryLine {
                    speaker: "Alice".into(),
                    content: "Hear what?".into(),
                },
            ],
            cast: vec!["Alice".into(), "Bob".into()],
        }
    }

    #[test]
    fn test_system_prompt_sections() {
        let prompt = context().system_prompt();
        assert!(prompt.contains("nervous librarian"));
        assert!(prompt.contains("Goal: Find the missing book"));
        assert!(prompt.contains("Turn 2/8"));
        assert!(prompt.contains("[WORLD] The library is haunted"));
        assert!(prompt.contains("You said: hello"));
        assert!(prompt.contains("[PASS]"));
    }

    #[test]
    fn test_messages_roles() {
        let messages = context().to_messages();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "[Bob]: Did you hear that?");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "Hear what?");
        assert_eq!(
            messages[3].content,
            "Event: The lights flicker\nLocation: Library\nRespond as Alice:"
        );
    }

    #[test]
    fn test_mentions() {
        let ctx = context();
        assert!(ctx.mentions("haunted"));
        assert!(ctx.mentions("Did you hear"));
        assert!(!ctx.mentions("dragon"));
    }
}
