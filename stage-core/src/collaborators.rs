//! External collaborators the engine consults but does not own.
//!
//! Each seam is a trait with a deterministic default:
//! - [`SceneAnalyst`]: summarizes a finished scene ([`BasicAnalyst`])
//! - [`Adaptation`]: rewrites the next event ([`KeepPlan`])
//! - [`Casting`]: writes personas for actors without one ([`TemplateCasting`])
//! - [`Intervention`]: turns an injected event into a [`GodAction`] ([`LiteralIntervention`])
//!
//! [`LlmDirector`] implements all four against a chat model.

use crate::actor::extract_json;
use crate::actor::parser::repair_json;
use crate::config::WorldBible;
use crate::god_mode::{GodAction, Injection};
use crate::script::{EventPlan, ScriptEvent};
use crate::stage_rules::StageType;
use crate::state::DialogueEntry;
use async_trait::async_trait;
use llm_client::{ChatClient, ChatMessage, ChatRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("LLM error: {0}")]
    Llm(#[from] llm_client::Error),

    #[error("Could not parse reply: {0}")]
    Parse(String),
}

/// How one character's view of another changed during a scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub subject: String,
    pub target: String,
    pub change: String,
    #[serde(default)]
    pub reason: String,
}

impl RelationshipUpdate {
    pub fn describe(&self) -> String {
        if self.reason.is_empty() {
            format!("{} -> {}: {}", self.subject, self.target, self.change)
        } else {
            format!(
                "{} -> {}: {} ({})",
                self.subject, self.target, self.change, self.reason
            )
        }
    }
}

/// What a finished scene amounted to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    pub summary: String,
    #[serde(default)]
    pub new_facts: Vec<String>,
    #[serde(default)]
    pub relationship_updates: Vec<RelationshipUpdate>,
}

impl SceneAnalysis {
    /// Summary used when no analyst is available.
    pub fn fallback(event: &ScriptEvent) -> Self {
        Self {
            summary: format!(
                "Scene '{}' ended. Goal: {}. Outcome: Converged.",
                event.label(),
                event.goal
            ),
            new_facts: Vec::new(),
            relationship_updates: Vec::new(),
        }
    }
}

/// A generated character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub system_prompt: String,
    #[serde(default)]
    pub initial_memories: Vec<String>,
}

/// What an interpreter sees about the stage when an event is injected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterventionContext {
    pub current_event: String,
    pub active_actors: Vec<String>,
    pub recent_dialogue: Vec<String>,
}

#[async_trait]
pub trait SceneAnalyst: Send + Sync {
    async fn analyze(
        &self,
        history: &[DialogueEntry],
        event: &ScriptEvent,
    ) -> Result<SceneAnalysis, CollaboratorError>;
}

#[async_trait]
pub trait Adaptation: Send + Sync {
    /// Rewrite the next event given what just happened. `None` keeps it.
    async fn adapt_next_event(
        &self,
        summary: &str,
        plan: &EventPlan,
        theme: &str,
        cast: &[String],
    ) -> Result<Option<EventPlan>, CollaboratorError>;
}

#[async_trait]
pub trait Casting: Send + Sync {
    async fn cast(
        &self,
        actor: &str,
        world: &WorldBible,
        stage_type: &StageType,
    ) -> Result<Persona, CollaboratorError>;
}

#[async_trait]
pub trait Intervention: Send + Sync {
    async fn interpret(
        &self,
        injection: &Injection,
        context: &InterventionContext,
    ) -> Result<GodAction, CollaboratorError>;
}

// ============================================================================
// Defaults
// ============================================================================

/// Summarizes every scene with the fixed fallback line.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicAnalyst;

#[async_trait]
impl SceneAnalyst for BasicAnalyst {
    async fn analyze(
        &self,
        _history: &[DialogueEntry],
        event: &ScriptEvent,
    ) -> Result<SceneAnalysis, CollaboratorError> {
        Ok(SceneAnalysis::fallback(event))
    }
}

/// Never changes the script.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepPlan;

#[async_trait]
impl Adaptation for KeepPlan {
    async fn adapt_next_event(
        &self,
        _summary: &str,
        _plan: &EventPlan,
        _theme: &str,
        _cast: &[String],
    ) -> Result<Option<EventPlan>, CollaboratorError> {
        Ok(None)
    }
}

/// Builds a one-line persona from the world bible.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCasting;

#[async_trait]
impl Casting for TemplateCasting {
    async fn cast(
        &self,
        actor: &str,
        world: &WorldBible,
        stage_type: &StageType,
    ) -> Result<Persona, CollaboratorError> {
        let mut prompt = format!("You are {actor}.");
        if !world.group_name.is_empty() {
            prompt.push_str(&format!(" You are a member of {}.", world.group_name));
        }
        if !world.theme.is_empty() {
            prompt.push_str(&format!(" The story is about {}.", world.theme));
        }
        prompt.push_str(&format!(
            " Stay in character on the {} stage.",
            stage_type.label()
        ));
        Ok(Persona {
            system_prompt: prompt,
            initial_memories: Vec::new(),
        })
    }
}

/// Applies injected text as-is: targeted text becomes a private
/// instruction, untargeted text a global announcement.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralIntervention;

#[async_trait]
impl Intervention for LiteralIntervention {
    async fn interpret(
        &self,
        injection: &Injection,
        _context: &InterventionContext,
    ) -> Result<GodAction, CollaboratorError> {
        Ok(literal_action(injection))
    }
}

pub(crate) fn literal_action(injection: &Injection) -> GodAction {
    match &injection.target {
        Some(target) => GodAction::default().with_instruction(target.clone(), injection.content.clone()),
        None => GodAction::announcement(format!("⚡ {}", injection.content)),
    }
}

// ============================================================================
// LLM-backed director
// ============================================================================

const ANALYST_PROMPT: &str = r#"You are a story editor. Read the scene transcript and reply with JSON only:
{"summary": "<two sentences>", "new_facts": ["<fact established in this scene>"], "relationship_updates": [{"subject": "", "target": "", "change": "", "reason": ""}]}"#;

const ADAPTATION_PROMPT: &str = r#"You are a showrunner adapting a live story. Given what just happened and the next planned event, rewrite the next event so it follows naturally. Keep the cast. Reply with JSON only:
{"time": "<virtual time>", "event": "<what happens next>", "goal": "<what the scene should achieve>"}"#;

const CASTING_PROMPT: &str = r#"You are a casting director. Write a persona for the named character. Reply with JSON only:
{"system_prompt": "<second-person character description>", "initial_memories": ["<memory>"]}"#;

const INTERVENTION_PROMPT: &str = r#"You are the hand of god in a live performance. Turn the operator's instruction into effects on stage. Reply with JSON only:
{"global_announcement": "<stage direction everyone sees, or null>", "target_instructions": {"<actor>": "<instruction>"}, "memory_updates": {"<actor>": "<implanted memory>"}}
Victims should know what happened to them; bystanders who could see it should remember it."#;

/// Analysis, adaptation, casting and intervention backed by a chat model.
#[derive(Debug, Clone)]
pub struct LlmDirector {
    client: ChatClient,
}

impl LlmDirector {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    async fn ask_json<T: DeserializeOwned>(
        &self,
        system: &str,
        user: String,
    ) -> Result<T, CollaboratorError> {
        let request = ChatRequest::new(vec![ChatMessage::system(system), ChatMessage::user(user)])
            .with_temperature(0.7);
        let response = self.client.complete(request).await?;
        parse_json_reply(&response.content)
    }
}

pub(crate) fn parse_json_reply<T: DeserializeOwned>(reply: &str) -> Result<T, CollaboratorError> {
    let json = extract_json(reply)
        .ok_or_else(|| CollaboratorError::Parse("no JSON object in reply".to_string()))?;
    serde_json::from_str(json)
        .or_else(|_| serde_json::from_str(&repair_json(json)))
        .map_err(|e| CollaboratorError::Parse(e.to_string()))
}

#[async_trait]
impl SceneAnalyst for LlmDirector {
    async fn analyze(
        &self,
        history: &[DialogueEntry],
        event: &ScriptEvent,
    ) -> Result<SceneAnalysis, CollaboratorError> {
        let transcript = history
            .iter()
            .filter(|e| !e.revoked)
            .map(|e| format!("{}: {}", e.speaker, e.content))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Scene: {}\nGoal: {}\n\nTranscript:\n{}",
            event.label(),
            event.goal,
            transcript
        );
        self.ask_json(ANALYST_PROMPT, user).await
    }
}

#[async_trait]
impl Adaptation for LlmDirector {
    async fn adapt_next_event(
        &self,
        summary: &str,
        plan: &EventPlan,
        theme: &str,
        cast: &[String],
    ) -> Result<Option<EventPlan>, CollaboratorError> {
        let plan_json =
            serde_json::to_string(plan).map_err(|e| CollaboratorError::Parse(e.to_string()))?;
        let user = format!(
            "Theme: {theme}\nCast: {}\nWhat just happened: {summary}\nNext planned event: {plan_json}",
            cast.join(", ")
        );
        let adapted: EventPlan = self.ask_json(ADAPTATION_PROMPT, user).await?;
        Ok(Some(adapted))
    }
}

#[async_trait]
impl Casting for LlmDirector {
    async fn cast(
        &self,
        actor: &str,
        world: &WorldBible,
        stage_type: &StageType,
    ) -> Result<Persona, CollaboratorError> {
        let user = format!(
            "Character: {actor}\nTheme: {}\nGroup: {}\nStage: {}",
            world.theme,
            world.group_name,
            stage_type.label()
        );
        self.ask_json(CASTING_PROMPT, user).await
    }
}

#[async_trait]
impl Intervention for LlmDirector {
    async fn interpret(
        &self,
        injection: &Injection,
        context: &InterventionContext,
    ) -> Result<GodAction, CollaboratorError> {
        let mut user = format!(
            "Instruction: \"{}\"\nCurrent scene: {}\nOn stage: {}\nRecent dialogue:\n{}",
            injection.content,
            context.current_event,
            context.active_actors.join(", "),
            context.recent_dialogue.join("\n")
        );
        if let Some(target) = &injection.target {
            user.push_str(&format!("\nThe instruction is aimed at: {target}"));
        }
        self.ask_json(INTERVENTION_PROMPT, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_analyst_fallback() {
        let event = ScriptEvent::new("Dinner", "Dinner is served").with_goal("Reveal the will");
        let analysis = BasicAnalyst.analyze(&[], &event).await.unwrap();
        assert_eq!(
            analysis.summary,
            "Scene 'Dinner' ended. Goal: Reveal the will. Outcome: Converged."
        );
        assert!(analysis.new_facts.is_empty());
    }

    #[tokio::test]
    async fn test_keep_plan() {
        let result = KeepPlan
            .adapt_next_event("s", &EventPlan::default(), "t", &[])
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_template_casting() {
        let world = WorldBible {
            theme: "a haunted manor".into(),
            group_name: "the Ashford family".into(),
            facts: Vec::new(),
        };
        let persona = TemplateCasting
            .cast("Edith", &world, &StageType::ChatGroup)
            .await
            .unwrap();
        assert!(persona.system_prompt.starts_with("You are Edith."));
        assert!(persona.system_prompt.contains("the Ashford family"));
        assert!(persona.system_prompt.contains("a haunted manor"));
    }

    #[test]
    fn test_literal_action() {
        let global = literal_action(&Injection {
            content: "The lights go out".into(),
            target: None,
        });
        assert_eq!(global.global_announcement.as_deref(), Some("⚡ The lights go out"));

        let targeted = literal_action(&Injection {
            content: "You feel faint".into(),
            target: Some("Bob".into()),
        });
        assert!(targeted.global_announcement.is_none());
        assert_eq!(targeted.target_instructions["Bob"], "You feel faint");
    }

    #[test]
    fn test_parse_json_reply() {
        let analysis: SceneAnalysis = parse_json_reply(
            "```json\n{\"summary\": \"They argued.\", \"new_facts\": [\"The will is forged\"]}\n```",
        )
        .unwrap();
        assert_eq!(analysis.summary, "They argued.");
        assert_eq!(analysis.new_facts, vec!["The will is forged"]);

        let action: GodAction =
            parse_json_reply(r#"{"global_announcement": null, "target_instructions": {"Bob": "Sit down"}}"#)
                .unwrap();
        assert_eq!(action.target_instructions["Bob"], "Sit down");

        assert!(parse_json_reply::<SceneAnalysis>("no json here").is_err());
    }

    #[test]
    fn test_relationship_describe() {
        let update = RelationshipUpdate {
            subject: "Alice".into(),
            target: "Bob".into(),
            change: "distrust".into(),
            reason: "he lied".into(),
        };
        assert_eq!(update.describe(), "Alice -> Bob: distrust (he lied)");
    }
}
