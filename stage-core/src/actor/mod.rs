//! Actors and how they decide what to say.
//!
//! The scene scheduler only knows the [`Performer`] trait. Concrete kinds:
//! - [`AiPerformer`]: a language model behind the retrying [`ActorGateway`]
//! - [`ScriptedPerformer`]: fixed lines
//! - [`HumanPerformer`]: a person typing into a channel

pub mod context;
pub mod decision;
pub mod gateway;
pub mod markers;
pub mod parser;
pub mod performer;

pub use context::{HistoryLine, SceneBrief, TurnContext};
pub use decision::{ActorDecision, PASS_MARKER, SCENE_END_MARKER};
pub use gateway::{
    classify_error, ActorGateway, CallOutcome, ChatBackend, ClientBackend, GatewayError,
    RetryHint, RetryPolicy,
};
pub use markers::{extract_markers, MarkedContent, SideAction};
pub use parser::{extract_json, repair_json, DecisionParser, ParseStrategy};
pub use performer::{AiPerformer, HumanPerformer, ScriptedPerformer};

use async_trait::async_trait;

/// Anything that can take a turn on stage.
#[async_trait]
pub trait Performer: Send + Sync {
    fn name(&self) -> &str;

    /// Produce this turn's decision. Must not fail; degrade to a pass instead.
    async fn decide(&self, context: &TurnContext) -> ActorDecision;
}
