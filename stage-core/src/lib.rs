//! Live multi-actor performance engine.
//!
//! This crate provides:
//! - A script of events played one scene at a time
//! - AI, scripted and human actors behind one `Performer` trait
//! - Turn scheduling with anti-monopoly, duplicate and cold-field rules
//! - A retrying gateway for rate-limited model endpoints
//! - God Mode: pause, jump, injected events and time travel while running
//! - Scene analysis and adaptive rewriting of upcoming events
//! - JSONL performance logs
//!
//! # Quick Start
//!
//! ```ignore
//! use stage_core::{PerformanceSpec, StageConfig, StageDeps, StageManager};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spec = PerformanceSpec::load("performance.json").await?;
//!     let stage = StageManager::from_spec(spec, StageConfig::from_env()?, StageDeps::new()).await?;
//!
//!     let (handle, task) = stage.spawn();
//!     let mut events = handle.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("{}", serde_json::to_string(&event).unwrap());
//!         }
//!     });
//!
//!     handle.inject("A scream echoes from the cellar", None);
//!     let (_stage, report) = task.await?;
//!     println!("completed: {}", report.completed);
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod broadcast;
pub mod collaborators;
pub mod config;
mod free_mode;
pub mod god_mode;
pub mod persist;
pub mod scene;
pub mod script;
pub mod stage;
pub mod stage_rules;
pub mod state;
pub mod testing;

// Primary public API
pub use actor::{
    ActorDecision, AiPerformer, ChatBackend, ClientBackend, HumanPerformer, Performer,
    RetryPolicy, ScriptedPerformer, TurnContext,
};
pub use broadcast::{Broadcaster, StageEvent};
pub use collaborators::{
    Adaptation, Casting, Intervention, LlmDirector, SceneAnalysis, SceneAnalyst,
};
pub use config::{
    ActorSpec, ConfigError, EndpointConfig, PacingConfig, PerformanceSpec, SceneConfig,
    StageConfig, WorldBible,
};
pub use god_mode::{ControlError, GodAction, Injection};
pub use persist::{JsonlPersistence, NoopPersistence, PerformanceStatus, Persistence};
pub use scene::{EndReason, SceneOutcome};
pub use script::{EventPlan, SceneMode, ScriptEvent};
pub use stage::{CastMember, RunReport, StageDeps, StageError, StageHandle, StageManager, StageStatus};
pub use stage_rules::StageType;
pub use state::{Blackboard, MemoryBank};
