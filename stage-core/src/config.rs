//! Configuration: tuning knobs for the engine and the performance file format.

use crate::actor::RetryPolicy;
use crate::script::ScriptEvent;
use crate::stage_rules::StageType;
use crate::state::DEFAULT_SHORT_TERM_CAPACITY;
use llm_client::ChatClient;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No API key for actor '{actor}' (set `api_key` or the env var `{var}`)")]
    MissingApiKey { actor: String, var: String },

    #[error("Actor '{0}' has neither an endpoint nor scripted lines")]
    NoPerformer(String),

    #[error("Duplicate actor name: {0}")]
    DuplicateActor(String),

    #[error("Client error: {0}")]
    Client(#[from] llm_client::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Turn-taking rules inside a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    /// Max consecutive speaking turns by one actor.
    pub monopoly_cap: usize,
    /// Dialogue lines shown to an actor, also the duplicate-check window.
    pub history_window: usize,
    /// Below this willingness, short content counts as a pass.
    pub willingness_threshold: u8,
    /// Content shorter than this (in characters) is "short".
    pub short_content_len: usize,
    /// Minimum normalized length for substring duplicate matches.
    pub duplicate_min_len: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            monopoly_cap: 2,
            history_window: 10,
            willingness_threshold: 4,
            short_content_len: 5,
            duplicate_min_len: 6,
        }
    }
}

/// Delays that give a performance its rhythm.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    pub speak_delay: Duration,
    pub pass_delay: Duration,
    pub between_events: Duration,
    /// Range of the random think time in free-decision rounds.
    pub free_delay_min: Duration,
    pub free_delay_max: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            speak_delay: Duration::from_secs(2),
            pass_delay: Duration::from_millis(500),
            between_events: Duration::from_secs(2),
            free_delay_min: Duration::from_millis(500),
            free_delay_max: Duration::from_secs(3),
        }
    }
}

impl PacingConfig {
    /// No delays at all.
    pub fn instant() -> Self {
        Self {
            speak_delay: Duration::ZERO,
            pass_delay: Duration::ZERO,
            between_events: Duration::ZERO,
            free_delay_min: Duration::ZERO,
            free_delay_max: Duration::ZERO,
        }
    }
}

/// Shared world settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldBible {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub group_name: String,
    /// Facts established before the first scene.
    #[serde(default)]
    pub facts: Vec<String>,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub scene: SceneConfig,
    pub pacing: PacingConfig,
    pub retry: RetryPolicy,
    pub stage_type: StageType,
    pub world: WorldBible,
    pub short_term_capacity: usize,
    pub broadcast_capacity: usize,
    /// Seed for free-mode delays. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            scene: SceneConfig::default(),
            pacing: PacingConfig::default(),
            retry: RetryPolicy::default(),
            stage_type: StageType::default(),
            world: WorldBible::default(),
            short_term_capacity: DEFAULT_SHORT_TERM_CAPACITY,
            broadcast_capacity: crate::broadcast::DEFAULT_CAPACITY,
            seed: None,
        }
    }
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `STAGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(cap) = env_parse::<usize>("STAGE_MONOPOLY_CAP")? {
            config.scene.monopoly_cap = cap;
        }
        if let Some(capacity) = env_parse::<usize>("STAGE_SHORT_TERM_CAPACITY")? {
            config.short_term_capacity = capacity;
        }
        if let Some(ms) = env_parse::<u64>("STAGE_SPEAK_DELAY_MS")? {
            config.pacing.speak_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("STAGE_PASS_DELAY_MS")? {
            config.pacing.pass_delay = Duration::from_millis(ms);
        }
        if let Ok(stage) = std::env::var("STAGE_TYPE") {
            config.stage_type = StageType::from_label(&stage);
        }

        Ok(config)
    }

    pub fn with_scene(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_stage_type(mut self, stage_type: StageType) -> Self {
        self.stage_type = stage_type;
        self
    }

    pub fn with_world(mut self, world: WorldBible) -> Self {
        self.world = world;
        self
    }

    pub fn with_monopoly_cap(mut self, cap: usize) -> Self {
        self.scene.monopoly_cap = cap;
        self
    }

    pub fn with_short_term_capacity(mut self, capacity: usize) -> Self {
        self.short_term_capacity = capacity;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

// ============================================================================
// Performance file
// ============================================================================

/// Where an AI actor's model lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
    /// Inline key. Prefer `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Environment variable holding the key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl EndpointConfig {
    pub fn resolve_api_key(&self, actor: &str) -> Result<String, ConfigError> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Ok(key.clone());
        }
        let var = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| "LLM_API_KEY".to_string());
        std::env::var(&var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingApiKey {
                actor: actor.to_string(),
                var,
            })
    }

    pub fn build_client(&self, actor: &str) -> Result<ChatClient, ConfigError> {
        let key = self.resolve_api_key(actor)?;
        Ok(ChatClient::new(&self.base_url, key, &self.model)?)
    }
}

/// One actor in a performance file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorSpec {
    pub name: String,
    /// Persona prompt. Left empty, casting fills it in.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub initial_memories: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<EndpointConfig>,
    /// Fixed lines for a scripted actor.
    #[serde(default)]
    pub lines: Vec<String>,
}

impl ActorSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: None,
            initial_memories: Vec::new(),
            secrets: Vec::new(),
            endpoint: None,
            lines: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = Some(endpoint);
        self
    }
}

/// A complete performance: who plays, where, and what happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub stage_type: StageType,
    #[serde(default)]
    pub world: WorldBible,
    pub actors: Vec<ActorSpec>,
    pub script: Vec<ScriptEvent>,
}

impl PerformanceSpec {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let spec: Self = serde_json::from_str(json)?;
        spec.validate()?;
        Ok(spec)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for actor in &self.actors {
            if !seen.insert(actor.name.as_str()) {
                return Err(ConfigError::DuplicateActor(actor.name.clone()));
            }
            if actor.endpoint.is_none() && actor.lines.is_empty() {
                return Err(ConfigError::NoPerformer(actor.name.clone()));
            }
        }
        Ok(())
    }
}
