//! The stage manager: owns a performance and runs it from first event to curtain.
//!
//! A [`StageManager`] is built per performance with its dependencies injected.
//! [`StageManager::run`] drives the script on the current task;
//! [`StageManager::spawn`] moves it onto its own task and hands back a
//! cloneable [`StageHandle`] for God-Mode control and event subscription.

use crate::actor::{AiPerformer, ClientBackend, Performer, ScriptedPerformer};
use crate::broadcast::{Broadcaster, StageEvent};
use crate::collaborators::{
    literal_action, Adaptation, BasicAnalyst, Casting, CollaboratorError, Intervention,
    InterventionContext, KeepPlan, LiteralIntervention, LlmDirector, SceneAnalyst,
    TemplateCasting,
};
use crate::config::{ActorSpec, ConfigError, PerformanceSpec, StageConfig};
use crate::god_mode::{
    ControlCommand, ControlError, GodAction, GodModeController, Injection, PlaybackGate,
};
use crate::persist::{EventKind, EventRecord, NoopPersistence, PerformanceStatus, Persistence};
use crate::scene::SceneOutcome;
use crate::script::ScriptEvent;
use crate::state::{Blackboard, MemoryBank};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StageError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// An actor on the roster.
#[derive(Clone)]
pub struct CastMember {
    pub name: String,
    pub persona: String,
    pub performer: Arc<dyn Performer>,
    /// Background memories, seeded into long-term memory.
    pub initial_memories: Vec<String>,
    pub secrets: Vec<String>,
}

impl CastMember {
    pub fn new(performer: Arc<dyn Performer>, persona: impl Into<String>) -> Self {
        Self {
            name: performer.name().to_string(),
            persona: persona.into(),
            performer,
            initial_memories: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn with_memories(mut self, memories: Vec<String>) -> Self {
        self.initial_memories = memories;
        self
    }

    pub fn with_secrets(mut self, secrets: Vec<String>) -> Self {
        self.secrets = secrets;
        self
    }
}

impl std::fmt::Debug for CastMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CastMember")
            .field("name", &self.name)
            .field("persona", &self.persona)
            .finish_non_exhaustive()
    }
}

/// Collaborators a performance consults.
#[derive(Clone)]
pub struct StageDeps {
    pub analyst: Arc<dyn SceneAnalyst>,
    pub adaptation: Arc<dyn Adaptation>,
    pub casting: Arc<dyn Casting>,
    pub intervention: Arc<dyn Intervention>,
    pub persistence: Arc<dyn Persistence>,
}

impl Default for StageDeps {
    fn default() -> Self {
        Self {
            analyst: Arc::new(BasicAnalyst),
            adaptation: Arc::new(KeepPlan),
            casting: Arc::new(TemplateCasting),
            intervention: Arc::new(LiteralIntervention),
            persistence: Arc::new(NoopPersistence),
        }
    }
}

impl StageDeps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one model-backed director for analysis, adaptation, casting and intervention.
    pub fn with_director(mut self, director: LlmDirector) -> Self {
        let director = Arc::new(director);
        self.analyst = director.clone();
        self.adaptation = director.clone();
        self.casting = director.clone();
        self.intervention = director;
        self
    }

    pub fn with_analyst(mut self, analyst: Arc<dyn SceneAnalyst>) -> Self {
        self.analyst = analyst;
        self
    }

    pub fn with_adaptation(mut self, adaptation: Arc<dyn Adaptation>) -> Self {
        self.adaptation = adaptation;
        self
    }

    pub fn with_casting(mut self, casting: Arc<dyn Casting>) -> Self {
        self.casting = casting;
        self
    }

    pub fn with_intervention(mut self, intervention: Arc<dyn Intervention>) -> Self {
        self.intervention = intervention;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }
}

/// Snapshot answered by [`StageHandle::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub is_playing: bool,
    pub current_index: usize,
    pub total_events: usize,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub scenes_concluded: usize,
    pub scenes_skipped: usize,
    /// True when the last event was reached, false when stopped.
    pub completed: bool,
}

pub struct StageManager {
    pub(crate) config: StageConfig,
    pub(crate) title: String,
    pub(crate) script: Vec<ScriptEvent>,
    pub(crate) cast: Vec<CastMember>,
    pub(crate) blackboard: Blackboard,
    pub(crate) memories: HashMap<String, MemoryBank>,
    pub(crate) deps: StageDeps,
    pub(crate) control: Arc<GodModeController>,
    pub(crate) gate: Arc<PlaybackGate>,
    pub(crate) cancel: CancellationToken,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) rng: StdRng,
    performance_id: Option<String>,
    current_index: usize,
}

impl StageManager {
    pub fn new(
        config: StageConfig,
        script: Vec<ScriptEvent>,
        cast: Vec<CastMember>,
        deps: StageDeps,
    ) -> Self {
        let mut blackboard = Blackboard::new();
        for fact in &config.world.facts {
            blackboard.add_fact(fact.clone(), "world");
        }

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut stage = Self {
            broadcaster: Broadcaster::new(config.broadcast_capacity),
            control: Arc::new(GodModeController::new(script.len())),
            gate: Arc::new(PlaybackGate::new(false)),
            cancel: CancellationToken::new(),
            title: String::new(),
            config,
            script,
            cast: Vec::with_capacity(cast.len()),
            blackboard,
            memories: HashMap::new(),
            deps,
            rng,
            performance_id: None,
            current_index: 0,
        };
        for member in cast {
            let name = member.name.clone();
            if !stage.add_member(member) {
                warn!(actor = %name, "Duplicate actor dropped");
            }
        }
        stage
    }

    /// Build a performance from a performance file.
    ///
    /// AI actors get an HTTP backend from their endpoint config; actors with
    /// fixed lines become scripted performers. Actors without a persona are
    /// cast by the casting collaborator.
    pub async fn from_spec(
        spec: PerformanceSpec,
        config: StageConfig,
        deps: StageDeps,
    ) -> Result<Self, StageError> {
        spec.validate()?;
        let config = config
            .with_stage_type(spec.stage_type.clone())
            .with_world(spec.world.clone());

        // Model actors share the stage's stop token so backoff waits end on stop.
        let cancel = CancellationToken::new();
        let mut cast = Vec::with_capacity(spec.actors.len());
        for actor in &spec.actors {
            cast.push(Self::cast_member(actor, &config, &deps, &cancel).await?);
        }

        let mut stage = Self::new(config, spec.script, cast, deps).with_title(spec.title);
        stage.cancel = cancel;
        Ok(stage)
    }

    async fn cast_member(
        actor: &ActorSpec,
        config: &StageConfig,
        deps: &StageDeps,
        cancel: &CancellationToken,
    ) -> Result<CastMember, StageError> {
        let performer: Arc<dyn Performer> = match &actor.endpoint {
            Some(endpoint) => {
                let mut backend = ClientBackend::new(endpoint.build_client(&actor.name)?);
                if let Some(t) = endpoint.temperature {
                    backend = backend.with_temperature(t);
                }
                Arc::new(
                    AiPerformer::new(&actor.name, Arc::new(backend), config.retry.clone())
                        .with_cancel(cancel.clone()),
                )
            }
            None if !actor.lines.is_empty() => {
                Arc::new(ScriptedPerformer::new(&actor.name, actor.lines.clone()))
            }
            None => return Err(ConfigError::NoPerformer(actor.name.clone()).into()),
        };

        let mut memories = actor.initial_memories.clone();
        let persona = match actor.system_prompt.as_ref().filter(|p| !p.trim().is_empty()) {
            Some(prompt) => prompt.clone(),
            None => {
                let persona = match deps
                    .casting
                    .cast(&actor.name, &config.world, &config.stage_type)
                    .await
                {
                    Ok(persona) => persona,
                    Err(e) => {
                        warn!(actor = %actor.name, error = %e, "Casting failed, using template persona");
                        TemplateCasting
                            .cast(&actor.name, &config.world, &config.stage_type)
                            .await?
                    }
                };
                memories.extend(persona.initial_memories);
                persona.system_prompt
            }
        };

        Ok(CastMember::new(performer, persona)
            .with_memories(memories)
            .with_secrets(actor.secrets.clone()))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Add an actor before the run starts. Returns false if the name is taken.
    pub fn add_member(&mut self, member: CastMember) -> bool {
        if self.memories.contains_key(&member.name) {
            return false;
        }
        let mut memory =
            MemoryBank::with_capacity(&member.name, self.config.short_term_capacity);
        for secret in &member.secrets {
            memory.add_secret(secret.clone());
        }
        for background in &member.initial_memories {
            memory.add_long_term(background.clone());
        }
        self.memories.insert(member.name.clone(), memory);
        self.cast.push(member);
        true
    }

    pub fn handle(&self) -> StageHandle {
        StageHandle {
            control: self.control.clone(),
            gate: self.gate.clone(),
            cancel: self.cancel.clone(),
            broadcaster: self.broadcaster.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.broadcaster.subscribe()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn script(&self) -> &[ScriptEvent] {
        &self.script
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn memory(&self, actor: &str) -> Option<&MemoryBank> {
        self.memories.get(actor)
    }

    pub fn cast_names(&self) -> Vec<String> {
        self.cast.iter().map(|m| m.name.clone()).collect()
    }

    pub fn performance_id(&self) -> Option<&str> {
        self.performance_id.as_deref()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    /// Register the script and open a performance record.
    pub async fn initialize(&mut self) {
        if self.performance_id.is_some() {
            return;
        }
        let persistence = self.deps.persistence.clone();
        let script_id = match persistence.save_script(&self.title, &self.script).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to save script");
                return;
            }
        };
        match persistence.create_performance(&script_id, &self.title).await {
            Ok(id) => {
                info!(performance_id = %id, "Performance created");
                self.performance_id = Some(id);
            }
            Err(e) => warn!(error = %e, "Failed to create performance record"),
        }
    }

    /// Run the performance until the script ends or it is stopped.
    pub async fn run(&mut self) -> RunReport {
        self.initialize().await;
        self.control.set_script_len(self.script.len());
        self.gate.set_playing(true);

        info!(title = %self.title, events = self.script.len(), actors = self.cast.len(), "Performance starting");
        self.notice(format!("🎭 The performance '{}' begins", self.title));
        if self.cast.is_empty() {
            self.notice("⚠️ No actors registered; every scene will be skipped");
        }

        let mut report = RunReport::default();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.gate.wait_until_playing(&self.cancel).await {
                break;
            }
            self.apply_commands().await;
            if let Some(target) = self.control.take_jump() {
                self.jump_to(target).await;
            }
            if self.current_index >= self.script.len() {
                report.completed = true;
                break;
            }

            let index = self.current_index;
            self.control.set_current_index(index);
            self.set_status(PerformanceStatus::Running).await;
            self.publish_status();

            match self.run_scene(index).await {
                SceneOutcome::Concluded(_) => report.scenes_concluded += 1,
                SceneOutcome::Skipped => report.scenes_skipped += 1,
                SceneOutcome::Interrupted => continue,
                SceneOutcome::Stopped => break,
            }
            self.current_index += 1;
            self.control.set_current_index(self.current_index);

            if self.current_index < self.script.len()
                && !self.pace(self.config.pacing.between_events).await
            {
                break;
            }
        }

        if report.completed {
            self.notice("🎬 The curtain falls. Thank you for watching!");
            self.set_status(PerformanceStatus::Completed).await;
        } else {
            self.notice("⏹ The performance was stopped");
            self.set_status(PerformanceStatus::Stopped).await;
        }
        self.gate.set_playing(false);
        self.publish_status();
        info!(?report, "Performance finished");
        report
    }

    /// Run on a new task. The manager is handed back when the run ends.
    pub fn spawn(self) -> (StageHandle, JoinHandle<(StageManager, RunReport)>) {
        let handle = self.handle();
        let task = tokio::spawn(async move {
            let mut manager = self;
            let report = manager.run().await;
            (manager, report)
        });
        (handle, task)
    }

    async fn jump_to(&mut self, target: usize) {
        if target >= self.script.len() {
            warn!(target, "Ignoring out-of-range jump");
            return;
        }
        info!(from = self.current_index, to = target, "Jumping");
        self.current_index = target;
        self.control.set_current_index(target);
        let label = self.script[target].label().to_string();
        self.notice(format!("⏭ Jumping to event {}: {}", target + 1, label));
        self.record(EventRecord::new(EventKind::Jump, label, target))
            .await;
    }

    // ------------------------------------------------------------------------
    // God Mode
    // ------------------------------------------------------------------------

    /// Apply every queued God-Mode command, oldest first.
    pub(crate) async fn apply_commands(&mut self) {
        for command in self.control.drain() {
            if self.cancel.is_cancelled() {
                debug!(?command, "Stopped, command dropped");
                continue;
            }
            match command {
                ControlCommand::Inject(injection) => self.apply_injection(injection).await,
                ControlCommand::Action(action) => {
                    let summary = serde_json::to_string(&action).unwrap_or_default();
                    self.record(EventRecord::new(EventKind::GodAction, summary, self.current_index))
                        .await;
                    self.apply_god_action(action);
                }
                ControlCommand::TimeTravel(time) => self.apply_time_travel(time).await,
                ControlCommand::AddFact { fact, category } => {
                    if self.blackboard.add_fact(fact.clone(), category.clone()) {
                        self.notice(format!("📌 New fact [{category}]: {fact}"));
                        self.record(EventRecord::new(EventKind::Fact, fact, self.current_index))
                            .await;
                    }
                }
            }
        }
    }

    async fn apply_injection(&mut self, injection: Injection) {
        let context = InterventionContext {
            current_event: self
                .script
                .get(self.current_index)
                .map(|e| e.label().to_string())
                .unwrap_or_default(),
            active_actors: self.cast_names(),
            recent_dialogue: self
                .blackboard
                .recent(3)
                .iter()
                .map(|e| format!("{}: {}", e.speaker, e.content))
                .collect(),
        };

        let interpreted = self.deps.intervention.interpret(&injection, &context).await;
        if self.cancel.is_cancelled() {
            debug!("Stopped while interpreting an injection, dropping it");
            return;
        }
        let action = match interpreted {
            Ok(action) if !action.is_empty() => action,
            Ok(_) => literal_action(&injection),
            Err(e) => {
                warn!(error = %e, "Intervention failed, applying literally");
                literal_action(&injection)
            }
        };

        let mut record = EventRecord::new(EventKind::GodInject, injection.content.clone(), self.current_index);
        if let Some(target) = &injection.target {
            record = record.by(target.clone());
        }
        self.record(record).await;
        self.apply_god_action(action);
    }

    pub(crate) fn apply_god_action(&mut self, action: GodAction) {
        let narrator = self.config.stage_type.narrator_prefix();

        if let Some(text) = action.global_announcement.filter(|t| !t.trim().is_empty()) {
            self.blackboard.add_dialogue(narrator, text.clone());
            self.broadcaster.send(StageEvent::direction(text));
        }

        for (actor, instruction) in action.target_instructions {
            match self.memories.get_mut(&actor) {
                Some(memory) => {
                    debug!(%actor, "Director instruction queued");
                    memory.add_directive(instruction);
                }
                None => {
                    warn!(%actor, "Instruction for unknown actor, announcing to everyone");
                    let text = format!("⚡ {instruction}");
                    self.blackboard.add_dialogue(narrator, text.clone());
                    self.broadcaster.send(StageEvent::direction(text));
                }
            }
        }

        for (actor, memory_text) in action.memory_updates {
            match self.memories.get_mut(&actor) {
                Some(memory) => memory.add_short_term(memory_text),
                None => warn!(%actor, "Memory update for unknown actor dropped"),
            }
        }
    }

    async fn apply_time_travel(&mut self, time: String) {
        let index = self.current_index;
        let Some(event) = self.script.get_mut(index) else {
            warn!("Time travel with no current event ignored");
            return;
        };
        event.timeline = time.clone();
        self.broadcaster
            .send(StageEvent::direction(format!("⏳ Time shifts: {time}")));
        self.record(EventRecord::new(EventKind::TimeTravel, time, index))
            .await;
    }

    // ------------------------------------------------------------------------
    // Side effects
    // ------------------------------------------------------------------------

    pub(crate) fn notice(&self, content: impl Into<String>) {
        self.broadcaster.send(StageEvent::system(content));
    }

    pub(crate) fn publish_status(&self) {
        self.broadcaster.send(StageEvent::ScenarioStatus {
            is_playing: self.gate.is_playing(),
            current_index: self.current_index,
            total_events: self.script.len(),
        });
    }

    /// Log an event. Failures are logged and otherwise ignored.
    pub(crate) async fn record(&self, record: EventRecord) {
        let Some(id) = &self.performance_id else {
            return;
        };
        if let Err(e) = self.deps.persistence.log_event(id, &record).await {
            warn!(error = %e, kind = ?record.kind, "Failed to log event");
        }
    }

    pub(crate) async fn checkpoint_actor(&self, actor: &str) {
        let (Some(id), Some(memory)) = (&self.performance_id, self.memories.get(actor)) else {
            return;
        };
        if let Err(e) = self
            .deps
            .persistence
            .save_actor_state(id, actor, &memory.snapshot())
            .await
        {
            warn!(%actor, error = %e, "Failed to save actor state");
        }
    }

    async fn set_status(&self, status: PerformanceStatus) {
        let Some(id) = &self.performance_id else {
            return;
        };
        if let Err(e) = self
            .deps
            .persistence
            .update_performance_status(id, status, self.current_index)
            .await
        {
            warn!(error = %e, ?status, "Failed to update performance status");
        }
    }

    /// Sleep unless stopped first. Returns false when stopped.
    pub(crate) async fn pace(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

/// Cloneable remote control for a running performance.
#[derive(Clone)]
pub struct StageHandle {
    control: Arc<GodModeController>,
    gate: Arc<PlaybackGate>,
    cancel: CancellationToken,
    broadcaster: Broadcaster,
}

impl StageHandle {
    /// Start or restart playback.
    pub fn start(&self) {
        self.resume();
    }

    pub fn pause(&self) {
        if self.gate.is_playing() {
            self.gate.set_playing(false);
            self.broadcaster.send(StageEvent::system("⏸ Performance paused"));
            self.publish_status();
        }
    }

    pub fn resume(&self) {
        if !self.gate.is_playing() && !self.cancel.is_cancelled() {
            self.gate.set_playing(true);
            self.broadcaster.send(StageEvent::system("▶ Performance resumed"));
            self.publish_status();
        }
    }

    /// Move playback to event `index`; the running scene is cut short.
    pub fn jump(&self, index: usize) -> Result<(), ControlError> {
        if self.cancel.is_cancelled() {
            return Err(ControlError::Stopped);
        }
        self.control.request_jump(index)
    }

    /// Queue an injected event, optionally aimed at one actor.
    pub fn inject(&self, content: impl Into<String>, target: Option<&str>) {
        self.control.enqueue(ControlCommand::Inject(Injection {
            content: content.into(),
            target: target.map(str::to_string),
        }));
    }

    pub fn inject_action(&self, action: GodAction) {
        self.control.enqueue(ControlCommand::Action(action));
    }

    /// Rewrite the current event's virtual time.
    pub fn time_travel(&self, new_time: impl Into<String>) {
        self.control.enqueue(ControlCommand::TimeTravel(new_time.into()));
    }

    pub fn add_fact(&self, fact: impl Into<String>, category: impl Into<String>) {
        self.control.enqueue(ControlCommand::AddFact {
            fact: fact.into(),
            category: category.into(),
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.broadcaster.subscribe()
    }

    pub fn status(&self) -> StageStatus {
        StageStatus {
            is_playing: self.gate.is_playing(),
            current_index: self.control.current_index(),
            total_events: self.control.script_len(),
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.broadcaster.send(StageEvent::ScenarioStatus {
            is_playing: status.is_playing,
            current_index: status.current_index,
            total_events: status.total_events,
        });
    }
}
