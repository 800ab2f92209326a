//! Testing utilities for the stage.
//!
//! This module provides tools for integration testing:
//! - `MockPerformer` for deterministic actors without API calls
//! - `ScriptedBackend` for exercising the gateway with canned outcomes
//! - `RecordingAdaptation` and `RecordingPersistence` to observe collaborators
//! - `TestHarness` for assembling a stage with no pacing delays

use crate::actor::{ActorDecision, CallOutcome, ChatBackend, Performer, TurnContext};
use crate::collaborators::{Adaptation, CollaboratorError, SceneAnalysis, SceneAnalyst};
use crate::config::{PacingConfig, StageConfig};
use crate::persist::{EventKind, EventRecord, PerformanceStatus, PersistError, Persistence};
use crate::script::{EventPlan, ScriptEvent};
use crate::stage::{CastMember, StageDeps, StageManager};
use crate::state::{DialogueEntry, MemorySnapshot};
use async_trait::async_trait;
use llm_client::ChatMessage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Names of actors in the order they were asked, shared between mocks.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

// ============================================================================
// Performers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    /// Pass once the script runs out.
    Pass,
    /// Keep producing fresh lines.
    Chatter,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<VecDeque<ActorDecision>>,
    contexts: Mutex<Vec<TurnContext>>,
}

/// A performer that plays back scripted decisions.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// stage asked after handing another to the cast.
#[derive(Debug, Clone)]
pub struct MockPerformer {
    name: String,
    fallback: Fallback,
    delay: Duration,
    log: Option<CallLog>,
    state: Arc<MockState>,
}

impl MockPerformer {
    /// Plays `decisions` in order, then passes.
    pub fn scripted(name: impl Into<String>, decisions: Vec<ActorDecision>) -> Self {
        let state = MockState {
            script: Mutex::new(decisions.into()),
            ..MockState::default()
        };
        Self {
            name: name.into(),
            fallback: Fallback::Pass,
            delay: Duration::ZERO,
            log: None,
            state: Arc::new(state),
        }
    }

    /// Always passes.
    pub fn silent(name: impl Into<String>) -> Self {
        Self::scripted(name, Vec::new())
    }

    /// Always says something new.
    pub fn chatty(name: impl Into<String>) -> Self {
        let mut mock = Self::scripted(name, Vec::new());
        mock.fallback = Fallback::Chatter;
        mock
    }

    /// Think for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Queue another decision.
    pub fn push(&self, decision: ActorDecision) {
        lock(&self.state.script).push_back(decision);
    }

    /// Times this performer was asked.
    pub fn calls(&self) -> usize {
        lock(&self.state.contexts).len()
    }

    /// Every context this performer was shown.
    pub fn contexts(&self) -> Vec<TurnContext> {
        lock(&self.state.contexts).clone()
    }

    pub fn last_context(&self) -> Option<TurnContext> {
        lock(&self.state.contexts).last().cloned()
    }
}

#[async_trait]
impl Performer for MockPerformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, context: &TurnContext) -> ActorDecision {
        let call = {
            let mut contexts = lock(&self.state.contexts);
            contexts.push(context.clone());
            contexts.len()
        };
        if let Some(log) = &self.log {
            lock(log).push(self.name.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(decision) = lock(&self.state.script).pop_front() {
            return decision;
        }
        match self.fallback {
            Fallback::Pass => ActorDecision::pass(),
            Fallback::Chatter => {
                ActorDecision::speak(format!("{} chimes in ({call}) with a thought", self.name))
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// Backends
// ============================================================================

/// A chat backend that returns canned outcomes in order.
///
/// Once the outcomes run out every call is fatal.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    outcomes: Mutex<VecDeque<CallOutcome>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(outcomes: Vec<CallOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            ..Self::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages sent on each call.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn call(&self, messages: &[ChatMessage]) -> CallOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(messages.to_vec());
        lock(&self.outcomes)
            .pop_front()
            .unwrap_or_else(|| CallOutcome::Fatal("no scripted outcome left".into()))
    }

    fn label(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Records adaptation calls and answers with a fixed plan.
#[derive(Debug, Default)]
pub struct RecordingAdaptation {
    reply: Option<EventPlan>,
    fail: bool,
    delay: Duration,
    calls: Mutex<Vec<(String, EventPlan)>>,
}

impl RecordingAdaptation {
    /// Keeps every plan unchanged.
    pub fn keeping() -> Self {
        Self::default()
    }

    pub fn replacing(plan: EventPlan) -> Self {
        Self {
            reply: Some(plan),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// `(summary, original plan)` for every call.
    pub fn calls(&self) -> Vec<(String, EventPlan)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl Adaptation for RecordingAdaptation {
    async fn adapt_next_event(
        &self,
        summary: &str,
        plan: &EventPlan,
        _theme: &str,
        _cast: &[String],
    ) -> Result<Option<EventPlan>, CollaboratorError> {
        lock(&self.calls).push((summary.to_string(), plan.clone()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(CollaboratorError::Parse("adaptation unavailable".into()));
        }
        Ok(self.reply.clone())
    }
}

/// An analyst that returns the same summary for every scene.
#[derive(Debug, Clone)]
pub struct FixedAnalyst {
    pub analysis: SceneAnalysis,
    delay: Duration,
}

impl FixedAnalyst {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            analysis: SceneAnalysis {
                summary: summary.into(),
                ..SceneAnalysis::default()
            },
            delay: Duration::ZERO,
        }
    }

    /// Take `delay` to answer, like a model would.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SceneAnalyst for FixedAnalyst {
    async fn analyze(
        &self,
        _history: &[DialogueEntry],
        _event: &ScriptEvent,
    ) -> Result<SceneAnalysis, CollaboratorError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.analysis.clone())
    }
}

/// In-memory persistence that remembers everything it is given.
#[derive(Debug, Default)]
pub struct RecordingPersistence {
    fail: bool,
    scripts: AtomicUsize,
    records: Mutex<Vec<EventRecord>>,
    statuses: Mutex<Vec<PerformanceStatus>>,
    actor_saves: Mutex<Vec<(String, MemorySnapshot)>>,
}

impl RecordingPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn scripts_saved(&self) -> usize {
        self.scripts.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<EventRecord> {
        lock(&self.records).clone()
    }

    pub fn records_of(&self, kind: EventKind) -> Vec<EventRecord> {
        self.records().into_iter().filter(|r| r.kind == kind).collect()
    }

    pub fn statuses(&self) -> Vec<PerformanceStatus> {
        lock(&self.statuses).clone()
    }

    pub fn actor_saves(&self) -> Vec<(String, MemorySnapshot)> {
        lock(&self.actor_saves).clone()
    }

    fn check(&self) -> Result<(), PersistError> {
        if self.fail {
            return Err(PersistError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for RecordingPersistence {
    async fn save_script(&self, _title: &str, _script: &[ScriptEvent]) -> Result<String, PersistError> {
        self.check()?;
        let n = self.scripts.fetch_add(1, Ordering::SeqCst);
        Ok(format!("script-{n}"))
    }

    async fn create_performance(&self, script_id: &str, _title: &str) -> Result<String, PersistError> {
        self.check()?;
        Ok(format!("{script_id}-performance"))
    }

    async fn log_event(&self, _performance_id: &str, record: &EventRecord) -> Result<(), PersistError> {
        self.check()?;
        lock(&self.records).push(record.clone());
        Ok(())
    }

    async fn save_actor_state(
        &self,
        _performance_id: &str,
        actor: &str,
        memory: &MemorySnapshot,
    ) -> Result<(), PersistError> {
        self.check()?;
        lock(&self.actor_saves).push((actor.to_string(), memory.clone()));
        Ok(())
    }

    async fn update_performance_status(
        &self,
        _performance_id: &str,
        status: PerformanceStatus,
        _current_index: usize,
    ) -> Result<(), PersistError> {
        self.check()?;
        lock(&self.statuses).push(status);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Builder for a stage with instant pacing and a fixed seed.
pub struct TestHarness {
    config: StageConfig,
    script: Vec<ScriptEvent>,
    cast: Vec<CastMember>,
    deps: StageDeps,
    title: String,
}

impl TestHarness {
    pub fn new() -> Self {
        Self {
            config: StageConfig::new()
                .with_pacing(PacingConfig::instant())
                .with_seed(7),
            script: Vec::new(),
            cast: Vec::new(),
            deps: StageDeps::default(),
            title: "Test Performance".into(),
        }
    }

    pub fn with_event(mut self, event: ScriptEvent) -> Self {
        self.script.push(event);
        self
    }

    /// Add a performer with a one-line persona.
    pub fn with_performer<P: Performer + 'static>(mut self, performer: P) -> Self {
        let persona = format!("You are {}.", performer.name());
        self.cast.push(CastMember::new(Arc::new(performer), persona));
        self
    }

    pub fn with_member(mut self, member: CastMember) -> Self {
        self.cast.push(member);
        self
    }

    pub fn with_config(mut self, f: impl FnOnce(StageConfig) -> StageConfig) -> Self {
        self.config = f(self.config);
        self
    }

    pub fn with_deps(mut self, f: impl FnOnce(StageDeps) -> StageDeps) -> Self {
        self.deps = f(self.deps);
        self
    }

    pub fn with_adaptation(self, adaptation: Arc<dyn Adaptation>) -> Self {
        self.with_deps(|d| d.with_adaptation(adaptation))
    }

    pub fn with_persistence(self, persistence: Arc<dyn Persistence>) -> Self {
        self.with_deps(|d| d.with_persistence(persistence))
    }

    /// Build the stage with playback open, so scenes can also be run directly.
    pub fn build(self) -> StageManager {
        let stage = StageManager::new(self.config, self.script, self.cast, self.deps)
            .with_title(self.title);
        stage.handle().start();
        stage
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Speakers of every visible line, oldest first.
pub fn spoken_by(stage: &StageManager) -> Vec<String> {
    stage
        .blackboard()
        .entries()
        .iter()
        .filter(|e| !e.revoked)
        .map(|e| e.speaker.clone())
        .collect()
}
