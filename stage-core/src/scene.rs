//! Scene scheduling: who speaks next, whether a reply counts, and when a scene is over.
//!
//! A sequential scene asks one actor at a time in round-robin order. The
//! actor who spoke last is skipped once they reach the monopoly cap. Every
//! decision is judged before it touches shared state: passes, empty replies,
//! near-duplicates and short reluctant replies all count as silence. The scene
//! ends on an explicit end marker, on a cold field (a full round of silence),
//! or when the turn budget runs out, checked in that order.

use crate::actor::{extract_markers, ActorDecision, HistoryLine, MarkedContent, SideAction, TurnContext};
use crate::broadcast::StageEvent;
use crate::collaborators::SceneAnalysis;
use crate::config::SceneConfig;
use crate::persist::{EventKind, EventRecord};
use crate::script::{SceneMode, ScriptEvent};
use crate::stage::StageManager;
use crate::state::{Blackboard, DialogueEntry, QuoteRef};
use std::fmt;
use tracing::{debug, info, warn};

/// Why a scene ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// An actor signalled the goal was reached.
    Explicit,
    /// Everyone passed in a row.
    ColdField,
    MaxTurns,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EndReason::Explicit => "goal reached",
            EndReason::ColdField => "conversation went cold",
            EndReason::MaxTurns => "turn limit reached",
        };
        f.write_str(text)
    }
}

/// How `run_scene` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneOutcome {
    Concluded(EndReason),
    /// Nobody could play the scene.
    Skipped,
    /// A jump was requested mid-scene.
    Interrupted,
    Stopped,
}

/// Why a scene loop returned early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interruption {
    Jump,
    Stop,
}

impl From<Interruption> for SceneOutcome {
    fn from(value: Interruption) -> Self {
        match value {
            Interruption::Jump => SceneOutcome::Interrupted,
            Interruption::Stop => SceneOutcome::Stopped,
        }
    }
}

// ============================================================================
// Turn selection
// ============================================================================

/// Round-robin speaker selection with an anti-monopoly skip.
///
/// The streak counts an actor's speaking turns with no other actor speaking
/// in between; passes by others do not break it.
#[derive(Debug, Clone)]
pub struct TurnSelector {
    actors: Vec<String>,
    cap: usize,
    cursor: usize,
    last_speaker: Option<usize>,
    streak: usize,
}

impl TurnSelector {
    /// A cap of zero disables the skip.
    pub fn new(actors: Vec<String>, cap: usize) -> Self {
        Self {
            actors,
            cap,
            cursor: 0,
            last_speaker: None,
            streak: 0,
        }
    }

    /// Slot of the next actor to ask, or `None` when the only candidate is capped.
    pub fn next(&mut self) -> Option<usize> {
        let n = self.actors.len();
        if n == 0 {
            return None;
        }
        let candidate = self.advance();
        if !self.is_capped(candidate) {
            return Some(candidate);
        }
        if n == 1 {
            debug!(actor = %self.actors[candidate], "Sole actor is capped");
            return None;
        }
        debug!(actor = %self.actors[candidate], streak = self.streak, "Skipping to prevent monopoly");
        Some(self.advance())
    }

    /// Note that the actor in `slot` spoke. Passes are not recorded.
    pub fn record_speak(&mut self, slot: usize) {
        if self.last_speaker == Some(slot) {
            self.streak += 1;
        } else {
            self.last_speaker = Some(slot);
            self.streak = 1;
        }
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    fn advance(&mut self) -> usize {
        let slot = self.cursor % self.actors.len();
        self.cursor = (slot + 1) % self.actors.len();
        slot
    }

    fn is_capped(&self, slot: usize) -> bool {
        self.cap > 0 && self.last_speaker == Some(slot) && self.streak >= self.cap
    }
}

// ============================================================================
// Decision policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReason {
    Marker,
    Empty,
    Reluctant,
    Duplicate,
    /// The only candidate was capped; nobody was asked.
    Capped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Speak,
    Pass(PassReason),
}

impl Verdict {
    pub fn is_speak(&self) -> bool {
        matches!(self, Verdict::Speak)
    }
}

/// Decide whether a reply counts as speech.
///
/// `marked` is the reply with side-action markers already pulled out. A
/// reply that carries only side actions still counts as a move.
pub fn judge(
    decision: &ActorDecision,
    marked: &MarkedContent,
    blackboard: &Blackboard,
    config: &SceneConfig,
) -> Verdict {
    if decision.has_pass_marker() {
        return Verdict::Pass(PassReason::Marker);
    }
    if marked.text.is_empty() {
        return if marked.actions.is_empty() {
            Verdict::Pass(PassReason::Empty)
        } else {
            Verdict::Speak
        };
    }
    if decision.willingness < config.willingness_threshold
        && marked.text.chars().count() < config.short_content_len
    {
        return Verdict::Pass(PassReason::Reluctant);
    }
    if blackboard.is_near_duplicate(&marked.text, config.history_window, config.duplicate_min_len) {
        return Verdict::Pass(PassReason::Duplicate);
    }
    Verdict::Speak
}

/// Running counters for one scene.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneProgress {
    pub turn_count: usize,
    pub consecutive_silence: usize,
}

impl SceneProgress {
    /// Count a finished turn and report whether the scene is over.
    ///
    /// `active` is the number of actors on stage; pass `usize::MAX` to leave
    /// cold-field detection to the caller.
    pub fn record(
        &mut self,
        spoke: bool,
        ends_scene: bool,
        active: usize,
        max_turns: usize,
    ) -> Option<EndReason> {
        self.turn_count += 1;
        if spoke {
            self.consecutive_silence = 0;
        } else {
            self.consecutive_silence += 1;
        }

        if ends_scene {
            Some(EndReason::Explicit)
        } else if self.consecutive_silence >= active {
            Some(EndReason::ColdField)
        } else if self.turn_count >= max_turns {
            Some(EndReason::MaxTurns)
        } else {
            None
        }
    }
}

// ============================================================================
// Scene loop
// ============================================================================

impl StageManager {
    /// Play the event at `index` to its end.
    pub(crate) async fn run_scene(&mut self, index: usize) -> SceneOutcome {
        let event = self.script[index].clone();
        let active = self.active_cast(&event);
        if active.is_empty() {
            warn!(event = %event.label(), "No actors available, skipping scene");
            self.notice(format!("⚠️ Skipping '{}': no actors available", event.label()));
            return SceneOutcome::Skipped;
        }
        if event.max_turns == 0 {
            self.notice(format!("⚠️ Skipping '{}': no turns allotted", event.label()));
            return SceneOutcome::Skipped;
        }

        info!(index, event = %event.label(), actors = active.len(), mode = ?event.mode, "Scene starting");
        let mut heading = format!("🎬 Scene {}: {}", index + 1, event.label());
        if !event.timeline.is_empty() {
            heading.push_str(&format!(" ({})", event.timeline));
        }
        self.broadcaster.send(StageEvent::direction(heading));
        if !event.description.is_empty() && event.description != event.label() {
            self.broadcaster
                .send(StageEvent::direction(event.description.clone()));
        }

        let scene_start = self.blackboard.next_seq();
        let result = match event.mode {
            SceneMode::Sequential => self.run_sequential(index, &active).await,
            SceneMode::Free => self.run_free(index, &active).await,
        };

        match result {
            Ok(reason) => match self.conclude_scene(index, &active, scene_start, reason).await {
                Ok(()) => SceneOutcome::Concluded(reason),
                Err(interruption) => interruption.into(),
            },
            Err(interruption) => {
                info!(index, ?interruption, "Scene interrupted");
                interruption.into()
            }
        }
    }

    async fn run_sequential(&mut self, index: usize, active: &[usize]) -> Result<EndReason, Interruption> {
        let names = self.names_of(active);
        let max_turns = self.script[index].max_turns;
        let mut selector = TurnSelector::new(names.clone(), self.config.scene.monopoly_cap);
        let mut progress = SceneProgress::default();

        loop {
            self.turn_boundary().await?;
            let turn = progress.turn_count + 1;

            let (spoke, ends_scene) = match selector.next() {
                None => {
                    debug!(turn, "Forced pass");
                    let reason = format!("{:?}", PassReason::Capped);
                    self.record(EventRecord::new(EventKind::Pass, reason, index)).await;
                    (false, false)
                }
                Some(slot) => {
                    let member = active[slot];
                    let actor = self.cast[member].name.clone();
                    self.broadcaster.send(StageEvent::Thinking { actor: actor.clone() });

                    let context = self.build_context(member, index, turn, &names);
                    let performer = self.cast[member].performer.clone();
                    let decision = tokio::select! {
                        decision = performer.decide(&context) => decision,
                        _ = self.cancel.cancelled() => {
                            debug!(%actor, "Stopped during turn, discarding reply");
                            return Err(Interruption::Stop);
                        }
                    };
                    if self.cancel.is_cancelled() {
                        return Err(Interruption::Stop);
                    }

                    let (verdict, ends_scene) = self.commit_decision(member, index, &names, decision).await;
                    if verdict.is_speak() {
                        selector.record_speak(slot);
                    }
                    (verdict.is_speak(), ends_scene)
                }
            };

            if let Some(reason) = progress.record(spoke, ends_scene, active.len(), max_turns) {
                info!(index, turns = progress.turn_count, %reason, "Scene ending");
                return Ok(reason);
            }

            let delay = if spoke {
                self.config.pacing.speak_delay
            } else {
                self.config.pacing.pass_delay
            };
            if !self.pace(delay).await {
                return Err(Interruption::Stop);
            }
        }
    }

    /// Wait out a pause, apply queued commands and notice jumps or stops.
    pub(crate) async fn turn_boundary(&mut self) -> Result<(), Interruption> {
        if self.cancel.is_cancelled() || !self.gate.wait_until_playing(&self.cancel).await {
            return Err(Interruption::Stop);
        }
        self.apply_commands().await;
        if self.cancel.is_cancelled() {
            return Err(Interruption::Stop);
        }
        if self.control.has_pending_jump() {
            return Err(Interruption::Jump);
        }
        Ok(())
    }

    /// Cast indices playing `event`. Falls back to the whole cast.
    pub(crate) fn active_cast(&self, event: &ScriptEvent) -> Vec<usize> {
        let named: Vec<usize> = self
            .cast
            .iter()
            .enumerate()
            .filter(|(_, m)| event.participants.iter().any(|p| p == &m.name))
            .map(|(i, _)| i)
            .collect();

        for participant in &event.participants {
            if !self.cast.iter().any(|m| &m.name == participant) {
                warn!(%participant, event = %event.label(), "Unknown participant ignored");
            }
        }

        if named.is_empty() {
            (0..self.cast.len()).collect()
        } else {
            named
        }
    }

    pub(crate) fn names_of(&self, members: &[usize]) -> Vec<String> {
        members.iter().map(|&i| self.cast[i].name.clone()).collect()
    }

    pub(crate) fn build_context(&self, member: usize, index: usize, turn: usize, cast: &[String]) -> TurnContext {
        let actor = &self.cast[member];
        let event = &self.script[index];
        let others: Vec<String> = cast.iter().filter(|n| **n != actor.name).cloned().collect();

        TurnContext {
            actor: actor.name.clone(),
            persona: actor.persona.clone(),
            stage_instructions: self.config.stage_type.instructions(
                &actor.name,
                &others,
                &self.config.world.group_name,
            ),
            scene: event.into(),
            turn,
            max_turns: event.max_turns,
            facts: self.blackboard.render_facts(),
            memory: self
                .memories
                .get(&actor.name)
                .map(|m| m.render())
                .unwrap_or_default(),
            history: self
                .blackboard
                .recent(self.config.scene.history_window)
                .into_iter()
                .map(|e| HistoryLine {
                    speaker: e.speaker.clone(),
                    content: e.content.clone(),
                })
                .collect(),
            cast: cast.to_vec(),
        }
    }

    /// Judge a reply and apply it. Returns the verdict and whether the actor ended the scene.
    pub(crate) async fn commit_decision(
        &mut self,
        member: usize,
        index: usize,
        cast: &[String],
        decision: ActorDecision,
    ) -> (Verdict, bool) {
        let actor = self.cast[member].name.clone();
        let marked = extract_markers(&decision.spoken_text(), &actor, cast);
        let verdict = judge(&decision, &marked, &self.blackboard, &self.config.scene);

        if let Some(memory) = self.memories.get_mut(&actor) {
            memory.take_directives();
        }

        match verdict {
            Verdict::Pass(reason) => {
                debug!(%actor, ?reason, "Pass");
                self.record(EventRecord::new(EventKind::Pass, format!("{reason:?}"), index).by(actor.clone()))
                    .await;
            }
            Verdict::Speak => self.perform(&actor, index, &decision, marked).await,
        }

        (verdict, decision.ends_scene())
    }

    async fn perform(&mut self, actor: &str, index: usize, decision: &ActorDecision, marked: MarkedContent) {
        let mut quote = None;
        for action in &marked.actions {
            match action {
                SideAction::Recall => match self.blackboard.revoke_last(actor) {
                    Some(seq) => {
                        self.broadcaster.send(StageEvent::Revoke {
                            seq,
                            actor: actor.to_string(),
                        });
                        self.record(EventRecord::new(EventKind::Revoke, seq.to_string(), index).by(actor))
                            .await;
                    }
                    None => debug!(%actor, "Nothing to recall"),
                },
                SideAction::Nudge { target } => {
                    self.broadcaster.send(StageEvent::Nudge {
                        actor: actor.to_string(),
                        target: target.clone(),
                    });
                    if let Some(memory) = self.memories.get_mut(target) {
                        memory.add_short_term(format!("{actor} nudged you"));
                    }
                    self.record(EventRecord::new(EventKind::Nudge, target.clone(), index).by(actor))
                        .await;
                }
                SideAction::Quote { target } => {
                    quote = self.blackboard.last_by(target).map(|e| QuoteRef {
                        speaker: e.speaker.clone(),
                        content: e.content.clone(),
                    });
                    if quote.is_none() {
                        debug!(%actor, %target, "Quoted actor has no visible line");
                    }
                }
            }
        }

        if marked.text.is_empty() {
            return;
        }

        let seq = self
            .blackboard
            .push_entry(actor, marked.text.clone(), decision.action.clone(), quote.clone());
        if let Some(memory) = self.memories.get_mut(actor) {
            memory.add_short_term(format!("You said: {}", marked.text));
        }
        self.broadcaster.send(StageEvent::Dialogue {
            seq,
            actor: actor.to_string(),
            content: marked.text.clone(),
            action: decision.action.clone(),
            quote,
        });
        self.record(EventRecord::new(EventKind::Dialogue, marked.text, index).by(actor))
            .await;
        self.checkpoint_actor(actor).await;
    }

    /// Summarize a finished scene and let the next event adapt to it.
    ///
    /// Nothing is committed if the performance stops while a collaborator is working.
    pub(crate) async fn conclude_scene(
        &mut self,
        index: usize,
        active: &[usize],
        scene_start: u64,
        reason: EndReason,
    ) -> Result<(), Interruption> {
        let event = self.script[index].clone();
        let history: Vec<DialogueEntry> = self
            .blackboard
            .since(scene_start)
            .into_iter()
            .cloned()
            .collect();

        let analysis = match self.deps.analyst.analyze(&history, &event).await {
            Ok(analysis) if !analysis.summary.trim().is_empty() => analysis,
            Ok(_) => SceneAnalysis::fallback(&event),
            Err(e) => {
                warn!(error = %e, "Scene analysis failed, using fallback summary");
                SceneAnalysis::fallback(&event)
            }
        };
        if self.cancel.is_cancelled() {
            debug!(index, "Stopped during scene analysis, discarding summary");
            return Err(Interruption::Stop);
        }

        self.blackboard.add_fact(analysis.summary.clone(), "story_summary");
        for fact in &analysis.new_facts {
            self.blackboard.add_fact(fact.clone(), "scene_fact");
        }

        let participants = self.names_of(active);
        for name in &participants {
            if let Some(memory) = self.memories.get_mut(name) {
                memory.add_long_term(analysis.summary.clone());
                for update in analysis.relationship_updates.iter().filter(|u| &u.subject == name) {
                    memory.add_long_term(update.describe());
                }
            }
        }
        for name in &participants {
            self.checkpoint_actor(name).await;
        }

        self.broadcaster.send(StageEvent::direction(format!(
            "🏁 Scene ended ({reason}): {}",
            analysis.summary
        )));
        self.record(EventRecord::new(EventKind::SceneEnd, analysis.summary.clone(), index))
            .await;

        self.adapt_next(index).await
    }

    async fn adapt_next(&mut self, index: usize) -> Result<(), Interruption> {
        let next = index + 1;
        if next >= self.script.len() {
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(Interruption::Stop);
        }

        let story_so_far = self
            .blackboard
            .facts()
            .iter()
            .filter(|f| f.category == "story_summary")
            .map(|f| f.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let plan = self.script[next].plan();
        let cast = self.cast_names();

        let adapted = self
            .deps
            .adaptation
            .adapt_next_event(&story_so_far, &plan, &self.config.world.theme, &cast)
            .await;
        if self.cancel.is_cancelled() {
            debug!(next, "Stopped during adaptation, keeping planned event");
            return Err(Interruption::Stop);
        }

        match adapted {
            Ok(Some(adapted)) => {
                info!(next, event = %adapted.event, "Next event adapted");
                self.script[next].apply_plan(&adapted);
                let label = self.script[next].label().to_string();
                self.broadcaster
                    .send(StageEvent::direction(format!("🔀 The story shifts: next, {label}")));
                self.record(EventRecord::new(EventKind::Adaptation, label, next))
                    .await;
            }
            Ok(None) => debug!(next, "Keeping planned event"),
            Err(e) => {
                warn!(error = %e, "Adaptation failed");
                self.notice("⚠️ Could not adapt the next event; continuing with the original plan");
            }
        }
        Ok(())
    }
}
