//! Free-decision scenes: every actor thinks at once and the fastest talks first.
//!
//! Each round snapshots one context per actor, then runs all of them
//! concurrently after a random think delay. Replies are committed in
//! completion order under the same judging rules as sequential scenes, so a
//! later reply in the round is still checked against earlier ones for
//! duplicates. A round in which nobody speaks ends the scene.

use crate::actor::ActorDecision;
use crate::broadcast::StageEvent;
use crate::scene::{EndReason, Interruption, SceneProgress};
use crate::stage::StageManager;
use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

impl StageManager {
    pub(crate) async fn run_free(&mut self, index: usize, active: &[usize]) -> Result<EndReason, Interruption> {
        let names = self.names_of(active);
        let max_turns = self.script[index].max_turns;
        let mut progress = SceneProgress::default();
        let mut round = 0usize;

        loop {
            self.turn_boundary().await?;
            round += 1;
            debug!(index, round, "Free round starting");

            let mut pending = FuturesUnordered::new();
            for &member in active {
                let context = self.build_context(member, index, progress.turn_count + 1, &names);
                let performer = self.cast[member].performer.clone();
                let delay = self.think_delay();
                self.broadcaster.send(StageEvent::Thinking {
                    actor: self.cast[member].name.clone(),
                });
                pending.push(async move {
                    tokio::time::sleep(delay).await;
                    let decision: ActorDecision = performer.decide(&context).await;
                    (member, decision)
                });
            }

            let mut anyone_spoke = false;
            loop {
                let next = tokio::select! {
                    next = pending.next() => next,
                    _ = self.cancel.cancelled() => None,
                };
                if self.cancel.is_cancelled() {
                    debug!(index, round, unanswered = pending.len(), "Stopped mid-round, discarding replies");
                    return Err(Interruption::Stop);
                }
                let Some((member, decision)) = next else {
                    break;
                };
                let (verdict, ends_scene) = self.commit_decision(member, index, &names, decision).await;
                anyone_spoke |= verdict.is_speak();

                if let Some(reason) = progress.record(verdict.is_speak(), ends_scene, usize::MAX, max_turns) {
                    let dropped = pending.len();
                    if dropped > 0 {
                        debug!(dropped, "Discarding replies past the scene end");
                    }
                    info!(index, round, turns = progress.turn_count, %reason, "Scene ending");
                    return Ok(reason);
                }
            }

            if !anyone_spoke {
                info!(index, round, "Silent round, scene ending");
                return Ok(EndReason::ColdField);
            }

            if !self.pace(self.config.pacing.speak_delay).await {
                return Err(Interruption::Stop);
            }
        }
    }

    /// Random think time in `[free_delay_min, free_delay_max)`.
    fn think_delay(&mut self) -> Duration {
        let min = self.config.pacing.free_delay_min;
        let max = self.config.pacing.free_delay_max;
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }
}
