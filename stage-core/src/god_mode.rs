//! God Mode: the operator's channel into a running performance.
//!
//! Commands are queued here from any task and drained by the performance
//! loop between turns, one at a time, in arrival order. Pausing is a
//! [`PlaybackGate`] the loop waits on; jumps are recorded separately so a
//! running scene can notice them at its next turn boundary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("Jump target {index} out of range (script has {len} events)")]
    JumpOutOfRange { index: usize, len: usize },

    #[error("Performance has stopped")]
    Stopped,
}

/// A structured intervention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GodAction {
    /// Shown to everyone as a stage direction.
    #[serde(default)]
    pub global_announcement: Option<String>,
    /// Private instructions per actor, followed on their next turn.
    #[serde(default)]
    pub target_instructions: BTreeMap<String, String>,
    /// Memories implanted per actor.
    #[serde(default)]
    pub memory_updates: BTreeMap<String, String>,
}

impl GodAction {
    pub fn announcement(text: impl Into<String>) -> Self {
        Self {
            global_announcement: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_instruction(mut self, actor: impl Into<String>, text: impl Into<String>) -> Self {
        self.target_instructions.insert(actor.into(), text.into());
        self
    }

    pub fn with_memory(mut self, actor: impl Into<String>, text: impl Into<String>) -> Self {
        self.memory_updates.insert(actor.into(), text.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.global_announcement.is_none()
            && self.target_instructions.is_empty()
            && self.memory_updates.is_empty()
    }
}

/// A raw injected event, optionally aimed at one actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Injection {
    pub content: String,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Inject(Injection),
    Action(GodAction),
    TimeTravel(String),
    AddFact { fact: String, category: String },
}

/// Shared command queue plus the playback position mirror.
#[derive(Debug, Default)]
pub struct GodModeController {
    queue: Mutex<VecDeque<ControlCommand>>,
    pending_jump: Mutex<Option<usize>>,
    current_index: AtomicUsize,
    script_len: AtomicUsize,
}

impl GodModeController {
    pub fn new(script_len: usize) -> Self {
        Self {
            script_len: AtomicUsize::new(script_len),
            ..Self::default()
        }
    }

    pub fn enqueue(&self, command: ControlCommand) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(command);
    }

    /// Remove and return every queued command, oldest first.
    pub fn drain(&self) -> Vec<ControlCommand> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Ask the loop to move to `index`. Fails when out of range.
    pub fn request_jump(&self, index: usize) -> Result<(), ControlError> {
        let len = self.script_len();
        if index >= len {
            return Err(ControlError::JumpOutOfRange { index, len });
        }
        *self.pending_jump.lock().unwrap_or_else(|e| e.into_inner()) = Some(index);
        Ok(())
    }

    pub fn has_pending_jump(&self) -> bool {
        self.pending_jump.lock().map(|j| j.is_some()).unwrap_or(false)
    }

    pub fn take_jump(&self) -> Option<usize> {
        self.pending_jump
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn current_index(&self) -> usize {
        self.current_index.load(Ordering::SeqCst)
    }

    pub(crate) fn set_current_index(&self, index: usize) {
        self.current_index.store(index, Ordering::SeqCst);
    }

    pub fn script_len(&self) -> usize {
        self.script_len.load(Ordering::SeqCst)
    }

    pub(crate) fn set_script_len(&self, len: usize) {
        self.script_len.store(len, Ordering::SeqCst);
    }
}

/// Play/pause switch the performance loop waits on.
#[derive(Debug)]
pub struct PlaybackGate {
    tx: watch::Sender<bool>,
}

impl PlaybackGate {
    pub fn new(playing: bool) -> Self {
        let (tx, _) = watch::channel(playing);
        Self { tx }
    }

    pub fn set_playing(&self, playing: bool) {
        self.tx.send_replace(playing);
    }

    pub fn is_playing(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until playing. Returns false if `cancel` fires first.
    pub async fn wait_until_playing(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            result = rx.wait_for(|playing| *playing) => result.is_ok() && !cancel.is_cancelled(),
        }
    }
}

impl Default for PlaybackGate {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_queue_is_fifo() {
        let controller = GodModeController::new(3);
        controller.enqueue(ControlCommand::TimeTravel("Dawn".into()));
        controller.enqueue(ControlCommand::Inject(Injection {
            content: "A storm rolls in".into(),
            target: None,
        }));
        assert_eq!(controller.pending(), 2);

        let drained = controller.drain();
        assert_eq!(drained[0], ControlCommand::TimeTravel("Dawn".into()));
        assert!(matches!(drained[1], ControlCommand::Inject(_)));
        assert_eq!(controller.pending(), 0);
    }

    #[test]
    fn test_jump_bounds() {
        let controller = GodModeController::new(3);
        assert_eq!(
            controller.request_jump(3),
            Err(ControlError::JumpOutOfRange { index: 3, len: 3 })
        );
        assert!(!controller.has_pending_jump());

        controller.request_jump(2).unwrap();
        assert!(controller.has_pending_jump());
        assert_eq!(controller.take_jump(), Some(2));
        assert_eq!(controller.take_jump(), None);
    }

    #[test]
    fn test_god_action_builder() {
        let action = GodAction::announcement("Lightning strikes")
            .with_instruction("Bob", "You are stunned")
            .with_memory("Alice", "I saw lightning hit Bob");
        assert!(!action.is_empty());
        assert_eq!(action.target_instructions["Bob"], "You are stunned");
        assert!(GodAction::default().is_empty());
    }

    #[tokio::test]
    async fn test_gate_blocks_until_resumed() {
        let gate = Arc::new(PlaybackGate::new(false));
        let cancel = CancellationToken::new();

        let waiter = {
            let gate = gate.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { gate.wait_until_playing(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set_playing(true);
        assert!(waiter.await.unwrap());
        assert!(gate.is_playing());
    }

    #[tokio::test]
    async fn test_gate_wait_cancelled() {
        let gate = PlaybackGate::new(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!gate.wait_until_playing(&cancel).await);
    }
}
