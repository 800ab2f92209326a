//! Performer implementations.

use super::context::TurnContext;
use super::decision::{ActorDecision, PASS_MARKER};
use super::gateway::{ActorGateway, ChatBackend, RetryPolicy};
use super::parser::DecisionParser;
use super::Performer;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An actor voiced by a language model.
#[derive(Debug)]
pub struct AiPerformer {
    name: String,
    gateway: ActorGateway,
}

impl AiPerformer {
    pub fn new(name: impl Into<String>, backend: Arc<dyn ChatBackend>, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            gateway: ActorGateway::new(backend, policy),
        }
    }

    /// Stop retrying once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.gateway = self.gateway.with_cancel(cancel);
        self
    }

    pub fn gateway(&self) -> &ActorGateway {
        &self.gateway
    }
}

#[async_trait]
impl Performer for AiPerformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, context: &TurnContext) -> ActorDecision {
        self.gateway.decide(&context.to_messages()).await
    }
}

/// An actor reading fixed lines in order, then passing forever.
#[derive(Debug)]
pub struct ScriptedPerformer {
    name: String,
    lines: Mutex<VecDeque<String>>,
    parser: DecisionParser,
}

impl ScriptedPerformer {
    pub fn new<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            lines: Mutex::new(lines.into_iter().map(Into::into).collect()),
            parser: DecisionParser::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.lines.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Performer for ScriptedPerformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, _context: &TurnContext) -> ActorDecision {
        let next = self
            .lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(line) => self.parser.parse(&line),
            None => ActorDecision::pass(),
        }
    }
}

/// An actor played by a person, fed through a channel.
///
/// Each turn waits up to the configured timeout for a line; silence is a pass.
#[derive(Debug)]
pub struct HumanPerformer {
    name: String,
    rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    timeout: Duration,
}

impl HumanPerformer {
    /// Create a performer and the sender its lines are typed into.
    pub fn channel(name: impl Into<String>, timeout: Duration) -> (Self, mpsc::Sender<String>) {
        let (tx, rx) = mpsc::channel(16);
        let performer = Self {
            name: name.into(),
            rx: tokio::sync::Mutex::new(rx),
            timeout,
        };
        (performer, tx)
    }
}

#[async_trait]
impl Performer for HumanPerformer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn decide(&self, _context: &TurnContext) -> ActorDecision {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(self.timeout, rx.recv()).await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() || line.eq_ignore_ascii_case("/pass") || line == PASS_MARKER {
                    ActorDecision::pass()
                } else {
                    ActorDecision::speak(line)
                }
            }
            Ok(None) => ActorDecision::pass(),
            Err(_) => {
                debug!(actor = %self.name, "No input before timeout, passing");
                ActorDecision::pass()
            }
        }
    }
}
