//! Private per-actor memory.
//!
//! Four stores with different lifetimes:
//! - secrets: permanent, deduplicated
//! - short-term: a bounded FIFO window of recent impressions
//! - long-term: scene summaries, unbounded but only the latest are rendered
//! - directives: God-Mode instructions waiting for the actor's next turn

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default size of the short-term window.
pub const DEFAULT_SHORT_TERM_CAPACITY: usize = 10;

/// Number of long-term memories rendered into prompts.
pub const LONG_TERM_VIEW: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBank {
    owner: String,
    secrets: Vec<String>,
    short_term: VecDeque<String>,
    long_term: Vec<String>,
    directives: Vec<String>,
    capacity: usize,
}

impl MemoryBank {
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_capacity(owner, DEFAULT_SHORT_TERM_CAPACITY)
    }

    /// Create a bank whose short-term window holds `capacity` entries (at least one).
    pub fn with_capacity(owner: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            owner: owner.into(),
            secrets: Vec::new(),
            short_term: VecDeque::with_capacity(capacity),
            long_term: Vec::new(),
            directives: Vec::new(),
            capacity,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns false if the secret was already known.
    pub fn add_secret(&mut self, secret: impl Into<String>) -> bool {
        let secret = secret.into();
        if self.secrets.contains(&secret) {
            return false;
        }
        self.secrets.push(secret);
        true
    }

    /// Push into the short-term window, evicting the oldest entry when full.
    pub fn add_short_term(&mut self, memory: impl Into<String>) {
        while self.short_term.len() >= self.capacity {
            self.short_term.pop_front();
        }
        self.short_term.push_back(memory.into());
    }

    pub fn add_long_term(&mut self, memory: impl Into<String>) {
        self.long_term.push(memory.into());
    }

    /// Queue a director instruction for the next turn.
    pub fn add_directive(&mut self, directive: impl Into<String>) {
        self.directives.push(directive.into());
    }

    /// Consume every pending directive.
    pub fn take_directives(&mut self) -> Vec<String> {
        std::mem::take(&mut self.directives)
    }

    pub fn secrets(&self) -> &[String] {
        &self.secrets
    }

    pub fn short_term(&self) -> impl Iterator<Item = &String> {
        self.short_term.iter()
    }

    pub fn short_term_len(&self) -> usize {
        self.short_term.len()
    }

    pub fn long_term(&self) -> &[String] {
        &self.long_term
    }

    pub fn pending_directives(&self) -> &[String] {
        &self.directives
    }

    /// Build the private-memory section of the actor's prompt.
    pub fn render(&self) -> String {
        let mut sections = Vec::new();

        if !self.directives.is_empty() {
            let mut s = String::from("## Director's Instructions (follow these now)\n");
            for d in &self.directives {
                s.push_str(&format!("- {d}\n"));
            }
            sections.push(s);
        }

        if !self.secrets.is_empty() {
            let mut s = String::from("## Your Secrets (never reveal directly)\n");
            for secret in &self.secrets {
                s.push_str(&format!("- {secret}\n"));
            }
            sections.push(s);
        }

        if !self.long_term.is_empty() {
            let mut s = String::from("## Earlier Scenes\n");
            let start = self.long_term.len().saturating_sub(LONG_TERM_VIEW);
            for memory in &self.long_term[start..] {
                s.push_str(&format!("- {memory}\n"));
            }
            sections.push(s);
        }

        if !self.short_term.is_empty() {
            let mut s = String::from("## Recent Memories\n");
            for memory in &self.short_term {
                s.push_str(&format!("- {memory}\n"));
            }
            sections.push(s);
        }

        sections.join("\n")
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            owner: self.owner.clone(),
            secrets: self.secrets.clone(),
            short_term: self.short_term.iter().cloned().collect(),
            long_term: self.long_term.clone(),
        }
    }
}

/// Serializable view of a memory bank for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub owner: String,
    pub secrets: Vec<String>,
    pub short_term: Vec<String>,
    pub long_term: Vec<String>,
}
