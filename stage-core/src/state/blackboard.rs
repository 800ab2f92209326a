//! The blackboard: shared dialogue log and fact ledger.
//!
//! Every actor sees the same blackboard. Dialogue is append-only; a recalled
//! line stays in the log, flagged as revoked and hidden from every view.

use serde::{Deserialize, Serialize};

/// A line quoted by another line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteRef {
    pub speaker: String,
    pub content: String,
}

/// One entry of the dialogue log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueEntry {
    pub seq: u64,
    pub speaker: String,
    pub content: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub quote: Option<QuoteRef>,
    #[serde(default)]
    pub revoked: bool,
}

/// An established fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub text: String,
    pub category: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blackboard {
    dialogue: Vec<DialogueEntry>,
    facts: Vec<Fact>,
    next_seq: u64,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a plain line. Returns its sequence number.
    pub fn add_dialogue(&mut self, speaker: impl Into<String>, content: impl Into<String>) -> u64 {
        self.push_entry(speaker, content, None, None)
    }

    /// Append a line with its side annotations. Returns its sequence number.
    pub fn push_entry(
        &mut self,
        speaker: impl Into<String>,
        content: impl Into<String>,
        action: Option<String>,
        quote: Option<QuoteRef>,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.dialogue.push(DialogueEntry {
            seq,
            speaker: speaker.into(),
            content: content.into(),
            action,
            quote,
            revoked: false,
        });
        seq
    }

    /// Withdraw the speaker's latest visible line. Returns its sequence number.
    pub fn revoke_last(&mut self, speaker: &str) -> Option<u64> {
        let entry = self
            .dialogue
            .iter_mut()
            .rev()
            .find(|e| !e.revoked && e.speaker == speaker)?;
        entry.revoked = true;
        Some(entry.seq)
    }

    /// The last `n` visible entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<&DialogueEntry> {
        let mut entries: Vec<&DialogueEntry> =
            self.visible().rev().take(n).collect();
        entries.reverse();
        entries
    }

    /// The last `n` visible entries as `Speaker: line` text.
    pub fn recent_text(&self, n: usize) -> String {
        self.recent(n)
            .iter()
            .map(|e| format!("{}: {}", e.speaker, e.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The speaker's latest visible line.
    pub fn last_by(&self, speaker: &str) -> Option<&DialogueEntry> {
        self.visible().rev().find(|e| e.speaker == speaker)
    }

    /// Visible entries with a sequence number at or after `seq`.
    pub fn since(&self, seq: u64) -> Vec<&DialogueEntry> {
        self.visible().filter(|e| e.seq >= seq).collect()
    }

    /// Every entry, revoked ones included.
    pub fn entries(&self) -> &[DialogueEntry] {
        &self.dialogue
    }

    pub fn visible_len(&self) -> usize {
        self.visible().count()
    }

    /// Sequence number the next entry will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn visible(&self) -> impl DoubleEndedIterator<Item = &DialogueEntry> {
        self.dialogue.iter().filter(|e| !e.revoked)
    }

    /// Whether `content` repeats one of the last `window` visible lines.
    ///
    /// This is a heuristic: lines are compared after normalization (case,
    /// whitespace and punctuation dropped); equal lines match, and so does
    /// containment when the shorter side has at least `min_len` characters.
    pub fn is_near_duplicate(&self, content: &str, window: usize, min_len: usize) -> bool {
        let candidate = normalize(content);
        if candidate.is_empty() {
            return false;
        }
        let candidate_len = candidate.chars().count();

        self.recent(window).iter().any(|entry| {
            let existing = normalize(&entry.content);
            if existing.is_empty() {
                return false;
            }
            if existing == candidate {
                return true;
            }
            let existing_len = existing.chars().count();
            let (short, long, short_len) = if candidate_len <= existing_len {
                (&candidate, &existing, candidate_len)
            } else {
                (&existing, &candidate, existing_len)
            };
            short_len >= min_len && long.contains(short.as_str())
        })
    }

    /// Record a fact. Returns false when the exact text is already known.
    pub fn add_fact(&mut self, text: impl Into<String>, category: impl Into<String>) -> bool {
        let text = text.into();
        if text.trim().is_empty() || self.facts.iter().any(|f| f.text == text) {
            return false;
        }
        self.facts.push(Fact {
            text,
            category: category.into(),
        });
        true
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Numbered fact list for prompts.
    pub fn render_facts(&self) -> String {
        if self.facts.is_empty() {
            return "No established facts yet.".to_string();
        }
        self.facts
            .iter()
            .enumerate()
            .map(|(i, f)| format!("{}. [{}] {}", i + 1, f.category.to_uppercase(), f.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
