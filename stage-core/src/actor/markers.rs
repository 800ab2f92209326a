//! Inline side-action markers inside spoken content.
//!
//! Actors may embed `[QUOTE:Name]`, `[RECALL]` or `[NUDGE:Name]` in a line.
//! Markers are stripped from the displayed text and returned as separate
//! actions. A marker pointing at the speaker or at someone not in the cast is
//! dropped, leaving plain dialogue.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

lazy_static! {
    static ref TARGETED_MARKER: Regex =
        Regex::new(r"(?i)\[(QUOTE|NUDGE)\s*:\s*([^\]]+?)\s*\]").unwrap();
    static ref RECALL_MARKER: Regex = Regex::new(r"(?i)\[RECALL\]").unwrap();
    static ref SPACES: Regex = Regex::new(r"[ \t]{2,}").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideAction {
    /// Reply to the target's latest line.
    Quote { target: String },
    /// Withdraw the speaker's previous line.
    Recall,
    /// Poke another actor.
    Nudge { target: String },
}

/// Content with its markers separated out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkedContent {
    pub text: String,
    pub actions: Vec<SideAction>,
}

/// Split `content` into display text and side actions.
pub fn extract_markers(content: &str, speaker: &str, cast: &[String]) -> MarkedContent {
    let mut actions = Vec::new();

    for caps in TARGETED_MARKER.captures_iter(content) {
        let kind = caps[1].to_uppercase();
        let target = caps[2].trim();

        if target.eq_ignore_ascii_case(speaker) {
            warn!(speaker, marker = %kind, "Dropping self-targeted marker");
            continue;
        }
        let Some(known) = cast.iter().find(|name| name.eq_ignore_ascii_case(target)) else {
            warn!(speaker, marker = %kind, unknown = target, "Dropping marker for unknown actor");
            continue;
        };

        let action = if kind == "QUOTE" {
            SideAction::Quote {
                target: known.clone(),
            }
        } else {
            SideAction::Nudge {
                target: known.clone(),
            }
        };
        if !actions.contains(&action) {
            actions.push(action);
        }
    }

    if RECALL_MARKER.is_match(content) {
        actions.push(SideAction::Recall);
    }

    let stripped = TARGETED_MARKER.replace_all(content, "");
    let stripped = RECALL_MARKER.replace_all(&stripped, "");
    let text = SPACES.replace_all(stripped.trim(), " ").to_string();

    MarkedContent { text, actions }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast() -> Vec<String> {
        vec!["Alice".into(), "Bob".into(), "Cara".into()]
    }

    #[test]
    fn test_plain_content_untouched() {
        let marked = extract_markers("Nothing special here.", "Alice", &cast());
        assert_eq!(marked.text, "Nothing special here.");
        assert!(marked.actions.is_empty());
    }

    #[test]
    fn test_quote_and_nudge() {
        let marked = extract_markers("[QUOTE:Bob] You said that yesterday. [nudge: cara]", "Alice", &cast());
        assert_eq!(marked.text, "You said that yesterday.");
        assert_eq!(
            marked.actions,
            vec![
                SideAction::Quote { target: "Bob".into() },
                SideAction::Nudge { target: "Cara".into() },
            ]
        );
    }

    #[test]
    fn test_recall() {
        let marked = extract_markers("[RECALL] Sorry, wrong chat", "Bob", &cast());
        assert_eq!(marked.text, "Sorry, wrong chat");
        assert_eq!(marked.actions, vec![SideAction::Recall]);
    }

    #[test]
    fn test_self_quote_becomes_plain_text() {
        let marked = extract_markers("[QUOTE:Alice] As I said before", "Alice", &cast());
        assert_eq!(marked.text, "As I said before");
        assert!(marked.actions.is_empty());
    }

    #[test]
    fn test_unknown_target_dropped() {
        let marked = extract_markers("Hey [NUDGE:Zed]  wake up", "Alice", &cast());
        assert_eq!(marked.text, "Hey wake up");
        assert!(marked.actions.is_empty());
    }
}
