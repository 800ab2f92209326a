//! Turning raw model replies into [`ActorDecision`]s.
//!
//! Strategies are tried in a fixed order and the first that yields content
//! wins:
//! 1. structured JSON (fenced or embedded, lightly repaired if broken)
//! 2. tagged text (`[THOUGHT]: ... [WILLINGNESS]: n [CONTENT]: ...`)
//! 3. salvage of a `"content"` field from JSON too broken to repair
//! 4. the raw reply itself
//!
//! Parsing never fails; an empty reply becomes a pass.

use super::decision::{clamp_willingness, ActorDecision, DEFAULT_WILLINGNESS};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref THOUGHT_TAG: Regex = Regex::new(r"(?s)\[THOUGHT\]:\s*(.*?)\s*(?:\[|\z)").unwrap();
    static ref WILLINGNESS_TAG: Regex = Regex::new(r"\[WILLINGNESS\]:\s*(-?\d+)").unwrap();
    static ref CONTENT_TAG: Regex =
        Regex::new(r"(?s)\[CONTENT\]:\s*(.*?)\s*(?:\[ACTION\]:|\z)").unwrap();
    static ref ACTION_TAG: Regex = Regex::new(r"(?s)\[ACTION\]:\s*(.*?)\s*\z").unwrap();
    static ref SALVAGE_CONTENT: Regex =
        Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)"?"#).unwrap();
    static ref SALVAGE_WILLINGNESS: Regex =
        Regex::new(r#""willingness"\s*:\s*"?(-?\d+)"#).unwrap();
    static ref SALVAGE_THOUGHT: Regex =
        Regex::new(r#""thought"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap();
}

/// Which strategy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Structured,
    Tagged,
    Salvaged,
    Raw,
    Empty,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionParser;

impl DecisionParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, reply: &str) -> ActorDecision {
        self.parse_with_strategy(reply).0
    }

    pub fn parse_with_strategy(&self, reply: &str) -> (ActorDecision, ParseStrategy) {
        let reply = reply.trim();
        if reply.is_empty() {
            return (ActorDecision::pass(), ParseStrategy::Empty);
        }

        if let Some(decision) = parse_structured(reply) {
            return (decision, ParseStrategy::Structured);
        }
        if let Some(decision) = parse_tagged(reply) {
            return (decision, ParseStrategy::Tagged);
        }
        if let Some(decision) = salvage(reply) {
            return (decision, ParseStrategy::Salvaged);
        }

        (ActorDecision::speak(reply), ParseStrategy::Raw)
    }
}

fn parse_structured(reply: &str) -> Option<ActorDecision> {
    let json = extract_json(reply)?;
    let value: Value = serde_json::from_str(json)
        .or_else(|_| serde_json::from_str(&repair_json(json)))
        .ok()?;
    decision_from_value(&value)
}

fn decision_from_value(value: &Value) -> Option<ActorDecision> {
    let obj = value.as_object()?;
    let content = match obj.get("content")? {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };

    let willingness = obj
        .get("willingness")
        .and_then(|w| match w {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        })
        .map(clamp_willingness)
        .unwrap_or(DEFAULT_WILLINGNESS);

    let thought = obj
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    let action = obj
        .get("action")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let is_finished = match obj.get("is_finished") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };

    if content.is_empty() {
        return Some(ActorDecision {
            is_finished,
            ..ActorDecision::pass().with_thought(thought)
        });
    }

    Some(ActorDecision {
        thought,
        willingness,
        content,
        action,
        is_finished,
    })
}

fn parse_tagged(reply: &str) -> Option<ActorDecision> {
    let thought_match = THOUGHT_TAG.captures(reply);
    let willingness_match = WILLINGNESS_TAG.captures(reply);
    let content_match = CONTENT_TAG.captures(reply);

    if thought_match.is_none() && willingness_match.is_none() && content_match.is_none() {
        return None;
    }

    let thought = thought_match
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let willingness = willingness_match
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(clamp_willingness)
        .unwrap_or(DEFAULT_WILLINGNESS);

    let content = match content_match.and_then(|c| c.get(1)) {
        Some(m) => m.as_str().trim().to_string(),
        // No content tag: whatever is left once the other tags are removed.
        None => {
            let without_thought = THOUGHT_TAG.replace(reply, "[");
            let without_tags = WILLINGNESS_TAG.replace(&without_thought, "");
            without_tags.trim_matches(|c: char| c == '[' || c.is_whitespace()).to_string()
        }
    };

    let action = ACTION_TAG
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|a| !a.is_empty());

    if content.is_empty() {
        return Some(ActorDecision::pass().with_thought(thought));
    }

    Some(ActorDecision {
        thought,
        willingness,
        content,
        action,
        is_finished: false,
    })
}

fn salvage(reply: &str) -> Option<ActorDecision> {
    if !reply.contains('{') {
        return None;
    }
    let raw_content = SALVAGE_CONTENT.captures(reply)?.get(1)?.as_str();
    let content = unescape(raw_content).trim().to_string();
    if content.is_empty() {
        return None;
    }

    let willingness = SALVAGE_WILLINGNESS
        .captures(reply)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .map(clamp_willingness)
        .unwrap_or(DEFAULT_WILLINGNESS);

    let thought = SALVAGE_THOUGHT
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
        .unwrap_or_default();

    Some(ActorDecision {
        thought,
        willingness,
        content,
        action: None,
        is_finished: false,
    })
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.replace("\\\"", "\""))
}

/// Extract a JSON object from a reply that may wrap it in markdown or prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let after = &text[start + 7..];
        let end = after.find("```").unwrap_or(after.len());
        return Some(after[..end].trim());
    }

    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    let start = text.find('{')?;
    match text.rfind('}') {
        Some(end) if end > start => Some(&text[start..=end]),
        // Truncated object; repair may still close it.
        _ => Some(&text[start..]),
    }
}

/// Best-effort repair of truncated JSON: closes an open string, drops a
/// dangling comma and closes unbalanced braces and brackets.
pub fn repair_json(text: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }

    let mut repaired = text.to_string();
    if in_string {
        if escaped {
            repaired.pop();
        }
        repaired.push('"');
    }

    let trimmed_len = repaired.trim_end().len();
    repaired.truncate(trimmed_len);
    if repaired.ends_with(',') {
        repaired.pop();
    } else if repaired.ends_with(':') {
        repaired.push_str("null");
    }

    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    repaired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::decision::PASS_MARKER;

    fn parse(reply: &str) -> (ActorDecision, ParseStrategy) {
        DecisionParser::new().parse_with_strategy(reply)
    }

    #[test]
    fn test_structured_json() {
        let (d, strategy) = parse(
            r#"{"thought": "She is lying", "willingness": 8, "content": "I don't believe you.", "action": "crosses arms", "is_finished": false}"#,
        );
        assert_eq!(strategy, ParseStrategy::Structured);
        assert_eq!(d.thought, "She is lying");
        assert_eq!(d.willingness, 8);
        assert_eq!(d.content, "I don't believe you.");
        assert_eq!(d.action.as_deref(), Some("crosses arms"));
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let reply = "Sure, here it is:\n```json\n{\"content\": \"Hello\", \"willingness\": \"6\"}\n```\nHope that helps";
        let (d, strategy) = parse(reply);
        assert_eq!(strategy, ParseStrategy::Structured);
        assert_eq!(d.content, "Hello");
        assert_eq!(d.willingness, 6);
    }

    #[test]
    fn test_truncated_json_is_repaired() {
        let (d, strategy) = parse(r#"{"thought": "hmm", "willingness": 7, "content": "Wait for me"#);
        assert_eq!(strategy, ParseStrategy::Structured);
        assert_eq!(d.content, "Wait for me");
        assert_eq!(d.willingness, 7);
    }

    #[test]
    fn test_willingness_out_of_range() {
        let (d, _) = parse(r#"{"content": "loud", "willingness": 99}"#);
        assert_eq!(d.willingness, 10);
        let (d, _) = parse(r#"{"content": "quiet", "willingness": -5}"#);
        assert_eq!(d.willingness, 0);
    }

    #[test]
    fn test_structured_empty_content_is_pass() {
        let (d, _) = parse(r#"{"thought": "nothing to add", "content": ""}"#);
        assert!(d.has_pass_marker());
        assert_eq!(d.thought, "nothing to add");
    }

    #[test]
    fn test_tagged_text() {
        let reply = "[THOUGHT]: I should warn them\n[WILLINGNESS]: 9\n[CONTENT]: Run! [QUOTE:Bob] now!\n[ACTION]: points at the door";
        let (d, strategy) = parse(reply);
        assert_eq!(strategy, ParseStrategy::Tagged);
        assert_eq!(d.thought, "I should warn them");
        assert_eq!(d.willingness, 9);
        assert_eq!(d.content, "Run! [QUOTE:Bob] now!");
        assert_eq!(d.action.as_deref(), Some("points at the door"));
    }

    #[test]
    fn test_tagged_without_content_tag() {
        let (d, strategy) = parse("[THOUGHT]: tired [WILLINGNESS]: 3 fine, whatever");
        assert_eq!(strategy, ParseStrategy::Tagged);
        assert_eq!(d.willingness, 3);
        assert_eq!(d.content, "fine, whatever");
    }

    #[test]
    fn test_tagged_missing_willingness_defaults() {
        let (d, _) = parse("[CONTENT]: Good morning");
        assert_eq!(d.willingness, DEFAULT_WILLINGNESS);
        assert_eq!(d.content, "Good morning");
    }

    #[test]
    fn test_salvage_from_broken_json() {
        let reply = r#"{"thought": "ok" "willingness": 5, "content": "Salvaged \"line\"", oops}"#;
        let (d, strategy) = parse(reply);
        assert_eq!(strategy, ParseStrategy::Salvaged);
        assert_eq!(d.content, "Salvaged \"line\"");
        assert_eq!(d.willingness, 5);
    }

    #[test]
    fn test_raw_fallback() {
        let (d, strategy) = parse("  Just a plain line.  ");
        assert_eq!(strategy, ParseStrategy::Raw);
        assert_eq!(d.content, "Just a plain line.");
        assert_eq!(d.willingness, DEFAULT_WILLINGNESS);
    }

    #[test]
    fn test_empty_reply_is_pass() {
        let (d, strategy) = parse("   ");
        assert_eq!(strategy, ParseStrategy::Empty);
        assert_eq!(d.content, PASS_MARKER);
        assert_eq!(d.willingness, 0);
    }

    #[test]
    fn test_extract_json() {
        assert_eq!(extract_json("x {\"a\": 1} y"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("```\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_json("no json"), None);
    }

    #[test]
    fn test_repair_json() {
        assert_eq!(repair_json(r#"{"a": "b"#), r#"{"a": "b"}"#);
        assert_eq!(repair_json(r#"{"a": [1, 2,"#), r#"{"a": [1, 2]}"#);
        assert_eq!(repair_json(r#"{"a":"#), r#"{"a":null}"#);
        assert_eq!(repair_json(r#"{"a": "}"}"#), r#"{"a": "}"}"#);
    }
}
