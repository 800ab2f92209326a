//! Rendering stage events for the terminal.

use stage_core::StageEvent;

/// One event as display lines. `None` for events not worth showing.
pub fn render(event: &StageEvent) -> Option<String> {
    let text = match event {
        StageEvent::System { content } => format!("[SYSTEM] {content}"),
        StageEvent::StageDirection { content } => format!("[STAGE] {content}"),
        StageEvent::Dialogue {
            actor,
            content,
            action,
            quote,
            ..
        } => {
            let mut out = String::new();
            if let Some(quote) = quote {
                out.push_str(&format!("  > {}: {}\n", quote.speaker, quote.content));
            }
            out.push_str(&format!("{actor}: {content}"));
            if let Some(action) = action {
                out.push_str(&format!(" *{action}*"));
            }
            out
        }
        StageEvent::Thinking { .. } => return None,
        StageEvent::Revoke { seq, actor } => format!("[REVOKED] {actor} withdrew line #{seq}"),
        StageEvent::Nudge { actor, target } => format!("[NUDGE] {actor} nudges {target}"),
        StageEvent::ScenarioStatus {
            is_playing,
            current_index,
            total_events,
        } => format!(
            "[STATUS] {} at event {}/{}",
            if *is_playing { "playing" } else { "paused" },
            (*current_index + 1).min(*total_events),
            total_events
        ),
    };
    Some(text)
}

/// One event as a JSON line.
pub fn render_json(event: &StageEvent) -> Option<String> {
    serde_json::to_string(event).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stage_core::state::QuoteRef;

    #[test]
    fn test_render_dialogue_with_quote_and_action() {
        let event = StageEvent::Dialogue {
            seq: 4,
            actor: "Bob".into(),
            content: "That's not what happened".into(),
            action: Some("slams the table".into()),
            quote: Some(QuoteRef {
                speaker: "Alice".into(),
                content: "You took it".into(),
            }),
        };
        assert_eq!(
            render(&event).unwrap(),
            "  > Alice: You took it\nBob: That's not what happened *slams the table*"
        );
    }

    #[test]
    fn test_thinking_hidden() {
        assert!(render(&StageEvent::Thinking { actor: "Bob".into() }).is_none());
    }

    #[test]
    fn test_json_has_type_tag() {
        let line = render_json(&StageEvent::system("hello")).unwrap();
        assert!(line.contains(r#""type":"system""#));
    }
}
