//! Scene scheduling tests.
//!
//! These run whole performances against mock performers with no pacing
//! delays, so they are fast and need no API key.

use stage_core::actor::ActorDecision;
use stage_core::broadcast::StageEvent;
use stage_core::script::{EventPlan, ScriptEvent};
use stage_core::testing::{
    call_log, spoken_by, FixedAnalyst, MockPerformer, RecordingAdaptation, TestHarness,
};
use std::sync::Arc;
use std::time::Duration;

fn drain(events: &mut tokio::sync::broadcast::Receiver<StageEvent>) -> Vec<StageEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn directions(events: &[StageEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StageEvent::StageDirection { content } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_all_pass_ends_on_cold_field() {
    let actors: Vec<MockPerformer> = ["Alice", "Bob", "Carol"]
        .into_iter()
        .map(MockPerformer::silent)
        .collect();
    let mut harness = TestHarness::new()
        .with_event(ScriptEvent::new("Dinner", "An awkward dinner").with_max_turns(9));
    for actor in &actors {
        harness = harness.with_performer(actor.clone());
    }
    let mut stage = harness.build();
    let mut events = stage.subscribe();

    let report = stage.run().await;
    assert!(report.completed);
    assert_eq!(report.scenes_concluded, 1);

    let total_calls: usize = actors.iter().map(|a| a.calls()).sum();
    assert_eq!(total_calls, 3, "scene should end after three silent turns");

    let ended = directions(&drain(&mut events));
    assert!(ended.iter().any(|d| d.contains("conversation went cold")));
}

#[tokio::test]
async fn test_monopoly_cap_skips_repeat_speaker() {
    let log = call_log();
    let mut stage = TestHarness::new()
        .with_config(|c| c.with_monopoly_cap(2))
        .with_event(ScriptEvent::new("Lecture", "Alice will not stop talking").with_max_turns(20))
        .with_performer(MockPerformer::chatty("Alice").with_log(log.clone()))
        .with_performer(MockPerformer::silent("Bob").with_log(log.clone()))
        .with_performer(MockPerformer::silent("Carol").with_log(log.clone()))
        .build();

    stage.run().await;

    let order = log.lock().unwrap().clone();
    assert_eq!(
        order,
        vec!["Alice", "Bob", "Carol", "Alice", "Bob", "Carol", "Bob"],
        "Alice should be skipped after two consecutive lines"
    );
    assert_eq!(spoken_by(&stage), vec!["Alice", "Alice"]);
}

#[tokio::test]
async fn test_near_duplicate_counts_as_pass() {
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Treasure", "Where is the gold?").with_max_turns(6))
        .with_performer(MockPerformer::scripted(
            "Alice",
            vec![ActorDecision::speak("The treasure is buried under the old oak tree")],
        ))
        .with_performer(MockPerformer::scripted(
            "Bob",
            vec![ActorDecision::speak("the treasure is buried under the OLD oak tree!")],
        ))
        .build();

    stage.run().await;
    assert_eq!(spoken_by(&stage), vec!["Alice"]);
}

#[tokio::test]
async fn test_reluctant_short_reply_is_a_pass() {
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Quiet", "Nobody wants to talk").with_max_turns(4))
        .with_performer(MockPerformer::scripted(
            "Alice",
            vec![ActorDecision::speak("Um").with_willingness(1)],
        ))
        .with_performer(MockPerformer::silent("Bob"))
        .build();

    stage.run().await;
    assert!(spoken_by(&stage).is_empty());
}

#[tokio::test]
async fn test_explicit_end_beats_turn_limit() {
    let bob = MockPerformer::chatty("Bob");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Deal", "Close the deal").with_max_turns(10))
        .with_performer(MockPerformer::scripted(
            "Alice",
            vec![ActorDecision::speak("Deal. Shake on it.").finished()],
        ))
        .with_performer(bob.clone())
        .build();
    let mut events = stage.subscribe();

    stage.run().await;
    assert_eq!(bob.calls(), 0);
    assert!(directions(&drain(&mut events))
        .iter()
        .any(|d| d.contains("goal reached")));
}

#[tokio::test]
async fn test_participants_limit_the_scene() {
    let bob = MockPerformer::chatty("Bob");
    let mut stage = TestHarness::new()
        .with_event(
            ScriptEvent::new("Private talk", "Alice and Carol whisper")
                .with_participants::<Vec<String>, String>(vec!["Alice".into(), "Carol".into(), "Nobody".into()])
                .with_max_turns(4),
        )
        .with_performer(MockPerformer::chatty("Alice"))
        .with_performer(bob.clone())
        .with_performer(MockPerformer::chatty("Carol"))
        .build();

    stage.run().await;
    assert_eq!(bob.calls(), 0);
    assert_eq!(spoken_by(&stage), vec!["Alice", "Carol", "Alice", "Carol"]);
}

#[tokio::test]
async fn test_injection_reaches_target_before_their_turn() {
    let alice = MockPerformer::chatty("Alice");
    let bob = MockPerformer::chatty("Bob");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Search", "Looking for the key").with_max_turns(4))
        .with_performer(alice.clone())
        .with_performer(bob.clone())
        .build();

    stage
        .handle()
        .inject("You suddenly remember the key is under the mat", Some("Bob"));
    stage.run().await;

    let bob_contexts = bob.contexts();
    assert!(bob_contexts[0].memory.contains("key is under the mat"));
    // Consumed by Bob's first turn.
    assert!(!bob_contexts[1].memory.contains("key is under the mat"));
    assert!(alice.contexts().iter().all(|c| !c.memory.contains("key is under the mat")));
}

#[tokio::test]
async fn test_global_injection_is_announced_to_everyone() {
    let alice = MockPerformer::chatty("Alice");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Storm", "A quiet evening").with_max_turns(2))
        .with_performer(alice.clone())
        .with_performer(MockPerformer::chatty("Bob"))
        .build();
    let mut events = stage.subscribe();

    stage.handle().inject("Thunder shakes the house", None);
    stage.run().await;

    let first = &alice.contexts()[0];
    assert!(first
        .history
        .iter()
        .any(|line| line.content.contains("Thunder shakes the house")));
    assert!(directions(&drain(&mut events))
        .iter()
        .any(|d| d.contains("Thunder shakes the house")));
}

#[tokio::test]
async fn test_adaptation_called_once_with_original_plan() {
    let adaptation = Arc::new(RecordingAdaptation::replacing(EventPlan {
        time: "Midnight".into(),
        event: "The lights go out".into(),
        goal: "Find out who cut the power".into(),
    }));
    let carol = MockPerformer::chatty("Carol");
    let mut stage = TestHarness::new()
        .with_adaptation(adaptation.clone())
        .with_deps(|d| d.with_analyst(Arc::new(FixedAnalyst::new("Alice accused Bob of theft"))))
        .with_event(ScriptEvent::new("Dinner", "Dinner is served").with_max_turns(2))
        .with_event(
            ScriptEvent::new("Dessert", "Dessert arrives")
                .with_timeline("21:00")
                .with_goal("Finish eating")
                .with_max_turns(2),
        )
        .with_performer(MockPerformer::chatty("Alice"))
        .with_performer(carol.clone())
        .build();

    let report = stage.run().await;
    assert_eq!(report.scenes_concluded, 2);

    let calls = adaptation.calls();
    assert_eq!(calls.len(), 1, "only the event after scene one has a successor");
    assert!(calls[0].0.contains("Alice accused Bob of theft"));
    assert_eq!(
        calls[0].1,
        EventPlan {
            time: "21:00".into(),
            event: "Dessert".into(),
            goal: "Finish eating".into(),
        }
    );

    let next = &stage.script()[1];
    assert_eq!(next.title, "The lights go out");
    assert_eq!(next.timeline, "Midnight");
    assert_eq!(carol.last_context().unwrap().scene.description, "The lights go out");
}

#[tokio::test]
async fn test_failed_adaptation_keeps_plan() {
    let mut stage = TestHarness::new()
        .with_adaptation(Arc::new(RecordingAdaptation::failing()))
        .with_event(ScriptEvent::new("One", "first").with_max_turns(1))
        .with_event(ScriptEvent::new("Two", "second").with_max_turns(1))
        .with_performer(MockPerformer::chatty("Alice"))
        .build();
    let mut events = stage.subscribe();

    let report = stage.run().await;
    assert!(report.completed);
    assert_eq!(stage.script()[1].title, "Two");
    assert!(drain(&mut events).iter().any(|e| matches!(
        e,
        StageEvent::System { content } if content.contains("original plan")
    )));
}

#[tokio::test]
async fn test_scene_summary_lands_in_facts_and_memory() {
    let mut stage = TestHarness::new()
        .with_deps(|d| d.with_analyst(Arc::new(FixedAnalyst::new("The vase was broken"))))
        .with_event(ScriptEvent::new("Accident", "Something falls").with_max_turns(2))
        .with_performer(MockPerformer::chatty("Alice"))
        .with_performer(MockPerformer::chatty("Bob"))
        .build();

    stage.run().await;

    let facts = stage.blackboard().facts();
    assert!(facts
        .iter()
        .any(|f| f.category == "story_summary" && f.text == "The vase was broken"));
    assert_eq!(
        stage.memory("Bob").unwrap().long_term(),
        ["The vase was broken".to_string()]
    );
}

#[tokio::test]
async fn test_short_term_memory_is_bounded() {
    let mut stage = TestHarness::new()
        .with_config(|c| c.with_short_term_capacity(3))
        .with_event(ScriptEvent::new("Chatter", "Endless small talk").with_max_turns(10))
        .with_performer(MockPerformer::chatty("Alice"))
        .with_performer(MockPerformer::chatty("Bob"))
        .build();

    stage.run().await;
    let memory = stage.memory("Alice").unwrap();
    assert_eq!(memory.short_term_len(), 3);
    assert!(memory.short_term().all(|m| m.starts_with("You said:")));
}

#[tokio::test]
async fn test_markers_quote_and_recall() {
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Argument", "A heated exchange").with_max_turns(4))
        .with_performer(MockPerformer::scripted(
            "Alice",
            vec![
                ActorDecision::speak("You never listen to me"),
                ActorDecision::speak("[RECALL] Sorry, I didn't mean that"),
            ],
        ))
        .with_performer(MockPerformer::scripted(
            "Bob",
            vec![ActorDecision::speak("[QUOTE:Alice] That is simply untrue")],
        ))
        .build();
    let mut events = stage.subscribe();

    stage.run().await;

    let visible: Vec<_> = stage
        .blackboard()
        .entries()
        .iter()
        .filter(|e| !e.revoked)
        .collect();
    assert_eq!(visible.len(), 2);
    assert_eq!(visible[0].speaker, "Bob");
    assert_eq!(
        visible[0].quote.as_ref().map(|q| q.content.as_str()),
        Some("You never listen to me")
    );
    assert_eq!(visible[1].content, "Sorry, I didn't mean that");

    assert!(drain(&mut events)
        .iter()
        .any(|e| matches!(e, StageEvent::Revoke { actor, .. } if actor == "Alice")));
}

#[tokio::test]
async fn test_stop_discards_in_flight_reply() {
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Slow", "Someone is thinking hard"))
        .with_performer(
            MockPerformer::scripted("Alice", vec![ActorDecision::speak("This line never lands")])
                .with_delay(Duration::from_millis(200)),
        )
        .build();
    let mut events = stage.subscribe();
    let (handle, task) = stage.spawn();

    loop {
        match events.recv().await {
            Ok(StageEvent::Thinking { .. }) => break,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended: {e}"),
        }
    }
    handle.stop();

    let (stage, report) = task.await.unwrap();
    assert!(!report.completed);
    assert_eq!(stage.blackboard().visible_len(), 0);
    assert!(handle.is_stopped());
}

#[tokio::test]
async fn test_stop_does_not_wait_for_a_slow_performer() {
    let stage = TestHarness::new()
        .with_event(ScriptEvent::new("Slow", "Someone is thinking very hard"))
        .with_performer(MockPerformer::chatty("Alice").with_delay(Duration::from_secs(30)))
        .build();
    let mut events = stage.subscribe();
    let (handle, task) = stage.spawn();

    while !matches!(events.recv().await, Ok(StageEvent::Thinking { .. })) {}
    handle.stop();

    let (stage, report) = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("stage ignored the stop")
        .unwrap();
    assert!(!report.completed);
    assert_eq!(stage.blackboard().visible_len(), 0);
}

#[tokio::test]
async fn test_stop_during_scene_analysis_commits_nothing() {
    let stage = TestHarness::new()
        .with_deps(|d| {
            d.with_analyst(Arc::new(
                FixedAnalyst::new("Alice confessed").with_delay(Duration::from_millis(300)),
            ))
        })
        .with_event(ScriptEvent::new("Confession", "Alice has something to say").with_max_turns(1))
        .with_performer(MockPerformer::scripted(
            "Alice",
            vec![ActorDecision::speak("It was me all along")],
        ))
        .build();
    let (handle, task) = stage.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    let (stage, report) = task.await.unwrap();
    assert!(!report.completed);
    assert_eq!(report.scenes_concluded, 0);
    assert!(stage.blackboard().facts().is_empty());
    assert!(stage.memory("Alice").unwrap().long_term().is_empty());
}

#[tokio::test]
async fn test_stop_during_adaptation_keeps_plan() {
    let adaptation = Arc::new(
        RecordingAdaptation::replacing(EventPlan {
            time: "Dawn".into(),
            event: "The police arrive".into(),
            goal: "Explain everything".into(),
        })
        .with_delay(Duration::from_millis(300)),
    );
    let stage = TestHarness::new()
        .with_adaptation(adaptation.clone())
        .with_event(ScriptEvent::new("Night", "A quiet night").with_max_turns(1))
        .with_event(ScriptEvent::new("Morning", "Breakfast").with_timeline("08:00"))
        .with_performer(MockPerformer::chatty("Alice"))
        .build();
    let (handle, task) = stage.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.stop();

    let (stage, report) = task.await.unwrap();
    assert_eq!(adaptation.calls().len(), 1);
    assert_eq!(report.scenes_concluded, 0);
    assert_eq!(stage.script()[1].title, "Morning");
    assert_eq!(stage.script()[1].timeline, "08:00");
}

#[tokio::test]
async fn test_pause_blocks_until_resume() {
    let alice = MockPerformer::chatty("Alice").with_delay(Duration::from_millis(20));
    let stage = TestHarness::new()
        .with_event(ScriptEvent::new("Marathon", "A very long talk").with_max_turns(1000))
        .with_performer(alice.clone())
        .with_performer(MockPerformer::chatty("Bob").with_delay(Duration::from_millis(20)))
        .build();
    let (handle, task) = stage.spawn();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.pause();
    assert!(!handle.status().is_playing);

    // Let any in-flight turn finish, then nothing else may start.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let paused_calls = alice.calls();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(alice.calls(), paused_calls);

    handle.resume();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(alice.calls() > paused_calls);

    handle.stop();
    let (_stage, report) = task.await.unwrap();
    assert!(!report.completed);
}

#[tokio::test]
async fn test_jump_interrupts_and_moves_on() {
    let log = call_log();
    let stage = TestHarness::new()
        .with_event(ScriptEvent::new("Long", "Goes on and on").with_max_turns(1000))
        .with_event(ScriptEvent::new("Skipped", "Never played").with_max_turns(2))
        .with_event(ScriptEvent::new("Finale", "The end").with_max_turns(2))
        .with_performer(
            MockPerformer::chatty("Alice")
                .with_delay(Duration::from_millis(10))
                .with_log(log.clone()),
        )
        .with_performer(MockPerformer::chatty("Bob").with_log(log.clone()))
        .build();
    let mut events = stage.subscribe();
    let (handle, task) = stage.spawn();

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.jump(2).unwrap();

    let (stage, report) = task.await.unwrap();
    assert!(report.completed);
    assert_eq!(report.scenes_concluded, 1, "only the finale concludes");
    assert_eq!(stage.current_index(), 3);

    let notices: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            StageEvent::System { content } => Some(content),
            _ => None,
        })
        .collect();
    assert!(notices.iter().any(|n| n.contains("Jumping to event 3")));
}
