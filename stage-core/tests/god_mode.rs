//! God-Mode and persistence integration tests.

use stage_core::god_mode::GodAction;
use stage_core::persist::{EventKind, JsonlPersistence, PerformanceStatus};
use stage_core::script::ScriptEvent;
use stage_core::testing::{MockPerformer, RecordingPersistence, TestHarness};
use stage_core::StageEvent;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_time_travel_rewrites_current_event() {
    let alice = MockPerformer::chatty("Alice");
    let mut stage = TestHarness::new()
        .with_event(
            ScriptEvent::new("Breakfast", "Morning coffee")
                .with_timeline("08:00")
                .with_max_turns(2),
        )
        .with_performer(alice.clone())
        .build();

    stage.handle().time_travel("Ten years later");
    stage.run().await;

    assert_eq!(stage.script()[0].timeline, "Ten years later");
    assert_eq!(alice.contexts()[0].scene.timeline, "Ten years later");
}

#[tokio::test]
async fn test_added_fact_is_shown_to_actors() {
    let alice = MockPerformer::chatty("Alice");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Trial", "The court is in session").with_max_turns(1))
        .with_performer(alice.clone())
        .build();

    stage.handle().add_fact("The defendant has a twin", "plot");
    stage.run().await;

    assert!(alice.contexts()[0]
        .facts
        .contains("[PLOT] The defendant has a twin"));
}

#[tokio::test]
async fn test_structured_action() {
    let alice = MockPerformer::chatty("Alice");
    let bob = MockPerformer::chatty("Bob");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Heist", "Planning the job").with_max_turns(2))
        .with_performer(alice.clone())
        .with_performer(bob.clone())
        .build();

    stage.handle().inject_action(
        GodAction::announcement("Sirens wail in the distance")
            .with_instruction("Bob", "Panic and suggest calling it off")
            .with_memory("Alice", "You tipped off the police"),
    );
    stage.run().await;

    let alice_view = &alice.contexts()[0];
    assert!(alice_view.memory.contains("You tipped off the police"));
    assert!(!alice_view.memory.contains("Panic"));
    assert!(alice_view
        .history
        .iter()
        .any(|l| l.content == "Sirens wail in the distance"));

    assert!(bob.contexts()[0]
        .memory
        .contains("Panic and suggest calling it off"));
}

#[tokio::test]
async fn test_instruction_for_unknown_actor_goes_global() {
    let alice = MockPerformer::chatty("Alice");
    let mut stage = TestHarness::new()
        .with_event(ScriptEvent::new("Scene", "Anything").with_max_turns(1))
        .with_performer(alice.clone())
        .build();

    stage
        .handle()
        .inject_action(GodAction::default().with_instruction("Ghost", "Rattle the chains"));
    stage.run().await;

    assert!(alice.contexts()[0]
        .history
        .iter()
        .any(|l| l.content.contains("Rattle the chains")));
}

#[tokio::test]
async fn test_pause_and_resume_publish_status() {
    let stage = TestHarness::new()
        .with_event(ScriptEvent::new("Scene", "Anything"))
        .build();
    let handle = stage.handle();
    let mut events = handle.subscribe();

    handle.pause();
    handle.pause();
    handle.resume();

    let statuses: Vec<bool> = std::iter::from_fn(|| events.try_recv().ok())
        .filter_map(|e| match e {
            StageEvent::ScenarioStatus { is_playing, .. } => Some(is_playing),
            _ => None,
        })
        .collect();
    assert_eq!(statuses, vec![false, true], "repeated pause is a no-op");
    assert_eq!(handle.status().total_events, 1);
}

#[tokio::test]
async fn test_god_mode_events_are_logged() {
    let persistence = Arc::new(RecordingPersistence::new());
    let mut stage = TestHarness::new()
        .with_persistence(persistence.clone())
        .with_event(ScriptEvent::new("Scene", "Anything").with_max_turns(1))
        .with_performer(MockPerformer::chatty("Alice"))
        .build();

    let handle = stage.handle();
    handle.inject("A cat walks in", None);
    handle.time_travel("Dusk");
    handle.add_fact("Cats are sacred here", "world");
    stage.run().await;

    assert_eq!(persistence.records_of(EventKind::GodInject).len(), 1);
    assert_eq!(persistence.records_of(EventKind::TimeTravel).len(), 1);
    assert_eq!(persistence.records_of(EventKind::Fact).len(), 1);
    assert_eq!(persistence.records_of(EventKind::SceneEnd).len(), 1);
}

#[tokio::test]
async fn test_jsonl_log_of_a_full_run() {
    let dir = TempDir::new().unwrap();
    let persistence = Arc::new(JsonlPersistence::new(dir.path()));
    let mut stage = TestHarness::new()
        .with_persistence(persistence.clone())
        .with_event(ScriptEvent::new("Opening", "The curtain rises").with_max_turns(2))
        .with_performer(MockPerformer::chatty("Alice"))
        .with_performer(MockPerformer::chatty("Bob"))
        .build();

    let report = stage.run().await;
    assert!(report.completed);

    let id = stage.performance_id().unwrap().to_string();
    let meta = persistence.load_meta(&id).await.unwrap();
    assert_eq!(meta.status, PerformanceStatus::Completed);

    let events = persistence.read_events(&id).await.unwrap();
    let dialogue: Vec<_> = events
        .iter()
        .filter(|e| e.record.kind == EventKind::Dialogue)
        .collect();
    assert_eq!(dialogue.len(), 2);
    assert_eq!(dialogue[0].record.actor.as_deref(), Some("Alice"));

    let alice = persistence.load_actor_state(&id, "Alice").await.unwrap();
    assert_eq!(alice.owner, "Alice");
    assert!(!alice.long_term.is_empty(), "scene summary saved after the scene");
}
