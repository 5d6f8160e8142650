mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::{CallLog, Recorder, take_calls};
use tickstate::fsm::{MachineConfig, MachineEvent, StateMachine, Transition};
use tokio::sync::mpsc::UnboundedReceiver;

const DT: Duration = Duration::from_millis(16);

fn drain(rx: &mut UnboundedReceiver<MachineEvent>) -> Vec<MachineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn state_changes(events: &[MachineEvent]) -> Vec<(Option<String>, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            MachineEvent::StateChanged { from, to } => Some((
                from.as_ref().map(ToString::to_string),
                to.to_string(),
            )),
            _ => None,
        })
        .collect()
}

fn active_states<C: Send + Sync + 'static>(machine: &StateMachine<C>) -> Vec<String> {
    machine
        .states()
        .filter(|s| s.is_active)
        .map(|s| s.id.to_string())
        .collect()
}

// ============================================================================
// Event scenario
// ============================================================================

#[test]
fn event_transition_fires_once_with_single_notification() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("ab"), ());
    machine.add_state("A", Recorder::new("A", &log));
    machine.add_state("B", Recorder::new("B", &log));
    machine.add_event_transition("A", "B", "go", 0).unwrap();
    let mut rx = machine.subscribe();

    machine.start(Some("A")).unwrap();
    assert_eq!(machine.current_state().unwrap(), "A");
    drain(&mut rx);

    machine.trigger_event("go");
    machine.tick(DT);

    assert_eq!(machine.current_state().unwrap(), "B");
    assert_eq!(machine.previous_state().unwrap(), "A");
    assert!(!machine.is_event_triggered("go"));

    let events = drain(&mut rx);
    assert_eq!(
        state_changes(&events),
        [(Some("A".to_string()), "B".to_string())]
    );
    assert_eq!(
        events.iter().map(MachineEvent::name).collect::<Vec<_>>(),
        [
            "TransitionStarted",
            "StateExited",
            "StateEntered",
            "StateChanged",
            "TransitionCompleted"
        ]
    );
    assert_eq!(
        take_calls(&log),
        ["A.enter_async", "A.exit_async", "B.enter_async"]
    );

    // Consumed: further ticks do nothing.
    machine.tick(DT);
    assert!(drain(&mut rx).is_empty());
}

// ============================================================================
// Predicate scenario
// ============================================================================

#[test]
fn predicate_transition_fires_exactly_once() {
    let log = CallLog::default();
    let dead = Arc::new(AtomicBool::new(false));
    let mut machine = StateMachine::new(MachineConfig::new("grunt"), ());
    machine.add_state("Idle", Recorder::new("Idle", &log));
    machine.add_state("Attack", Recorder::new("Attack", &log));
    let flag = Arc::clone(&dead);
    machine
        .add_transition(Transition::when("Idle", "Attack", move || {
            flag.load(Ordering::SeqCst)
        }))
        .unwrap();
    let mut rx = machine.subscribe();

    machine.start(None).unwrap();
    drain(&mut rx);

    for _ in 0..10 {
        machine.tick(DT);
    }
    assert_eq!(machine.current_state().unwrap(), "Idle");
    assert!(drain(&mut rx).is_empty());

    dead.store(true, Ordering::SeqCst);
    for _ in 0..10 {
        machine.tick(DT);
    }
    assert_eq!(machine.current_state().unwrap(), "Attack");
    assert_eq!(state_changes(&drain(&mut rx)).len(), 1);
}

// ============================================================================
// Scan order, gating, empty conditions
// ============================================================================

#[test]
fn later_registered_transition_wins_tie() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("tie"), ());
    for id in ["A", "B", "C"] {
        machine.add_state(id, Recorder::new(id, &log));
    }
    machine
        .add_transition(Transition::when("A", "B", || true).with_priority(100))
        .unwrap();
    machine
        .add_transition(Transition::when("A", "C", || true))
        .unwrap();

    machine.start(Some("A")).unwrap();
    machine.tick(DT);
    assert_eq!(machine.current_state().unwrap(), "C");
}

#[test]
fn empty_condition_transition_never_fires() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("empty"), ());
    machine.add_state("A", Recorder::new("A", &log));
    machine.add_state("B", Recorder::new("B", &log));
    machine.add_transition(Transition::new("A", "B")).unwrap();

    machine.start(Some("A")).unwrap();
    for _ in 0..5 {
        machine.tick(DT);
    }
    assert_eq!(machine.current_state().unwrap(), "A");
    assert!(!machine.can_transition_to("B"));
    assert!(!machine.try_transition_to("B"));
}

#[test]
fn transition_from_inactive_state_is_gated() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("gate"), ());
    for id in ["A", "B", "C"] {
        machine.add_state(id, Recorder::new(id, &log));
    }
    machine
        .add_transition(Transition::when("B", "C", || true))
        .unwrap();

    machine.start(Some("A")).unwrap();
    for _ in 0..5 {
        machine.tick(DT);
    }
    assert_eq!(machine.current_state().unwrap(), "A");
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn one_trigger_satisfies_one_transition() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("oneshot"), ());
    for id in ["A", "B", "C"] {
        machine.add_state(id, Recorder::new(id, &log));
    }
    machine.add_event_transition("A", "B", "hit", 0).unwrap();
    machine.add_event_transition("B", "C", "hit", 0).unwrap();

    machine.start(Some("A")).unwrap();
    machine.trigger_event("hit");
    machine.tick(DT);
    machine.tick(DT);
    machine.tick(DT);
    assert_eq!(machine.current_state().unwrap(), "B");

    machine.trigger_event("hit");
    assert!(machine.can_transition_to("C"));
    assert!(machine.try_transition_to("C"));
    assert!(!machine.is_event_triggered("hit"));
    assert_eq!(machine.current_state().unwrap(), "C");
}

// ============================================================================
// Async pipeline and pre-emption
// ============================================================================

#[test]
fn async_exit_and_enter_span_ticks() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("slow"), ());
    machine.add_state("A", Recorder::new("A", &log).with_exit_ticks(1));
    machine.add_state("B", Recorder::new("B", &log).with_enter_ticks(2));
    machine.add_event_transition("A", "B", "go", 0).unwrap();

    machine.start(Some("A")).unwrap();
    take_calls(&log);

    machine.trigger_event("go");
    machine.tick(DT);
    assert!(machine.is_transitioning());
    assert!(active_states(&machine).is_empty());

    machine.tick(DT);
    assert_eq!(take_calls(&log), ["A.exit_async"]);
    assert_eq!(machine.current_state().unwrap(), "B");
    assert!(machine.is_transitioning());

    machine.tick(DT);
    machine.tick(DT);
    assert!(!machine.is_transitioning());
    assert_eq!(take_calls(&log), ["B.enter_async"]);
    assert_eq!(active_states(&machine), ["B"]);
}

#[test]
fn sync_force_cancels_async_transition() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("force"), ());
    machine.add_state("A", Recorder::new("A", &log));
    machine.add_state("B", Recorder::new("B", &log).with_enter_ticks(5));
    machine.add_state("C", Recorder::new("C", &log));
    machine.add_event_transition("A", "B", "go", 0).unwrap();
    let mut rx = machine.subscribe();

    machine.start(Some("A")).unwrap();
    machine.trigger_event("go");
    machine.tick(DT);
    assert!(machine.is_transitioning());
    drain(&mut rx);
    take_calls(&log);

    machine.force_transition_to("C").unwrap();

    assert!(!machine.is_transitioning());
    assert_eq!(machine.current_state().unwrap(), "C");
    assert_eq!(active_states(&machine), ["C"]);
    assert_eq!(machine.previous_state().unwrap(), "B");
    // B's enter was cut short; it is exited synchronously before C enters.
    assert_eq!(take_calls(&log), ["B.exit", "C.enter"]);

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(MachineEvent::TransitionCancelled { .. })
    ));
    assert_eq!(
        state_changes(&events),
        [(Some("B".to_string()), "C".to_string())]
    );
}

// ============================================================================
// Stop and removal
// ============================================================================

#[test]
fn stop_is_idempotent() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("stop"), ());
    machine.add_state("A", Recorder::new("A", &log));
    let mut rx = machine.subscribe();

    machine.start(None).unwrap();
    machine.stop();
    machine.stop();

    let stopped = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, MachineEvent::Stopped))
        .count();
    assert_eq!(stopped, 1);
    assert!(!machine.is_running());
    assert!(machine.current_state().is_none());
    assert!(active_states(&machine).is_empty());
}

#[test]
fn removing_active_state_stops_and_cascades() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("remove"), ());
    for id in ["A", "B", "C"] {
        machine.add_state(id, Recorder::new(id, &log));
    }
    machine.add_event_transition("A", "B", "x", 0).unwrap();
    machine.add_event_transition("B", "A", "y", 0).unwrap();
    machine.add_event_transition("B", "C", "z", 0).unwrap();
    machine.add_event_transition("C", "B", "w", 0).unwrap();

    machine.start(Some("A")).unwrap();
    assert!(machine.remove_state("A"));

    assert!(!machine.is_running());
    assert!(!machine.has_state("A"));
    let remaining: Vec<_> = machine
        .transitions()
        .iter()
        .map(|t| (t.from().to_string(), t.to().to_string()))
        .collect();
    assert_eq!(
        remaining,
        [
            ("B".to_string(), "C".to_string()),
            ("C".to_string(), "B".to_string())
        ]
    );
    assert!(!machine.remove_state("A"));
}

// ============================================================================
// Faults
// ============================================================================

#[test]
fn unknown_start_state_is_rejected_without_side_effects() {
    let log = CallLog::default();
    let mut machine = StateMachine::new(MachineConfig::new("typo"), ());
    machine.add_state("attack", Recorder::new("attack", &log));

    let err = machine.start(Some("atack")).unwrap_err();
    assert!(err.to_string().contains("did you mean 'attack'"));
    assert!(!machine.is_running());
    assert!(take_calls(&log).is_empty());
}
