//! Per-machine notifications.
//!
//! Observers obtain an unbounded receiver from
//! [`StateMachine::subscribe`](super::StateMachine::subscribe). Closed
//! receivers are pruned on the next emit.

use serde::Serialize;
use tokio::sync::mpsc;

use super::state::StateId;
use super::transition::TransitionId;

/// Which execution path carried out a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Exit and enter completed inside one call
    Sync,
    /// Exit and enter may have suspended across ticks
    Async,
}

impl Pipeline {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Async => "async",
        }
    }
}

/// Identifies a transition in progress.
///
/// Forced transitions and `start` have no registered transition behind
/// them, so `id` is `None`; `start` also has no source state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRef {
    /// Registered transition, if the change came from the scan
    pub id: Option<TransitionId>,
    /// Source state
    pub from: Option<StateId>,
    /// Destination state
    pub to: StateId,
    /// Execution path
    pub pipeline: Pipeline,
}

impl TransitionRef {
    pub(crate) const fn forced(from: Option<StateId>, to: StateId, pipeline: Pipeline) -> Self {
        Self {
            id: None,
            from,
            to,
            pipeline,
        }
    }
}

/// Machine activity delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum MachineEvent {
    /// `start` accepted; entering `state`
    Started {
        /// Initial state
        state: StateId,
    },
    /// `stop` accepted
    Stopped,
    /// A state's enter logic completed
    StateEntered {
        /// Entered state
        state: StateId,
    },
    /// A state's exit logic completed
    StateExited {
        /// Exited state
        state: StateId,
    },
    /// The current state changed; fires after the new state entered
    StateChanged {
        /// Previous state, `None` on start
        from: Option<StateId>,
        /// New current state
        to: StateId,
    },
    /// A transition began
    TransitionStarted {
        /// Transition in progress
        transition: TransitionRef,
    },
    /// A transition finished with the target entered
    TransitionCompleted {
        /// Finished transition
        transition: TransitionRef,
    },
    /// A transition was cancelled before it finished
    TransitionCancelled {
        /// Abandoned transition
        transition: TransitionRef,
    },
    /// A lifecycle fault left the machine without a current state
    Halted {
        /// Faulting state
        state: StateId,
        /// Fault description
        reason: String,
    },
}

impl MachineEvent {
    /// Event name as it appears in the serialized `type` field.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "Started",
            Self::Stopped => "Stopped",
            Self::StateEntered { .. } => "StateEntered",
            Self::StateExited { .. } => "StateExited",
            Self::StateChanged { .. } => "StateChanged",
            Self::TransitionStarted { .. } => "TransitionStarted",
            Self::TransitionCompleted { .. } => "TransitionCompleted",
            Self::TransitionCancelled { .. } => "TransitionCancelled",
            Self::Halted { .. } => "Halted",
        }
    }
}

/// Fan-out list of observer channels.
#[derive(Debug, Default)]
pub(crate) struct Observers {
    senders: Vec<mpsc::UnboundedSender<MachineEvent>>,
}

impl Observers {
    pub(crate) fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MachineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.push(tx);
        rx
    }

    pub(crate) fn emit(&mut self, event: &MachineEvent) {
        self.senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn len(&self) -> usize {
        self.senders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let mut observers = Observers::default();
        let mut a = observers.subscribe();
        let mut b = observers.subscribe();

        observers.emit(&MachineEvent::Stopped);

        assert_eq!(a.try_recv().unwrap(), MachineEvent::Stopped);
        assert_eq!(b.try_recv().unwrap(), MachineEvent::Stopped);
    }

    #[test]
    fn test_closed_receivers_are_pruned() {
        let mut observers = Observers::default();
        let rx = observers.subscribe();
        let _keep = observers.subscribe();
        drop(rx);

        observers.emit(&MachineEvent::Stopped);
        assert_eq!(observers.len(), 1);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = MachineEvent::StateChanged {
            from: Some(StateId::new("a")),
            to: StateId::new("b"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["from"], "a");
        assert_eq!(json["to"], "b");
        assert_eq!(event.name(), "StateChanged");
    }

    #[test]
    fn test_transition_ref_serialization() {
        let event = MachineEvent::TransitionStarted {
            transition: TransitionRef::forced(None, StateId::new("intro"), Pipeline::Async),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["transition"]["to"], "intro");
        assert_eq!(json["transition"]["pipeline"], "async");
        assert!(json["transition"]["id"].is_null());
    }
}
