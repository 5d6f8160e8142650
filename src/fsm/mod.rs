//! Tick-driven finite state machine engine.
//!
//! Game content registers [`State`]s and guarded [`Transition`]s on a
//! [`StateMachine`] and calls [`StateMachine::tick`] once per frame. The
//! machine keeps exactly one state active and runs enter/exit logic either
//! synchronously (forced transitions) or as futures that may suspend across
//! ticks (start, automatic and async-forced transitions).

mod condition;
mod events;
mod history;
mod machine;
mod notify;
mod state;
mod tick;
mod transition;

pub use crate::error::StateError;
pub use condition::{Condition, Elapsed, Evaluate, Predicate};
pub use events::EventTriggers;
pub use history::StateChange;
pub use machine::{DEFAULT_HISTORY_LIMIT, MachineConfig, StateMachine};
pub use notify::{MachineEvent, Pipeline, TransitionRef};
pub use state::{State, StateId, StateInfo};
pub use tick::{NextTick, next_tick, wait_ticks};
pub use transition::{Guard, Transition, TransitionId};

pub(crate) use machine::suggest_state;
