//! Definition-driven simulation.
//!
//! Turns a loaded [`MachineDefinition`](crate::config::MachineDefinition)
//! into a running [`StateMachine`](crate::fsm::StateMachine) over a
//! [`SimContext`] of named flags, with [`ScriptedState`]s whose lifecycle
//! timing and failures come from the file.

mod builder;
mod context;
mod runner;
mod scripted;

pub use builder::build_machine;
pub use context::SimContext;
pub use runner::Simulation;
pub use scripted::ScriptedState;
