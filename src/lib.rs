//! `tickstate` - tick-driven finite state machine engine
//!
//! The [`fsm`] module is the engine: states with sync and async lifecycles,
//! guarded transitions, one-shot events and a [`fsm::StateMachine`] advanced
//! by [`fsm::StateMachine::tick`]. The remaining modules back the
//! `tickstate` binary, which loads YAML machine definitions and simulates
//! them.

pub mod cli;
pub mod config;
pub mod error;
pub mod fsm;
pub mod observability;
pub mod sim;
