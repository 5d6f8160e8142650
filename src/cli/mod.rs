//! Command-line interface for the `tickstate` binary.

pub mod args;
pub mod commands;
