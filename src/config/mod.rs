//! Machine definition files.
//!
//! `tickstate run` and `tickstate validate` read a YAML
//! [`MachineDefinition`]: machine metadata, scripted states, transitions and
//! a tick script.

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{ConfigLimits, ConfigLoader, LoadResult, LoadWarning};
pub use schema::*;
pub use validation::{ValidationResult, Validator};
