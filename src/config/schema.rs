//! Machine definition schema.
//!
//! These types are deserialized from YAML. Durations stay as strings
//! (`"50ms"`, `"2s"`) until validation, so every bad value is reported with
//! its path instead of failing deserialization on the first one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Default tick period when `machine.tick_rate` is omitted.
pub const DEFAULT_TICK_RATE: &str = "50ms";

// ============================================================================
// Top-Level Definition
// ============================================================================

/// Root of a machine definition file.
///
/// ```yaml
/// machine:
///   name: boss
///   default_state: intro
///   tick_rate: 50ms
/// states:
///   - id: intro
///     enter_ticks: 3
///   - id: fight
/// transitions:
///   - from: intro
///     to: fight
///     event: doors_closed
/// script:
///   - tick: 1
///     trigger: doors_closed
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineDefinition {
    /// Machine metadata (required)
    pub machine: MachineSection,

    /// States in registration order
    #[serde(default)]
    pub states: Vec<StateDefinition>,

    /// Transitions in registration order
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,

    /// Actions applied at given ticks
    #[serde(default)]
    pub script: Vec<ScriptStep>,
}

/// Machine metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineSection {
    /// Machine name, used in logs, metrics and events
    pub name: String,

    /// State entered on start; defaults to the first state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_state: Option<String>,

    /// Tick period, e.g. `"16ms"`
    #[serde(default = "default_tick_rate")]
    pub tick_rate: String,

    /// Number of state changes kept in the history ring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<usize>,

    /// Start the machine before the first tick
    #[serde(default = "default_true")]
    pub autostart: bool,
}

fn default_tick_rate() -> String {
    DEFAULT_TICK_RATE.to_string()
}

const fn default_true() -> bool {
    true
}

// ============================================================================
// States
// ============================================================================

/// A scripted state: its async enter/exit take a fixed number of ticks and
/// its lifecycle can be made to fail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateDefinition {
    /// Unique state id
    pub id: String,

    /// Ticks the async enter suspends for
    #[serde(default)]
    pub enter_ticks: u32,

    /// Ticks the async exit suspends for
    #[serde(default)]
    pub exit_ticks: u32,

    /// Make enter (sync and async) fail
    #[serde(default)]
    pub fail_on_enter: bool,

    /// Make exit (sync and async) fail
    #[serde(default)]
    pub fail_on_exit: bool,

    /// Logged at info level when the state finishes entering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// Transitions
// ============================================================================

/// A guarded edge.
///
/// The guard is built from the optional fields:
/// - `event` alone: a one-shot event transition;
/// - `flag` alone: a predicate transition on a named flag;
/// - `after` (optionally with `flag`): a condition list, all of which must
///   hold.
///
/// A transition with none of them can never fire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionDefinition {
    /// Source state id
    pub from: String,

    /// Destination state id
    pub to: String,

    /// Event consumed to fire the transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Named flag that must be set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<String>,

    /// Negates the flag check
    #[serde(default)]
    pub invert: bool,

    /// Minimum time spent in the source state, e.g. `"2s"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    /// Informational priority
    #[serde(default)]
    pub priority: i32,

    /// Whether the transition starts enabled
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// ============================================================================
// Script
// ============================================================================

/// One scripted action. Exactly one action field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptStep {
    /// Tick (1-based) before which the action is applied
    pub tick: u64,

    /// Trigger a named event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,

    /// Set or clear named flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_flag: Option<BTreeMap<String, bool>>,

    /// Force a transition through the sync pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<String>,

    /// Force a transition through the async pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_async: Option<String>,

    /// Stop the machine (`stop: true`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,

    /// Start the machine in the named state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
}

impl ScriptStep {
    /// Number of action fields set.
    #[must_use]
    pub fn action_count(&self) -> usize {
        [
            self.trigger.is_some(),
            self.set_flag.is_some(),
            self.force.is_some(),
            self.force_async.is_some(),
            self.stop.is_some(),
            self.start.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }
}
