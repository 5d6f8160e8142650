//! Builds a [`StateMachine`] from a [`MachineDefinition`].

use std::sync::Arc;

use tracing::debug;

use crate::config::schema::{MachineDefinition, TransitionDefinition};
use crate::config::validation::parse_duration;
use crate::error::{ConfigError, TickstateError};
use crate::fsm::{Condition, MachineConfig, StateMachine, Transition};

use super::context::SimContext;
use super::scripted::ScriptedState;

/// Registers every state and transition of `definition`, in file order,
/// on a stopped machine.
///
/// # Errors
///
/// Returns a [`ConfigError`] for an unparseable `after` duration and a
/// [`crate::error::MachineError`] for a transition endpoint that names no
/// state. Both are caught earlier by validation for loaded files.
pub fn build_machine(
    definition: &MachineDefinition,
) -> Result<StateMachine<SimContext>, TickstateError> {
    let section = &definition.machine;
    let mut config = MachineConfig::new(section.name.as_str());
    if let Some(default) = &section.default_state {
        config = config.with_default_state(default.as_str());
    }
    if let Some(limit) = section.history {
        config = config.with_history_limit(limit);
    }

    let ctx = Arc::new(SimContext::new());
    let mut machine = StateMachine::with_shared_context(config, Arc::clone(&ctx));

    for state in &definition.states {
        machine.add_state(state.id.as_str(), ScriptedState::from(state));
    }

    for (i, def) in definition.transitions.iter().enumerate() {
        let transition = build_transition(def, &ctx)
            .map_err(|expected| ConfigError::InvalidValue {
                field: format!("transitions[{i}].after"),
                value: def.after.clone().unwrap_or_default(),
                expected,
            })?
            .with_priority(def.priority);
        let id = machine.add_transition(transition)?;
        if !def.enabled {
            machine.set_transition_enabled(id, false);
        }
    }

    debug!(
        machine = %section.name,
        states = definition.states.len(),
        transitions = definition.transitions.len(),
        "machine built"
    );
    Ok(machine)
}

fn build_transition(
    def: &TransitionDefinition,
    ctx: &Arc<SimContext>,
) -> Result<Transition<SimContext>, String> {
    let from = def.from.as_str();
    let to = def.to.as_str();

    if let Some(event) = &def.event {
        return Ok(Transition::on_event(from, to, event.as_str()));
    }

    match (&def.flag, &def.after) {
        (Some(flag), None) => {
            let ctx = Arc::clone(ctx);
            let flag = flag.clone();
            let invert = def.invert;
            Ok(Transition::when(from, to, move || ctx.flag(&flag) != invert))
        }
        (flag, Some(after)) => {
            let duration =
                parse_duration(after).ok_or_else(|| "a duration such as '2s'".to_string())?;
            let mut transition = Transition::new(from, to)
                .with_condition(Condition::elapsed("after", duration));
            if let Some(flag) = flag {
                let ctx = Arc::clone(ctx);
                let name = flag.clone();
                let mut condition = Condition::predicate(flag.as_str(), move || ctx.flag(&name));
                if def.invert {
                    condition = condition.inverted();
                }
                transition = transition.with_condition(condition);
            }
            Ok(transition)
        }
        (None, None) => Ok(Transition::new(from, to)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{MachineSection, StateDefinition};
    use crate::fsm::Guard;

    fn definition(transitions: Vec<TransitionDefinition>) -> MachineDefinition {
        MachineDefinition {
            machine: MachineSection {
                name: "boss".to_string(),
                default_state: Some("b".to_string()),
                tick_rate: "16ms".to_string(),
                history: Some(4),
                autostart: true,
            },
            states: ["a", "b"]
                .into_iter()
                .map(|id| StateDefinition {
                    id: id.to_string(),
                    ..StateDefinition::default()
                })
                .collect(),
            transitions,
            script: Vec::new(),
        }
    }

    fn edge() -> TransitionDefinition {
        TransitionDefinition {
            from: "a".to_string(),
            to: "b".to_string(),
            enabled: true,
            ..TransitionDefinition::default()
        }
    }

    #[test]
    fn test_build_registers_states_in_order() {
        let machine = build_machine(&definition(Vec::new())).unwrap();
        let ids: Vec<_> = machine.states().map(|s| s.id).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(machine.name(), "boss");
    }

    #[test]
    fn test_build_maps_guards() {
        let machine = build_machine(&definition(vec![
            TransitionDefinition {
                event: Some("go".to_string()),
                ..edge()
            },
            TransitionDefinition {
                flag: Some("armed".to_string()),
                ..edge()
            },
            TransitionDefinition {
                flag: Some("armed".to_string()),
                after: Some("1s".to_string()),
                ..edge()
            },
        ]))
        .unwrap();

        let transitions = machine.transitions();
        assert!(matches!(transitions[0].guard(), Guard::Event(name) if name == "go"));
        assert!(matches!(transitions[1].guard(), Guard::Predicate(_)));
        assert!(matches!(transitions[2].guard(), Guard::AllConditions));
        assert_eq!(transitions[2].conditions().len(), 2);
    }

    #[test]
    fn test_build_flag_predicate_reads_context() {
        let machine = build_machine(&definition(vec![TransitionDefinition {
            flag: Some("armed".to_string()),
            invert: true,
            ..edge()
        }]))
        .unwrap();

        let events = machine.event_triggers();
        let transition = &machine.transitions()[0];
        assert!(transition.is_satisfied(machine.context(), &events));
        machine.context().set_flag("armed", true);
        assert!(!transition.is_satisfied(machine.context(), &events));
    }

    #[test]
    fn test_build_honors_disabled_and_priority() {
        let machine = build_machine(&definition(vec![TransitionDefinition {
            event: Some("go".to_string()),
            enabled: false,
            priority: 7,
            ..edge()
        }]))
        .unwrap();
        let transition = &machine.transitions()[0];
        assert!(!transition.is_enabled());
        assert_eq!(transition.priority(), 7);
    }

    #[test]
    fn test_build_rejects_unknown_endpoint() {
        let result = build_machine(&definition(vec![TransitionDefinition {
            to: "c".to_string(),
            event: Some("go".to_string()),
            ..edge()
        }]));
        assert!(matches!(result, Err(TickstateError::Machine(_))));
    }

    #[test]
    fn test_build_rejects_bad_duration() {
        let result = build_machine(&definition(vec![TransitionDefinition {
            after: Some("soon".to_string()),
            ..edge()
        }]));
        assert!(matches!(result, Err(TickstateError::Config(_))));
    }
}
