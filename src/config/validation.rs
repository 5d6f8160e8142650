//! Machine definition validation.
//!
//! Runs on the fully deserialized [`MachineDefinition`] and collects every
//! issue instead of stopping at the first, so a broken file is reported in
//! one pass.

use std::collections::HashSet;
use std::time::Duration;

use crate::config::loader::ConfigLimits;
use crate::config::schema::{MachineDefinition, ScriptStep, TransitionDefinition};
use crate::error::{Severity, ValidationIssue};
use crate::fsm::{StateId, suggest_state};

// ============================================================================
// Public API
// ============================================================================

/// Result of definition validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Definition validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a definition and returns every issue found.
    pub fn validate(
        &mut self,
        definition: &MachineDefinition,
        limits: &ConfigLimits,
    ) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        let known = self.validate_states(definition);

        self.validate_machine(definition, &known);
        for (i, transition) in definition.transitions.iter().enumerate() {
            self.validate_transition(transition, &format!("transitions[{i}]"), &known);
        }
        self.validate_script(definition, &known);
        self.validate_limits(definition, limits);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Machine & States
    // ========================================================================

    fn validate_machine(&mut self, definition: &MachineDefinition, known: &[StateId]) {
        let machine = &definition.machine;
        if machine.name.trim().is_empty() {
            self.add_error("machine.name", "Machine name is required and cannot be empty");
        }

        match parse_duration(&machine.tick_rate) {
            Some(rate) if rate.is_zero() => {
                self.add_error("machine.tick_rate", "Tick rate must be greater than zero");
            }
            Some(_) => {}
            None => self.add_error(
                "machine.tick_rate",
                &format!("Invalid duration '{}'", machine.tick_rate),
            ),
        }

        if machine.history == Some(0) {
            self.add_warning("machine.history", "History is disabled (limit 0)");
        }

        if let Some(default) = &machine.default_state {
            self.check_state_ref(default, "machine.default_state", known);
        }
    }

    /// Validates state entries and returns the distinct ids, in order.
    fn validate_states(&mut self, definition: &MachineDefinition) -> Vec<StateId> {
        if definition.states.is_empty() {
            self.add_error("states", "At least one state is required");
        }

        let mut seen = HashSet::new();
        let mut known = Vec::new();
        for (i, state) in definition.states.iter().enumerate() {
            let path = format!("states[{i}].id");
            if state.id.trim().is_empty() {
                self.add_error(&path, "State id cannot be empty");
                continue;
            }
            if !seen.insert(state.id.as_str()) {
                self.add_error(&path, &format!("Duplicate state id '{}'", state.id));
                continue;
            }
            known.push(StateId::new(state.id.as_str()));
        }
        known
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    fn validate_transition(
        &mut self,
        transition: &TransitionDefinition,
        path: &str,
        known: &[StateId],
    ) {
        self.check_state_ref(&transition.from, &format!("{path}.from"), known);
        self.check_state_ref(&transition.to, &format!("{path}.to"), known);

        if transition.event.is_some() && (transition.flag.is_some() || transition.after.is_some())
        {
            self.add_error(
                path,
                "An event transition cannot also use 'flag' or 'after'",
            );
        }

        if let Some(after) = &transition.after
            && parse_duration(after).is_none()
        {
            self.add_error(
                &format!("{path}.after"),
                &format!("Invalid duration '{after}'"),
            );
        }

        if transition.invert && transition.flag.is_none() {
            self.add_warning(
                &format!("{path}.invert"),
                "'invert' has no effect without 'flag'",
            );
        }

        if transition.event.is_none() && transition.flag.is_none() && transition.after.is_none() {
            self.add_warning(path, "Transition has no guard and can never fire");
        }
    }

    // ========================================================================
    // Script
    // ========================================================================

    fn validate_script(&mut self, definition: &MachineDefinition, known: &[StateId]) {
        let events: HashSet<&str> = definition
            .transitions
            .iter()
            .filter_map(|t| t.event.as_deref())
            .collect();
        let flags: HashSet<&str> = definition
            .transitions
            .iter()
            .filter_map(|t| t.flag.as_deref())
            .collect();

        let mut last_tick = 0;
        for (i, step) in definition.script.iter().enumerate() {
            let path = format!("script[{i}]");

            if step.tick == 0 {
                self.add_error(&format!("{path}.tick"), "Ticks are numbered from 1");
            }
            if step.tick < last_tick {
                self.add_warning(
                    &format!("{path}.tick"),
                    "Script steps are not in tick order; they run sorted by tick",
                );
            }
            last_tick = last_tick.max(step.tick);

            match step.action_count() {
                0 => self.add_error(&path, "Script step has no action"),
                1 => self.validate_step_action(step, &path, known, &events, &flags),
                n => self.add_error(
                    &path,
                    &format!("Script step has {n} actions; exactly one is allowed"),
                ),
            }
        }
    }

    fn validate_step_action(
        &mut self,
        step: &ScriptStep,
        path: &str,
        known: &[StateId],
        events: &HashSet<&str>,
        flags: &HashSet<&str>,
    ) {
        if let Some(event) = &step.trigger
            && !events.contains(event.as_str())
        {
            self.add_warning(
                &format!("{path}.trigger"),
                &format!("No transition listens for event '{event}'"),
            );
        }
        if let Some(set) = &step.set_flag {
            for flag in set.keys().filter(|f| !flags.contains(f.as_str())) {
                self.add_warning(
                    &format!("{path}.set_flag.{flag}"),
                    &format!("No transition checks flag '{flag}'"),
                );
            }
        }
        if step.stop == Some(false) {
            self.add_warning(&format!("{path}.stop"), "'stop: false' does nothing");
        }
        for (field, target) in [
            ("force", &step.force),
            ("force_async", &step.force_async),
            ("start", &step.start),
        ] {
            if let Some(target) = target {
                self.check_state_ref(target, &format!("{path}.{field}"), known);
            }
        }
    }

    // ========================================================================
    // Limits
    // ========================================================================

    fn validate_limits(&mut self, definition: &MachineDefinition, limits: &ConfigLimits) {
        let checks = [
            (
                "states",
                definition.states.len(),
                limits.max_states,
                "TICKSTATE_MAX_STATES",
            ),
            (
                "transitions",
                definition.transitions.len(),
                limits.max_transitions,
                "TICKSTATE_MAX_TRANSITIONS",
            ),
            (
                "script",
                definition.script.len(),
                limits.max_script_steps,
                "TICKSTATE_MAX_SCRIPT_STEPS",
            ),
        ];
        for (path, count, max, env) in checks {
            if count > max {
                self.add_error(
                    path,
                    &format!(
                        "Too many {path} entries: {count} (maximum: {max}). \
                         Set {env} to increase the limit."
                    ),
                );
            }
        }
    }

    // ========================================================================
    // Helper Methods
    // ========================================================================

    fn check_state_ref(&mut self, id: &str, path: &str, known: &[StateId]) {
        if known.iter().any(|k| k == id) {
            return;
        }
        let message = suggest_state(id, known).map_or_else(
            || format!("Unknown state '{id}'"),
            |s| format!("Unknown state '{id}' (did you mean '{s}'?)"),
        );
        self.add_error(path, &message);
    }

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}

/// Parses a human-readable duration such as `"16ms"` or `"2s"`.
#[must_use]
pub fn parse_duration(value: &str) -> Option<Duration> {
    humantime::parse_duration(value.trim()).ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{MachineSection, StateDefinition};
    use std::collections::BTreeMap;

    fn default_limits() -> ConfigLimits {
        ConfigLimits::default()
    }

    fn state(id: &str) -> StateDefinition {
        StateDefinition {
            id: id.to_string(),
            ..StateDefinition::default()
        }
    }

    fn event_transition(from: &str, to: &str, event: &str) -> TransitionDefinition {
        TransitionDefinition {
            from: from.to_string(),
            to: to.to_string(),
            event: Some(event.to_string()),
            enabled: true,
            ..TransitionDefinition::default()
        }
    }

    fn minimal_definition() -> MachineDefinition {
        MachineDefinition {
            machine: MachineSection {
                name: "boss".to_string(),
                default_state: None,
                tick_rate: "16ms".to_string(),
                history: None,
                autostart: true,
            },
            states: vec![state("intro"), state("attack")],
            transitions: vec![event_transition("intro", "attack", "go")],
            script: vec![ScriptStep {
                tick: 1,
                trigger: Some("go".to_string()),
                ..ScriptStep::default()
            }],
        }
    }

    fn validate(definition: &MachineDefinition) -> ValidationResult {
        Validator::new().validate(definition, &default_limits())
    }

    #[test]
    fn test_validate_minimal_definition() {
        let result = validate(&minimal_definition());
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty(), "{:?}", result.warnings);
    }

    #[test]
    fn test_validate_empty_name() {
        let mut def = minimal_definition();
        def.machine.name = "  ".to_string();
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "machine.name"));
    }

    #[test]
    fn test_validate_tick_rate() {
        let mut def = minimal_definition();
        def.machine.tick_rate = "fast".to_string();
        assert!(validate(&def).errors.iter().any(|e| e.path == "machine.tick_rate"));

        def.machine.tick_rate = "0ms".to_string();
        assert!(validate(&def).errors.iter().any(|e| e.path == "machine.tick_rate"));
    }

    #[test]
    fn test_validate_no_states() {
        let mut def = minimal_definition();
        def.states.clear();
        def.transitions.clear();
        def.script.clear();
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "states"));
    }

    #[test]
    fn test_validate_duplicate_state_ids() {
        let mut def = minimal_definition();
        def.states.push(state("intro"));
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "states[2].id"));
    }

    #[test]
    fn test_validate_unknown_endpoint_with_suggestion() {
        let mut def = minimal_definition();
        def.transitions[0].to = "atack".to_string();
        let result = validate(&def);
        let issue = result
            .errors
            .iter()
            .find(|e| e.path == "transitions[0].to")
            .unwrap();
        assert!(issue.message.contains("did you mean 'attack'"));
    }

    #[test]
    fn test_validate_unknown_default_state() {
        let mut def = minimal_definition();
        def.machine.default_state = Some("outro".to_string());
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "machine.default_state"));
    }

    #[test]
    fn test_validate_event_mixed_with_flag() {
        let mut def = minimal_definition();
        def.transitions[0].flag = Some("armed".to_string());
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "transitions[0]"));
    }

    #[test]
    fn test_validate_bad_after_duration() {
        let mut def = minimal_definition();
        def.transitions.push(TransitionDefinition {
            from: "attack".to_string(),
            to: "intro".to_string(),
            after: Some("soon".to_string()),
            enabled: true,
            ..TransitionDefinition::default()
        });
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "transitions[1].after"));
    }

    #[test]
    fn test_validate_unguarded_transition_warns() {
        let mut def = minimal_definition();
        def.transitions.push(TransitionDefinition {
            from: "attack".to_string(),
            to: "intro".to_string(),
            enabled: true,
            ..TransitionDefinition::default()
        });
        let result = validate(&def);
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.path == "transitions[1]"));
    }

    #[test]
    fn test_validate_script_step_action_count() {
        let mut def = minimal_definition();
        def.script.push(ScriptStep {
            tick: 2,
            ..ScriptStep::default()
        });
        def.script.push(ScriptStep {
            tick: 3,
            force: Some("intro".to_string()),
            stop: Some(true),
            ..ScriptStep::default()
        });
        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "script[1]"));
        assert!(result.errors.iter().any(|e| e.path == "script[2]"));
    }

    #[test]
    fn test_validate_script_targets_and_hints() {
        let mut def = minimal_definition();
        def.script.push(ScriptStep {
            tick: 2,
            force_async: Some("outro".to_string()),
            ..ScriptStep::default()
        });
        def.script.push(ScriptStep {
            tick: 3,
            trigger: Some("nobody_listens".to_string()),
            ..ScriptStep::default()
        });
        let mut flags = BTreeMap::new();
        flags.insert("unused".to_string(), true);
        def.script.push(ScriptStep {
            tick: 1,
            set_flag: Some(flags),
            ..ScriptStep::default()
        });

        let result = validate(&def);
        assert!(result.errors.iter().any(|e| e.path == "script[1].force_async"));
        assert!(result.warnings.iter().any(|w| w.path == "script[2].trigger"));
        assert!(result.warnings.iter().any(|w| w.path == "script[3].set_flag.unused"));
        assert!(result.warnings.iter().any(|w| w.path == "script[3].tick"));
    }

    #[test]
    fn test_validate_too_many_states() {
        let def = minimal_definition();
        let limits = ConfigLimits {
            max_states: 1,
            ..default_limits()
        };
        let result = Validator::new().validate(&def, &limits);
        assert!(result.errors.iter().any(|e| e.path == "states"));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut def = minimal_definition();
        def.machine.name = String::new();
        def.machine.tick_rate = "bogus".to_string();
        def.transitions[0].from = "nowhere".to_string();
        let result = validate(&def);
        assert!(result.errors.len() >= 3);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("16ms"), Some(Duration::from_millis(16)));
        assert_eq!(parse_duration(" 2s "), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("later"), None);
    }
}
