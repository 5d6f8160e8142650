//! Tick-by-tick driver for a machine definition and its script.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::schema::{MachineDefinition, ScriptStep};
use crate::config::validation::parse_duration;
use crate::error::{ConfigError, MachineError, TickstateError};
use crate::fsm::{MachineEvent, StateMachine};

use super::builder::build_machine;
use super::context::SimContext;

/// A built machine plus the script that drives it.
///
/// [`step`](Self::step) applies every script action due on the next tick,
/// then ticks the machine once with the definition's tick rate as `dt`.
pub struct Simulation {
    machine: StateMachine<SimContext>,
    script: Vec<ScriptStep>,
    cursor: usize,
    tick_rate: Duration,
    autostart: bool,
    events: mpsc::UnboundedReceiver<MachineEvent>,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("machine", &self.machine)
            .field("cursor", &self.cursor)
            .field("steps", &self.script.len())
            .field("tick_rate", &self.tick_rate)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Builds the machine and orders the script by tick. File order is kept
    /// for steps sharing a tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the tick rate does not parse or the machine
    /// cannot be built.
    pub fn new(definition: &MachineDefinition) -> Result<Self, TickstateError> {
        let tick_rate = parse_duration(&definition.machine.tick_rate)
            .filter(|rate| !rate.is_zero())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "machine.tick_rate".to_string(),
                value: definition.machine.tick_rate.clone(),
                expected: "a positive duration such as '16ms'".to_string(),
            })?;

        let mut machine = build_machine(definition)?;
        let events = machine.subscribe();

        let mut script = definition.script.clone();
        script.sort_by_key(|step| step.tick);

        Ok(Self {
            machine,
            script,
            cursor: 0,
            tick_rate,
            autostart: definition.machine.autostart,
            events,
        })
    }

    /// Starts the machine if the definition asks for it.
    ///
    /// # Errors
    ///
    /// Propagates [`StateMachine::start`] errors.
    pub fn start(&mut self) -> Result<(), MachineError> {
        if self.autostart {
            self.machine.start(None)?;
        }
        Ok(())
    }

    /// Runs one tick and returns its number (1-based).
    pub fn step(&mut self) -> u64 {
        let tick = self.machine.tick_count() + 1;
        while let Some(step) = self.script.get(self.cursor).filter(|s| s.tick <= tick) {
            apply(&mut self.machine, step, tick);
            self.cursor += 1;
        }
        self.machine.tick(self.tick_rate);
        tick
    }

    /// Collects the notifications emitted since the last call.
    pub fn drain_events(&mut self) -> Vec<MachineEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Returns `true` once the machine is stopped with nothing in flight
    /// and no script steps left.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.machine.is_running()
            && !self.machine.is_transitioning()
            && self.cursor >= self.script.len()
    }

    /// Script steps not yet applied.
    #[must_use]
    pub fn pending_steps(&self) -> usize {
        self.script.len() - self.cursor
    }

    /// Period between ticks.
    #[must_use]
    pub const fn tick_rate(&self) -> Duration {
        self.tick_rate
    }

    /// The simulated machine.
    #[must_use]
    pub const fn machine(&self) -> &StateMachine<SimContext> {
        &self.machine
    }

    /// Mutable access for callers that drive the machine directly.
    pub const fn machine_mut(&mut self) -> &mut StateMachine<SimContext> {
        &mut self.machine
    }
}

fn apply(machine: &mut StateMachine<SimContext>, step: &ScriptStep, tick: u64) {
    debug!(machine = %machine.name(), tick, "applying script step");

    if let Some(event) = &step.trigger {
        machine.trigger_event(event);
    }
    if let Some(flags) = &step.set_flag {
        for (name, value) in flags {
            machine.context().set_flag(name, *value);
        }
    }
    if let Some(target) = &step.force
        && let Err(e) = machine.force_transition_to(target)
    {
        warn!(tick, target = %target, error = %e, "scripted force failed");
    }
    if let Some(target) = &step.force_async
        && let Err(e) = machine.force_transition_to_async(target)
    {
        warn!(tick, target = %target, error = %e, "scripted async force failed");
    }
    if step.stop == Some(true) {
        machine.stop();
    }
    if let Some(initial) = &step.start
        && let Err(e) = machine.start(Some(initial))
    {
        warn!(tick, state = %initial, error = %e, "scripted start failed");
    }
}
