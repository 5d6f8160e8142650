//! `tickstate run`: simulate a machine definition.

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::args::RunArgs;
use crate::config::ConfigLoader;
use crate::error::TickstateError;
use crate::fsm::MachineEvent;
use crate::observability::{EventEmitter, RunSummary, StopReason, init_metrics};
use crate::sim::Simulation;

/// Loads the definition and ticks it until the tick budget is spent, the
/// script leaves the machine stopped, or `cancel` fires.
///
/// # Errors
///
/// Returns an error if the definition fails to load, the event file
/// cannot be created, the metrics endpoint cannot bind, or the machine
/// cannot start.
pub async fn run(
    args: &RunArgs,
    quiet: bool,
    cancel: CancellationToken,
) -> Result<(), TickstateError> {
    if let Some(port) = args.metrics_port {
        init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    info!(definition = %args.file.display(), "loading definition");
    let loaded = ConfigLoader::with_defaults().load(&args.file)?;
    for warning in &loaded.warnings {
        warn!(
            location = warning.location.as_deref().unwrap_or("<unknown>"),
            "{}",
            warning.message
        );
    }
    let definition = loaded.definition;
    let name = definition.machine.name.as_str();

    let emitter = match &args.events {
        Some(path) if path.as_os_str() == "-" => EventEmitter::stdout(),
        Some(path) => EventEmitter::from_file(path)?,
        None => EventEmitter::noop(),
    };

    let mut sim = Simulation::new(&definition)?;
    let mut state_changes = 0;
    sim.start()?;
    forward(&mut sim, &emitter, name, &mut state_changes);

    let mut interval = tokio::time::interval(sim.tick_rate());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let reason = loop {
        if args.ticks.is_some_and(|max| sim.machine().tick_count() >= max) {
            break StopReason::TickLimit;
        }
        if sim.is_idle() {
            break StopReason::MachineStopped;
        }

        let interrupted = if args.fast {
            tokio::task::yield_now().await;
            cancel.is_cancelled()
        } else {
            tokio::select! {
                () = cancel.cancelled() => true,
                _ = interval.tick() => false,
            }
        };
        if interrupted {
            break StopReason::Interrupted;
        }

        sim.step();
        forward(&mut sim, &emitter, name, &mut state_changes);
    };

    let machine = sim.machine();
    let summary = RunSummary {
        ticks: machine.tick_count(),
        state_changes,
        final_state: machine.current_state().cloned(),
        halted: machine.is_halted(),
        reason,
    };
    emitter.emit_summary(name, &summary);

    info!(
        machine = name,
        ticks = summary.ticks,
        state_changes = summary.state_changes,
        reason = ?summary.reason,
        "run finished"
    );
    if !quiet {
        eprintln!(
            "{name}: {} ticks, {} state changes, final state {}{}",
            summary.ticks,
            summary.state_changes,
            summary
                .final_state
                .as_ref()
                .map_or("<none>", |s| s.as_str()),
            if summary.halted { " (halted)" } else { "" },
        );
    }
    Ok(())
}

/// Writes pending machine notifications to the event stream.
fn forward(sim: &mut Simulation, emitter: &EventEmitter, machine: &str, state_changes: &mut u64) {
    let tick = sim.machine().tick_count();
    for event in sim.drain_events() {
        if matches!(event, MachineEvent::StateChanged { .. }) {
            *state_changes += 1;
        }
        emitter.emit(machine, tick, &event);
    }
}
