//! Metrics for state machines.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed. [`init_metrics`] installs a Prometheus recorder,
//! optionally with an HTTP listener.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TickstateError;
use crate::fsm::Pipeline;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Maximum length for user-supplied label values.
const MAX_LABEL_LEN: usize = 64;

/// Initializes the global metrics recorder.
///
/// With `port`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. Without it, the recorder is installed with no
/// endpoint.
///
/// # Errors
///
/// Returns `TickstateError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TickstateError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TickstateError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "tickstate_state_changes_total",
        "Completed state changes by machine, source and target"
    );
    describe_counter!(
        "tickstate_transitions_total",
        "Transitions by machine, pipeline and outcome"
    );
    describe_counter!(
        "tickstate_halts_total",
        "Lifecycle faults that left a machine without a current state"
    );
    describe_gauge!(
        "tickstate_current_state",
        "Current state per machine (1 = current)"
    );
}

/// Records a completed state change.
pub fn record_state_change(machine: &str, from: Option<&str>, to: &str) {
    counter!(
        "tickstate_state_changes_total",
        "machine" => sanitize_label(machine),
        "from" => from.map_or_else(|| "none".to_string(), sanitize_label),
        "to" => sanitize_label(to),
    )
    .increment(1);
}

/// Records a transition outcome (`completed`, `cancelled` or `failed`).
pub fn record_transition(machine: &str, pipeline: Pipeline, outcome: &'static str) {
    counter!(
        "tickstate_transitions_total",
        "machine" => sanitize_label(machine),
        "pipeline" => pipeline.as_str(),
        "outcome" => outcome,
    )
    .increment(1);
}

/// Records a machine halt caused by `state`.
pub fn record_halt(machine: &str, state: &str) {
    counter!(
        "tickstate_halts_total",
        "machine" => sanitize_label(machine),
        "state" => sanitize_label(state),
    )
    .increment(1);
}

/// Sets the current-state gauge.
///
/// Zeros the previous state's label first so stale labels do not keep
/// reporting `1.0`.
pub fn set_current_state(machine: &str, state: Option<&str>, previous: Option<&str>) {
    let machine = sanitize_label(machine);
    if let Some(prev) = previous {
        gauge!(
            "tickstate_current_state",
            "machine" => machine.clone(),
            "state" => sanitize_label(prev),
        )
        .set(0.0);
    }
    if let Some(state) = state {
        gauge!(
            "tickstate_current_state",
            "machine" => machine,
            "state" => sanitize_label(state),
        )
        .set(1.0);
    }
}

/// Truncates a user-supplied name and replaces characters outside
/// `[A-Za-z0-9_-]` with `_`.
#[must_use]
fn sanitize_label(name: &str) -> String {
    name.chars()
        .take(MAX_LABEL_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
