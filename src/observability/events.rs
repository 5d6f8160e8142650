//! Structured event stream for `tickstate run`.
//!
//! Machine notifications are serialized as newline-delimited JSON (JSONL),
//! each line stamped with a monotonically increasing sequence number, the
//! wall-clock time, the machine name and the tick that produced it.

use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::fsm::{MachineEvent, StateId};

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Why a simulation run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The tick budget was exhausted
    TickLimit,
    /// The script stopped the machine and nothing was left to do
    MachineStopped,
    /// SIGINT or SIGTERM
    Interrupted,
}

/// Final record written when a run ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Ticks processed
    pub ticks: u64,
    /// Completed state changes
    pub state_changes: u64,
    /// Current state at the end of the run
    pub final_state: Option<StateId>,
    /// Whether the machine ended running without a current state
    pub halted: bool,
    /// Why the run ended
    pub reason: StopReason,
}

/// Non-machine records in the stream.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum RunEvent<'a> {
    RunCompleted(&'a RunSummary),
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Wraps a record with ordering and origin fields.
#[derive(Debug, Serialize)]
struct EventEnvelope<'a, T: Serialize> {
    /// Zero-based, monotonically increasing sequence counter
    sequence: u64,
    timestamp: DateTime<Utc>,
    machine: &'a str,
    tick: u64,
    /// The wrapped record, flattened into the same JSON object
    #[serde(flatten)]
    event: &'a T,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped; the event stream must never
/// abort a simulation.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Creates an emitter that discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Writes one machine notification.
    pub fn emit(&self, machine: &str, tick: u64, event: &MachineEvent) {
        self.write(machine, tick, event);
    }

    /// Writes the end-of-run summary.
    pub fn emit_summary(&self, machine: &str, summary: &RunSummary) {
        self.write(machine, summary.ticks, &RunEvent::RunCompleted(summary));
    }

    /// Returns the number of records written so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    fn write<T: Serialize>(&self, machine: &str, tick: u64, event: &T) {
        let envelope = EventEnvelope {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            machine,
            tick,
            event,
        };

        if let Ok(mut w) = self.writer.lock()
            && let Ok(line) = serde_json::to_string(&envelope)
        {
            let _ = writeln!(w, "{line}");
            let _ = w.flush();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
