//! Observability for `tickstate` runs.
//!
//! Logging, metrics, and the JSONL event stream written by `tickstate run`.

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventEmitter, RunSummary, StopReason};
pub use logging::{LogFormat, init_logging};
pub use metrics::init_metrics;
