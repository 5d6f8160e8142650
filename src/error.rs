//! Error types for `tickstate`
//!
//! The engine reports content-authoring mistakes as [`MachineError`]s (always
//! logged as well as returned), user lifecycle faults as [`StateError`]s, and
//! simulation definition problems as [`ConfigError`]s. The binary folds all
//! of them into [`TickstateError`] for exit code mapping.

use std::path::PathBuf;
use thiserror::Error;

use crate::fsm::StateId;

// ============================================================================
// Exit Codes
// ============================================================================

/// Exit codes for `tickstate` CLI operations.
pub struct ExitCode;

impl ExitCode {
    /// Successful execution
    pub const SUCCESS: i32 = 0;

    /// General error
    pub const ERROR: i32 = 1;

    /// Definition error (invalid YAML, validation failure)
    pub const CONFIG_ERROR: i32 = 2;

    /// I/O error (file not found, permission denied)
    pub const IO_ERROR: i32 = 3;

    /// Machine error (unknown state, lifecycle fault during a run)
    pub const MACHINE_ERROR: i32 = 5;

    /// Usage error (invalid arguments, missing required options)
    pub const USAGE_ERROR: i32 = 64;

    /// Interrupted by SIGINT (Ctrl+C)
    pub const INTERRUPTED: i32 = 130;

    /// Terminated by SIGTERM
    pub const TERMINATED: i32 = 143;
}

// ============================================================================
// Top-Level Error
// ============================================================================

/// Top-level error type for `tickstate` operations.
#[derive(Debug, Error)]
pub enum TickstateError {
    /// Definition loading or validation error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State machine error
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TickstateError {
    /// Returns the appropriate exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Json(_) | Self::Yaml(_) => ExitCode::CONFIG_ERROR,
            Self::Machine(_) => ExitCode::MACHINE_ERROR,
            Self::Io(_) => ExitCode::IO_ERROR,
        }
    }
}

// ============================================================================
// Machine Errors
// ============================================================================

/// Registration and control errors raised by [`crate::fsm::StateMachine`].
///
/// Every variant is also logged at the point it is raised, so callers that
/// discard the result still leave a trace of the authoring mistake.
#[derive(Debug, Error)]
pub enum MachineError {
    /// A state id that is not registered on this machine
    #[error("unknown state '{id}'{}", did_you_mean(.suggestion.as_ref()))]
    UnknownState {
        /// The id that was looked up
        id: StateId,
        /// Closest registered id, if any is similar enough
        suggestion: Option<StateId>,
    },

    /// `start` was called on a machine with no registered states
    #[error("machine '{machine}' has no states to start in")]
    NoStates {
        /// Machine name
        machine: String,
    },

    /// `start` was called on a machine that is already running
    #[error("machine '{machine}' is already running")]
    AlreadyRunning {
        /// Machine name
        machine: String,
    },

    /// A control operation requires a running machine
    #[error("machine '{machine}' is not running")]
    NotRunning {
        /// Machine name
        machine: String,
    },

    /// A state's enter or exit logic failed; the machine is halted
    #[error("state '{state}' faulted: {source}")]
    LifecycleFault {
        /// The state whose lifecycle failed
        state: StateId,
        /// The underlying fault
        #[source]
        source: StateError,
    },
}

fn did_you_mean(suggestion: Option<&StateId>) -> String {
    suggestion.map_or_else(String::new, |s| format!(" (did you mean '{s}'?)"))
}

// ============================================================================
// State Lifecycle Errors
// ============================================================================

/// Errors returned from (or synthesized around) user state lifecycle code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// User logic reported a failure
    #[error("{0}")]
    Failed(String),

    /// The surrounding session was cancelled; not a fault
    #[error("cancelled")]
    Cancelled,

    /// User logic panicked
    #[error("panicked: {0}")]
    Panicked(String),

    /// The state is still held by another lifecycle call
    #[error("state '{0}' is busy with another lifecycle call")]
    Busy(StateId),
}

impl StateError {
    /// Convenience constructor for [`StateError::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns `true` for cancellation, which is a normal early termination.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Machine definition loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML parsing failed
    #[error("parse error in {path}: {message}")]
    ParseError {
        /// Path to the definition file
        path: PathBuf,
        /// Line number where the error occurred (if available)
        line: Option<usize>,
        /// Error message from the parser
        message: String,
    },

    /// Definition validation failed
    #[error("validation failed for {path}")]
    ValidationError {
        /// Path to the definition file
        path: String,
        /// List of validation issues found
        errors: Vec<ValidationIssue>,
    },

    /// Referenced definition file not found
    #[error("file not found: {path}")]
    MissingFile {
        /// Path to the missing file
        path: PathBuf,
    },

    /// Field has an invalid value
    #[error("invalid value for '{field}': got '{value}', expected {expected}")]
    InvalidValue {
        /// Name of the field with invalid value
        field: String,
        /// The actual value provided
        value: String,
        /// Description of what was expected
        expected: String,
    },

    /// Environment variable referenced in the definition is not set
    #[error("environment variable '{var}' not set (referenced at {location})")]
    EnvVarNotSet {
        /// Name of the environment variable
        var: String,
        /// Location in the definition where it was referenced
        location: String,
    },
}

// ============================================================================
// Validation Types
// ============================================================================

/// A single validation issue found during definition validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the problematic field (e.g., "transitions[2].to")
    pub path: String,
    /// Description of the validation issue
    pub message: String,
    /// Severity level of the issue
    pub severity: Severity,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {} at {}", prefix, self.message, self.path)
    }
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Error - prevents the definition from being used
    Error,
    /// Warning - potential issue that does not prevent loading
    Warning,
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for `tickstate` operations.
pub type Result<T> = std::result::Result<T, TickstateError>;

// ============================================================================
// Tests
// ============================================================================
