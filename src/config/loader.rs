//! Machine definition loader.
//!
//! Loading pipeline:
//! 1. Size check and UTF-8 BOM stripping
//! 2. Environment variable expansion (pre-parse, on raw text)
//! 3. YAML parsing into [`MachineDefinition`]
//! 4. Validation, collecting every issue
//! 5. Freeze with `Arc`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::schema::MachineDefinition;
use crate::config::validation::Validator;
use crate::error::ConfigError;

// ============================================================================
// Public API
// ============================================================================

/// Limits on definition size.
#[derive(Debug, Clone)]
pub struct ConfigLimits {
    /// Maximum number of states.
    pub max_states: usize,

    /// Maximum number of transitions.
    pub max_transitions: usize,

    /// Maximum number of script steps.
    pub max_script_steps: usize,

    /// Maximum definition file size in bytes.
    pub max_config_size: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        Self {
            max_states: env_or("TICKSTATE_MAX_STATES", 1000),
            max_transitions: env_or("TICKSTATE_MAX_TRANSITIONS", 10_000),
            max_script_steps: env_or("TICKSTATE_MAX_SCRIPT_STEPS", 100_000),
            max_config_size: env_or("TICKSTATE_MAX_CONFIG_SIZE", 4 * 1024 * 1024),
        }
    }
}

/// Result of loading a definition file.
#[derive(Debug)]
pub struct LoadResult {
    /// The loaded and validated definition.
    pub definition: Arc<MachineDefinition>,

    /// Warnings encountered during loading.
    pub warnings: Vec<LoadWarning>,
}

/// Warning during definition loading.
#[derive(Debug, Clone)]
pub struct LoadWarning {
    /// Warning message.
    pub message: String,

    /// Location where the warning occurred.
    pub location: Option<String>,
}

impl std::fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {location}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Definition loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    limits: ConfigLimits,
}

impl ConfigLoader {
    /// Creates a loader with the given limits.
    #[must_use]
    pub const fn new(limits: ConfigLimits) -> Self {
        Self { limits }
    }

    /// Creates a loader with default limits.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads, validates and freezes a definition file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or exceeds the size
    /// limit, if an environment reference cannot be expanded, if YAML
    /// parsing fails, or if validation reports any error.
    pub fn load(&self, path: &Path) -> Result<LoadResult, ConfigError> {
        let metadata = std::fs::metadata(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;

        let file_size = usize::try_from(metadata.len()).unwrap_or(usize::MAX);
        if file_size > self.limits.max_config_size {
            return Err(ConfigError::InvalidValue {
                field: "file_size".to_string(),
                value: format!("{file_size} bytes"),
                expected: format!("at most {} bytes", self.limits.max_config_size),
            });
        }

        let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
            path: path.to_path_buf(),
        })?;
        self.load_str(&raw, path)
    }

    /// Loads a definition from already-read text; `path` is used for
    /// messages only.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load), minus file access.
    pub fn load_str(&self, raw: &str, path: &Path) -> Result<LoadResult, ConfigError> {
        let mut warnings = Vec::new();
        let raw = raw.strip_prefix('\u{feff}').unwrap_or(raw);

        let mut env_sub = EnvSubstitution::new();
        let substituted = env_sub.substitute(raw, path)?;
        warnings.extend(env_sub.warnings);

        let value: serde_yaml::Value =
            serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: e.to_string(),
            })?;
        if value.is_null() {
            return Err(ConfigError::ParseError {
                path: path.to_path_buf(),
                line: None,
                message: "Definition file is empty".to_string(),
            });
        }

        let definition: MachineDefinition =
            serde_yaml::from_value(value).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                line: e.location().map(|l| l.line()),
                message: format!("Failed to deserialize definition: {e}"),
            })?;

        let result = Validator::new().validate(&definition, &self.limits);
        if result.has_errors() {
            return Err(ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: result.errors,
            });
        }
        warnings.extend(result.warnings.into_iter().map(|issue| LoadWarning {
            message: issue.message,
            location: Some(issue.path),
        }));

        Ok(LoadResult {
            definition: Arc::new(definition),
            warnings,
        })
    }
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Pre-parse environment variable substitution.
///
/// Runs on raw YAML text before parsing so substituted values keep YAML
/// type inference.
struct EnvSubstitution {
    warnings: Vec<LoadWarning>,
}

impl EnvSubstitution {
    const fn new() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    /// Substitutes environment variables in raw YAML text.
    ///
    /// Supports:
    /// - `${VAR}` - expand to value (empty string if unset, with warning)
    /// - `${VAR:-default}` - expand to default if unset
    /// - `${VAR:?message}` - fail if unset
    /// - `$$` - literal `$`
    fn substitute(&mut self, raw_yaml: &str, source_path: &Path) -> Result<String, ConfigError> {
        let mut result = String::with_capacity(raw_yaml.len());
        let mut chars = raw_yaml.chars().peekable();

        while let Some(c) = chars.next() {
            if c != '$' {
                result.push(c);
                continue;
            }
            match chars.peek() {
                Some('$') => {
                    chars.next();
                    result.push('$');
                }
                Some('{') => {
                    chars.next();
                    let var_ref = Self::parse_var_ref(&mut chars, source_path)?;
                    match std::env::var(&var_ref.name) {
                        Ok(value) => result.push_str(&value),
                        Err(_) => match (var_ref.default, var_ref.required) {
                            (Some(default), _) => result.push_str(&default),
                            (None, Some(message)) => {
                                return Err(ConfigError::EnvVarNotSet {
                                    var: var_ref.name,
                                    location: message,
                                });
                            }
                            (None, None) => self.warnings.push(LoadWarning {
                                message: format!(
                                    "Environment variable '{}' is not set, using empty string",
                                    var_ref.name
                                ),
                                location: Some(source_path.display().to_string()),
                            }),
                        },
                    }
                }
                _ => result.push(c),
            }
        }

        Ok(result)
    }

    /// Parses the inside of `${...}`; the opening brace is consumed.
    fn parse_var_ref(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        source_path: &Path,
    ) -> Result<VarRef, ConfigError> {
        let mut name = String::new();

        while let Some(c) = chars.next() {
            match c {
                '}' => {
                    return Ok(VarRef {
                        name,
                        default: None,
                        required: None,
                    });
                }
                ':' if chars.peek() == Some(&'-') => {
                    chars.next();
                    let default = Self::read_until_close(chars, source_path)?;
                    return Ok(VarRef {
                        name,
                        default: Some(default),
                        required: None,
                    });
                }
                ':' if chars.peek() == Some(&'?') => {
                    chars.next();
                    let message = Self::read_until_close(chars, source_path)?;
                    return Ok(VarRef {
                        name,
                        default: None,
                        required: Some(message),
                    });
                }
                _ => name.push(c),
            }
        }

        Err(unclosed(source_path, &name))
    }

    /// Reads until the matching `}`, keeping nested braces.
    fn read_until_close(
        chars: &mut std::iter::Peekable<std::str::Chars>,
        source_path: &Path,
    ) -> Result<String, ConfigError> {
        let mut value = String::new();
        let mut depth = 1;

        for c in chars.by_ref() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(value);
                    }
                }
                _ => {}
            }
            value.push(c);
        }

        Err(unclosed(source_path, &value))
    }
}

struct VarRef {
    name: String,
    default: Option<String>,
    required: Option<String>,
}

fn unclosed(source_path: &Path, fragment: &str) -> ConfigError {
    ConfigError::ParseError {
        path: PathBuf::from(source_path),
        line: None,
        message: format!("Unclosed environment variable reference: ${{{fragment}"),
    }
}

/// Parses an environment variable with a default value.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ============================================================================
// Tests
// ============================================================================
