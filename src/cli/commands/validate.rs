//! `tickstate validate`: check definition files without running them.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::config::ConfigLoader;
use crate::error::{ConfigError, Severity, TickstateError, ValidationIssue};

/// Outcome for one file.
#[derive(Debug, Serialize)]
struct FileReport {
    file: PathBuf,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// Validates every file and reports all of them before failing.
///
/// # Errors
///
/// Returns the first file's failure if any file is invalid. With
/// `--strict`, warnings count as failures.
pub fn validate(args: &ValidateArgs) -> Result<(), TickstateError> {
    let loader = ConfigLoader::with_defaults();
    let mut reports = Vec::with_capacity(args.files.len());
    let mut first_failure = None;

    for path in &args.files {
        info!(file = %path.display(), "validating definition");
        let (report, failure) = check(&loader, path, args.strict);
        if first_failure.is_none() {
            first_failure = failure;
        }
        reports.push(report);
    }

    match args.format {
        OutputFormat::Human => {
            for report in &reports {
                print_human(report);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
    }

    first_failure.map_or(Ok(()), |err| Err(err.into()))
}

fn check(loader: &ConfigLoader, path: &Path, strict: bool) -> (FileReport, Option<ConfigError>) {
    match loader.load(path) {
        Ok(loaded) => {
            let warnings: Vec<String> = loaded.warnings.iter().map(ToString::to_string).collect();
            let failure = (strict && !warnings.is_empty()).then(|| ConfigError::ValidationError {
                path: path.display().to_string(),
                errors: loaded
                    .warnings
                    .iter()
                    .map(|w| ValidationIssue {
                        path: w.location.clone().unwrap_or_default(),
                        message: w.message.clone(),
                        severity: Severity::Error,
                    })
                    .collect(),
            });
            let report = FileReport {
                file: path.to_path_buf(),
                valid: failure.is_none(),
                errors: Vec::new(),
                warnings,
            };
            (report, failure)
        }
        Err(err) => {
            let errors = match &err {
                ConfigError::ValidationError { errors, .. } => {
                    errors.iter().map(ToString::to_string).collect()
                }
                other => vec![other.to_string()],
            };
            let report = FileReport {
                file: path.to_path_buf(),
                valid: false,
                errors,
                warnings: Vec::new(),
            };
            (report, Some(err))
        }
    }
}

fn print_human(report: &FileReport) {
    let status = if report.valid { "ok" } else { "FAILED" };
    println!("{}: {status}", report.file.display());
    for line in report.errors.iter().chain(&report.warnings) {
        println!("  {line}");
    }
}
