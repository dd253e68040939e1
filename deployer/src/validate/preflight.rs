//! Pre-flight validation of a candidate file set

use serde::{Deserialize, Serialize};

use crate::models::deployment::DeploymentFile;
use crate::validate::markup::check_markup;
use crate::validate::stylesheet::check_stylesheet;

/// Reference size ceiling: files of 5 MiB or more are rejected
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Pre-flight settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightOptions {
    /// File that must exist at the root of the bundle
    pub entry_file: String,

    /// Files at or above this size in bytes are rejected
    pub max_file_size: u64,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self {
            entry_file: "index.html".to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Which pre-flight rule was violated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    MissingFile,
    InvalidHtml,
    InvalidCss,
    FileTooLarge,
}

/// One violated rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    #[serde(rename = "type")]
    pub kind: ValidationErrorKind,
    pub message: String,
}

/// Outcome of a pre-flight run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Error of the given kind, if that rule was violated
    pub fn error(&self, kind: ValidationErrorKind) -> Option<&ValidationError> {
        self.errors.iter().find(|e| e.kind == kind)
    }

    /// All messages joined for a deployment's error message
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validates candidate file sets before they are submitted
#[derive(Debug, Clone, Default)]
pub struct PreflightValidator {
    options: PreflightOptions,
}

impl PreflightValidator {
    pub fn new(options: PreflightOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PreflightOptions {
        &self.options
    }

    /// Run every rule over `files`.
    ///
    /// Rules are evaluated independently and each violated rule yields exactly
    /// one error listing every offending file. Offenders are sorted by path so
    /// the result does not depend on input order.
    pub fn validate_deployment(&self, files: &[DeploymentFile]) -> ValidationResult {
        let mut errors = Vec::new();

        if let Some(error) = self.check_entry_file(files) {
            errors.push(error);
        }

        let mut broken_markup = Vec::new();
        let mut broken_styles = Vec::new();
        let mut oversized = Vec::new();

        for file in files {
            let path = normalize_path(&file.path);
            // Syntax checks only apply to content that decodes as UTF-8
            match (file.extension().as_deref(), file.text()) {
                (Some("html") | Some("htm"), Some(text)) => {
                    if let Err(e) = check_markup(text) {
                        broken_markup.push(format!("{} ({})", path, e));
                    }
                }
                (Some("css"), Some(text)) => {
                    if let Err(e) = check_stylesheet(text) {
                        broken_styles.push(format!("{} ({})", path, e));
                    }
                }
                _ => {}
            }

            let size = file.size() as u64;
            if size >= self.options.max_file_size {
                oversized.push(format!(
                    "{} is {} and exceeds maximum allowed size of {}",
                    path,
                    crate::utils::format_bytes(size),
                    crate::utils::format_bytes(self.options.max_file_size)
                ));
            }
        }

        if !broken_markup.is_empty() {
            broken_markup.sort();
            errors.push(ValidationError {
                kind: ValidationErrorKind::InvalidHtml,
                message: format!("HTML validation failed: {}", broken_markup.join(", ")),
            });
        }

        if !broken_styles.is_empty() {
            broken_styles.sort();
            errors.push(ValidationError {
                kind: ValidationErrorKind::InvalidCss,
                message: format!("CSS validation failed: {}", broken_styles.join(", ")),
            });
        }

        if !oversized.is_empty() {
            oversized.sort();
            errors.push(ValidationError {
                kind: ValidationErrorKind::FileTooLarge,
                message: format!("File {}", oversized.join(", ")),
            });
        }

        ValidationResult::from_errors(errors)
    }

    fn check_entry_file(&self, files: &[DeploymentFile]) -> Option<ValidationError> {
        let entry = normalize_path(&self.options.entry_file);
        if files.iter().any(|f| normalize_path(&f.path) == entry) {
            return None;
        }
        Some(ValidationError {
            kind: ValidationErrorKind::MissingFile,
            message: format!("Missing required file: {}", entry),
        })
    }
}

fn normalize_path(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_start_matches('/')
}
