//! Error types for compiling, loading and launching kernels.

use std::path::PathBuf;

use thiserror::Error;

use crate::runtime::diagnostics::{Diagnostic, Severity};

/// Status code and description reported by a device-side collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message} (code {code})")]
pub struct DriverError {
    pub code: i32,
    pub message: String,
}

impl DriverError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A compilation that produced no loadable artifact.
///
/// Carries the whole parsed diagnostic set and the raw compiler log. The
/// `Display` form is the raw text of every error diagnostic, so callers can
/// match on the compiler's own wording.
#[derive(Error, Debug, Clone)]
#[error("{}", failure_message(.diagnostics, .log, .status))]
pub struct CompilationFailure {
    pub diagnostics: Vec<Diagnostic>,
    pub log: String,
    /// Compiler status description, when the compiler itself reported failure.
    pub status: Option<String>,
}

impl CompilationFailure {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    /// Caller-visible message: raw error lines, else the raw log, else the status.
    pub fn message(&self) -> String {
        failure_message(&self.diagnostics, &self.log, &self.status)
    }
}

fn failure_message(diagnostics: &[Diagnostic], log: &str, status: &Option<String>) -> String {
    let lines: Vec<&str> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.raw_line.as_str())
        .collect();
    if !lines.is_empty() {
        return lines.join("\n");
    }
    let log = log.trim();
    if !log.is_empty() {
        return log.to_string();
    }
    status
        .clone()
        .unwrap_or_else(|| "compiler reported failure without output".to_string())
}

#[derive(Error, Debug)]
pub enum CudaError {
    #[error("compilation failed:\n{0}")]
    Compilation(#[from] CompilationFailure),

    #[error("function name not found: {name}")]
    FunctionNameNotFound { name: String },

    #[error("unsupported argument type at position {position}: {kind}")]
    UnsupportedArgumentType { position: usize, kind: String },

    #[error("kernel launch failed: {message} (code {code})")]
    LaunchFailure { code: i32, message: String },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("module owning function '{0}' has been released")]
    ModuleReleased(String),
}

pub type Result<T> = std::result::Result<T, CudaError>;
