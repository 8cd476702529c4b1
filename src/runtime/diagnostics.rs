//! Compiler log parsing.
//!
//! NVRTC reports problems as free-form text, one diagnostic per line:
//!
//! ```text
//! kernel.cu(4): error: expected a ";"
//! kernel.cu(3): warning #267-D: the format string requires additional arguments
//! kernel.cu(1): catastrophic error: cannot open source file "dummy.h"
//! nvrtc error   : unrecognized option --thisisanoptionthatdoesnotexist
//! 1 error detected in the compilation of "kernel.cu".
//! ```
//!
//! [`parse`] turns such a log into [`Diagnostic`] records. Lines that are not
//! diagnostics (source echoes, caret markers, summary counts) are skipped.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tool names that may stand in for a location prefix.
const TOOL_PREFIXES: &[&str] = &["nvrtc", "ptxas", "nvlink"];

/// Words that may qualify a severity keyword (`catastrophic error`).
const QUALIFIERS: &[&str] = &["catastrophic", "fatal", "internal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One structured compiler message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Text after the severity marker, e.g. `expected a ";"`.
    pub message: String,
    /// Location prefix such as `kernel.cu(4)` or `nvrtc`, when present.
    pub location: Option<String>,
    /// The full line as the compiler printed it.
    pub raw_line: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn is_warning(&self) -> bool {
        self.severity == Severity::Warning
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw_line)
    }
}

/// Parse a raw compiler log into diagnostics, in the order they appear.
pub fn parse(raw_output: &str) -> Vec<Diagnostic> {
    raw_output.lines().filter_map(parse_line).collect()
}

/// Only the error diagnostics of `diagnostics`.
pub fn errors(diagnostics: &[Diagnostic]) -> impl Iterator<Item = &Diagnostic> {
    diagnostics.iter().filter(|d| d.is_error())
}

/// Only the warning diagnostics of `diagnostics`.
pub fn warnings(diagnostics: &[Diagnostic]) -> impl Iterator<Item = &Diagnostic> {
    diagnostics.iter().filter(|d| d.is_warning())
}

fn parse_line(line: &str) -> Option<Diagnostic> {
    let line = line.trim_end_matches(['\r', '\n', '\0']);
    if line.trim().is_empty() {
        return None;
    }

    for (keyword, severity) in [("error", Severity::Error), ("warning", Severity::Warning)] {
        for (idx, _) in line.match_indices(keyword) {
            let prefix = &line[..idx];
            let Some(location) = split_location(prefix) else {
                continue;
            };
            let Some(message) = message_after(&line[idx + keyword.len()..]) else {
                continue;
            };
            return Some(Diagnostic {
                severity,
                message: message.to_string(),
                location,
                raw_line: line.to_string(),
            });
        }
    }

    // `ptxas fatal : ...` carries no `error` keyword.
    let idx = line.find("fatal")?;
    let location = split_location(&line[..idx])?;
    let message = message_after(&line[idx + "fatal".len()..])?;
    Some(Diagnostic {
        severity: Severity::Error,
        message: message.to_string(),
        location,
        raw_line: line.to_string(),
    })
}

/// Validate the text before a severity keyword. Returns the location
/// (`None` when the line starts with the keyword) or `None` overall when
/// the prefix does not look like a diagnostic header.
fn split_location(prefix: &str) -> Option<Option<String>> {
    if !(prefix.is_empty() || prefix.ends_with(char::is_whitespace)) {
        return None;
    }

    let mut head = prefix.trim_end();
    if let Some(word) = QUALIFIERS.iter().find(|q| head.ends_with(*q)) {
        let rest = &head[..head.len() - word.len()];
        if rest.is_empty() || rest.ends_with(char::is_whitespace) {
            head = rest.trim_end();
        }
    }

    if head.is_empty() {
        return Some(None);
    }
    if let Some(location) = head.strip_suffix(':') {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        return Some(Some(location.to_string()));
    }
    if TOOL_PREFIXES.contains(&head) {
        return Some(Some(head.to_string()));
    }
    None
}

/// Text following `keyword [#code]:`, or `None` if the colon is missing.
fn message_after(rest: &str) -> Option<&str> {
    let mut rest = rest.trim_start();
    if let Some(code) = rest.strip_prefix('#') {
        let end = code
            .find(|c: char| c == ':' || c.is_whitespace())
            .unwrap_or(code.len());
        rest = code[end..].trim_start();
    }
    rest.strip_prefix(':').map(str::trim)
}
