/*!
 * Diagnosis of the first fatal error in a compiler log.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::WorkingTree;

static ERROR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^! (.+)$").expect("valid regex"));
static FILE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\.?/?[\w./\-]+\.tex):(\d+):").expect("valid regex")
});
static TEX_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^l\.(\d+)\s").expect("valid regex"));

const LINES_BEFORE_ERROR: usize = 5;
const LINES_AFTER_ERROR: usize = 35;
const FALLBACK_TAIL_LINES: usize = 40;

/// Broad category of a TeX error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    UndefinedControlSequence,
    UndefinedEnvironment,
    MissingDelimiter,
    RunawayArgument,
    MissingFile,
    PackageError,
    EmergencyStop,
    Other,
}

impl ErrorClass {
    fn from_log(message: &str, log: &str) -> Self {
        if message.contains("Undefined control sequence") {
            Self::UndefinedControlSequence
        } else if message.contains("Environment") && message.contains("undefined") {
            Self::UndefinedEnvironment
        } else if log.contains("Runaway argument") {
            Self::RunawayArgument
        } else if message.starts_with("Missing") || message.starts_with("Extra }") || message.contains("Extra \\right") {
            Self::MissingDelimiter
        } else if message.contains("not found") {
            Self::MissingFile
        } else if message.contains("Package") && message.contains("Error") {
            Self::PackageError
        } else if message.contains("Emergency stop") {
            Self::EmergencyStop
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UndefinedControlSequence => "undefined control sequence",
            Self::UndefinedEnvironment => "undefined environment",
            Self::MissingDelimiter => "missing delimiter",
            Self::RunawayArgument => "runaway argument",
            Self::MissingFile => "missing file",
            Self::PackageError => "package error",
            Self::EmergencyStop => "emergency stop",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// Where and why a compile failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDiagnosis {
    /// Tree path of the implicated file
    pub file: String,
    pub line: Option<u32>,
    pub class: ErrorClass,
    pub message: String,
    /// Log lines around the error
    pub excerpt: String,
}

/// Diagnose the first fatal error in `log`, resolving the file against `tree`
pub fn diagnose(log: &str, tree: &WorkingTree) -> ErrorDiagnosis {
    let message = ERROR_LINE.captures(log)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| "Unknown error".to_string());
    let class = ErrorClass::from_log(&message, log);

    let file_match = FILE_LINE.captures(log);
    let file = file_match.as_ref()
        .and_then(|c| resolve_file(&c[1], tree))
        .unwrap_or_else(|| tree.entry.clone());
    let line = file_match
        .and_then(|c| c[2].parse().ok())
        .or_else(|| TEX_LINE.captures(log).and_then(|c| c[1].parse().ok()));

    ErrorDiagnosis { file, line, class, message, excerpt: excerpt(log) }
}

/// Exact path, then without `./`, then by file name
fn resolve_file(reported: &str, tree: &WorkingTree) -> Option<String> {
    if tree.files.contains(reported) {
        return Some(reported.to_string());
    }
    let stripped = reported.trim_start_matches("./");
    if tree.files.contains(stripped) {
        return Some(stripped.to_string());
    }
    let name = stripped.rsplit('/').next().unwrap_or(stripped);
    tree.files.paths()
        .find(|path| path.rsplit('/').next() == Some(name))
        .map(str::to_string)
}

fn excerpt(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let window = match lines.iter().position(|l| l.starts_with('!')) {
        Some(idx) => {
            let start = idx.saturating_sub(LINES_BEFORE_ERROR);
            let end = (idx + LINES_AFTER_ERROR).min(lines.len());
            &lines[start..end]
        }
        None => &lines[lines.len().saturating_sub(FALLBACK_TAIL_LINES)..],
    };
    window.join("\n")
}
