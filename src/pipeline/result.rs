/*!
 * Terminal value of a pipeline run.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::compile::CompileAttempt;
use crate::latex::SourceTree;
use crate::translation::dispatcher::FallbackNotice;
use crate::translation::tokens::TokenUsageStats;

/// Compile of the untranslated source, run before translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightCheck {
    Passed,
    /// The source did not compile; `log` is the compiler log or error
    Failed { log: String },
}

impl PreflightCheck {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Facts about one run, whatever its outcome
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub document_id: String,
    pub tokens: TokenUsageStats,
    /// Translation units dispatched
    pub units: usize,
    /// Pre-flight compile of the source, when enabled
    pub preflight: Option<PreflightCheck>,
    /// Every compile attempt of the translated tree, in order
    pub attempts: Vec<CompileAttempt>,
    /// Files replaced by the fix loop
    pub patched_files: Vec<String>,
    /// Rescue strategy that produced the artifact, if any
    pub rescue_strategy: Option<u32>,
    pub duration: Duration,
}

impl RunReport {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            document_id: document_id.into(),
            tokens: TokenUsageStats::new(),
            units: 0,
            preflight: None,
            attempts: Vec::new(),
            patched_files: Vec::new(),
            rescue_strategy: None,
            duration: Duration::ZERO,
        }
    }
}

/// Outcome of a pipeline run
#[derive(Debug, Clone)]
pub enum PipelineResult {
    /// Every unit translated and the tree compiled
    Completed {
        artifact: PathBuf,
        /// Non-fatal findings (integrity drift, rescue used)
        warnings: Vec<String>,
        sources: SourceTree,
        report: RunReport,
    },
    /// Compiled, but some units kept their source text
    CompletedWithWarnings {
        artifact: PathBuf,
        notices: Vec<FallbackNotice>,
        warnings: Vec<String>,
        sources: SourceTree,
        report: RunReport,
    },
    /// No artifact
    Failed {
        reason: String,
        /// Log of the last compile attempt, when one ran
        last_log: Option<String>,
        report: RunReport,
    },
}

impl PipelineResult {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn artifact(&self) -> Option<&Path> {
        match self {
            Self::Completed { artifact, .. } | Self::CompletedWithWarnings { artifact, .. } => Some(artifact),
            Self::Failed { .. } => None,
        }
    }

    /// Translated (and repaired) sources of a successful run
    pub fn sources(&self) -> Option<&SourceTree> {
        match self {
            Self::Completed { sources, .. } | Self::CompletedWithWarnings { sources, .. } => Some(sources),
            Self::Failed { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Completed { warnings, .. } | Self::CompletedWithWarnings { warnings, .. } => warnings,
            Self::Failed { .. } => &[],
        }
    }

    pub fn notices(&self) -> &[FallbackNotice] {
        match self {
            Self::CompletedWithWarnings { notices, .. } => notices,
            _ => &[],
        }
    }

    pub fn report(&self) -> &RunReport {
        match self {
            Self::Completed { report, .. }
            | Self::CompletedWithWarnings { report, .. }
            | Self::Failed { report, .. } => report,
        }
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        let report = self.report();
        let status = match self {
            Self::Completed { .. } => "completed".to_string(),
            Self::CompletedWithWarnings { notices, .. } => {
                format!("completed with {} untranslated unit(s)", notices.len())
            }
            Self::Failed { reason, .. } => format!("failed: {}", reason),
        };
        let rescue = report.rescue_strategy
            .map(|s| format!(", rescue strategy {}", s))
            .unwrap_or_default();
        let preflight = match &report.preflight {
            Some(PreflightCheck::Failed { .. }) => ", source failed pre-flight",
            _ => "",
        };
        format!(
            "{} {}: {} unit(s), {} compile attempt(s){}{}, {} input / {} output tokens, {:.1}s",
            report.document_id,
            status,
            report.units,
            report.attempts.len(),
            rescue,
            preflight,
            report.tokens.input_tokens,
            report.tokens.output_tokens,
            report.duration.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_failed_shouldIncludeReason() {
        let result = PipelineResult::Failed {
            reason: "cancelled".to_string(),
            last_log: None,
            report: RunReport::new("2401.00001"),
        };

        assert!(!result.is_success());
        assert!(result.artifact().is_none());
        assert!(result.summary().starts_with("2401.00001 failed: cancelled"));
    }

    #[test]
    fn test_summary_completed_shouldMentionRescue() {
        let mut report = RunReport::new("doc");
        report.rescue_strategy = Some(2);
        let result = PipelineResult::Completed {
            artifact: PathBuf::from("main.pdf"),
            warnings: Vec::new(),
            sources: SourceTree::new(),
            report,
        };

        assert!(result.is_success());
        assert!(result.summary().contains("rescue strategy 2"));
    }

    #[test]
    fn test_summary_failedPreflight_shouldSaySo() {
        let mut report = RunReport::new("doc");
        report.preflight = Some(PreflightCheck::Failed { log: "! Emergency stop.".to_string() });
        let result = PipelineResult::Failed { reason: "compilation failed".to_string(), last_log: None, report };

        assert!(result.summary().contains("source failed pre-flight"));
        assert!(!PreflightCheck::Failed { log: String::new() }.passed());
    }
}
