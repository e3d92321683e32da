/*!
 * Compilation of the translated tree.
 *
 * - `latexmk`: the subprocess-backed `Compiler`
 * - `diagnosis`: first-error extraction from a compiler log
 * - `fix_loop`: compile, diagnose, patch, bounded
 * - `rescuer`: deterministic fallbacks when the fix loop gives up
 * - `mock`: scripted compiler for tests
 */

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::app_config::CompilerSettings;
use crate::errors::CompileError;
use crate::latex::SourceTree;

pub mod diagnosis;
pub mod fix_loop;
pub mod latexmk;
pub mod mock;
pub mod rescuer;

pub use self::diagnosis::{diagnose, ErrorClass, ErrorDiagnosis};
pub use self::fix_loop::{FixLoop, FixLoopOutcome, FixState};
pub use self::latexmk::LatexmkCompiler;
pub use self::rescuer::PreambleRescuer;

/// The tree handed to the compiler, with its entry and translated documents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingTree {
    pub entry: String,
    pub files: SourceTree,
    /// Paths whose prose was translated
    pub documents: BTreeSet<String>,
}

impl WorkingTree {
    pub fn new(entry: impl Into<String>, files: SourceTree) -> Self {
        Self { entry: entry.into(), files, documents: BTreeSet::new() }
    }

    pub fn with_documents<I, S>(mut self, documents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.documents = documents.into_iter().map(Into::into).collect();
        self
    }

    /// Text of a file, if present and valid UTF-8
    pub fn text(&self, path: &str) -> Option<&str> {
        self.files.utf8(path)
    }

    /// Replace one file's content
    pub fn replace(&mut self, path: &str, content: &str) {
        self.files.insert(path, content.as_bytes());
    }
}

/// Parameters of one compile invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileRequest {
    /// 1-based attempt number within the run
    pub attempt: u32,
    pub timeout: Duration,
}

/// Record of one compiler invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileAttempt {
    pub attempt: u32,
    /// Process exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Tail of stdout, stderr and the TeX log
    pub log: String,
    pub duration: Duration,
    pub success: bool,
    /// Rendered PDF when `success`
    pub artifact: Option<PathBuf>,
}

/// Document compiler
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Compile `tree`. An ordinary compile failure is an `Ok` attempt with
    /// `success == false`; `Err` is reserved for spawn, timeout and I/O failures.
    async fn compile(&self, tree: &WorkingTree, request: CompileRequest) -> Result<CompileAttempt, CompileError>;
}

/// Deterministic, model-free fallback applied after the fix loop gives up
pub trait Rescuer: Send + Sync {
    /// Number of strategies, tried in order starting at 1
    fn strategies(&self) -> u32;

    /// Rescued tree for `strategy`, or `None` when it is unknown or cannot apply
    fn rescue(&self, tree: &WorkingTree, strategy: u32) -> Option<WorkingTree>;
}

/// Compile timeout scaled by the amount of translated output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileTimeout {
    pub base: Duration,
    pub per_unit: Duration,
    pub tokens_per_unit: u64,
    pub max: Duration,
}

impl CompileTimeout {
    pub fn from_settings(settings: &CompilerSettings) -> Self {
        Self {
            base: settings.base_timeout(),
            per_unit: Duration::from_secs(settings.timeout_secs_per_unit),
            tokens_per_unit: settings.tokens_per_unit,
            max: settings.max_timeout(),
        }
    }

    /// `min(max, base + per_unit * (output_tokens / tokens_per_unit))`
    pub fn for_tokens(&self, output_tokens: u64) -> Duration {
        let units = output_tokens / self.tokens_per_unit.max(1);
        let extra = self.per_unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX));
        self.base.saturating_add(extra).min(self.max)
    }
}

impl Default for CompileTimeout {
    fn default() -> Self {
        Self::from_settings(&CompilerSettings::default())
    }
}
