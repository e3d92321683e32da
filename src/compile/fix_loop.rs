/*!
 * Compile-diagnose-patch loop.
 *
 * ```text
 * Compiling ──ok──▶ Succeeded
 *     │ failed
 *     ▼
 * Diagnosing ──budget spent──▶ Exhausted
 *     │
 *     ▼
 * Patching ──no usable patch──▶ Exhausted
 *     │
 *     └──────────▶ Compiling
 * ```
 *
 * Only the file implicated by the first error is ever replaced.
 */

use anyhow::anyhow;
use log::{info, warn};
use std::time::{Duration, Instant};

use crate::errors::CompileError;
use crate::translation::core::RepairBackend;
use crate::translation::prompts::strip_code_fence;
use crate::translation::retry::RetryPolicy;
use crate::translation::tokens::TokenAccumulator;

use super::diagnosis::{diagnose, ErrorDiagnosis};
use super::{CompileAttempt, CompileRequest, Compiler, WorkingTree};

/// States of the fix loop
#[derive(Debug, Clone, PartialEq)]
pub enum FixState {
    Compiling,
    Diagnosing,
    Patching(ErrorDiagnosis),
    Succeeded,
    Exhausted,
}

/// Tree and attempts left by the fix loop
#[derive(Debug, Clone)]
pub struct FixLoopOutcome {
    /// Tree as last compiled
    pub tree: WorkingTree,
    pub attempts: Vec<CompileAttempt>,
    pub succeeded: bool,
    /// Files replaced by repairs, in order
    pub patched_files: Vec<String>,
}

impl FixLoopOutcome {
    pub fn last_attempt(&self) -> Option<&CompileAttempt> {
        self.attempts.last()
    }
}

/// Bounded fix loop over a compiler and a repair backend
pub struct FixLoop<'a, C: ?Sized, R: ?Sized> {
    compiler: &'a C,
    repair: &'a R,
    retry: RetryPolicy,
    tokens: TokenAccumulator,
    max_attempts: u32,
    timeout: Duration,
}

impl<'a, C, R> FixLoop<'a, C, R>
where
    C: Compiler + ?Sized,
    R: RepairBackend + ?Sized,
{
    pub fn new(compiler: &'a C, repair: &'a R, tokens: TokenAccumulator) -> Self {
        Self {
            compiler,
            repair,
            retry: RetryPolicy::default(),
            tokens,
            max_attempts: 3,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Compile attempts allowed (at least one)
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run until the tree compiles or the loop gives up.
    ///
    /// Attempt numbers start after `first_attempt - 1`, so a run can keep
    /// one numbering across the fix loop and rescue compiles.
    pub async fn run(&self, tree: WorkingTree, first_attempt: u32) -> Result<FixLoopOutcome, CompileError> {
        let mut tree = tree;
        let mut attempts: Vec<CompileAttempt> = Vec::new();
        let mut patched_files = Vec::new();
        let mut state = FixState::Compiling;

        loop {
            state = match state {
                FixState::Compiling => {
                    let request = CompileRequest {
                        attempt: first_attempt + attempts.len() as u32,
                        timeout: self.timeout,
                    };
                    let attempt = self.compiler.compile(&tree, request).await?;
                    let succeeded = attempt.success;
                    attempts.push(attempt);
                    if succeeded { FixState::Succeeded } else { FixState::Diagnosing }
                }
                FixState::Diagnosing => {
                    if attempts.len() as u32 >= self.max_attempts {
                        FixState::Exhausted
                    } else {
                        let log = attempts.last().map(|a| a.log.as_str()).unwrap_or_default();
                        let diagnosis = diagnose(log, &tree);
                        info!(
                            "Compile error in {} (line {:?}, {}): {}",
                            diagnosis.file, diagnosis.line, diagnosis.class, diagnosis.message
                        );
                        FixState::Patching(diagnosis)
                    }
                }
                FixState::Patching(diagnosis) => match self.patch(&tree, &diagnosis).await {
                    Some(content) => {
                        tree.replace(&diagnosis.file, &content);
                        patched_files.push(diagnosis.file);
                        FixState::Compiling
                    }
                    None => FixState::Exhausted,
                },
                done @ (FixState::Succeeded | FixState::Exhausted) => {
                    let succeeded = matches!(done, FixState::Succeeded);
                    if !succeeded {
                        warn!("Fix loop gave up after {} compile attempt(s)", attempts.len());
                    }
                    return Ok(FixLoopOutcome { tree, attempts, succeeded, patched_files });
                }
            };
        }
    }

    /// Repaired content of the implicated file, if the repair changed it
    async fn patch(&self, tree: &WorkingTree, diagnosis: &ErrorDiagnosis) -> Option<String> {
        let Some(original) = tree.text(&diagnosis.file) else {
            warn!("Cannot repair {}: not a text file in the tree", diagnosis.file);
            return None;
        };

        let label = format!("Repair of {}", diagnosis.file);
        let repair = self.repair;
        let tokens = &self.tokens;
        let excerpt = diagnosis.excerpt.as_str();
        let outcome = self.retry.run(&label, |_| async move {
            let started = Instant::now();
            let completion = repair.repair(original, excerpt).await
                .map_err(|e| anyhow!(e))?;
            tokens.record_completion(&completion, started.elapsed());
            Ok(strip_code_fence(&completion.text).to_string())
        }).await;

        let fixed = outcome.ok()?;
        if fixed.trim().is_empty() {
            warn!("Repair of {} returned nothing", diagnosis.file);
            return None;
        }
        if fixed.trim() == original.trim() {
            info!("Repair of {} produced no changes", diagnosis.file);
            return None;
        }
        info!("Applied repair to {}", diagnosis.file);
        Some(fixed)
    }
}
