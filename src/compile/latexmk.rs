/*!
 * `latexmk`-backed compiler.
 *
 * The working tree is written into a fixed work directory and `latexmk` runs
 * there under a timeout. A run succeeds when the PDF exists afterwards, which
 * tolerates the non-zero exit codes `-f` produces for recoverable errors.
 */

use async_trait::async_trait;
use log::{debug, info, warn};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;

use crate::app_config::{CompilerSettings, LatexEngine};
use crate::errors::CompileError;
use crate::latex::tree::{file_stem, parent_dir};

use super::{CompileAttempt, CompileRequest, Compiler, WorkingTree};

/// Runs `latexmk` in a work directory
#[derive(Debug, Clone)]
pub struct LatexmkCompiler {
    program: String,
    engine: LatexEngine,
    work_dir: PathBuf,
    max_log_chars: usize,
}

impl LatexmkCompiler {
    pub fn new(settings: &CompilerSettings, engine: LatexEngine, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: settings.latexmk_path.clone(),
            engine,
            work_dir: work_dir.into(),
            max_log_chars: settings.max_log_chars,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Arguments passed to latexmk for `entry_name`
    pub fn arguments(&self, entry_name: &str) -> Vec<String> {
        vec![
            self.engine.latexmk_flag().to_string(),
            "-bibtex".to_string(),
            "-interaction=nonstopmode".to_string(),
            "-f".to_string(),
            "-file-line-error".to_string(),
            "-outdir=.".to_string(),
            entry_name.to_string(),
        ]
    }

    fn write_tree(&self, tree: &WorkingTree) -> Result<(), CompileError> {
        tree.files.write_to(&self.work_dir)
            .map_err(|e| CompileError::Io(io::Error::other(format!("{:#}", e))))
    }
}

/// Keep the last `max_chars` characters of `log`
pub fn tail_chars(log: &str, max_chars: usize) -> &str {
    let count = log.chars().count();
    if count <= max_chars {
        return log;
    }
    let skip = count - max_chars;
    match log.char_indices().nth(skip) {
        Some((idx, _)) => &log[idx..],
        None => "",
    }
}

#[async_trait]
impl Compiler for LatexmkCompiler {
    async fn compile(&self, tree: &WorkingTree, request: CompileRequest) -> Result<CompileAttempt, CompileError> {
        self.write_tree(tree)?;

        let run_dir = self.work_dir.join(parent_dir(&tree.entry));
        let entry_name = tree.entry.rsplit('/').next().unwrap_or(&tree.entry);
        let stem = file_stem(&tree.entry);
        let pdf = run_dir.join(format!("{}.pdf", stem));
        if pdf.exists() {
            tokio::fs::remove_file(&pdf).await?;
        }

        info!(
            "Compiling {} (attempt {}, timeout {}s)",
            tree.entry, request.attempt, request.timeout.as_secs()
        );

        let mut command = Command::new(&self.program);
        command
            .args(self.arguments(entry_name))
            .current_dir(&run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let child = command.spawn().map_err(|e| CompileError::Spawn {
            program: self.program.clone(),
            message: e.to_string(),
        })?;

        // Dropping the pending future on timeout kills the child
        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("latexmk exceeded {}s, killed", request.timeout.as_secs());
                return Err(CompileError::Timeout(request.timeout));
            }
        };
        let duration = started.elapsed();

        let mut log = String::new();
        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push('\n');
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        let tex_log = run_dir.join(format!("{}.log", stem));
        if let Ok(bytes) = tokio::fs::read(&tex_log).await {
            log.push('\n');
            log.push_str(&String::from_utf8_lossy(&bytes));
        }
        let log = tail_chars(&log, self.max_log_chars).to_string();

        let success = pdf.exists();
        if success {
            if output.status.success() {
                info!("Compilation successful in {:.1}s", duration.as_secs_f64());
            } else {
                warn!("Compilation produced a PDF with errors (exit {:?})", output.status.code());
            }
        } else {
            debug!("No PDF after attempt {} (exit {:?})", request.attempt, output.status.code());
        }

        Ok(CompileAttempt {
            attempt: request.attempt,
            exit_code: output.status.code(),
            log,
            duration,
            success,
            artifact: success.then_some(pdf),
        })
    }
}
