/*!
 * Pipeline orchestration.
 *
 * One run goes classify → pre-flight → extract → translate → post-process →
 * compile/fix → rescue. Translation is the only concurrent phase; every other phase works on
 * a fully reintegrated tree owned by the run.
 */

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::app_config::Config;
use crate::compile::{
    CompileAttempt, CompileRequest, CompileTimeout, Compiler, FixLoop, FixLoopOutcome, PreambleRescuer, Rescuer,
    WorkingTree,
};
use crate::errors::PipelineError;
use crate::latex::cleaner::clean_source;
use crate::latex::{
    classify, PostProcessor, ReintegratedFile, ScanMode, SourceTree, SpanExtractor, TranslatedTree,
};
use crate::translation::core::{RepairBackend, TranslationBackend};
use crate::translation::dispatcher::{DispatchFile, FallbackNotice, TranslationDispatcher};
use crate::translation::integrity::check_file;
use crate::translation::{ConcurrencyLimiter, RetryPolicy, TokenAccumulator};

use super::progress::{PipelinePhase, ProgressSink};
use super::result::{PipelineResult, PreflightCheck, RunReport};

/// What a run produced before the report is attached
#[derive(Debug, Default)]
struct RunState {
    units: usize,
    preflight: Option<PreflightCheck>,
    attempts: Vec<CompileAttempt>,
    patched_files: Vec<String>,
    rescue_strategy: Option<u32>,
}

enum RunOutcome {
    Artifact {
        artifact: PathBuf,
        notices: Vec<FallbackNotice>,
        warnings: Vec<String>,
        sources: SourceTree,
        state: RunState,
    },
    Failed {
        reason: String,
        last_log: Option<String>,
        state: RunState,
    },
}

impl RunOutcome {
    fn failed(reason: impl Into<String>, state: RunState) -> Self {
        let last_log = state.attempts.last().map(|a| a.log.clone());
        Self::Failed { reason: reason.into(), last_log, state }
    }

    /// Compile failure, noting when the source was already broken
    fn compile_failed(reason: String, state: RunState) -> Self {
        match state.preflight {
            Some(PreflightCheck::Failed { .. }) => {
                Self::failed(format!("{} (the untranslated source failed to compile too)", reason), state)
            }
            _ => Self::failed(reason, state),
        }
    }
}

/// LaTeX translation pipeline
pub struct TranslationPipeline {
    config: Config,
    translator: Arc<dyn TranslationBackend>,
    repairer: Arc<dyn RepairBackend>,
    compiler: Arc<dyn Compiler>,
    rescuer: Arc<dyn Rescuer>,
    limiter: ConcurrencyLimiter,
    retry: RetryPolicy,
    progress: ProgressSink,
}

/// Builder for [`TranslationPipeline`]
pub struct TranslationPipelineBuilder {
    config: Config,
    translator: Option<Arc<dyn TranslationBackend>>,
    repairer: Option<Arc<dyn RepairBackend>>,
    compiler: Option<Arc<dyn Compiler>>,
    rescuer: Option<Arc<dyn Rescuer>>,
    limiter: Option<ConcurrencyLimiter>,
    retry: Option<RetryPolicy>,
    progress: ProgressSink,
}

impl TranslationPipelineBuilder {
    /// Use one service for translation and repair
    pub fn backend<B>(mut self, backend: Arc<B>) -> Self
    where
        B: TranslationBackend + RepairBackend + 'static,
    {
        let translator: Arc<dyn TranslationBackend> = backend.clone();
        let repairer: Arc<dyn RepairBackend> = backend;
        self.translator = Some(translator);
        self.repairer = Some(repairer);
        self
    }

    pub fn translator(mut self, translator: Arc<dyn TranslationBackend>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn repairer(mut self, repairer: Arc<dyn RepairBackend>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn rescuer(mut self, rescuer: Arc<dyn Rescuer>) -> Self {
        self.rescuer = Some(rescuer);
        self
    }

    /// Share a limiter with other pipelines
    pub fn limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn build(self) -> Result<TranslationPipeline> {
        let translator = self.translator.ok_or_else(|| anyhow!("A translation backend is required"))?;
        let repairer = self.repairer.ok_or_else(|| anyhow!("A repair backend is required"))?;
        let compiler = self.compiler.ok_or_else(|| anyhow!("A compiler is required"))?;
        let rescuer = self.rescuer
            .unwrap_or_else(|| Arc::new(PreambleRescuer::for_language(&self.config.target_language)));
        let limiter = self.limiter
            .unwrap_or_else(|| ConcurrencyLimiter::new(self.config.pipeline.max_concurrent_requests));
        let retry = self.retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config.translation.common));

        Ok(TranslationPipeline {
            config: self.config,
            translator,
            repairer,
            compiler,
            rescuer,
            limiter,
            retry,
            progress: self.progress,
        })
    }
}

impl TranslationPipeline {
    pub fn builder(config: Config) -> TranslationPipelineBuilder {
        TranslationPipelineBuilder {
            config,
            translator: None,
            repairer: None,
            compiler: None,
            rescuer: None,
            limiter: None,
            retry: None,
            progress: ProgressSink::disabled(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Translate and compile `tree`
    pub async fn run(&self, document_id: &str, tree: SourceTree) -> PipelineResult {
        self.run_until(document_id, tree, std::future::pending::<()>()).await
    }

    /// Like `run`, but stop with `Failed` as soon as `cancel` completes
    pub async fn run_until<F>(&self, document_id: &str, tree: SourceTree, cancel: F) -> PipelineResult
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let tokens = TokenAccumulator::new();
        let mut report = RunReport::new(document_id);
        info!("Run {} started for {}", report.run_id, document_id);

        let outcome = tokio::select! {
            outcome = self.execute(tree, &tokens) => outcome,
            _ = cancel => {
                warn!("Run {} cancelled", report.run_id);
                RunOutcome::failed(PipelineError::Cancelled.to_string(), RunState::default())
            }
        };

        let mut stats = tokens.snapshot();
        stats.provider = self.config.translation.provider.display_name().to_string();
        stats.model = self.config.translation.get_model();
        report.tokens = stats;
        report.duration = started.elapsed();

        let result = match outcome {
            RunOutcome::Artifact { artifact, notices, warnings, sources, state } => {
                Self::fill_report(&mut report, state);
                if notices.is_empty() {
                    PipelineResult::Completed { artifact, warnings, sources, report }
                } else {
                    PipelineResult::CompletedWithWarnings { artifact, notices, warnings, sources, report }
                }
            }
            RunOutcome::Failed { reason, last_log, state } => {
                Self::fill_report(&mut report, state);
                PipelineResult::Failed { reason, last_log, report }
            }
        };

        info!("{}", result.summary());
        self.progress.report(PipelinePhase::Finished, 1.0, result.summary(), &tokens);
        result
    }

    fn fill_report(report: &mut RunReport, state: RunState) {
        report.units = state.units;
        report.preflight = state.preflight;
        report.attempts = state.attempts;
        report.patched_files = state.patched_files;
        report.rescue_strategy = state.rescue_strategy;
    }

    async fn execute(&self, tree: SourceTree, tokens: &TokenAccumulator) -> RunOutcome {
        let mut state = RunState::default();
        let progress = &self.progress;

        progress.report(PipelinePhase::Classifying, 0.0, "Classifying source files", tokens);
        let classification = match classify(&tree) {
            Ok(classification) => classification,
            Err(e) => return RunOutcome::failed(PipelineError::from(e).to_string(), state),
        };
        let entry = classification.entry.clone();
        info!(
            "Entry document {} with {} translatable file(s)",
            entry,
            classification.translatable_files().len()
        );

        if self.config.pipeline.preflight {
            progress.report(PipelinePhase::Preflight, 0.0, "Compiling the untranslated source", tokens);
            state.preflight = Some(self.preflight(&tree, &entry).await);
        }

        progress.report(PipelinePhase::Extracting, 0.0, "Extracting prose", tokens);
        let extractor = SpanExtractor::for_tree(&tree);
        let mut files = Vec::new();
        for path in classification.translatable_files() {
            let Some(text) = tree.utf8(path) else {
                warn!("{} is not valid UTF-8, kept untranslated", path);
                continue;
            };
            let is_entry = path == entry;
            let content = if self.config.pipeline.clean_sources {
                clean_source(text, is_entry)
            } else {
                text.to_string()
            };
            let mode = if is_entry { ScanMode::Document } else { ScanMode::Fragment };
            let spans = extractor.extract(&content, mode);
            debug!("{}: {} spans", path, spans.len());
            files.push(DispatchFile::new(path, content, spans));
        }
        let originals: Vec<(String, String)> = files.iter()
            .map(|f| (f.path.clone(), f.content.clone()))
            .collect();

        let mut bibliographies = BTreeMap::new();
        for path in classification.bibliography_files() {
            if let Some(text) = tree.utf8(path) {
                let spans = extractor.extract(text, ScanMode::Bibliography);
                bibliographies.insert(path.to_string(), ReintegratedFile::unchanged(text, &spans));
            }
        }

        progress.report(PipelinePhase::Translating, 0.0, "Translating", tokens);
        let dispatcher = TranslationDispatcher::new(Arc::clone(&self.translator), self.limiter.clone(), tokens.clone())
            .configured(&self.config)
            .with_retry(self.retry.clone());
        let output = dispatcher
            .dispatch_with_progress(files, |done, total| {
                let fraction = done as f32 / total.max(1) as f32;
                progress.report(PipelinePhase::Translating, fraction, format!("Translated {}/{} units", done, total), tokens);
            })
            .await;
        state.units = output.units;

        let mut warnings = Vec::new();
        for (path, source) in &originals {
            if let Some(document) = output.documents.get(path) {
                warnings.extend(check_file(path, source, &document.content));
            }
        }
        for warning in &warnings {
            warn!("{}", warning);
        }
        if state.preflight.as_ref().is_some_and(|check| !check.passed()) {
            warnings.push("The untranslated source failed to compile; errors may predate translation".to_string());
        }

        progress.report(PipelinePhase::PostProcessing, 0.0, "Post-processing", tokens);
        let translated_paths: Vec<String> = output.documents.keys().cloned().collect();
        let notices = output.notices;
        let mut documents = output.documents;
        documents.extend(bibliographies);
        let mut other = SourceTree::new();
        for (path, bytes) in tree.iter() {
            if !documents.contains_key(path) {
                other.insert(path, bytes);
            }
        }
        let mut translated = TranslatedTree {
            entry: entry.clone(),
            inclusion_order: classification.inclusion_order.clone(),
            documents,
            other,
        };
        let changes = PostProcessor::for_language(&self.config.target_language).apply(&mut translated);
        info!("Post-processing made {} change(s)", changes.len());

        let working = WorkingTree::new(entry, translated.to_source_tree()).with_documents(translated_paths);
        let timeout = CompileTimeout::from_settings(&self.config.compiler).for_tokens(tokens.output_tokens());
        progress.report(
            PipelinePhase::Compiling,
            0.0,
            format!("Compiling (timeout {}s)", timeout.as_secs()),
            tokens,
        );

        let fix_loop = FixLoop::new(self.compiler.as_ref(), self.repairer.as_ref(), tokens.clone())
            .with_retry(self.retry.clone())
            .with_max_attempts(self.config.pipeline.max_compile_attempts)
            .with_timeout(timeout);
        let FixLoopOutcome { tree: fixed, attempts, succeeded, patched_files } = match fix_loop.run(working, 1).await {
            Ok(outcome) => outcome,
            Err(e) => return RunOutcome::failed(PipelineError::from(e).to_string(), state),
        };
        state.attempts = attempts;
        state.patched_files = patched_files;

        if succeeded {
            return Self::artifact_outcome(fixed, notices, warnings, state);
        }
        if !self.config.pipeline.rescue {
            let reason = format!("compilation failed after {} attempt(s)", state.attempts.len());
            return RunOutcome::compile_failed(reason, state);
        }

        self.rescue(fixed, timeout, notices, warnings, state, tokens).await
    }

    async fn rescue(
        &self,
        tree: WorkingTree,
        timeout: Duration,
        notices: Vec<FallbackNotice>,
        mut warnings: Vec<String>,
        mut state: RunState,
        tokens: &TokenAccumulator,
    ) -> RunOutcome {
        let strategies = self.rescuer.strategies();
        for strategy in 1..=strategies {
            let Some(rescued) = self.rescuer.rescue(&tree, strategy) else {
                debug!("Rescue strategy {} does not apply", strategy);
                continue;
            };
            self.progress.report(
                PipelinePhase::Rescuing,
                (strategy - 1) as f32 / strategies.max(1) as f32,
                format!("Trying rescue strategy {}", strategy),
                tokens,
            );

            let request = CompileRequest { attempt: state.attempts.len() as u32 + 1, timeout };
            let attempt = match self.compiler.compile(&rescued, request).await {
                Ok(attempt) => attempt,
                Err(e) => return RunOutcome::failed(PipelineError::from(e).to_string(), state),
            };
            let succeeded = attempt.success;
            state.attempts.push(attempt);

            if succeeded {
                warnings.push(format!("Compiled only after rescue strategy {}", strategy));
                state.rescue_strategy = Some(strategy);
                return Self::artifact_outcome(rescued, notices, warnings, state);
            }
        }

        let reason = format!(
            "compilation failed after {} attempt(s), rescue exhausted",
            state.attempts.len()
        );
        RunOutcome::compile_failed(reason, state)
    }

    /// Compile the source as given. Failures are recorded, never fatal.
    async fn preflight(&self, tree: &SourceTree, entry: &str) -> PreflightCheck {
        let working = WorkingTree::new(entry, tree.clone());
        let request = CompileRequest { attempt: 0, timeout: self.config.compiler.preflight_timeout() };
        match self.compiler.compile(&working, request).await {
            Ok(attempt) if attempt.success => {
                info!("Pre-flight compile of the source succeeded");
                PreflightCheck::Passed
            }
            Ok(attempt) => {
                warn!("Pre-flight compile failed, the source may already be broken; proceeding anyway");
                PreflightCheck::Failed { log: attempt.log }
            }
            Err(e) => {
                warn!("Pre-flight compile could not run: {}", e);
                PreflightCheck::Failed { log: e.to_string() }
            }
        }
    }

    fn artifact_outcome(tree: WorkingTree, notices: Vec<FallbackNotice>, warnings: Vec<String>, state: RunState) -> RunOutcome {
        match state.attempts.last().and_then(|a| a.artifact.clone()) {
            Some(artifact) => RunOutcome::Artifact { artifact, notices, warnings, sources: tree.files, state },
            None => RunOutcome::failed("compiler reported success without an artifact", state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::mock::MockCompiler;
    use crate::providers::mock::MockProvider;

    fn tree() -> SourceTree {
        SourceTree::from_files([
            ("main.tex", "\\documentclass{article}\n\\begin{document}\nHello world.\n\\input{sec1}\n\\end{document}\n"),
            ("sec1.tex", "\\section{Intro}\nSome text.\n"),
        ])
    }

    fn pipeline(provider: MockProvider, compiler: MockCompiler) -> TranslationPipeline {
        TranslationPipeline::builder(Config::default())
            .backend(Arc::new(provider))
            .compiler(Arc::new(compiler))
            .retry(RetryPolicy::immediate(3))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_happyPath_shouldComplete() {
        let result = pipeline(MockProvider::working(), MockCompiler::succeeding()).run("doc", tree()).await;

        assert!(matches!(result, PipelineResult::Completed { .. }), "{}", result.summary());
        let sources = result.sources().unwrap();
        assert!(sources.utf8("sec1.tex").unwrap().contains("[TRANSLATED] Some text."));
        assert!(sources.utf8("main.tex").unwrap().contains("\\usepackage[UTF8]{ctex}"));
        assert_eq!(result.report().attempts.len(), 1);
        assert_eq!(result.report().preflight, Some(PreflightCheck::Passed));
    }

    #[tokio::test]
    async fn test_run_noEntry_shouldFailBeforeTranslating() {
        let provider = MockProvider::working();
        let tree = SourceTree::from_files([("a.tex", "Just text.")]);

        let result = pipeline(provider.clone(), MockCompiler::succeeding()).run("doc", tree).await;

        assert!(matches!(&result, PipelineResult::Failed { reason, .. } if reason.contains("Classification")));
        assert_eq!(provider.request_count(), 0);
    }

    #[test]
    fn test_build_withoutCompiler_shouldError() {
        let result = TranslationPipeline::builder(Config::default())
            .backend(Arc::new(MockProvider::working()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_runUntil_cancelled_shouldFailWithoutArtifact() {
        let pipeline = pipeline(MockProvider::slow(5_000), MockCompiler::succeeding());

        let result = pipeline
            .run_until("doc", tree(), tokio::time::sleep(Duration::from_millis(20)))
            .await;

        assert!(matches!(&result, PipelineResult::Failed { reason, .. } if reason.contains("cancelled")));
        assert!(result.artifact().is_none());
    }

    #[tokio::test]
    async fn test_run_failingCompiler_shouldRescueOrFail() {
        let compiler = MockCompiler::failing("! Emergency stop.");
        let result = pipeline(MockProvider::working(), compiler.clone()).run("doc", tree()).await;

        match &result {
            PipelineResult::Failed { reason, last_log, report } => {
                assert_eq!(last_log.as_deref(), Some("! Emergency stop."));
                assert_eq!(report.attempts.len(), 1 + 2);
                assert!(matches!(report.preflight, Some(PreflightCheck::Failed { .. })));
                assert!(reason.contains("untranslated source failed to compile too"), "{}", reason);
            }
            other => panic!("expected failure, got {}", other.summary()),
        }
        // Pre-flight, one fix-loop compile, two rescue compiles
        assert_eq!(compiler.compile_count(), 4);
        assert_eq!(compiler.requests()[0].attempt, 0);
    }

    #[tokio::test]
    async fn test_run_preflightDisabled_shouldOnlyCompileTranslation() {
        let mut config = Config::default();
        config.pipeline.preflight = false;
        let compiler = MockCompiler::succeeding();
        let pipeline = TranslationPipeline::builder(config)
            .backend(Arc::new(MockProvider::working()))
            .compiler(Arc::new(compiler.clone()))
            .retry(RetryPolicy::immediate(1))
            .build()
            .unwrap();

        let result = pipeline.run("doc", tree()).await;

        assert!(result.is_success());
        assert_eq!(result.report().preflight, None);
        assert_eq!(compiler.compile_count(), 1);
    }
}
