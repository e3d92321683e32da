use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app_config::Config;
use crate::compile::LatexmkCompiler;
use crate::file_utils::FileManager;
use crate::language_utils::ScriptProfile;
use crate::latex::SourceTree;
use crate::pipeline::{PipelineResult, ProgressSink, TranslationPipeline};
use crate::translation::prompts::LanguagePair;
use crate::translation::TranslationService;

// @module: Application controller for LaTeX translation runs

/// Resolution of the progress bar, in steps
const PROGRESS_STEPS: u64 = 1000;

/// Main application controller
pub struct Controller {
    // @field: App configuration
    config: Config,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Translate the tree under `source_dir` and write the results to `output_dir`
    pub async fn run(&self, source_dir: PathBuf, output_dir: PathBuf, force_overwrite: bool) -> Result<PipelineResult> {
        if !source_dir.is_dir() {
            return Err(anyhow!("Source directory does not exist: {:?}", source_dir));
        }

        let document_id = Self::document_id(&source_dir);
        let pdf_path = output_dir.join(Self::output_pdf_name(&document_id, &self.config.target_language));
        if pdf_path.exists() && !force_overwrite {
            warn!("Skipping {}, {:?} already exists (use -f to force overwrite)", document_id, pdf_path);
            return Err(anyhow!("Output already exists: {:?}", pdf_path));
        }
        FileManager::ensure_dir(&output_dir)?;

        let tree = SourceTree::load_dir(&source_dir)
            .with_context(|| format!("Failed to load source tree from {:?}", source_dir))?;
        info!("Loaded {} file(s) from {:?}", tree.len(), source_dir);

        let languages = LanguagePair::new(&self.config.source_language, &self.config.target_language);
        let service = Arc::new(TranslationService::new(self.config.translation.clone(), languages)?);

        let work_dir = tempfile::tempdir().context("Failed to create build directory")?;
        let engine = self.config.compiler.engine
            .unwrap_or_else(|| ScriptProfile::for_language(&self.config.target_language).engine);
        let compiler = LatexmkCompiler::new(&self.config.compiler, engine, work_dir.path());

        let (progress, mut events) = ProgressSink::channel();
        let pipeline = TranslationPipeline::builder(self.config.clone())
            .backend(service)
            .compiler(Arc::new(compiler))
            .progress(progress)
            .build()?;

        let progress_bar = Self::progress_bar();
        let bar = progress_bar.clone();
        let progress_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                bar.set_position((event.overall * PROGRESS_STEPS as f32) as u64);
                bar.set_message(format!(
                    "{} | {} in / {} out tokens",
                    event.message, event.input_tokens, event.output_tokens
                ));
            }
        });

        let result = pipeline.run(&document_id, tree).await;
        // Dropping the pipeline closes the channel and ends the progress task
        drop(pipeline);
        let _ = progress_task.await;
        progress_bar.finish_and_clear();

        self.write_outputs(&result, work_dir.path(), &output_dir, &pdf_path)?;
        Self::log_result(&result);
        Ok(result)
    }

    fn write_outputs(&self, result: &PipelineResult, work_dir: &Path, output_dir: &Path, pdf_path: &Path) -> Result<()> {
        if let Some(sources) = result.sources() {
            let source_dir = output_dir.join("source");
            sources.write_to(&source_dir)
                .with_context(|| format!("Failed to write translated sources to {:?}", source_dir))?;
            info!("Translated sources written to {:?}", source_dir);
        }

        if let Some(artifact) = result.artifact() {
            let artifact = if artifact.is_absolute() { artifact.to_path_buf() } else { work_dir.join(artifact) };
            FileManager::copy_file(&artifact, pdf_path)?;
            info!("Success: {:?}", pdf_path);
        }
        Ok(())
    }

    fn log_result(result: &PipelineResult) {
        for notice in result.notices() {
            warn!("{}", notice);
        }
        for warning in result.warnings() {
            warn!("{}", warning);
        }
        match result {
            PipelineResult::Failed { last_log: Some(log), .. } => {
                error!("{}", result.summary());
                let tail: Vec<&str> = log.lines().rev().take(20).collect();
                for line in tail.into_iter().rev() {
                    error!("  {}", line);
                }
            }
            PipelineResult::Failed { .. } => error!("{}", result.summary()),
            _ => info!("{}", result.summary()),
        }
        info!("{}", result.report().tokens.summary());
    }

    fn progress_bar() -> ProgressBar {
        let progress_bar = ProgressBar::new(PROGRESS_STEPS);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
            .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {percent}% {msg}"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress_bar.set_style(style.progress_chars("█▓▒░"));
        progress_bar
    }

    /// Identifier of a document, taken from its directory name
    pub fn document_id(source_dir: &Path) -> String {
        source_dir.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    pub fn output_pdf_name(document_id: &str, target_language: &str) -> String {
        format!("{}.{}.pdf", document_id, target_language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documentId_shouldUseDirectoryName() {
        assert_eq!(Controller::document_id(Path::new("/tmp/papers/2401.00001")), "2401.00001");
        assert_eq!(Controller::document_id(Path::new("/")), "document");
    }

    #[test]
    fn test_outputPdfName_shouldIncludeTargetLanguage() {
        assert_eq!(Controller::output_pdf_name("2401.00001", "zh"), "2401.00001.zh.pdf");
    }

    #[tokio::test]
    async fn test_run_missingSourceDir_shouldError() {
        let controller = Controller::with_config(Config::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = controller.run(dir.path().join("missing"), dir.path().join("out"), false).await;
        assert!(result.is_err());
    }
}
