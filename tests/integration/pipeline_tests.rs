/*!
 * End-to-end pipeline runs against mock translation and compile services.
 */

use std::time::Duration;

use texwai::app_config::{BatchingPolicy, Config};
use texwai::compile::mock::{MockCompileStep, MockCompiler};
use texwai::latex::{ScanMode, SourceTree, SpanExtractor};
use texwai::pipeline::{PipelinePhase, PipelineResult, PreflightCheck, ProgressSink, TranslationPipeline};
use texwai::providers::mock::MockProvider;
use texwai::translation::RetryPolicy;

use crate::common::{self, COMMENTED_SECTION_TEX, MAIN_TEX, REFS_BIB, SEC1_TEX};

/// Every structural span of `source` appears in `output`, byte for byte and in order
fn assert_structure_preserved(source: &str, output: &str, mode: ScanMode) {
    let spans = SpanExtractor::new().extract(source, mode);
    let mut cursor = 0;
    for span in spans.iter().filter(|s| !s.is_prose()) {
        let text = span.slice(source);
        let found = output[cursor..]
            .find(text)
            .unwrap_or_else(|| panic!("structural text {:?} missing after byte {} of {:?}", text, cursor, output));
        cursor += found + text.len();
    }
}

#[tokio::test]
async fn test_pipeline_threeFileTree_shouldTranslateTexAndKeepBib() {
    common::init_logging();
    let provider = MockProvider::working();
    let compiler = MockCompiler::succeeding();

    let result = common::pipeline(provider.clone(), compiler.clone())
        .run("2401.00001", common::sample_tree())
        .await;

    assert!(matches!(result, PipelineResult::Completed { .. }), "{}", result.summary());
    let sources = result.sources().unwrap();
    assert!(sources.utf8("main.tex").unwrap().contains("[TRANSLATED] Hello world"));
    assert!(sources.utf8("main.tex").unwrap().contains("$x=1$"));
    assert!(sources.utf8("sec1.tex").unwrap().contains("[TRANSLATED] We describe the method here."));
    assert_eq!(sources.utf8("refs.bib"), Some(REFS_BIB));

    // Only .tex prose reaches the provider
    for request in provider.requests() {
        assert!(!request.text().contains("@book"));
    }
    assert_eq!(compiler.compile_count(), 1);
}

#[tokio::test]
async fn test_pipeline_emptyResponses_shouldFallBackWithOneNotice() {
    let provider = MockProvider::empty();

    let result = common::pipeline(provider.clone(), MockCompiler::succeeding())
        .run("doc", common::single_paragraph_tree())
        .await;

    match &result {
        PipelineResult::CompletedWithWarnings { notices, sources, .. } => {
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].attempts, 3);
            let main = sources.utf8("main.tex").unwrap();
            assert!(main.starts_with("% texwai: 1 passage(s)"));
            assert!(main.contains("Only one paragraph here."));
        }
        other => panic!("expected CompletedWithWarnings, got {}", other.summary()),
    }
    assert_eq!(provider.request_count(), 3);
    assert!(result.is_success());
}

#[tokio::test]
async fn test_pipeline_errorInSection_shouldPatchOnlyThatFile() {
    let compiler = common::sec1_compiler();
    let provider = MockProvider::working().with_repair(common::remove_bad_macro);

    let result = common::pipeline(provider, compiler.clone())
        .run("doc", common::sample_tree())
        .await;

    assert!(matches!(result, PipelineResult::Completed { .. }), "{}", result.summary());
    assert!(result.warnings().is_empty(), "{:?}", result.warnings());
    assert_eq!(result.report().attempts.len(), 2);
    assert_eq!(result.report().patched_files, vec!["sec1.tex"]);
    assert_eq!(result.report().rescue_strategy, None);

    let compiled = compiler.compiled();
    assert_eq!(compiled[0].text("main.tex"), compiled[1].text("main.tex"));
    assert_eq!(compiled[0].text("refs.bib"), compiled[1].text("refs.bib"));
    assert_ne!(compiled[0].text("sec1.tex"), compiled[1].text("sec1.tex"));
    assert!(!result.sources().unwrap().utf8("sec1.tex").unwrap().contains("\\badmacro"));
}

#[tokio::test]
async fn test_pipeline_manyFiles_shouldRespectConcurrencyLimit() {
    let mut config = common::config();
    config.pipeline.max_concurrent_requests = 4;
    let provider = MockProvider::slow(20);

    let result = common::pipeline_with(config, provider.clone(), MockCompiler::succeeding())
        .run("doc", common::many_sections_tree(12))
        .await;

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(provider.request_count(), 12);
    assert!(provider.max_in_flight() <= 4, "max in flight {}", provider.max_in_flight());
    assert!(provider.max_in_flight() >= 2);
}

#[tokio::test]
async fn test_pipeline_wholeFileBatching_shouldSendOneRequestPerFile() {
    let mut config = common::config();
    config.pipeline.batching = BatchingPolicy::WholeFile;
    let provider = MockProvider::working();

    let result = common::pipeline_with(config, provider.clone(), MockCompiler::succeeding())
        .run("doc", common::sample_tree())
        .await;

    assert!(result.is_success());
    assert_eq!(provider.request_count(), 2);
    assert_eq!(result.report().units, 2);
}

#[tokio::test]
async fn test_pipeline_compilerAlwaysFails_shouldStopAfterThreeFixAttempts() {
    let mut config = common::config();
    config.pipeline.rescue = false;
    let compiler = MockCompiler::failing(common::SEC1_ERROR_LOG);
    let provider = MockProvider::working()
        .with_repair(|request| format!("{}% attempted fix\n", request.text()));

    let result = common::pipeline_with(config, provider.clone(), compiler.clone())
        .run("doc", common::sample_tree())
        .await;

    match &result {
        PipelineResult::Failed { reason, last_log, report } => {
            assert!(reason.contains("3 attempt(s)"), "{}", reason);
            assert_eq!(last_log.as_deref(), Some(common::SEC1_ERROR_LOG));
            assert_eq!(report.attempts.len(), 3);
        }
        other => panic!("expected failure, got {}", other.summary()),
    }
    assert_eq!(compiler.compile_count(), 3);
}

#[tokio::test]
async fn test_pipeline_rescueStrategyOne_shouldCompleteWithWarning() {
    // Fix loop exhausts on the unchanged patch, first rescue compile succeeds
    let compiler = MockCompiler::scripted([MockCompileStep::Fail("! LaTeX Error: File `fancy.sty' not found.".to_string())]);

    let result = common::pipeline(MockProvider::working(), compiler.clone())
        .run("doc", common::sample_tree())
        .await;

    assert!(result.is_success(), "{}", result.summary());
    assert_eq!(result.report().rescue_strategy, Some(1));
    assert!(result.warnings().iter().any(|w| w.contains("rescue strategy 1")));

    let rescued = &compiler.compiled()[1];
    let main = rescued.text("main.tex").unwrap();
    assert!(main.contains("\\usepackage[UTF8]{ctex}"));
    assert!(main.contains("\\begin{document}"));
    assert_eq!(compiler.requests()[1].attempt, 2);
}

#[tokio::test]
async fn test_pipeline_cancelled_shouldFailWithoutArtifact() {
    let pipeline = common::pipeline(MockProvider::slow(10_000), MockCompiler::succeeding());

    let result = pipeline
        .run_until("doc", common::sample_tree(), tokio::time::sleep(Duration::from_millis(50)))
        .await;

    assert!(matches!(&result, PipelineResult::Failed { reason, .. } if reason.contains("cancelled")));
    assert!(result.artifact().is_none());
    assert!(result.report().attempts.is_empty());
}

#[tokio::test]
async fn test_pipeline_progress_shouldEndWithFinished() {
    let (sink, mut events) = ProgressSink::channel();
    let pipeline = TranslationPipeline::builder(Config::default())
        .backend(std::sync::Arc::new(MockProvider::working()))
        .compiler(std::sync::Arc::new(MockCompiler::succeeding()))
        .retry(RetryPolicy::immediate(1))
        .progress(sink)
        .build()
        .unwrap();

    let result = pipeline.run("doc", common::sample_tree()).await;
    drop(pipeline);
    assert!(result.is_success());

    let mut phases = Vec::new();
    while let Some(event) = events.recv().await {
        phases.push(event.phase);
    }
    assert_eq!(phases.first(), Some(&PipelinePhase::Classifying));
    assert_eq!(phases.last(), Some(&PipelinePhase::Finished));
    assert!(phases.contains(&PipelinePhase::Preflight));
    assert!(phases.contains(&PipelinePhase::Translating));
    assert!(phases.contains(&PipelinePhase::Compiling));
}

#[tokio::test]
async fn test_pipeline_tokenUsage_shouldBeReported() {
    let result = common::pipeline(MockProvider::working(), MockCompiler::succeeding())
        .run("doc", common::sample_tree())
        .await;

    let tokens = &result.report().tokens;
    assert!(tokens.output_tokens > 0);
    assert!(tokens.input_tokens > 0);
    assert_eq!(tokens.provider, "Ollama");
    assert!(MAIN_TEX.contains("\\input{sec1}"));
}

#[tokio::test]
async fn test_pipeline_commentsAndBlankRuns_shouldSurviveByteForByte() {
    let mut config = common::config();
    config.target_language = "fr".to_string();
    let tree = SourceTree::from_files([
        ("main.tex", MAIN_TEX),
        ("sec1.tex", COMMENTED_SECTION_TEX),
        ("refs.bib", REFS_BIB),
    ]);

    let result = common::pipeline_with(config, MockProvider::working(), MockCompiler::succeeding())
        .run("doc", tree)
        .await;

    assert!(result.is_success(), "{}", result.summary());
    let sources = result.sources().unwrap();
    let section = sources.utf8("sec1.tex").unwrap();
    assert_structure_preserved(MAIN_TEX, sources.utf8("main.tex").unwrap(), ScanMode::Document);
    assert_structure_preserved(COMMENTED_SECTION_TEX, section, ScanMode::Fragment);
    assert!(section.starts_with("% Draft notes for the reviewers\n"));
    assert!(section.contains("\\begin{comment}\nOld paragraph.\n\\end{comment}"));
    assert!(section.contains("[TRANSLATED] The results are good."));
}

#[tokio::test]
async fn test_pipeline_sourceAlreadyBroken_shouldRecordFailedPreflight() {
    let compiler = common::sec1_compiler();
    let provider = MockProvider::working().with_repair(common::remove_bad_macro);

    let result = common::pipeline_with(Config::default(), provider, compiler.clone())
        .run("doc", common::sample_tree())
        .await;

    assert!(result.is_success(), "{}", result.summary());
    assert!(matches!(result.report().preflight, Some(PreflightCheck::Failed { .. })));
    assert!(result.warnings().iter().any(|w| w.contains("untranslated source failed to compile")));
    // Fix-loop attempts do not include the pre-flight compile
    assert_eq!(result.report().attempts.len(), 2);

    let compiled = compiler.compiled();
    assert_eq!(compiled.len(), 3);
    assert_eq!(compiled[0].text("sec1.tex"), Some(SEC1_TEX));
    assert!(compiled[0].documents.is_empty());
    assert_eq!(compiler.requests()[0].attempt, 0);
}

#[tokio::test]
async fn test_pipeline_sourceCompiles_shouldRecordPassedPreflight() {
    let compiler = MockCompiler::succeeding();

    let result = common::pipeline_with(Config::default(), MockProvider::working(), compiler.clone())
        .run("doc", common::sample_tree())
        .await;

    assert_eq!(result.report().preflight, Some(PreflightCheck::Passed));
    assert!(result.warnings().is_empty());
    assert_eq!(compiler.compile_count(), 2);
}
