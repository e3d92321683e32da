/*!
 * Tests for the compiler seam, diagnosis, rescue strategies and timeouts
 */

use std::time::Duration;

use texwai::app_config::CompilerSettings;
use texwai::compile::{diagnose, CompileTimeout, ErrorClass, PreambleRescuer, Rescuer, WorkingTree};
use texwai::latex::SourceTree;

use crate::common::{self, SEC1_ERROR_LOG};

fn working_tree() -> WorkingTree {
    WorkingTree::new("main.tex", common::sample_tree()).with_documents(["main.tex", "sec1.tex", "refs.bib"])
}

fn float_tree() -> WorkingTree {
    let files = SourceTree::from_files([
        (
            "main.tex",
            "\\documentclass{revtex4}\n\\usepackage{broken}\n\\begin{document}\nText.\n\\begin{figure}[t]\n\\includegraphics{a.png}\n\\end{figure}\n\\input{sec}\n\\end{document}\n",
        ),
        ("sec.tex", "More.\n\\begin{table*}\n\\caption{T}\n\\end{table*}\n"),
    ]);
    WorkingTree::new("main.tex", files).with_documents(["main.tex", "sec.tex"])
}

#[test]
fn test_diagnose_sectionError_shouldResolveIncludedFile() {
    let diagnosis = diagnose(SEC1_ERROR_LOG, &working_tree());

    assert_eq!(diagnosis.file, "sec1.tex");
    assert_eq!(diagnosis.line, Some(4));
    assert_eq!(diagnosis.class, ErrorClass::UndefinedControlSequence);
    assert!(diagnosis.excerpt.contains("\\badmacro"));
}

#[test]
fn test_diagnose_noFileLine_shouldFallBackToEntry() {
    let diagnosis = diagnose("! Emergency stop.\n<*> main.tex\n", &working_tree());
    assert_eq!(diagnosis.file, "main.tex");
    assert_eq!(diagnosis.class, ErrorClass::EmergencyStop);
}

#[test]
fn test_rescuer_strategyTwo_shouldStripFloatsEverywhere() {
    let rescuer: Box<dyn Rescuer> = Box::new(PreambleRescuer::for_language("fr"));
    assert_eq!(rescuer.strategies(), 2);

    let rescued = rescuer.rescue(&float_tree(), 2).unwrap();

    let main = rescued.text("main.tex").unwrap();
    let sec = rescued.text("sec.tex").unwrap();
    assert!(!main.contains("broken"));
    assert!(!main.contains("\\begin{figure}"));
    assert!(!sec.contains("\\begin{table*}"));
    assert!(main.contains("Text."));
    assert!(sec.contains("More."));
}

#[test]
fn test_rescuer_appliedTwice_shouldBeIdempotent() {
    let rescuer = PreambleRescuer::for_language("zh");

    for strategy in 1..=2 {
        let once = rescuer.rescue(&float_tree(), strategy).unwrap();
        let twice = rescuer.rescue(&once, strategy).unwrap();
        assert_eq!(once.files, twice.files, "strategy {}", strategy);
    }
}

#[test]
fn test_rescuer_unknownStrategy_shouldNotApply() {
    let rescuer = PreambleRescuer::for_language("zh");
    assert!(rescuer.rescue(&float_tree(), 3).is_none());
}

#[test]
fn test_compileTimeout_fromSettings_shouldScaleWithOutputTokens() {
    let settings = CompilerSettings { base_timeout_secs: 60, timeout_secs_per_unit: 10, ..CompilerSettings::default() };
    let timeout = CompileTimeout::from_settings(&settings);

    assert_eq!(timeout.for_tokens(0), Duration::from_secs(60));
    assert_eq!(timeout.for_tokens(30_000), Duration::from_secs(90));
    assert_eq!(timeout.for_tokens(u64::MAX), Duration::from_secs(600));
}

#[test]
fn test_mockCompiler_blockingCall_shouldRecordAttemptNumber() {
    use texwai::compile::mock::MockCompiler;
    use texwai::compile::{CompileRequest, Compiler};

    let compiler = MockCompiler::failing(SEC1_ERROR_LOG);
    let request = CompileRequest { attempt: 4, timeout: Duration::from_secs(1) };

    let attempt = tokio_test::block_on(compiler.compile(&working_tree(), request)).unwrap();

    assert!(!attempt.success);
    assert_eq!(attempt.attempt, 4);
    assert!(attempt.artifact.is_none());
}
