/*!
 * Tests for classification, span extraction and reintegration across a tree
 */

use proptest::prelude::*;
use std::collections::HashMap;

use texwai::latex::cleaner::clean_source;
use texwai::latex::{classify, reintegrate, FileKind, ScanMode, SpanExtractor};

use crate::common::{self, MAIN_TEX, SEC1_TEX};

#[test]
fn test_classify_sampleTree_shouldFindEntrySectionAndBibliography() {
    let classification = classify(&common::sample_tree()).unwrap();

    assert_eq!(classification.entry, "main.tex");
    assert_eq!(classification.kind("sec1.tex"), Some(FileKind::IncludedContent));
    assert_eq!(classification.kind("refs.bib"), Some(FileKind::Bibliography));
    assert_eq!(classification.translatable_files(), vec!["main.tex", "sec1.tex"]);
    assert_eq!(classification.bibliography_files(), vec!["refs.bib"]);
}

#[test]
fn test_extract_spansOfEveryFile_shouldCoverContentExactly() {
    let tree = common::sample_tree();
    let extractor = SpanExtractor::for_tree(&tree);

    for (path, mode) in [("main.tex", ScanMode::Document), ("sec1.tex", ScanMode::Fragment)] {
        let content = tree.utf8(path).unwrap();
        let spans = extractor.extract(content, mode);

        let rebuilt: String = spans.iter().map(|s| s.slice(content)).collect();
        assert_eq!(rebuilt, content, "{}", path);
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }
}

#[test]
fn test_extract_mainTex_shouldNeverExposeMathOrCitationKeys() {
    let extractor = SpanExtractor::new();

    let main_prose: Vec<&str> = extractor.extract(MAIN_TEX, ScanMode::Document)
        .iter()
        .filter(|s| s.is_prose())
        .map(|s| s.slice(MAIN_TEX))
        .collect();
    let sec_prose: Vec<&str> = extractor.extract(SEC1_TEX, ScanMode::Fragment)
        .iter()
        .filter(|s| s.is_prose())
        .map(|s| s.slice(SEC1_TEX))
        .collect();

    assert!(main_prose.iter().any(|p| p.contains("Hello world")));
    assert!(main_prose.iter().all(|p| !p.contains("x=1") && !p.contains("documentclass")));
    assert!(sec_prose.iter().any(|p| p.contains("We describe the method")));
    assert!(sec_prose.iter().all(|p| !p.contains("knuth")));
}

#[test]
fn test_reintegrate_replacedProse_shouldKeepStructureVerbatim() {
    let spans = SpanExtractor::new().extract(SEC1_TEX, ScanMode::Fragment);
    let replacements: HashMap<usize, String> = spans.iter()
        .enumerate()
        .filter(|(_, s)| s.is_prose())
        .map(|(i, s)| (i, s.slice(SEC1_TEX).to_uppercase()))
        .collect();

    let file = reintegrate(SEC1_TEX, &spans, &replacements);

    assert!(file.content.contains("\\cite{knuth}"));
    assert!(file.content.contains("\\badmacro"));
    assert!(file.content.contains("WE DESCRIBE THE METHOD HERE."));
    assert_eq!(file.spans.len(), spans.len());
}

#[test]
fn test_cleanSource_shouldDropCommentOnlyLines() {
    let source = "Intro.\n% a private note\nMore text.\n\n\n\nEnd.\n";

    let cleaned = clean_source(source, false);

    assert!(!cleaned.contains("private note"));
    assert!(cleaned.contains("Intro.\nMore text.\n\nEnd."));
}

/// Pieces of LaTeX that exercise every scanner state, including broken input
const FRAGMENTS: &[&str] = &[
    "word ", "Prose text. ", "café", "中文", "ü", "\n", "\n\n", " ", "{", "}", "[", "]",
    "$", "$$", "%", "\\%", "\\$", "\\\\", "\\", "~", "^", "_", "&", "#",
    "\\verb|x%$|", "\\verb", "|", "\\(", "\\)", "\\[", "\\]",
    "\\begin{document}", "\\end{document}", "\\begin{itemize}", "\\end{itemize}",
    "\\begin{verbatim}", "\\end{verbatim}", "\\begin{equation}", "\\end{equation}",
    "\\begin{tabular}", "\\item ", "\\text{", "\\mbox{", "\\url{", "\\href{", "\\cite{",
    "\\section{", "\\emph{", "\\def\\a#1{", "\\let\\b=", "\\documentclass{article}",
];

fn latex_like() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(FRAGMENTS), 0..64).prop_map(|parts| parts.concat())
}

fn scan_mode() -> impl Strategy<Value = ScanMode> {
    prop_oneof![Just(ScanMode::Document), Just(ScanMode::Fragment)]
}

proptest! {
    #[test]
    fn test_extract_latexLikeInput_shouldReintegrateToItself(content in latex_like(), mode in scan_mode()) {
        let spans = SpanExtractor::new().extract(&content, mode);

        let mut offset = 0;
        for span in &spans {
            prop_assert_eq!(span.start, offset);
            prop_assert!(span.end > span.start);
            offset = span.end;
        }
        prop_assert_eq!(offset, content.len());

        let file = reintegrate(&content, &spans, &HashMap::new());
        prop_assert_eq!(&file.content, &content);
    }

    #[test]
    fn test_extract_arbitraryText_shouldNotPanic(content in any::<String>(), mode in scan_mode()) {
        let spans = SpanExtractor::new().extract(&content, mode);
        let rebuilt: String = spans.iter().map(|s| s.slice(&content)).collect();
        prop_assert_eq!(rebuilt, content);
    }

    #[test]
    fn test_reintegrate_replacedProse_shouldKeepEveryStructuralSpan(content in latex_like(), mode in scan_mode()) {
        let spans = SpanExtractor::new().extract(&content, mode);
        let replacements: HashMap<usize, String> = spans.iter()
            .enumerate()
            .filter(|(_, s)| s.is_prose())
            .map(|(i, _)| (i, "traduit".to_string()))
            .collect();

        let file = reintegrate(&content, &spans, &replacements);

        prop_assert_eq!(file.spans.len(), spans.len());
        for (source, output) in spans.iter().zip(&file.spans) {
            prop_assert_eq!(source.kind, output.kind);
            if !source.is_prose() {
                prop_assert_eq!(source.slice(&content), output.slice(&file.content));
            }
        }
    }
}
