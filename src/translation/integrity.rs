/*!
 * Structural integrity check of translated files.
 *
 * Compares a translated file with its source and reports drift the model may
 * have caused despite span isolation. Findings are warnings only.
 */

use once_cell::sync::Lazy;
use regex::Regex;

static BEGIN_ENV: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\begin\{[^}]+\}").expect("valid regex"));
static SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:part|chapter|section|subsection|subsubsection|paragraph)\*?\s*[\[{]").expect("valid regex")
});
static CITE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\cite[a-zA-Z]*\*?\s*[\[{]").expect("valid regex"));
static REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:ref|eqref|autoref|cref|Cref|pageref|nameref)\*?\s*\{").expect("valid regex")
});
static LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\\label\s*\{").expect("valid regex"));

const MAX_UNBALANCED_BRACES: i64 = 3;
const MAX_REFERENCE_LOSS: f64 = 0.15;

/// Counts of the structural features compared between source and translation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StructureCounts {
    pub environments: usize,
    pub sections: usize,
    pub citations: usize,
    pub references: usize,
    pub labels: usize,
    pub has_begin_document: bool,
    pub has_end_document: bool,
    /// Opening minus closing unescaped braces
    pub brace_balance: i64,
}

impl StructureCounts {
    pub fn of(content: &str) -> Self {
        Self {
            environments: BEGIN_ENV.find_iter(content).count(),
            sections: SECTION.find_iter(content).count(),
            citations: CITE.find_iter(content).count(),
            references: REF.find_iter(content).count(),
            labels: LABEL.find_iter(content).count(),
            has_begin_document: content.contains("\\begin{document}"),
            has_end_document: content.contains("\\end{document}"),
            brace_balance: brace_balance(content),
        }
    }
}

fn brace_balance(content: &str) -> i64 {
    let mut balance = 0;
    let mut escaped = false;
    for c in content.chars() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '{' => balance += 1,
            '}' => balance -= 1,
            _ => {}
        }
    }
    balance
}

fn count_dropped(source: usize, translated: usize) -> bool {
    source > 3 && (translated as f64) < source as f64 * (1.0 - MAX_REFERENCE_LOSS)
}

/// Warnings for `path` when `translated` drifted from `source`
pub fn check_file(path: &str, source: &str, translated: &str) -> Vec<String> {
    let before = StructureCounts::of(source);
    let after = StructureCounts::of(translated);
    let mut warnings = Vec::new();

    if before.has_begin_document && !after.has_begin_document {
        warnings.push(format!("{}: \\begin{{document}} lost in translation", path));
    }
    if before.has_end_document && !after.has_end_document {
        warnings.push(format!("{}: \\end{{document}} lost in translation", path));
    }

    if before.environments > 0 {
        let ratio = after.environments as f64 / before.environments as f64;
        if !(0.5..=2.0).contains(&ratio) {
            warnings.push(format!(
                "{}: environment count changed from {} to {}",
                path, before.environments, after.environments
            ));
        }
    }

    if before.sections.abs_diff(after.sections) > 1 {
        warnings.push(format!("{}: section count changed from {} to {}", path, before.sections, after.sections));
    }

    for (name, source_count, translated_count) in [
        ("citation", before.citations, after.citations),
        ("reference", before.references, after.references),
        ("label", before.labels, after.labels),
    ] {
        if count_dropped(source_count, translated_count) {
            warnings.push(format!("{}: {} count dropped from {} to {}", path, name, source_count, translated_count));
        }
    }

    if (after.brace_balance - before.brace_balance).abs() > MAX_UNBALANCED_BRACES {
        warnings.push(format!("{}: {} unbalanced braces", path, after.brace_balance - before.brace_balance));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkFile_identical_shouldHaveNoWarnings() {
        let source = "\\begin{document}\\section{A}\\label{a} See \\ref{a}.\\end{document}";
        assert!(check_file("main.tex", source, source).is_empty());
    }

    #[test]
    fn test_checkFile_lostDocumentEnd_shouldWarn() {
        let warnings = check_file("main.tex", "\\begin{document}x\\end{document}", "\\begin{document}x");
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("end{document}"));
    }

    #[test]
    fn test_checkFile_droppedCitations_shouldWarn() {
        let source = "\\cite{a} \\cite{b} \\cite{c} \\cite{d} \\cite{e}";
        let translated = "\\cite{a} \\cite{b} \\cite{c}";
        let warnings = check_file("sec.tex", source, translated);
        assert!(warnings.iter().any(|w| w.contains("citation count dropped")));
    }

    #[test]
    fn test_checkFile_fewReferences_shouldNotWarn() {
        assert!(check_file("sec.tex", "\\cite{a} \\cite{b}", "none").is_empty());
    }

    #[test]
    fn test_checkFile_unbalancedBraces_shouldWarn() {
        let warnings = check_file("sec.tex", "text", "{{{{ text");
        assert!(warnings.iter().any(|w| w.contains("unbalanced braces")));
    }

    #[test]
    fn test_structureCounts_shouldIgnoreEscapedBraces() {
        assert_eq!(StructureCounts::of(r"\{ \} {a}").brace_balance, 0);
    }
}
