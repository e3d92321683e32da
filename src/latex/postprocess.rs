/*!
 * Deterministic fixes applied to the translated tree before compiling.
 *
 * Every edit is confined to structural spans, so translated prose is never
 * rewritten here.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

use super::cleaner::{remove_surplus_ends, strip_comments, surplus_ends};
use super::scanner::{reintegrate, ReintegratedFile};
use super::tree::{file_stem, SourceTree};
use super::Span;
use crate::language_utils::ScriptProfile;

/// Output of the translation phase: documents with their span lists, plus
/// every other file untouched
#[derive(Debug, Clone, Default)]
pub struct TranslatedTree {
    pub entry: String,
    /// Document paths in inclusion order
    pub inclusion_order: Vec<String>,
    pub documents: BTreeMap<String, ReintegratedFile>,
    pub other: SourceTree,
}

impl TranslatedTree {
    /// Flatten into a plain source tree
    pub fn to_source_tree(&self) -> SourceTree {
        let mut tree = self.other.clone();
        for (path, file) in &self.documents {
            tree.insert(path, file.content.as_bytes());
        }
        tree
    }

    /// Documents in inclusion order, then any remaining ones in path order
    fn ordered_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.inclusion_order.iter()
            .filter(|p| self.documents.contains_key(*p))
            .cloned()
            .collect();
        let listed: HashSet<String> = paths.iter().cloned().collect();
        paths.extend(self.documents.keys().filter(|p| !listed.contains(*p)).cloned());
        paths
    }
}

static USEPACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\usepackage\s*(?:\[[^\]]*\])?\s*\{([^}]+)\}").expect("valid regex")
});

static LEGACY_CJK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^([ \t]*)(\\usepackage\s*(?:\[[^\]]*\])?\s*\{(?:CJK|CJKutf8)\})").expect("valid regex")
});

static BIBER_BACKEND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"backend\s*=\s*biber").expect("valid regex")
});

static LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\label\s*\{([^}]+)\}").expect("valid regex")
});

static LABEL_OR_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(label|ref|eqref|autoref|cref|Cref|pageref|nameref)(\s*)\{([^}]+)\}").expect("valid regex")
});

static DOUBLED_AND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s+and(?:\s+and)+\s+").expect("valid regex")
});

const BEGIN_DOCUMENT: &str = "\\begin{document}";

/// Apply `edit` to every structural span of a file, keeping spans consistent
fn edit_structural<F>(file: &mut ReintegratedFile, mut edit: F) -> bool
where
    F: FnMut(&str) -> Option<String>,
{
    let mut changed = false;
    let mut content = String::with_capacity(file.content.len());
    let mut spans = Vec::with_capacity(file.spans.len());

    for span in &file.spans {
        let text = span.slice(&file.content);
        let start = content.len();
        let replacement = if span.is_prose() { None } else { edit(text) };
        match replacement {
            Some(replacement) if replacement != text => {
                content.push_str(&replacement);
                changed = true;
            }
            _ => content.push_str(text),
        }
        spans.push(Span::new(start, content.len(), span.kind));
    }

    if changed {
        file.content = content;
        file.spans = spans;
    }
    changed
}

fn owned(cow: Cow<'_, str>) -> Option<String> {
    match cow {
        Cow::Owned(text) => Some(text),
        Cow::Borrowed(_) => None,
    }
}

/// Structure post-processor for one target language
#[derive(Debug, Clone)]
pub struct PostProcessor {
    profile: ScriptProfile,
}

impl PostProcessor {
    pub fn new(profile: ScriptProfile) -> Self {
        Self { profile }
    }

    pub fn for_language(code: &str) -> Self {
        Self::new(ScriptProfile::for_language(code))
    }

    /// Apply all fixes, returning a description of each change made
    pub fn apply(&self, tree: &mut TranslatedTree) -> Vec<String> {
        let mut changes = Vec::new();

        changes.extend(Self::remove_stray_ends(tree));
        changes.extend(self.ensure_script_packages(tree));
        if self.profile.packages.iter().any(|(_, package)| package == "ctex") {
            changes.extend(Self::disable_legacy_cjk(tree));
        }
        changes.extend(Self::use_bibtex_backend(tree));
        changes.extend(Self::resolve_duplicate_labels(tree));
        changes.extend(Self::collapse_author_separators(tree));

        for change in &changes {
            debug!("Post-processing: {}", change);
        }
        changes
    }

    /// Drop surplus `\end` markers the model wrote into prose, latest first.
    /// Structural text keeps its markers even when they are unbalanced.
    fn remove_stray_ends(tree: &mut TranslatedTree) -> Vec<String> {
        let mut changes = Vec::new();
        for (path, file) in tree.documents.iter_mut() {
            let mut surplus = surplus_ends(&file.content);
            if surplus.is_empty() {
                continue;
            }

            let mut replacements = HashMap::new();
            for (index, span) in file.spans.iter().enumerate().rev() {
                if surplus.values().all(|count| *count == 0) {
                    break;
                }
                if !span.is_prose() {
                    continue;
                }
                if let Some(text) = remove_surplus_ends(span.slice(&file.content), &mut surplus) {
                    replacements.insert(index, text);
                }
            }

            if !replacements.is_empty() {
                *file = reintegrate(&file.content, &file.spans, &replacements);
                changes.push(format!("removed stray \\end markers in {}", path));
            }
        }
        changes
    }

    fn ensure_script_packages(&self, tree: &mut TranslatedTree) -> Vec<String> {
        let Some(entry) = tree.documents.get_mut(&tree.entry) else {
            return Vec::new();
        };

        let preamble = match entry.content.find(BEGIN_DOCUMENT) {
            Some(idx) => strip_comments(&entry.content[..idx]),
            None => return Vec::new(),
        };
        let loaded: HashSet<String> = USEPACKAGE.captures_iter(&preamble)
            .flat_map(|c| c[1].split(',').map(|p| p.trim().to_string()).collect::<Vec<_>>())
            .collect();

        let missing: Vec<(String, String)> = self.profile.packages.iter()
            .filter(|(_, package)| !loaded.contains(package))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Vec::new();
        }

        let lines = ScriptProfile { packages: missing.clone(), ..self.profile.clone() }.usepackage_lines();
        let mut inserted = false;
        edit_structural(entry, |text| {
            if inserted {
                return None;
            }
            let idx = text.find(BEGIN_DOCUMENT)?;
            inserted = true;
            let line_start = text[..idx].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let mut updated = String::with_capacity(text.len() + 64);
            updated.push_str(&text[..line_start]);
            for line in &lines {
                updated.push_str(line);
                updated.push('\n');
            }
            updated.push_str(&text[line_start..]);
            Some(updated)
        });

        missing.iter().map(|(_, package)| format!("added package {}", package)).collect()
    }

    fn disable_legacy_cjk(tree: &mut TranslatedTree) -> Vec<String> {
        let Some(entry) = tree.documents.get_mut(&tree.entry) else {
            return Vec::new();
        };
        let changed = edit_structural(entry, |text| {
            owned(LEGACY_CJK.replace_all(text, "${1}% ${2}"))
        });
        if changed { vec!["commented out legacy CJK package".to_string()] } else { Vec::new() }
    }

    fn use_bibtex_backend(tree: &mut TranslatedTree) -> Vec<String> {
        let mut changes = Vec::new();
        for (path, file) in tree.documents.iter_mut() {
            if edit_structural(file, |text| owned(BIBER_BACKEND.replace_all(text, "backend=bibtex"))) {
                changes.push(format!("switched biblatex backend to bibtex in {}", path));
            }
        }
        changes
    }

    /// Later files rename labels an earlier file already defines
    fn resolve_duplicate_labels(tree: &mut TranslatedTree) -> Vec<String> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut changes = Vec::new();

        for path in tree.ordered_paths() {
            let Some(file) = tree.documents.get_mut(&path) else {
                continue;
            };

            let labels: Vec<String> = file.spans.iter()
                .filter(|span| !span.is_prose())
                .flat_map(|span| {
                    LABEL.captures_iter(span.slice(&file.content))
                        .map(|c| c[1].trim().to_string())
                        .collect::<Vec<_>>()
                })
                .collect();

            let stem = file_stem(&path).to_string();
            let renames: HashMap<String, String> = labels.iter()
                .filter(|label| seen.contains(*label))
                .map(|label| (label.clone(), format!("{}-{}", label, stem)))
                .collect();
            seen.extend(labels);

            if renames.is_empty() {
                continue;
            }

            edit_structural(file, |text| {
                owned(LABEL_OR_REFERENCE.replace_all(text, |c: &Captures| {
                    let keys: Vec<String> = c[3].split(',')
                        .map(|key| {
                            let trimmed = key.trim();
                            renames.get(trimmed).cloned().unwrap_or_else(|| key.to_string())
                        })
                        .collect();
                    let joined = keys.join(",");
                    if joined == c[3] {
                        c[0].to_string()
                    } else {
                        format!("\\{}{}{{{}}}", &c[1], &c[2], joined)
                    }
                }))
            });

            let mut renamed: Vec<&String> = renames.keys().collect();
            renamed.sort();
            for label in renamed {
                changes.push(format!("renamed duplicate label {} in {}", label, path));
            }
        }
        changes
    }

    fn collapse_author_separators(tree: &mut TranslatedTree) -> Vec<String> {
        let mut changes = Vec::new();
        for (path, file) in tree.documents.iter_mut() {
            if !path.ends_with(".bib") {
                continue;
            }
            if edit_structural(file, |text| owned(DOUBLED_AND.replace_all(text, " and "))) {
                changes.push(format!("collapsed repeated author separators in {}", path));
            }
        }
        changes
    }
}
