/*!
 * File classification and inclusion graph.
 *
 * Every file of a tree gets exactly one `FileKind`. TeX files are inspected
 * with their comments stripped, so a commented-out `\input` never pulls a
 * file into the document.
 */

use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::cleaner::strip_comments;
use super::tree::{extension, normalize_path, parent_dir, SourceTree};
use crate::errors::ClassificationError;

/// Role of a file in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Entry,
    IncludedContent,
    MacroOrStyle,
    Bibliography,
    NonDocument,
}

impl FileKind {
    /// Whether files of this kind have prose to translate
    pub fn is_translatable(&self) -> bool {
        matches!(self, Self::Entry | Self::IncludedContent)
    }
}

/// Classification of one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClassification {
    pub kind: FileKind,
    /// Tree paths this file includes
    pub includes: BTreeSet<String>,
}

/// Classification of a whole tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeClassification {
    /// Path of the single entry document
    pub entry: String,
    pub files: BTreeMap<String, FileClassification>,
    /// Files reachable from the entry, in depth-first inclusion order
    pub inclusion_order: Vec<String>,
}

impl TreeClassification {
    pub fn kind(&self, path: &str) -> Option<FileKind> {
        self.files.get(path).map(|c| c.kind)
    }

    /// Translatable files in inclusion order, entry first
    pub fn translatable_files(&self) -> Vec<&str> {
        self.inclusion_order.iter()
            .filter(|path| self.kind(path).is_some_and(|kind| kind.is_translatable()))
            .map(String::as_str)
            .collect()
    }

    /// Bibliography files, in path order
    pub fn bibliography_files(&self) -> Vec<&str> {
        self.files.iter()
            .filter(|(_, c)| c.kind == FileKind::Bibliography)
            .map(|(path, _)| path.as_str())
            .collect()
    }
}

const TEX_EXTENSIONS: &[&str] = &["tex", "ltx", "latex"];
const STYLE_EXTENSIONS: &[&str] = &["sty", "cls", "bst", "def", "cfg", "clo"];
const BIBLIOGRAPHY_EXTENSIONS: &[&str] = &["bib", "bbl"];

/// Lines counted as macro definitions
const MACRO_PREFIXES: &[&str] = &[
    "\\newcommand", "\\renewcommand", "\\providecommand", "\\def", "\\gdef", "\\edef",
    "\\let", "\\DeclareMathOperator", "\\newenvironment", "\\renewenvironment",
    "\\RequirePackage", "\\usepackage", "\\makeatletter", "\\makeatother",
];

/// Share of non-blank lines above which a file is treated as a macro file
const MACRO_LINE_RATIO: f64 = 0.6;

static DOCUMENTCLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\documentclass\s*(?:\[[^\]]*\])?\s*\{([^}]*)\}").expect("valid regex")
});

static BEGIN_DOCUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\begin\s*\{document\}").expect("valid regex")
});

/// Classes of files that compile on their own but belong to a parent document
const CHILD_CLASSES: &[&str] = &["subfiles", "standalone"];

static PROVIDES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\Provides(?:Package|Class|File)\b").expect("valid regex")
});

static BIBTEX_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*@[A-Za-z]+\s*\{").expect("valid regex")
});

static INPUT_BRACED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:input|include|subfile)\s*\{([^}]+)\}").expect("valid regex")
});

static INPUT_BARE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\input\s+([^\s{}\\%]+)").expect("valid regex")
});

static IMPORT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(sub)?(?:import|includefrom|inputfrom)\*?\s*\{([^}]*)\}\s*\{([^}]+)\}").expect("valid regex")
});

static BIBLIOGRAPHY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\bibliography\s*\{([^}]+)\}").expect("valid regex")
});

static ADDBIBRESOURCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\addbibresource\s*(?:\[[^\]]*\])?\s*\{([^}]+)\}").expect("valid regex")
});

static PACKAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:usepackage|RequirePackage)\s*(?:\[[^\]]*\])?\s*\{([^}]+)\}").expect("valid regex")
});

/// A reference found in a file, with the extension tried when it has none
struct Reference {
    offset: usize,
    path: String,
    default_extension: &'static str,
}

/// Collect inclusion references in order of appearance
fn find_references(text: &str) -> Vec<Reference> {
    let mut references = Vec::new();
    let mut push = |offset: usize, path: &str, default_extension: &'static str| {
        let path = path.trim();
        if !path.is_empty() {
            references.push(Reference { offset, path: path.to_string(), default_extension });
        }
    };

    for captures in INPUT_BRACED.captures_iter(text) {
        push(captures.get(0).map_or(0, |m| m.start()), &captures[1], "tex");
    }
    for captures in INPUT_BARE.captures_iter(text) {
        push(captures.get(0).map_or(0, |m| m.start()), &captures[1], "tex");
    }
    for captures in IMPORT.captures_iter(text) {
        let joined = format!("{}/{}", captures[2].trim().trim_end_matches('/'), captures[3].trim());
        push(captures.get(0).map_or(0, |m| m.start()), &joined, "tex");
    }
    for captures in BIBLIOGRAPHY.captures_iter(text) {
        let offset = captures.get(0).map_or(0, |m| m.start());
        for name in captures[1].split(',') {
            push(offset, name, "bib");
        }
    }
    for captures in ADDBIBRESOURCE.captures_iter(text) {
        push(captures.get(0).map_or(0, |m| m.start()), &captures[1], "bib");
    }
    for captures in PACKAGE.captures_iter(text) {
        let offset = captures.get(0).map_or(0, |m| m.start());
        for name in captures[1].split(',') {
            push(offset, name, "sty");
        }
    }
    if let Some(captures) = DOCUMENTCLASS.captures(text) {
        push(captures.get(0).map_or(0, |m| m.start()), &captures[1], "cls");
    }

    references.sort_by_key(|r| r.offset);
    references
}

/// Resolve a reference against the includer's directory, then the tree root
fn resolve(tree: &SourceTree, includer: &str, reference: &Reference) -> Option<String> {
    let has_extension = extension(&reference.path).is_some();
    let mut names = vec![reference.path.clone()];
    if !has_extension || reference.default_extension == "bib" {
        names.push(format!("{}.{}", reference.path, reference.default_extension));
    }

    let dir = parent_dir(includer);
    let bases: Vec<String> = if dir.is_empty() { vec![String::new()] } else { vec![dir.to_string(), String::new()] };

    // Packages and classes only count when the tree ships them
    let local_only = matches!(reference.default_extension, "sty" | "cls");

    for base in &bases {
        for name in &names {
            let candidate = if base.is_empty() { normalize_path(name) } else { normalize_path(&format!("{}/{}", base, name)) };
            if local_only && !candidate.ends_with(&format!(".{}", reference.default_extension)) {
                continue;
            }
            if tree.contains(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

fn has_extension_in(path: &str, set: &[&str]) -> bool {
    extension(path).is_some_and(|ext| set.contains(&ext.as_str()))
}

fn is_macro_file(text: &str) -> bool {
    if PROVIDES.is_match(text) {
        return true;
    }
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return false;
    }
    let macro_lines = lines.iter()
        .filter(|line| MACRO_PREFIXES.iter().any(|prefix| line.starts_with(prefix)))
        .count();
    macro_lines as f64 / lines.len() as f64 > MACRO_LINE_RATIO
}

fn is_bibliography_text(text: &str) -> bool {
    text.trim_start().starts_with("\\begin{thebibliography}") || BIBTEX_ENTRY.is_match(text)
}

/// Classify every file of a tree and build its inclusion graph
pub fn classify(tree: &SourceTree) -> Result<TreeClassification, ClassificationError> {
    let mut kinds: BTreeMap<String, Option<FileKind>> = BTreeMap::new();
    let mut edges: BTreeMap<String, Vec<String>> = BTreeMap::new();
    // Files with a document class, and whether they also open a document body
    let mut entries: Vec<(String, bool)> = Vec::new();

    for (path, _) in tree.iter() {
        if has_extension_in(path, BIBLIOGRAPHY_EXTENSIONS) {
            kinds.insert(path.to_string(), Some(FileKind::Bibliography));
            continue;
        }
        let is_style = has_extension_in(path, STYLE_EXTENSIONS);
        if !is_style && !has_extension_in(path, TEX_EXTENSIONS) {
            kinds.insert(path.to_string(), Some(FileKind::NonDocument));
            continue;
        }

        let text = strip_comments(&tree.text(path).unwrap_or_default());
        let mut targets: Vec<String> = Vec::new();
        for reference in find_references(&text) {
            match resolve(tree, path, &reference) {
                Some(target) if target != path && !targets.contains(&target) => targets.push(target),
                Some(_) => {}
                None => debug!("Unresolved reference {:?} in {}", reference.path, path),
            }
        }
        edges.insert(path.to_string(), targets);

        let kind = if is_style {
            Some(FileKind::MacroOrStyle)
        } else if let Some(class) = DOCUMENTCLASS.captures(&text).map(|c| c[1].trim().to_string()) {
            if CHILD_CLASSES.contains(&class.as_str()) {
                None
            } else {
                entries.push((path.to_string(), BEGIN_DOCUMENT.is_match(&text)));
                Some(FileKind::Entry)
            }
        } else if is_macro_file(&text) {
            Some(FileKind::MacroOrStyle)
        } else if is_bibliography_text(&text) {
            Some(FileKind::Bibliography)
        } else {
            None
        };
        kinds.insert(path.to_string(), kind);
    }

    // A body-less document class file only counts when no file has a body
    let with_body: Vec<String> = entries.iter()
        .filter(|(_, has_body)| *has_body)
        .map(|(path, _)| path.clone())
        .collect();
    let mut candidates: Vec<String> = if with_body.is_empty() {
        entries.iter().map(|(path, _)| path.clone()).collect()
    } else {
        with_body
    };
    let entry = match candidates.len() {
        0 => return Err(ClassificationError::NoEntryFound),
        1 => candidates.remove(0),
        _ => {
            candidates.sort();
            return Err(ClassificationError::AmbiguousEntry(candidates));
        }
    };
    for (path, _) in &entries {
        if *path != entry {
            debug!("{} declares a document class but is not the entry", path);
            kinds.insert(path.clone(), None);
        }
    }

    let inclusion_order = depth_first(&entry, &edges);
    let reachable: HashSet<&str> = inclusion_order.iter().map(String::as_str).collect();

    let files = kinds.into_iter()
        .map(|(path, kind)| {
            let kind = kind.unwrap_or(if reachable.contains(path.as_str()) {
                FileKind::IncludedContent
            } else {
                FileKind::NonDocument
            });
            let includes = edges.get(&path)
                .map(|targets| targets.iter().cloned().collect())
                .unwrap_or_default();
            (path, FileClassification { kind, includes })
        })
        .collect();

    Ok(TreeClassification { entry, files, inclusion_order })
}

/// Pre-order traversal, each file visited once, children in appearance order
fn depth_first(entry: &str, edges: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    let mut stack = vec![entry.to_string()];

    while let Some(path) = stack.pop() {
        if !visited.insert(path.clone()) {
            continue;
        }
        if let Some(children) = edges.get(&path) {
            stack.extend(children.iter().rev().filter(|c| !visited.contains(*c)).cloned());
        }
        order.push(path);
    }
    order
}
