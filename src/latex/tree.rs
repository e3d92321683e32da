/*!
 * In-memory LaTeX source tree.
 *
 * A `SourceTree` maps normalised relative paths (always `/`-separated) to raw
 * file bytes. Iteration order is the path order, which keeps every stage that
 * walks the tree deterministic.
 */

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use crate::file_utils::FileManager;

/// Ordered collection of `relative path -> bytes`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    files: BTreeMap<String, Vec<u8>>,
}

impl SourceTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, content)` pairs
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: AsRef<str>,
        C: Into<Vec<u8>>,
    {
        let mut tree = Self::new();
        for (path, content) in files {
            tree.insert(path.as_ref(), content);
        }
        tree
    }

    /// Load every regular file below `root`
    pub fn load_dir<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref();
        let mut tree = Self::new();

        for entry in WalkDir::new(root).follow_links(true) {
            let entry = entry.context("Failed to read directory entry")?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(root)
                .with_context(|| format!("Path {:?} escapes source root {:?}", entry.path(), root))?;
            let bytes = fs::read(entry.path())
                .with_context(|| format!("Failed to read file: {:?}", entry.path()))?;
            tree.insert(&relative.to_string_lossy(), bytes);
        }

        Ok(tree)
    }

    /// Write every file below `root`, creating directories as needed
    pub fn write_to<P: AsRef<Path>>(&self, root: P) -> Result<()> {
        let root = root.as_ref();
        for (path, bytes) in &self.files {
            let target = root.join(path);
            if let Some(parent) = target.parent() {
                FileManager::ensure_dir(parent)?;
            }
            fs::write(&target, bytes)
                .with_context(|| format!("Failed to write to file: {:?}", target))?;
        }
        Ok(())
    }

    /// Insert or replace a file
    pub fn insert(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), content.into());
    }

    /// Raw bytes of a file
    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    /// File content as text; invalid UTF-8 is replaced lossily
    pub fn text(&self, path: &str) -> Option<Cow<'_, str>> {
        self.get(path).map(String::from_utf8_lossy)
    }

    /// File content as text, only when it is valid UTF-8
    pub fn utf8(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(path, bytes)` pairs in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, b)| (p.as_str(), b.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Normalise a relative path: `/` separators, no `./` segments, `..` folded
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Directory part of a normalised path ("" for top-level files)
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|idx| &path[..idx]).unwrap_or("")
}

/// Lowercased extension of a path, without the dot
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.')
        .filter(|idx| *idx > 0)
        .map(|idx| name[idx + 1..].to_lowercase())
}

/// File name without directory or extension
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizePath_shouldFoldDotSegments() {
        assert_eq!(normalize_path("./sections/../sec1.tex"), "sec1.tex");
        assert_eq!(normalize_path("chapters\\intro.tex"), "chapters/intro.tex");
        assert_eq!(normalize_path("a//b/./c.tex"), "a/b/c.tex");
    }

    #[test]
    fn test_pathHelpers_shouldSplitComponents() {
        assert_eq!(parent_dir("a/b/c.tex"), "a/b");
        assert_eq!(parent_dir("main.tex"), "");
        assert_eq!(extension("refs.BIB"), Some("bib".to_string()));
        assert_eq!(extension(".latexmkrc"), None);
        assert_eq!(file_stem("sections/sec1.tex"), "sec1");
    }

    #[test]
    fn test_sourceTree_writeThenLoad_shouldPreserveBytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let tree = SourceTree::from_files([
            ("main.tex", b"\\documentclass{article}".to_vec()),
            ("fig/plot.pdf", vec![0xff, 0x00, 0x10]),
        ]);

        tree.write_to(dir.path()).unwrap();
        let loaded = SourceTree::load_dir(dir.path()).unwrap();

        assert_eq!(loaded, tree);
        assert!(loaded.utf8("fig/plot.pdf").is_none());
    }
}
