/*!
 * Grouping of prose spans into translation units.
 *
 * A unit is the payload of one request. Spans are never split; under the
 * paragraph policy consecutive spans of a file are packed greedily until the
 * character budget would be exceeded.
 */

use sha2::{Digest, Sha256};

use crate::app_config::BatchingPolicy;
use crate::latex::Span;

/// One prose span of a unit, split around its surrounding whitespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSegment {
    /// Index of the span in its file's span list
    pub span_index: usize,
    pub leading: String,
    /// The text actually sent for translation
    pub core: String,
    pub trailing: String,
}

impl UnitSegment {
    pub fn new(span_index: usize, text: &str) -> Self {
        let (leading, core, trailing) = split_whitespace(text);
        Self {
            span_index,
            leading: leading.to_string(),
            core: core.to_string(),
            trailing: trailing.to_string(),
        }
    }

    /// Span text with `core` replaced
    pub fn rebuild(&self, core: &str) -> String {
        format!("{}{}{}", self.leading, core, self.trailing)
    }
}

/// Split text into leading whitespace, core and trailing whitespace
pub fn split_whitespace(text: &str) -> (&str, &str, &str) {
    let trimmed_start = text.trim_start();
    let leading = &text[..text.len() - trimmed_start.len()];
    let core = trimmed_start.trim_end();
    let trailing = &trimmed_start[core.len()..];
    (leading, core, trailing)
}

/// Prose spans of one file submitted in one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    /// Source file path
    pub file: String,
    /// Stable request key
    pub key: String,
    pub segments: Vec<UnitSegment>,
}

impl TranslationUnit {
    pub fn new(file: impl Into<String>, segments: Vec<UnitSegment>) -> Self {
        let file = file.into();
        let key = unit_key(&file, &segments);
        Self { file, key, segments }
    }

    /// Characters of text sent for translation
    pub fn char_count(&self) -> usize {
        self.segments.iter().map(|s| s.core.chars().count()).sum()
    }

    /// Core texts in segment order
    pub fn source_texts(&self) -> Vec<&str> {
        self.segments.iter().map(|s| s.core.as_str()).collect()
    }

    /// Span replacements built from translated cores, in segment order
    pub fn replacements(&self, cores: &[String]) -> Vec<(usize, String)> {
        self.segments.iter()
            .zip(cores)
            .map(|(segment, core)| (segment.span_index, segment.rebuild(core)))
            .collect()
    }
}

/// SHA-256 over path, span indices and texts, hex truncated to 16 chars
fn unit_key(file: &str, segments: &[UnitSegment]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file.as_bytes());
    for segment in segments {
        hasher.update(segment.span_index.to_le_bytes());
        hasher.update(segment.core.as_bytes());
    }
    hasher.finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Group the prose spans of one file into units
pub fn build_units(file: &str, content: &str, spans: &[Span], policy: &BatchingPolicy) -> Vec<TranslationUnit> {
    let segments: Vec<UnitSegment> = spans.iter()
        .enumerate()
        .filter(|(_, span)| span.is_prose())
        .map(|(index, span)| UnitSegment::new(index, span.slice(content)))
        .filter(|segment| !segment.core.is_empty())
        .collect();

    if segments.is_empty() {
        return Vec::new();
    }

    match policy {
        BatchingPolicy::WholeFile => vec![TranslationUnit::new(file, segments)],
        BatchingPolicy::Paragraph { max_chars } => {
            let mut units = Vec::new();
            let mut current: Vec<UnitSegment> = Vec::new();
            let mut current_chars = 0;

            for segment in segments {
                let chars = segment.core.chars().count();
                if !current.is_empty() && current_chars + chars > *max_chars {
                    units.push(TranslationUnit::new(file, std::mem::take(&mut current)));
                    current_chars = 0;
                }
                current_chars += chars;
                current.push(segment);
            }
            if !current.is_empty() {
                units.push(TranslationUnit::new(file, current));
            }
            units
        }
    }
}
