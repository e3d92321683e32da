/*!
 * Prompt rendering and the segment marker format.
 *
 * A translation request carries one or more segments:
 *
 * ```text
 * <<SEG_0>>
 * first passage
 * <<SEG_1>>
 * second passage
 * <<END>>
 * ```
 *
 * The response must use the same markers. Parsing tolerates surrounding chatter
 * and Markdown code fences.
 */

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

pub const END_MARKER: &str = "<<END>>";

static SEGMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<<SEG_(\d+)>>").expect("valid regex")
});

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)\r?\n?```\s*$").expect("valid regex")
});

/// Source and target language of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { source: source.into(), target: target.into() }
    }

    /// Fill `{source_language}` / `{target_language}` placeholders with language names
    pub fn render(&self, template: &str) -> String {
        let source = crate::language_utils::get_language_name(&self.source).unwrap_or_else(|_| self.source.clone());
        let target = crate::language_utils::get_language_name(&self.target).unwrap_or_else(|_| self.target.clone());
        template
            .replace("{source_language}", &source)
            .replace("{target_language}", &target)
    }
}

pub fn segment_marker(index: usize) -> String {
    format!("<<SEG_{}>>", index)
}

/// Render texts as a marker-delimited request body
pub fn build_segments<S: AsRef<str>>(texts: &[S]) -> String {
    let mut body = String::new();
    for (index, text) in texts.iter().enumerate() {
        body.push_str(&segment_marker(index));
        body.push('\n');
        body.push_str(text.as_ref());
        body.push('\n');
    }
    body.push_str(END_MARKER);
    body
}

/// Remove a Markdown code fence wrapping the whole response
pub fn strip_code_fence(text: &str) -> &str {
    match CODE_FENCE.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text,
    }
}

/// Parse a response into segment texts by index.
///
/// A response without any marker counts as segment 0, which lets a model
/// that dropped the markers of a single-segment request still succeed.
pub fn parse_segments(response: &str) -> BTreeMap<usize, String> {
    let response = strip_code_fence(response);
    let body = match response.find(END_MARKER) {
        Some(idx) => &response[..idx],
        None => response,
    };

    let mut segments = BTreeMap::new();
    let markers: Vec<(usize, usize, usize)> = SEGMENT_MARKER.captures_iter(body)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let index = c[1].parse().ok()?;
            Some((index, whole.start(), whole.end()))
        })
        .collect();

    if markers.is_empty() {
        let text = body.trim();
        if !text.is_empty() {
            segments.insert(0, text.to_string());
        }
        return segments;
    }

    for (position, (index, _, content_start)) in markers.iter().enumerate() {
        let content_end = markers.get(position + 1).map(|m| m.1).unwrap_or(body.len());
        let text = body[*content_start..content_end].trim();
        segments.entry(*index).or_insert_with(|| text.to_string());
    }
    segments
}

/// User message of a repair request
pub fn build_repair_request(file_content: &str, error_excerpt: &str) -> String {
    format!(
        "Compiler error:\n```\n{}\n```\n\nFile content:\n```latex\n{}\n```\n\nReturn the corrected file content only.",
        error_excerpt.trim_end(),
        file_content
    )
}
