/*!
 * LaTeX document handling.
 *
 * - `tree`: the in-memory source tree
 * - `classifier`: file classification and inclusion graph
 * - `scanner`: prose/structural span extraction
 * - `cleaner`: comment stripping before extraction
 * - `postprocess`: deterministic fixes on the translated tree
 */

pub mod classifier;
pub mod cleaner;
pub mod postprocess;
pub mod scanner;
pub mod tree;

pub use self::classifier::{classify, FileClassification, FileKind, TreeClassification};
pub use self::postprocess::{PostProcessor, TranslatedTree};
pub use self::scanner::{reintegrate, ReintegratedFile, ScanMode, SpanExtractor};
pub use self::tree::SourceTree;

/// Whether a span is sent for translation or kept verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Prose,
    Structural,
}

/// Contiguous byte range of one file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl Span {
    pub fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        Self { start, end, kind }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_prose(&self) -> bool {
        self.kind == SpanKind::Prose
    }

    /// Text of this span within `content`
    pub fn slice<'a>(&self, content: &'a str) -> &'a str {
        &content[self.start..self.end]
    }
}
