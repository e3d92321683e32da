/*!
 * Prose/structural span extraction.
 *
 * The scanner walks one file's bytes once, keeping an explicit stack of
 * lexical states (preamble, body text, brace groups, comments, math,
 * command arguments, verbatim-like blocks, bibliography blocks). Every byte
 * is emitted into exactly one span, so concatenating the spans always
 * reproduces the input.
 *
 * Only ASCII bytes ever trigger a state change, which keeps every span
 * boundary on a UTF-8 character boundary.
 */

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Span, SpanKind};
use crate::latex::tree::SourceTree;

/// Where a file's scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Entry document: everything before `\begin{document}` is preamble
    Document,
    /// Included content: starts directly in body text
    Fragment,
    /// Bibliography database: one structural span
    Bibliography,
}

/// Environments whose content is copied verbatim
static VERBATIM_ENVIRONMENTS: &[&str] = &[
    "verbatim", "verbatim*", "Verbatim", "Verbatim*", "BVerbatim", "LVerbatim",
    "lstlisting", "minted", "comment", "filecontents", "filecontents*",
    "tikzpicture", "tikzcd", "pgfpicture", "circuitikz", "forest", "pspicture",
    "algorithm", "algorithm2e", "algorithmic", "asy",
];

/// Display math environments
static MATH_ENVIRONMENTS: &[&str] = &[
    "equation", "equation*", "align", "align*", "alignat", "alignat*", "aligned",
    "gather", "gather*", "gathered", "multline", "multline*", "eqnarray", "eqnarray*",
    "flalign", "flalign*", "split", "cases", "subequations", "math", "displaymath",
    "dmath", "dmath*",
];

/// Commands whose mandatory arguments are never translated, with their argument count
static STRUCTURAL_COMMANDS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        // packages and document setup
        ("documentclass", 1), ("usepackage", 1), ("RequirePackage", 1), ("hypersetup", 1),
        ("geometry", 1), ("usetikzlibrary", 1), ("pgfplotsset", 1), ("tikzset", 1),
        ("lstset", 1), ("captionsetup", 1), ("graphicspath", 1), ("pagestyle", 1),
        ("thispagestyle", 1), ("pagenumbering", 1), ("linespread", 1), ("setstretch", 1),
        ("includeonly", 1), ("excludecomment", 1), ("DeclareGraphicsExtensions", 1),
        // inclusion
        ("input", 1), ("include", 1), ("subfile", 1), ("import", 2), ("subimport", 2),
        ("includegraphics", 1), ("includepdf", 1), ("lstinputlisting", 1), ("inputminted", 2),
        ("bibliography", 1), ("bibliographystyle", 1), ("addbibresource", 1),
        // citations, labels and references
        ("cite", 1), ("citet", 1), ("citep", 1), ("citealt", 1), ("citealp", 1),
        ("citeauthor", 1), ("citeyear", 1), ("Cite", 1), ("nocite", 1), ("parencite", 1),
        ("textcite", 1), ("autocite", 1), ("footcite", 1), ("label", 1), ("ref", 1),
        ("eqref", 1), ("autoref", 1), ("Autoref", 1), ("cref", 1), ("Cref", 1),
        ("pageref", 1), ("nameref", 1), ("vref", 1), ("bibitem", 1),
        // definitions
        ("newcommand", 2), ("renewcommand", 2), ("providecommand", 2),
        ("DeclareRobustCommand", 2), ("newenvironment", 3), ("renewenvironment", 3),
        ("DeclareMathOperator", 2), ("newtheorem", 2), ("theoremstyle", 1),
        ("newcounter", 1), ("newlength", 1), ("numberwithin", 2), ("crefname", 3),
        ("Crefname", 3), ("definecolor", 3), ("lstnewenvironment", 3),
        ("DefineVerbatimEnvironment", 3),
        // lengths, counters and boxes
        ("setcounter", 2), ("addtocounter", 2), ("setlength", 2), ("addtolength", 2),
        ("settowidth", 2), ("hspace", 1), ("vspace", 1), ("rule", 2), ("raisebox", 1),
        ("resizebox", 2), ("scalebox", 1), ("fontsize", 2), ("ensuremath", 1),
        // colour and tables
        ("color", 1), ("textcolor", 1), ("colorbox", 1), ("pagecolor", 1),
        ("multicolumn", 2), ("multirow", 2), ("cline", 1), ("cmidrule", 1),
    ])
});

/// Environments taking structural arguments right after `\begin{name}`
static ENVIRONMENT_ARGUMENTS: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    HashMap::from([
        ("tabular", 1), ("tabular*", 2), ("tabularx", 2), ("tabulary", 2), ("longtable", 1),
        ("array", 1), ("minipage", 1), ("wrapfigure", 2), ("wraptable", 2), ("subfigure", 1),
        ("multicols", 1), ("multicols*", 1), ("adjustbox", 1), ("list", 2), ("spacing", 1),
        ("column", 1),
    ])
});

/// Commands switching back to text mode inside math
static MATH_TEXT_COMMANDS: &[&str] = &[
    "text", "textrm", "textit", "textbf", "textsf", "texttt", "textup", "textnormal",
    "mbox", "hbox", "fbox", "intertext", "shortintertext",
];

/// Commands whose first argument is read verbatim, as the url package does
static URL_COMMANDS: &[&str] = &["url", "href", "path", "nolinkurl"];

/// Declarations introducing new verbatim-like environments
static VERBATIM_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:lstnewenvironment|DefineVerbatimEnvironment|newminted)\s*\{([^}]+)\}")
        .expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
enum MathDelimiter {
    /// `$ ... $`
    Dollar,
    /// `$$ ... $$`
    DoubleDollar,
    /// `\( ... \)`
    Paren,
    /// `\[ ... \]`
    Bracket,
    /// `\begin{name} ... \end{name}`
    Environment(String),
}

#[derive(Debug, Clone)]
enum State {
    Preamble,
    Normal,
    Group,
    Comment,
    Math(MathDelimiter),
    /// `\text{...}` inside math; `$` opens nested math again
    MathText { depth: usize },
    Argument {
        depth: usize,
        groups_left: usize,
        /// `\def`-style: parameter text precedes the first group
        skip_to_group: bool,
    },
    Verbatim { end_marker: String },
    InlineVerbatim { delimiter: u8 },
    Bibliography { end_marker: String },
}

#[derive(Debug)]
struct Frame {
    state: State,
    opened_at: usize,
}

impl Frame {
    /// Whether reaching end of input inside this frame leaves a block open
    fn is_unterminated(&self) -> bool {
        match self.state {
            State::Normal | State::Comment => false,
            State::Argument { depth, .. } => depth > 0,
            _ => true,
        }
    }
}

/// Accumulates spans, merging adjacent spans of the same kind
#[derive(Debug, Default)]
struct SpanBuilder {
    spans: Vec<Span>,
}

impl SpanBuilder {
    fn push(&mut self, start: usize, end: usize, kind: SpanKind) {
        if end <= start {
            return;
        }
        if let Some(last) = self.spans.last_mut() {
            if last.kind == kind && last.end == start {
                last.end = end;
                return;
            }
        }
        self.spans.push(Span::new(start, end, kind));
    }

    /// Re-mark everything from `offset` onwards as structural
    fn force_structural_from(&mut self, offset: usize) {
        let old = std::mem::take(&mut self.spans);
        for span in old {
            if span.kind == SpanKind::Prose && span.end > offset {
                self.push(span.start, offset.max(span.start), SpanKind::Prose);
                self.push(offset.max(span.start), span.end, SpanKind::Structural);
            } else {
                self.push(span.start, span.end, span.kind);
            }
        }
    }

    /// Demote prose spans without any letter, then merge neighbours
    fn finish(self, content: &str) -> Vec<Span> {
        let mut merged = SpanBuilder::default();
        for span in self.spans {
            let kind = if span.kind == SpanKind::Prose
                && !span.slice(content).chars().any(char::is_alphabetic)
            {
                SpanKind::Structural
            } else {
                span.kind
            };
            merged.push(span.start, span.end, kind);
        }
        merged.spans
    }
}

/// Splits LaTeX sources into prose and structural spans
#[derive(Debug, Clone, Default)]
pub struct SpanExtractor {
    extra_verbatim: HashSet<String>,
}

impl SpanExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat a user-defined environment as verbatim-like
    pub fn with_verbatim_environment(mut self, name: impl Into<String>) -> Self {
        self.extra_verbatim.insert(name.into());
        self
    }

    /// Extractor aware of verbatim environments declared anywhere in the tree
    pub fn for_tree(tree: &SourceTree) -> Self {
        let mut extractor = Self::new();
        for path in tree.paths() {
            if let Some(text) = tree.utf8(path) {
                for capture in VERBATIM_DECLARATION.captures_iter(text) {
                    extractor.extra_verbatim.insert(capture[1].trim().to_string());
                }
            }
        }
        extractor
    }

    /// Extract spans from raw bytes; invalid UTF-8 is kept whole as structure
    pub fn extract_bytes(&self, content: &[u8], mode: ScanMode) -> Vec<Span> {
        match std::str::from_utf8(content) {
            Ok(text) => self.extract(text, mode),
            Err(_) if content.is_empty() => Vec::new(),
            Err(_) => vec![Span::new(0, content.len(), SpanKind::Structural)],
        }
    }

    /// Extract the ordered span list of one file
    pub fn extract(&self, content: &str, mode: ScanMode) -> Vec<Span> {
        if content.is_empty() {
            return Vec::new();
        }
        if mode == ScanMode::Bibliography {
            return vec![Span::new(0, content.len(), SpanKind::Structural)];
        }

        let mut scanner = Scanner::new(content, mode, self);
        scanner.run();
        scanner.finish()
    }

    fn is_verbatim(&self, name: &str) -> bool {
        VERBATIM_ENVIRONMENTS.contains(&name) || self.extra_verbatim.contains(name)
    }
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Frame>,
    spans: SpanBuilder,
    extractor: &'a SpanExtractor,
}

fn is_command_letter(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'@'
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, mode: ScanMode, extractor: &'a SpanExtractor) -> Self {
        let mut stack = vec![Frame { state: State::Normal, opened_at: 0 }];
        if mode == ScanMode::Document {
            stack.push(Frame { state: State::Preamble, opened_at: 0 });
        }
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            stack,
            spans: SpanBuilder::default(),
            extractor,
        }
    }

    fn run(&mut self) {
        while self.pos < self.bytes.len() {
            match self.current() {
                State::Preamble => self.step_preamble(),
                State::Normal | State::Group => self.step_text(),
                State::Comment => self.step_comment(),
                State::Math(_) => self.step_math(),
                State::MathText { .. } => self.step_math_text(),
                State::Argument { .. } => self.step_argument(),
                State::Verbatim { .. } | State::Bibliography { .. } => self.step_block(),
                State::InlineVerbatim { .. } => self.step_inline_verbatim(),
            }
        }
    }

    fn finish(mut self) -> Vec<Span> {
        let unterminated = self.stack.iter()
            .filter(|frame| frame.is_unterminated())
            .map(|frame| frame.opened_at)
            .min();
        if let Some(offset) = unterminated {
            self.spans.force_structural_from(offset);
        }
        self.spans.finish(self.src)
    }

    fn current(&self) -> &State {
        // The base `Normal` frame is never popped
        &self.stack[self.stack.len() - 1].state
    }

    fn open(&mut self, state: State, at: usize) {
        self.stack.push(Frame { state, opened_at: at });
    }

    fn close(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    fn emit(&mut self, end: usize, kind: SpanKind) {
        let end = end.min(self.bytes.len());
        self.spans.push(self.pos, end, kind);
        self.pos = end;
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    /// End of the line containing `from`, newline included
    fn line_end(&self, from: usize) -> usize {
        self.bytes[from..].iter()
            .position(|b| *b == b'\n')
            .map(|idx| from + idx + 1)
            .unwrap_or(self.bytes.len())
    }

    /// Byte length of a control symbol starting at `at` (backslash included)
    fn control_symbol_len(&self, at: usize) -> usize {
        self.src[at + 1..].chars().next().map(|c| 1 + c.len_utf8()).unwrap_or(1)
    }

    /// End of a control word or symbol starting at `at`
    fn control_sequence_end(&self, at: usize) -> usize {
        let mut end = at + 1;
        if end < self.bytes.len() && is_command_letter(self.bytes[end]) {
            while end < self.bytes.len() && is_command_letter(self.bytes[end]) {
                end += 1;
            }
            end
        } else {
            at + self.control_symbol_len(at)
        }
    }

    /// Parse `\begin{name}` / `\end{name}` at `at`, returning the name and end offset
    fn environment_marker(&self, at: usize, keyword: &str) -> Option<(String, usize)> {
        let mut idx = at + 1 + keyword.len();
        while idx < self.bytes.len() && matches!(self.bytes[idx], b' ' | b'\t') {
            idx += 1;
        }
        if self.bytes.get(idx) != Some(&b'{') {
            return None;
        }
        let name_start = idx + 1;
        let close = self.bytes[name_start..].iter().position(|b| *b == b'}')?;
        let name = &self.src[name_start..name_start + close];
        if name.is_empty() || name.contains(['\n', '{', '\\']) {
            return None;
        }
        Some((name.trim().to_string(), name_start + close + 1))
    }

    fn step_preamble(&mut self) {
        match self.bytes[self.pos] {
            b'%' => self.open(State::Comment, self.pos),
            b'\\' => {
                let end = self.control_sequence_end(self.pos);
                if &self.src[self.pos + 1..end] == "begin" {
                    if let Some((name, marker_end)) = self.environment_marker(self.pos, "begin") {
                        if name == "document" {
                            self.emit(marker_end, SpanKind::Structural);
                            self.close();
                            return;
                        }
                    }
                }
                self.emit(end, SpanKind::Structural);
            }
            _ => self.emit(self.pos + 1, SpanKind::Structural),
        }
    }

    fn step_text(&mut self) {
        match self.bytes[self.pos] {
            b'%' => self.open(State::Comment, self.pos),
            b'\\' => self.control_sequence(),
            b'$' => {
                let at = self.pos;
                if self.peek(1) == Some(b'$') {
                    self.emit(at + 2, SpanKind::Structural);
                    self.open(State::Math(MathDelimiter::DoubleDollar), at);
                } else {
                    self.emit(at + 1, SpanKind::Structural);
                    self.open(State::Math(MathDelimiter::Dollar), at);
                }
            }
            b'{' => {
                let at = self.pos;
                self.emit(at + 1, SpanKind::Structural);
                self.open(State::Group, at);
            }
            b'}' => {
                self.emit(self.pos + 1, SpanKind::Structural);
                if matches!(self.current(), State::Group) {
                    self.close();
                }
            }
            b'[' | b']' | b'^' | b'_' | b'~' | b'&' | b'#' => {
                self.emit(self.pos + 1, SpanKind::Structural)
            }
            b'\n' => {
                let blank_end = self.blank_run_end(self.pos);
                match blank_end {
                    Some(end) => self.emit(end, SpanKind::Structural),
                    None => self.emit(self.pos + 1, SpanKind::Prose),
                }
            }
            _ => self.emit(self.pos + 1, SpanKind::Prose),
        }
    }

    /// If a blank line starts at the newline `at`, the end of the whitespace run
    fn blank_run_end(&self, at: usize) -> Option<usize> {
        let mut idx = at + 1;
        let mut newlines = 1;
        let mut end = None;
        while idx < self.bytes.len() {
            match self.bytes[idx] {
                b'\n' => {
                    newlines += 1;
                    end = Some(idx + 1);
                }
                b' ' | b'\t' | b'\r' => {}
                _ => break,
            }
            idx += 1;
        }
        if newlines >= 2 { end } else { None }
    }

    fn control_sequence(&mut self) {
        let start = self.pos;
        let Some(next) = self.peek(1) else {
            self.emit(start + 1, SpanKind::Structural);
            return;
        };

        if !is_command_letter(next) {
            match next {
                b'(' => {
                    self.emit(start + 2, SpanKind::Structural);
                    self.open(State::Math(MathDelimiter::Paren), start);
                }
                b'[' => {
                    self.emit(start + 2, SpanKind::Structural);
                    self.open(State::Math(MathDelimiter::Bracket), start);
                }
                _ => {
                    let end = start + self.control_symbol_len(start);
                    self.emit(end, SpanKind::Structural);
                    // `\\[2pt]`
                    if next == b'\\' && self.peek(0) == Some(b'[') {
                        self.open_arguments(0, false);
                    }
                }
            }
            return;
        }

        let src = self.src;
        let name_end = self.control_sequence_end(start);
        let name = &src[start + 1..name_end];
        let token_end = if self.bytes.get(name_end) == Some(&b'*') { name_end + 1 } else { name_end };

        match name {
            "begin" => self.begin_environment(start),
            "end" => self.end_environment(start),
            "verb" | "lstinline" | "mintinline" => self.inline_verbatim(start, token_end),
            _ if URL_COMMANDS.contains(&name) => {
                let end = self.url_argument_end(token_end).unwrap_or(token_end);
                self.emit(end, SpanKind::Structural);
            }
            "def" | "gdef" | "edef" | "xdef" => {
                self.emit(token_end, SpanKind::Structural);
                self.open(State::Argument { depth: 0, groups_left: 1, skip_to_group: true }, start);
            }
            "let" => {
                let end = self.let_assignment_end(token_end);
                self.emit(end, SpanKind::Structural);
            }
            _ => {
                let structural_args = STRUCTURAL_COMMANDS.get(name).copied();
                self.emit(token_end, SpanKind::Structural);
                match structural_args {
                    Some(count) => self.open_arguments(count, false),
                    None if self.peek(0) == Some(b'[') => self.open_arguments(0, false),
                    None => {}
                }
            }
        }
    }

    fn open_arguments(&mut self, groups_left: usize, skip_to_group: bool) {
        self.open(State::Argument { depth: 0, groups_left, skip_to_group }, self.pos);
    }

    /// `\let\a\b` or `\let\a = \b`
    fn let_assignment_end(&self, from: usize) -> usize {
        let len = self.bytes.len();
        let skip_spaces = |mut idx: usize| {
            while idx < len && matches!(self.bytes[idx], b' ' | b'\t') {
                idx += 1;
            }
            idx
        };
        let token = |idx: usize| -> usize {
            if idx >= len {
                idx
            } else if self.bytes[idx] == b'\\' {
                self.control_sequence_end(idx)
            } else {
                idx + self.src[idx..].chars().next().map(char::len_utf8).unwrap_or(1)
            }
        };

        let mut idx = token(skip_spaces(from));
        idx = skip_spaces(idx);
        if idx < len && self.bytes[idx] == b'=' {
            idx = skip_spaces(idx + 1);
        }
        token(idx)
    }

    fn inline_verbatim(&mut self, start: usize, token_end: usize) {
        let usable = |b: u8| b.is_ascii_punctuation();
        match self.bytes.get(token_end).copied() {
            Some(delimiter) if usable(delimiter) => {
                let closing = if delimiter == b'{' { b'}' } else { delimiter };
                self.emit(token_end + 1, SpanKind::Structural);
                self.open(State::InlineVerbatim { delimiter: closing }, start);
            }
            _ => self.emit(token_end, SpanKind::Structural),
        }
    }

    /// End of a command's verbatim `{...}` argument (after an optional `[...]`).
    ///
    /// Braces still nest, `%` and `\` are literal. Without a closing brace the
    /// rest of the file belongs to the argument.
    fn url_argument_end(&self, token_end: usize) -> Option<usize> {
        let skip_spaces = |mut idx: usize| {
            while idx < self.bytes.len() && matches!(self.bytes[idx], b' ' | b'\t') {
                idx += 1;
            }
            idx
        };
        let mut idx = skip_spaces(token_end);
        if self.bytes.get(idx) == Some(&b'[') {
            idx = skip_spaces(self.optional_argument_end(idx)?);
        }
        if self.bytes.get(idx) != Some(&b'{') {
            return None;
        }

        let mut depth = 0usize;
        for (offset, byte) in self.bytes[idx..].iter().enumerate() {
            match byte {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(idx + offset + 1);
                    }
                }
                _ => {}
            }
        }
        Some(self.bytes.len())
    }

    fn begin_environment(&mut self, start: usize) {
        let Some((name, marker_end)) = self.environment_marker(start, "begin") else {
            self.emit(start + "\\begin".len(), SpanKind::Structural);
            return;
        };

        self.emit(marker_end, SpanKind::Structural);
        let end_marker = format!("\\end{{{}}}", name);

        if name == "document" {
            return;
        }
        if self.extractor.is_verbatim(&name) {
            self.open(State::Verbatim { end_marker }, start);
        } else if MATH_ENVIRONMENTS.contains(&name.as_str()) {
            self.open(State::Math(MathDelimiter::Environment(end_marker)), start);
        } else if name == "thebibliography" {
            self.open(State::Bibliography { end_marker }, start);
        } else if let Some(count) = ENVIRONMENT_ARGUMENTS.get(name.as_str()).copied() {
            self.open_arguments(count, false);
        } else if self.peek(0) == Some(b'[') {
            self.open_arguments(0, false);
        }
    }

    fn end_environment(&mut self, start: usize) {
        match self.environment_marker(start, "end") {
            // Nothing after \end{document} reaches the output
            Some((name, _)) if name == "document" => self.emit(self.bytes.len(), SpanKind::Structural),
            Some((_, marker_end)) => self.emit(marker_end, SpanKind::Structural),
            None => self.emit(start + "\\end".len(), SpanKind::Structural),
        }
    }

    fn step_comment(&mut self) {
        let end = self.line_end(self.pos);
        self.emit(end, SpanKind::Structural);
        self.close();
    }

    fn step_math(&mut self) {
        let Some(State::Math(delimiter)) = self.stack.last().map(|frame| frame.state.clone()) else {
            return;
        };
        let len = self.bytes.len();
        let mut idx = self.pos;
        let mut closed_at = None;

        while idx < len {
            match self.bytes[idx] {
                b'\\' => {
                    let rest = &self.src[idx..];
                    let closer = match &delimiter {
                        MathDelimiter::Paren if rest.starts_with("\\)") => Some(2),
                        MathDelimiter::Bracket if rest.starts_with("\\]") => Some(2),
                        MathDelimiter::Environment(marker) if rest.starts_with(marker.as_str()) => Some(marker.len()),
                        _ => None,
                    };
                    if let Some(width) = closer {
                        closed_at = Some(idx + width);
                        break;
                    }
                    let end = self.control_sequence_end(idx);
                    if MATH_TEXT_COMMANDS.contains(&&self.src[idx + 1..end]) {
                        let mut brace = end;
                        while brace < len && matches!(self.bytes[brace], b' ' | b'\t') {
                            brace += 1;
                        }
                        if self.bytes.get(brace) == Some(&b'{') {
                            self.emit(brace + 1, SpanKind::Structural);
                            self.open(State::MathText { depth: 1 }, idx);
                            return;
                        }
                    }
                    idx = end;
                }
                b'$' => match delimiter {
                    MathDelimiter::Dollar => {
                        closed_at = Some(idx + 1);
                        break;
                    }
                    MathDelimiter::DoubleDollar if self.bytes.get(idx + 1) == Some(&b'$') => {
                        closed_at = Some(idx + 2);
                        break;
                    }
                    _ => idx += 1,
                },
                b'%' => idx = self.line_end(idx),
                _ => idx += 1,
            }
        }

        match closed_at {
            Some(end) => {
                self.emit(end, SpanKind::Structural);
                self.close();
            }
            None => self.emit(len, SpanKind::Structural),
        }
    }

    fn step_math_text(&mut self) {
        let State::MathText { depth } = *self.current() else {
            return;
        };
        let at = self.pos;
        match self.bytes[at] {
            b'\\' => {
                let end = self.control_sequence_end(at);
                self.emit(end, SpanKind::Structural);
            }
            b'%' => {
                let end = self.line_end(at);
                self.emit(end, SpanKind::Structural);
            }
            b'$' => {
                self.emit(at + 1, SpanKind::Structural);
                self.open(State::Math(MathDelimiter::Dollar), at);
            }
            b'{' => {
                self.set_math_text_depth(depth + 1);
                self.emit(at + 1, SpanKind::Structural);
            }
            b'}' => {
                self.emit(at + 1, SpanKind::Structural);
                if depth == 1 {
                    self.close();
                } else {
                    self.set_math_text_depth(depth - 1);
                }
            }
            _ => self.emit(at + 1, SpanKind::Structural),
        }
    }

    fn set_math_text_depth(&mut self, depth: usize) {
        if let Some(Frame { state: State::MathText { depth: d }, .. }) = self.stack.last_mut() {
            *d = depth;
        }
    }

    fn step_block(&mut self) {
        let marker = match self.current() {
            State::Verbatim { end_marker } | State::Bibliography { end_marker } => end_marker.clone(),
            _ => return,
        };
        match self.src[self.pos..].find(&marker) {
            Some(idx) => {
                self.emit(self.pos + idx + marker.len(), SpanKind::Structural);
                self.close();
            }
            None => self.emit(self.bytes.len(), SpanKind::Structural),
        }
    }

    fn step_inline_verbatim(&mut self) {
        let State::InlineVerbatim { delimiter } = *self.current() else {
            return;
        };
        match self.bytes[self.pos..].iter().position(|b| *b == delimiter) {
            Some(idx) => {
                self.emit(self.pos + idx + 1, SpanKind::Structural);
                self.close();
            }
            None => self.emit(self.bytes.len(), SpanKind::Structural),
        }
    }

    fn set_argument(&mut self, depth: usize, groups_left: usize) {
        if let Some(Frame { state: State::Argument { depth: d, groups_left: g, .. }, .. }) = self.stack.last_mut() {
            *d = depth;
            *g = groups_left;
        }
    }

    fn step_argument(&mut self) {
        let State::Argument { depth, groups_left, skip_to_group } = *self.current() else {
            return;
        };
        let byte = self.bytes[self.pos];

        if depth == 0 {
            match byte {
                b'[' => match self.optional_argument_end(self.pos) {
                    Some(end) => self.emit(end, SpanKind::Structural),
                    None => {
                        self.set_argument(1, groups_left.max(1));
                        self.emit(self.bytes.len(), SpanKind::Structural);
                    }
                },
                b'{' if groups_left > 0 => {
                    self.set_argument(1, groups_left);
                    self.emit(self.pos + 1, SpanKind::Structural);
                }
                b' ' | b'\t' | b'\r' if groups_left > 0 => self.emit(self.pos + 1, SpanKind::Structural),
                b'\n' if groups_left > 0 && !skip_to_group && self.blank_run_end(self.pos).is_none() => {
                    self.emit(self.pos + 1, SpanKind::Structural)
                }
                b'\\' if skip_to_group && groups_left > 0 => {
                    let end = self.control_sequence_end(self.pos);
                    self.emit(end, SpanKind::Structural);
                }
                b'\n' => self.close(),
                _ if skip_to_group && groups_left > 0 => self.emit(self.pos + 1, SpanKind::Structural),
                _ => self.close(),
            }
            return;
        }

        match byte {
            b'\\' => {
                let name_end = self.control_sequence_end(self.pos);
                let verbatim_end = if URL_COMMANDS.contains(&&self.src[self.pos + 1..name_end]) {
                    self.url_argument_end(name_end)
                } else {
                    None
                };
                let end = verbatim_end.unwrap_or(self.pos + self.control_symbol_len(self.pos));
                self.emit(end, SpanKind::Structural);
            }
            b'%' => {
                let end = self.line_end(self.pos);
                self.emit(end, SpanKind::Structural);
            }
            b'{' => {
                self.set_argument(depth + 1, groups_left);
                self.emit(self.pos + 1, SpanKind::Structural);
            }
            b'}' => {
                self.emit(self.pos + 1, SpanKind::Structural);
                if depth == 1 {
                    let remaining = groups_left.saturating_sub(1);
                    self.set_argument(0, remaining);
                    if remaining == 0 {
                        self.close();
                    }
                } else {
                    self.set_argument(depth - 1, groups_left);
                }
            }
            _ => self.emit(self.pos + 1, SpanKind::Structural),
        }
    }

    /// End of a `[...]` argument starting at `at`, honouring nested braces
    fn optional_argument_end(&self, at: usize) -> Option<usize> {
        let mut braces = 0usize;
        let mut idx = at + 1;
        while idx < self.bytes.len() {
            match self.bytes[idx] {
                b'\\' => {
                    idx += 2;
                    continue;
                }
                b'{' => braces += 1,
                b'}' => braces = braces.saturating_sub(1),
                b']' if braces == 0 => return Some(idx + 1),
                _ => {}
            }
            idx += 1;
        }
        None
    }
}

/// A file after translated text has been spliced in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReintegratedFile {
    pub content: String,
    /// Spans of `content`, same order and kinds as the source spans
    pub spans: Vec<Span>,
}

impl ReintegratedFile {
    /// Source file with no replacements
    pub fn unchanged(content: &str, spans: &[Span]) -> Self {
        reintegrate(content, spans, &HashMap::new())
    }

    /// Put a `%` comment line in front of the file as a structural span
    pub fn prepend_comment(&mut self, text: &str) {
        let line = format!("% {}\n", text);
        let shift = line.len();
        for span in &mut self.spans {
            span.start += shift;
            span.end += shift;
        }
        self.spans.insert(0, Span::new(0, shift, SpanKind::Structural));
        self.content.insert_str(0, &line);
    }
}

/// Replace prose spans (by index) with new text, keeping everything else
pub fn reintegrate(content: &str, spans: &[Span], replacements: &HashMap<usize, String>) -> ReintegratedFile {
    let mut output = String::with_capacity(content.len());
    let mut out_spans = Vec::with_capacity(spans.len());

    for (index, span) in spans.iter().enumerate() {
        let start = output.len();
        match replacements.get(&index) {
            Some(text) if span.is_prose() => output.push_str(text),
            _ => output.push_str(span.slice(content)),
        }
        out_spans.push(Span::new(start, output.len(), span.kind));
    }

    ReintegratedFile { content: output, spans: out_spans }
}
