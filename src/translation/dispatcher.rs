/*!
 * Translation dispatch.
 *
 * Prose spans are grouped into units, every unit is sent to the backend under
 * the shared concurrency limit, responses are validated, failures are retried,
 * and units that never succeed keep their source text. The translated texts
 * are then reintegrated file by file.
 */

use anyhow::anyhow;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::app_config::{BatchingPolicy, Config};
use crate::errors::TranslationError;
use crate::latex::{reintegrate, ReintegratedFile, Span};

use super::batch::{build_units, TranslationUnit};
use super::concurrency::ConcurrencyLimiter;
use super::core::TranslationBackend;
use super::prompts::{build_segments, parse_segments, LanguagePair};
use super::retry::{RetryOutcome, RetryPolicy};
use super::tokens::TokenAccumulator;

static BARE_SPECIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^\\])([%&#])").expect("valid regex")
});

/// Math-mode characters that have no safe escape in running text
static BARE_MATH_SPECIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|[^\\])([$^_~])").expect("valid regex")
});

/// A unit that kept its source text after every attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackNotice {
    pub file: String,
    pub unit_key: String,
    /// Number of prose spans left untranslated
    pub spans: usize,
    pub attempts: u32,
    pub reason: String,
}

impl fmt::Display for FallbackNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PartialFailure: {} passage(s) of {} kept in the source language after {} attempt(s): {}",
            self.spans, self.file, self.attempts, self.reason
        )
    }
}

/// One file handed to the dispatcher
#[derive(Debug, Clone)]
pub struct DispatchFile {
    pub path: String,
    pub content: String,
    pub spans: Vec<Span>,
}

impl DispatchFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>, spans: Vec<Span>) -> Self {
        Self { path: path.into(), content: content.into(), spans }
    }
}

/// Reintegrated files and the notices of units that fell back
#[derive(Debug, Default)]
pub struct DispatchOutput {
    pub documents: BTreeMap<String, ReintegratedFile>,
    pub notices: Vec<FallbackNotice>,
    pub units: usize,
}

struct UnitResult {
    unit: TranslationUnit,
    outcome: RetryOutcome<Vec<String>>,
}

/// Sends translation units to a backend and reintegrates the results
pub struct TranslationDispatcher {
    backend: Arc<dyn TranslationBackend>,
    limiter: ConcurrencyLimiter,
    tokens: TokenAccumulator,
    retry: RetryPolicy,
    batching: BatchingPolicy,
    instructions: String,
    min_length_ratio: f32,
}

impl TranslationDispatcher {
    pub fn new(backend: Arc<dyn TranslationBackend>, limiter: ConcurrencyLimiter, tokens: TokenAccumulator) -> Self {
        Self {
            backend,
            limiter,
            tokens,
            retry: RetryPolicy::default(),
            batching: BatchingPolicy::default(),
            instructions: String::new(),
            min_length_ratio: 0.15,
        }
    }

    /// Retry, batching, prompt and validation settings from the configuration
    pub fn configured(mut self, config: &Config) -> Self {
        let languages = LanguagePair::new(&config.source_language, &config.target_language);
        self.retry = RetryPolicy::from_config(&config.translation.common);
        self.batching = config.pipeline.batching.clone();
        self.instructions = languages.render(&config.translation.common.system_prompt);
        self.min_length_ratio = config.translation.common.min_length_ratio;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batching(mut self, batching: BatchingPolicy) -> Self {
        self.batching = batching;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    pub fn with_min_length_ratio(mut self, ratio: f32) -> Self {
        self.min_length_ratio = ratio;
        self
    }

    /// Translate every file
    pub async fn dispatch(&self, files: Vec<DispatchFile>) -> DispatchOutput {
        self.dispatch_with_progress(files, |_, _| {}).await
    }

    /// Translate every file, calling `progress(done, total)` as units finish
    pub async fn dispatch_with_progress<P>(&self, files: Vec<DispatchFile>, progress: P) -> DispatchOutput
    where
        P: Fn(usize, usize),
    {
        let units: Vec<TranslationUnit> = files.iter()
            .flat_map(|file| build_units(&file.path, &file.content, &file.spans, &self.batching))
            .collect();
        let total = units.len();
        info!("Dispatching {} translation units from {} files", total, files.len());

        let mut results = Vec::with_capacity(total);
        let mut pending = stream::iter(units)
            .map(|unit| self.translate_unit(unit))
            .buffer_unordered(self.limiter.limit());
        while let Some(result) = pending.next().await {
            results.push(result);
            progress(results.len(), total);
        }

        self.assemble(files, results, total)
    }

    async fn translate_unit(&self, unit: TranslationUnit) -> UnitResult {
        let body = build_segments(&unit.source_texts());
        let label = format!("Translation of {} ({})", unit.file, unit.key);
        let outcome = self.retry
            .run(&label, |_| self.attempt(&unit, &body))
            .await;
        UnitResult { unit, outcome }
    }

    async fn attempt(&self, unit: &TranslationUnit, body: &str) -> anyhow::Result<Vec<String>> {
        let permit = self.limiter.acquire().await
            .map_err(|e| anyhow!("Concurrency limiter closed: {}", e))?;
        let started = Instant::now();
        let result = self.backend.translate(body, &self.instructions).await;
        drop(permit);

        let completion = result.map_err(TranslationError::from)?;
        self.tokens.record_completion(&completion, started.elapsed());
        debug!("Unit {} answered in {:?}", unit.key, started.elapsed());

        Ok(validate_response(unit, &completion.text, self.min_length_ratio)?)
    }

    fn assemble(&self, files: Vec<DispatchFile>, results: Vec<UnitResult>, total: usize) -> DispatchOutput {
        let mut replacements: HashMap<String, HashMap<usize, String>> = HashMap::new();
        let mut notices = Vec::new();

        for UnitResult { unit, outcome } in results {
            match outcome {
                RetryOutcome::Succeeded { value, .. } => {
                    replacements.entry(unit.file.clone())
                        .or_default()
                        .extend(unit.replacements(&value));
                }
                RetryOutcome::Exhausted { attempts, last_error } => {
                    let notice = FallbackNotice {
                        file: unit.file.clone(),
                        unit_key: unit.key.clone(),
                        spans: unit.segments.len(),
                        attempts,
                        reason: last_error.to_string(),
                    };
                    warn!("{}", notice);
                    notices.push(notice);
                }
            }
        }
        notices.sort_by(|a, b| (&a.file, &a.unit_key).cmp(&(&b.file, &b.unit_key)));

        let mut documents = BTreeMap::new();
        for file in files {
            let empty = HashMap::new();
            let map = replacements.get(&file.path).unwrap_or(&empty);
            let mut document = reintegrate(&file.content, &file.spans, map);

            let kept: usize = notices.iter()
                .filter(|n| n.file == file.path)
                .map(|n| n.spans)
                .sum();
            if kept > 0 {
                document.prepend_comment(&format!(
                    "texwai: {} passage(s) kept in the source language after failed translation",
                    kept
                ));
            }
            documents.insert(file.path, document);
        }

        DispatchOutput { documents, notices, units: total }
    }
}

/// Check a response against its unit and return the translated segment cores
pub fn validate_response(unit: &TranslationUnit, response: &str, min_length_ratio: f32) -> Result<Vec<String>, TranslationError> {
    if response.trim().is_empty() {
        return Err(TranslationError::Validation("empty response".to_string()));
    }

    let mut parsed = parse_segments(response);
    let mut cores = Vec::with_capacity(unit.segments.len());
    for index in 0..unit.segments.len() {
        let text = parsed.remove(&index).unwrap_or_default();
        if text.is_empty() {
            return Err(TranslationError::Validation(format!("segment {} missing", index)));
        }
        if !braces_balanced(&text) {
            return Err(TranslationError::Validation(format!("unbalanced braces in segment {}", index)));
        }
        if let Some(special) = bare_math_special(&text) {
            return Err(TranslationError::Validation(format!("bare '{}' in segment {}", special, index)));
        }
        cores.push(escape_bare_specials(&text));
    }

    let source_chars = unit.char_count();
    let translated_chars: usize = cores.iter().map(|c| c.chars().count()).sum();
    if (translated_chars as f64) < source_chars as f64 * f64::from(min_length_ratio) {
        return Err(TranslationError::Validation(format!(
            "translation too short ({} chars for {} source chars)",
            translated_chars, source_chars
        )));
    }

    Ok(cores)
}

/// First unescaped `$`, `^`, `_` or `~`.
///
/// Prose spans never contain these characters bare, so any occurrence came from
/// the model and would change the compiled output.
pub fn bare_math_special(text: &str) -> Option<char> {
    BARE_MATH_SPECIAL.captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|m| m.as_str().chars().next())
}

/// Whether unescaped braces nest properly
pub fn braces_balanced(text: &str) -> bool {
    let mut depth: i32 = 0;
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Escape `%`, `&` and `#` not already preceded by a backslash.
///
/// Prose spans never contain these characters unescaped, so any bare
/// occurrence came from the model.
pub fn escape_bare_specials(text: &str) -> String {
    let mut current = text.to_string();
    // A second pass catches adjacent specials such as `%%`
    for _ in 0..2 {
        current = BARE_SPECIAL.replace_all(&current, r"$1\$2").into_owned();
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latex::{ScanMode, SpanExtractor};
    use crate::providers::mock::MockProvider;
    use crate::translation::batch::UnitSegment;

    fn file(path: &str, content: &str) -> DispatchFile {
        let spans = SpanExtractor::new().extract(content, ScanMode::Fragment);
        DispatchFile::new(path, content, spans)
    }

    fn dispatcher(provider: MockProvider) -> TranslationDispatcher {
        TranslationDispatcher::new(Arc::new(provider), ConcurrencyLimiter::new(4), TokenAccumulator::new())
            .with_retry(RetryPolicy::immediate(3))
    }

    fn unit(texts: &[&str]) -> TranslationUnit {
        let segments = texts.iter().enumerate().map(|(i, t)| UnitSegment::new(i, t)).collect();
        TranslationUnit::new("a.tex", segments)
    }

    #[test]
    fn test_validateResponse_valid_shouldReturnCores() {
        let cores = validate_response(&unit(&["Hello", "World"]), "<<SEG_0>>\nBonjour\n<<SEG_1>>\nMonde\n<<END>>", 0.15).unwrap();
        assert_eq!(cores, vec!["Bonjour", "Monde"]);
    }

    #[test]
    fn test_validateResponse_invalid_shouldReject() {
        let u = unit(&["Hello there", "World"]);
        assert!(validate_response(&u, "   ", 0.15).is_err());
        assert!(validate_response(&u, "<<SEG_0>>\nBonjour\n<<END>>", 0.15).is_err());
        assert!(validate_response(&u, "<<SEG_0>>\nBon{jour\n<<SEG_1>>\nMonde\n<<END>>", 0.15).is_err());
        assert!(validate_response(&u, "<<SEG_0>>\nB\n<<SEG_1>>\nM\n<<END>>", 0.5).is_err());
    }

    #[test]
    fn test_validateResponse_bareMathSpecial_shouldReject() {
        let u = unit(&["The value grows quickly"]);
        for response in ["La valeur $x$ croît vite", "La valeur x_1 croît vite", "La valeur x^2 croît", "Voir~la valeur"] {
            let wrapped = format!("<<SEG_0>>\n{}\n<<END>>", response);
            let result = validate_response(&u, &wrapped, 0.15);
            assert!(matches!(result, Err(TranslationError::Validation(_))), "{}", response);
        }
        assert!(validate_response(&u, "<<SEG_0>>\nIl co\\^ute 5 \\$\n<<END>>", 0.15).is_ok());
    }

    #[test]
    fn test_bareMathSpecial_shouldReportFirstUnescaped() {
        assert_eq!(bare_math_special("a \\$ b $ c"), Some('$'));
        assert_eq!(bare_math_special("_start"), Some('_'));
        assert_eq!(bare_math_special("plain \\_ text"), None);
    }

    #[test]
    fn test_escapeBareSpecials_shouldEscapeOnlyBare() {
        assert_eq!(escape_bare_specials("50% & more #1"), r"50\% \& more \#1");
        assert_eq!(escape_bare_specials(r"already \% done"), r"already \% done");
        assert_eq!(escape_bare_specials("%%"), r"\%\%");
    }

    #[test]
    fn test_bracesBalanced_shouldIgnoreEscaped() {
        assert!(braces_balanced(r"a {b} \{ c"));
        assert!(!braces_balanced("a } b {"));
        assert!(!braces_balanced("{a"));
    }

    #[tokio::test]
    async fn test_dispatch_workingProvider_shouldTranslateProseOnly() {
        let provider = MockProvider::working();
        let output = dispatcher(provider.clone())
            .dispatch(vec![file("a.tex", "Hello $x=1$ world.")])
            .await;

        assert!(output.notices.is_empty());
        assert_eq!(output.documents["a.tex"].content, "[TRANSLATED] Hello $x=1$ [TRANSLATED] world.");
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_emptyResponses_shouldFallBackWithNotice() {
        let provider = MockProvider::empty();
        let tokens = TokenAccumulator::new();
        let output = TranslationDispatcher::new(Arc::new(provider.clone()), ConcurrencyLimiter::new(4), tokens.clone())
            .with_retry(RetryPolicy::immediate(3))
            .dispatch(vec![file("a.tex", "Some text here.")])
            .await;

        assert_eq!(output.notices.len(), 1);
        assert_eq!(output.notices[0].attempts, 3);
        assert_eq!(provider.request_count(), 3);
        assert_eq!(tokens.snapshot().requests, 3);
        let document = &output.documents["a.tex"];
        assert!(document.content.ends_with("Some text here."));
        assert!(document.content.starts_with("% texwai: 1 passage(s)"));
    }

    #[tokio::test]
    async fn test_dispatch_intermittentProvider_shouldRecoverByRetry() {
        let output = dispatcher(MockProvider::intermittent(3))
            .with_batching(BatchingPolicy::Paragraph { max_chars: 5 })
            .dispatch(vec![file("a.tex", "One.\n\nTwo.\n\nThree.")])
            .await;

        assert!(output.notices.is_empty());
        assert_eq!(output.units, 3);
        assert!(!output.documents["a.tex"].content.contains("\nTwo."));
    }

    #[tokio::test]
    async fn test_dispatch_manyUnits_shouldRespectLimit() {
        let provider = MockProvider::slow(10);
        let content = (0..12).map(|i| format!("Paragraph number {}.", i)).collect::<Vec<_>>().join("\n\n");
        let output = TranslationDispatcher::new(Arc::new(provider.clone()), ConcurrencyLimiter::new(2), TokenAccumulator::new())
            .with_batching(BatchingPolicy::Paragraph { max_chars: 10 })
            .dispatch(vec![file("a.tex", &content)])
            .await;

        assert_eq!(output.units, 12);
        assert!(provider.max_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_dispatch_progress_shouldReportEveryUnit() {
        let seen = parking_lot::Mutex::new(Vec::new());
        dispatcher(MockProvider::working())
            .with_batching(BatchingPolicy::Paragraph { max_chars: 5 })
            .dispatch_with_progress(vec![file("a.tex", "One.\n\nTwo.")], |done, total| {
                seen.lock().push((done, total));
            })
            .await;

        assert_eq!(seen.into_inner(), vec![(1, 2), (2, 2)]);
    }
}
