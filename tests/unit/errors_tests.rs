/*!
 * Tests for error types and conversions
 */

use std::time::Duration;

use texwai::errors::{AppError, ClassificationError, CompileError, PipelineError, ProviderError, TranslationError};

#[test]
fn test_providerError_fromStatus_shouldMapAuthAndRateLimit() {
    assert!(matches!(ProviderError::from_status(401, "no".into()), ProviderError::AuthenticationError(_)));
    assert!(matches!(ProviderError::from_status(429, "slow".into()), ProviderError::RateLimitExceeded(_)));
    assert!(matches!(
        ProviderError::from_status(500, "boom".into()),
        ProviderError::ApiError { status_code: 500, .. }
    ));
}

#[test]
fn test_ambiguousEntry_display_shouldListFiles() {
    let error = ClassificationError::AmbiguousEntry(vec!["a.tex".into(), "b.tex".into()]);
    let message = error.to_string();
    assert!(message.contains("2 files"));
    assert!(message.contains("a.tex, b.tex"));
}

#[test]
fn test_pipelineError_conversions_shouldWrapSources() {
    let pipeline: PipelineError = ClassificationError::NoEntryFound.into();
    assert!(pipeline.to_string().starts_with("Classification failed"));

    let pipeline: PipelineError = CompileError::Timeout(Duration::from_secs(120)).into();
    assert!(matches!(pipeline, PipelineError::Compile(CompileError::Timeout(_))));

    let app: AppError = PipelineError::Cancelled.into();
    assert!(app.to_string().contains("cancelled"));
}

#[test]
fn test_appError_fromAnyhowAndIo_shouldConvert() {
    let app: AppError = anyhow::anyhow!("oops").into();
    assert!(matches!(app, AppError::Unknown(_)));

    let app: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(app, AppError::File(_)));

    let app: AppError = TranslationError::Validation("empty".into()).into();
    assert!(app.to_string().contains("empty"));
}
