/*!
 * Error types for the texwai application.
 *
 * This module contains custom error types for the different stages of the
 * translation pipeline, using the thiserror crate for ergonomic error definitions.
 */

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when working with provider APIs
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),
}

impl ProviderError {
    /// Map an HTTP error status and body to the matching variant
    pub fn from_status(status_code: u16, message: String) -> Self {
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }
}

/// Errors raised while classifying a source tree.
///
/// Both are fatal: they abort the run before any translation spend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassificationError {
    /// No file declares a document class
    #[error("No entry document found: no file declares \\documentclass")]
    NoEntryFound,

    /// More than one file declares a document class
    #[error("Ambiguous entry document: {} files declare \\documentclass ({})", .0.len(), .0.join(", "))]
    AmbiguousEntry(Vec<String>),
}

/// Errors that can occur while translating a single unit
#[derive(Error, Debug)]
pub enum TranslationError {
    /// Error from the provider API
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The response came back but did not pass validation
    #[error("Invalid translation response: {0}")]
    Validation(String),
}

/// Resource errors from the document compiler.
///
/// Ordinary compile failures are not errors: they come back as a failed
/// `CompileAttempt` and go through the fix loop.
#[derive(Error, Debug)]
pub enum CompileError {
    /// The compiler process could not be started
    #[error("Failed to start compiler '{program}': {message}")]
    Spawn {
        /// Program that was invoked
        program: String,
        /// Underlying OS error
        message: String,
    },

    /// The compiler exceeded its time budget
    #[error("Compilation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Reading or writing the working directory failed
    #[error("Compiler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal errors of a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source tree could not be classified
    #[error("Classification failed: {0}")]
    Classification(#[from] ClassificationError),

    /// The compiler could not be run to completion
    #[error("Compiler error: {0}")]
    Compile(#[from] CompileError),

    /// The caller cancelled the run
    #[error("Run cancelled")]
    Cancelled,
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from translation
    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    /// Error from the pipeline
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Utility functions for error conversion
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
