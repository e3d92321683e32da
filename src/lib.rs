/*!
 * # texwai - LaTeX translation with AI
 *
 * Translates the prose of a LaTeX source tree with a language model and
 * compiles the result, repairing compile errors along the way.
 *
 * ## Features
 *
 * - Entry detection and file classification for multi-file projects
 * - Prose extraction that leaves math, commands and comments untouched
 * - Concurrent translation through various AI providers:
 *   - Ollama (local LLM)
 *   - OpenAI API
 *   - Anthropic API
 *   - LM Studio / vLLM (OpenAI-compatible)
 * - Per-unit fallback to the source text when translation keeps failing
 * - latexmk compilation with a bounded model-assisted fix loop
 * - Last-resort rescue with a safe preamble and float stripping
 *
 * ## Architecture
 *
 * - `app_config`: Configuration management
 * - `latex`: Source tree, classification, span extraction, post-processing
 * - `translation`: Batching, dispatch, retries, token accounting
 * - `compile`: Compiler and rescuer seams, latexmk driver, fix loop
 * - `pipeline`: Run orchestration, progress events, results
 * - `providers`: Client implementations for the LLM providers
 * - `app_controller`: Command-line application flow
 * - `file_utils`: File system operations
 * - `language_utils`: ISO language codes and target scripts
 * - `errors`: Custom error types for the application
 */

// Global lints configuration
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

// Public modules
pub mod app_config;
pub mod app_controller;
pub mod compile;
pub mod errors;
pub mod file_utils;
pub mod language_utils;
pub mod latex;
pub mod pipeline;
pub mod providers;
pub mod translation;

// Re-export main types for easier usage
pub use app_config::Config;
pub use compile::{Compiler, LatexmkCompiler, PreambleRescuer, Rescuer, WorkingTree};
pub use errors::{AppError, ClassificationError, CompileError, PipelineError, ProviderError, TranslationError};
pub use language_utils::{get_language_name, language_codes_match, ScriptProfile};
pub use latex::SourceTree;
pub use pipeline::{PipelineResult, ProgressEvent, ProgressSink, TranslationPipeline};
pub use translation::TranslationService;
