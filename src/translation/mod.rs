/*!
 * Translation of the prose of a LaTeX tree using AI providers.
 *
 * This module contains everything between extracted spans and reintegrated
 * files. It is split into several submodules:
 *
 * - `core`: Backend traits and the provider-backed service
 * - `batch`: Grouping of prose spans into translation units
 * - `dispatcher`: Concurrent submission, validation, fallback and reintegration
 * - `prompts`: Prompt rendering and the segment marker format
 * - `retry`: The retry policy shared by translation and repair calls
 * - `concurrency`: The request limit shared across runs
 * - `tokens`: Run-scoped token accounting
 * - `integrity`: Structural drift warnings for translated files
 */

// Re-export main types for easier usage
pub use self::concurrency::ConcurrencyLimiter;
pub use self::core::{RepairBackend, TranslationBackend, TranslationService};
pub use self::dispatcher::{DispatchFile, DispatchOutput, FallbackNotice, TranslationDispatcher};
pub use self::prompts::LanguagePair;
pub use self::retry::{RetryOutcome, RetryPolicy};
pub use self::tokens::{TokenAccumulator, TokenUsageStats};

// Submodules
pub mod batch;
pub mod concurrency;
pub mod core;
pub mod dispatcher;
pub mod integrity;
pub mod prompts;
pub mod retry;
pub mod tokens;
