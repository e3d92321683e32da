/*!
 * Run-scoped token accounting.
 *
 * A `TokenAccumulator` is created per pipeline run and handed to every stage
 * that talks to a model. Clones share the same counters, so concurrent unit
 * tasks can record usage without locking.
 */

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::providers::Completion;

#[derive(Debug, Default)]
struct Counters {
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    requests: AtomicU64,
    api_micros: AtomicU64,
}

/// Shared handle on one run's token counters
#[derive(Debug, Clone, Default)]
pub struct TokenAccumulator {
    counters: Arc<Counters>,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one model call
    pub fn record(&self, input_tokens: u64, output_tokens: u64, elapsed: Duration) {
        self.counters.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.counters.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        self.counters.api_micros.fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record the usage carried by a completion
    pub fn record_completion(&self, completion: &Completion, elapsed: Duration) {
        self.record(completion.input_tokens, completion.output_tokens, elapsed);
    }

    pub fn input_tokens(&self) -> u64 {
        self.counters.input_tokens.load(Ordering::Relaxed)
    }

    pub fn output_tokens(&self) -> u64 {
        self.counters.output_tokens.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> TokenUsageStats {
        let mut stats = TokenUsageStats::new();
        stats.add_token_usage(Some(self.input_tokens()), Some(self.output_tokens()));
        stats.requests = self.counters.requests.load(Ordering::Relaxed);
        stats.api_duration = Duration::from_micros(self.counters.api_micros.load(Ordering::Relaxed));
        stats
    }
}

/// Token usage statistics for tracking API consumption
#[derive(Debug, Clone)]
pub struct TokenUsageStats {
    /// Number of input (prompt) tokens
    pub input_tokens: u64,

    /// Number of output (completion) tokens
    pub output_tokens: u64,

    /// Total number of tokens
    pub total_tokens: u64,

    /// Number of model calls
    pub requests: u64,

    /// Start time of token tracking
    pub start_time: Instant,

    /// Total time spent on API requests
    pub api_duration: Duration,

    /// Provider name
    pub provider: String,

    /// Model name
    pub model: String,
}

impl Default for TokenUsageStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for TokenUsageStats {
    fn eq(&self, other: &Self) -> bool {
        self.input_tokens == other.input_tokens
            && self.output_tokens == other.output_tokens
            && self.requests == other.requests
    }
}

impl TokenUsageStats {
    /// Create a new empty token usage stats instance
    pub fn new() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            requests: 0,
            start_time: Instant::now(),
            api_duration: Duration::from_secs(0),
            provider: String::new(),
            model: String::new(),
        }
    }

    /// Create new token usage stats with provider info
    pub fn with_provider_info(provider: String, model: String) -> Self {
        Self { provider, model, ..Self::new() }
    }

    /// Add token usage numbers
    pub fn add_token_usage(&mut self, input_tokens: Option<u64>, output_tokens: Option<u64>) {
        if let Some(it) = input_tokens {
            self.input_tokens += it;
            self.total_tokens += it;
        }

        if let Some(ot) = output_tokens {
            self.output_tokens += ot;
            self.total_tokens += ot;
        }
    }

    /// Calculate tokens per minute rate
    pub fn tokens_per_minute(&self) -> f64 {
        // API time when known, wall time otherwise
        let duration_minutes = if self.api_duration.as_secs_f64() > 0.0 {
            self.api_duration.as_secs_f64() / 60.0
        } else {
            self.start_time.elapsed().as_secs_f64() / 60.0
        };

        if duration_minutes > 0.0 {
            self.total_tokens as f64 / duration_minutes
        } else {
            0.0
        }
    }

    /// Generate a summary of token usage
    pub fn summary(&self) -> String {
        format!(
            "Token Usage Summary:\n\
             Provider: {}\n\
             Model: {}\n\
             Requests: {}\n\
             Input tokens: {}\n\
             Output tokens: {}\n\
             Total tokens: {}\n\
             API request time: {:.2} minutes\n\
             Tokens per minute: {:.2}",
            self.provider,
            self.model,
            self.requests,
            self.input_tokens,
            self.output_tokens,
            self.total_tokens,
            self.api_duration.as_secs_f64() / 60.0,
            self.tokens_per_minute()
        )
    }
}
