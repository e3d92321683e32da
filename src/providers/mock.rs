/*!
 * Mock provider implementations for testing.
 *
 * This module provides mock providers that simulate different behaviors:
 * - `MockProvider::working()` - Always succeeds, keeping segment markers intact
 * - `MockProvider::intermittent(n)` - Fails every nth request
 * - `MockProvider::failing()` - Always fails with an error
 *
 * Clones share their counters and request log, so a test can hand one clone
 * to the pipeline and inspect another.
 */

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{Completion, Provider};
use crate::translation::core::{RepairBackend, TranslationBackend};
use crate::translation::prompts::{segment_marker, END_MARKER};

/// Mock request for testing
#[derive(Debug, Clone, PartialEq)]
pub enum MockRequest {
    /// Translation of marker-delimited text
    Translate { text: String, instructions: String },
    /// Repair of one file after a compiler error
    Repair { file_content: String, error_excerpt: String },
}

impl MockRequest {
    /// The text or file content carried by the request
    pub fn text(&self) -> &str {
        match self {
            Self::Translate { text, .. } => text,
            Self::Repair { file_content, .. } => file_content,
        }
    }
}

/// Mock response for testing
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub text: String,
    /// Simulated prompt tokens
    pub prompt_tokens: Option<u64>,
    /// Simulated completion tokens
    pub completion_tokens: Option<u64>,
}

/// Behavior mode for the mock provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockBehavior {
    /// Always succeeds with a proper translation
    Working,
    /// Succeeds but drops every segment marker after the first
    PartialMarkers,
    /// Fails intermittently (every Nth request)
    Intermittent { fail_every: usize },
    /// Always fails with an error
    Failing,
    /// Returns only the first segment, without END marker
    Truncated,
    /// Returns empty response
    Empty,
    /// Working, after a delay
    Slow { delay_ms: u64 },
}

#[derive(Debug, Default)]
struct MockState {
    request_count: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<MockRequest>>,
}

/// Mock provider for testing translation and repair behavior
#[derive(Debug, Clone)]
pub struct MockProvider {
    behavior: MockBehavior,
    state: Arc<MockState>,
    /// Custom translation generator (optional)
    custom_response: Option<fn(&MockRequest) -> String>,
    /// Custom repair generator (optional)
    repair_response: Option<fn(&MockRequest) -> String>,
}

impl MockProvider {
    /// Create a new mock provider with the specified behavior
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            state: Arc::new(MockState::default()),
            custom_response: None,
            repair_response: None,
        }
    }

    pub fn working() -> Self {
        Self::new(MockBehavior::Working)
    }

    pub fn partial_markers() -> Self {
        Self::new(MockBehavior::PartialMarkers)
    }

    pub fn intermittent(fail_every: usize) -> Self {
        Self::new(MockBehavior::Intermittent { fail_every: fail_every.max(1) })
    }

    pub fn failing() -> Self {
        Self::new(MockBehavior::Failing)
    }

    pub fn truncated() -> Self {
        Self::new(MockBehavior::Truncated)
    }

    pub fn empty() -> Self {
        Self::new(MockBehavior::Empty)
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self::new(MockBehavior::Slow { delay_ms })
    }

    /// Set a custom translation generator, used when the behavior succeeds
    pub fn with_custom_response(mut self, generator: fn(&MockRequest) -> String) -> Self {
        self.custom_response = Some(generator);
        self
    }

    /// Set the repair generator; without one, repairs echo the file unchanged
    pub fn with_repair(mut self, generator: fn(&MockRequest) -> String) -> Self {
        self.repair_response = Some(generator);
        self
    }

    /// Requests received so far, including failed ones
    pub fn request_count(&self) -> usize {
        self.state.request_count.load(Ordering::SeqCst)
    }

    /// Highest number of requests observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Copy of every request received
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state.requests.lock().clone()
    }

    /// Translation of a marker-delimited body: markers kept, other lines prefixed
    pub fn generate_translation(text: &str) -> String {
        text.lines()
            .map(|line| {
                if is_marker_line(line) || line.trim().is_empty() {
                    line.to_string()
                } else {
                    format!("[TRANSLATED] {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Like `generate_translation`, but only the first segment marker survives
    pub fn generate_partial_response(text: &str) -> String {
        let first = segment_marker(0);
        Self::generate_translation(text)
            .lines()
            .filter(|line| !is_marker_line(line) || line.trim() == first || line.trim() == END_MARKER)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First segment only, no END marker
    pub fn generate_truncated_response(text: &str) -> String {
        let second = segment_marker(1);
        let translated = Self::generate_translation(text);
        let cut = translated.find(&second)
            .or_else(|| translated.find(END_MARKER))
            .unwrap_or(translated.len());
        translated[..cut].trim_end().to_string()
    }

    fn respond(&self, text: String, request: &MockRequest) -> MockResponse {
        let prompt_tokens = request.text().split_whitespace().count() as u64;
        let completion_tokens = text.split_whitespace().count() as u64;
        MockResponse {
            text,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        }
    }

    fn translation_text(&self, request: &MockRequest) -> String {
        match self.custom_response {
            Some(generator) => generator(request),
            None => Self::generate_translation(request.text()),
        }
    }

    async fn handle(&self, request: &MockRequest, count: usize) -> Result<MockResponse, ProviderError> {
        if let MockRequest::Repair { file_content, .. } = request {
            return match self.behavior {
                MockBehavior::Failing => Err(ProviderError::ApiError {
                    message: "Simulated provider failure".to_string(),
                    status_code: 500,
                }),
                _ => {
                    let text = match self.repair_response {
                        Some(generator) => generator(request),
                        None => file_content.clone(),
                    };
                    Ok(self.respond(text, request))
                }
            };
        }

        match self.behavior {
            MockBehavior::Working => Ok(self.respond(self.translation_text(request), request)),

            MockBehavior::PartialMarkers => {
                Ok(self.respond(Self::generate_partial_response(request.text()), request))
            }

            MockBehavior::Intermittent { fail_every } => {
                if count % fail_every == fail_every - 1 {
                    Err(ProviderError::ApiError {
                        message: format!("Simulated intermittent failure (request #{})", count + 1),
                        status_code: 503,
                    })
                } else {
                    Ok(self.respond(self.translation_text(request), request))
                }
            }

            MockBehavior::Failing => Err(ProviderError::ApiError {
                message: "Simulated provider failure".to_string(),
                status_code: 500,
            }),

            MockBehavior::Truncated => {
                Ok(self.respond(Self::generate_truncated_response(request.text()), request))
            }

            MockBehavior::Empty => Ok(MockResponse {
                text: String::new(),
                prompt_tokens: Some(0),
                completion_tokens: Some(0),
            }),

            MockBehavior::Slow { delay_ms } => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(self.respond(self.translation_text(request), request))
            }
        }
    }
}

fn is_marker_line(line: &str) -> bool {
    let line = line.trim();
    line == END_MARKER || (line.starts_with("<<SEG_") && line.ends_with(">>"))
}

#[async_trait]
impl Provider for MockProvider {
    type Request = MockRequest;
    type Response = MockResponse;

    async fn complete(&self, request: Self::Request) -> Result<Self::Response, ProviderError> {
        let count = self.state.request_count.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().push(request.clone());

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.handle(&request, count).await;
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);

        result
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        match self.behavior {
            MockBehavior::Failing => Err(ProviderError::ConnectionError("Simulated connection failure".to_string())),
            _ => Ok(()),
        }
    }

    fn to_completion(response: Self::Response) -> Completion {
        Completion::new(
            response.text,
            response.prompt_tokens.unwrap_or(0),
            response.completion_tokens.unwrap_or(0),
        )
    }
}

#[async_trait]
impl TranslationBackend for MockProvider {
    async fn translate(&self, text: &str, instructions: &str) -> Result<Completion, ProviderError> {
        let request = MockRequest::Translate {
            text: text.to_string(),
            instructions: instructions.to_string(),
        };
        self.complete(request).await.map(Self::to_completion)
    }
}

#[async_trait]
impl RepairBackend for MockProvider {
    async fn repair(&self, file_content: &str, error_excerpt: &str) -> Result<Completion, ProviderError> {
        let request = MockRequest::Repair {
            file_content: file_content.to_string(),
            error_excerpt: error_excerpt.to_string(),
        };
        self.complete(request).await.map(Self::to_completion)
    }
}
