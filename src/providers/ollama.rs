use async_trait::async_trait;
use log::error;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{request_error, status_error, Completion, Provider};

/// Ollama client for interacting with Ollama API
#[derive(Debug)]
pub struct Ollama {
    /// Base URL of the Ollama API
    base_url: String,
    /// HTTP client for making requests
    client: Client,
}

/// Generate request for the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model name to use for generation
    model: String,
    /// Prompt to generate from
    prompt: String,
    /// System message to guide the model
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    /// Additional model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerationOptions>,
    /// Whether to stream the response
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

/// Generation options for the Ollama API
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    /// Maximum number of tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    /// Context window size
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
}

/// Generation response from the Ollama API
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Model name
    #[serde(default)]
    pub model: String,
    /// Generated text
    pub response: String,
    /// Whether the generation is complete
    #[serde(default)]
    pub done: bool,
    /// Number of prompt tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_eval_count: Option<u64>,
    /// Number of generated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

impl GenerationRequest {
    /// Create a new non-streaming generation request
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            options: None,
            stream: Some(false),
        }
    }

    /// Set the system prompt
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set the temperature
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.get_or_insert_with(GenerationOptions::default).temperature = Some(temperature);
        self
    }

    /// Set the generation limit
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.get_or_insert_with(GenerationOptions::default).num_predict = Some(max_tokens);
        self
    }

    /// Set the context window, large enough for prompt and answer
    pub fn context_window(mut self, num_ctx: u32) -> Self {
        self.options.get_or_insert_with(GenerationOptions::default).num_ctx = Some(num_ctx);
        self
    }
}

impl Ollama {
    /// Create a client for a base URL such as `http://localhost:11434`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::builder()
                .timeout(timeout)
                // Ollama uses HTTP/1.1
                .http1_only()
                .pool_idle_timeout(Duration::from_secs(90))
                .tcp_keepalive(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Server version, used as a liveness check
    pub async fn version(&self) -> Result<String, ProviderError> {
        let response = self.client.get(format!("{}/api/version", self.base_url))
            .send()
            .await
            .map_err(|e| request_error("Ollama", e))?;
        if !response.status().is_success() {
            return Err(status_error("Ollama", response).await);
        }
        let version = response.json::<VersionResponse>().await
            .map_err(|e| ProviderError::ParseError(format!("Failed to parse Ollama version: {}", e)))?;
        Ok(version.version)
    }

    /// Parse a generate body; streamed JSONL bodies are concatenated
    fn parse_generation(body: &str) -> Result<GenerationResponse, ProviderError> {
        if let Ok(response) = serde_json::from_str::<GenerationResponse>(body) {
            return Ok(response);
        }

        let chunks: Vec<GenerationResponse> = body.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<GenerationResponse>(line).ok())
            .collect();
        let Some(last) = chunks.last() else {
            let preview: String = body.chars().take(500).collect();
            error!("Failed to parse Ollama API response. Raw response (first 500 chars): {}", preview);
            return Err(ProviderError::ParseError("Unrecognised Ollama response body".to_string()));
        };

        Ok(GenerationResponse {
            model: last.model.clone(),
            response: chunks.iter().map(|c| c.response.as_str()).collect(),
            done: last.done,
            prompt_eval_count: last.prompt_eval_count,
            eval_count: last.eval_count,
        })
    }
}

#[async_trait]
impl Provider for Ollama {
    type Request = GenerationRequest;
    type Response = GenerationResponse;

    async fn complete(&self, request: GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        let response = self.client.post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error("Ollama", e))?;

        if !response.status().is_success() {
            return Err(status_error("Ollama", response).await);
        }

        let body = response.text().await
            .map_err(|e| ProviderError::ParseError(format!("Failed to get response text from Ollama API: {}", e)))?;
        Self::parse_generation(&body)
    }

    async fn test_connection(&self) -> Result<(), ProviderError> {
        self.version().await.map(|_| ())
    }

    fn to_completion(response: GenerationResponse) -> Completion {
        Completion::new(
            response.response,
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parseGeneration_singleObject_shouldReadTokens() {
        let body = r#"{"model":"m","response":"Salut","done":true,"prompt_eval_count":7,"eval_count":3}"#;

        let completion = Ollama::to_completion(Ollama::parse_generation(body).unwrap());

        assert_eq!(completion, Completion::new("Salut", 7, 3));
    }

    #[test]
    fn test_parseGeneration_streamedLines_shouldConcatenate() {
        let body = "{\"model\":\"m\",\"response\":\"Sa\",\"done\":false}\n{\"model\":\"m\",\"response\":\"lut\",\"done\":true,\"eval_count\":2}\n";

        let response = Ollama::parse_generation(body).unwrap();

        assert_eq!(response.response, "Salut");
        assert_eq!(response.eval_count, Some(2));
    }

    #[test]
    fn test_parseGeneration_garbage_shouldFail() {
        assert!(matches!(Ollama::parse_generation("<html>"), Err(ProviderError::ParseError(_))));
    }

    #[test]
    fn test_generationRequest_shouldNestOptions() {
        let request = GenerationRequest::new("m", "p").temperature(0.2).max_tokens(50);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["stream"], false);
        assert_eq!(json["options"]["num_predict"], 50);
        assert!(json["options"].get("num_ctx").is_none());
    }
}
