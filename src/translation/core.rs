/*!
 * Core translation service implementation.
 *
 * This module defines the two model-facing seams of the pipeline,
 * `TranslationBackend` and `RepairBackend`, and the `TranslationService`
 * implementing both on top of the configured provider client.
 */

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::app_config::{TranslationConfig, TranslationProvider as ConfigTranslationProvider};
use crate::errors::ProviderError;
use crate::providers::anthropic::{Anthropic, AnthropicRequest};
use crate::providers::ollama::{GenerationRequest, Ollama};
use crate::providers::openai::{OpenAI, OpenAIRequest};
use crate::providers::{Completion, Provider};

use super::prompts::{build_repair_request, LanguagePair};

/// Text-in/text-out translation service
#[async_trait]
pub trait TranslationBackend: Send + Sync {
    /// Translate `text` following the rendered system `instructions`
    async fn translate(&self, text: &str, instructions: &str) -> Result<Completion, ProviderError>;
}

/// Service proposing a corrected file for a compiler error
#[async_trait]
pub trait RepairBackend: Send + Sync {
    async fn repair(&self, file_content: &str, error_excerpt: &str) -> Result<Completion, ProviderError>;
}

/// Normalise an Ollama endpoint to `scheme://host:port`
fn ollama_base_url(endpoint: &str) -> Result<String> {
    if endpoint.is_empty() {
        return Err(anyhow!("Endpoint cannot be empty"));
    }

    let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{}", endpoint))?
    };

    let host = url.host_str()
        .ok_or_else(|| anyhow!("Invalid host in endpoint: {}", endpoint))?;
    let port = url.port().unwrap_or(if url.scheme() == "https" { 443 } else { 11434 });

    Ok(format!("{}://{}:{}", url.scheme(), host, port))
}

/// Translation provider implementation variants
#[derive(Debug)]
enum TranslationProviderImpl {
    /// Ollama LLM service
    Ollama { client: Ollama },

    /// OpenAI API service
    OpenAI { client: OpenAI },

    /// LM Studio local server (OpenAI-compatible)
    LMStudio { client: OpenAI },

    /// Anthropic API service
    Anthropic { client: Anthropic },
}

/// Translation and repair service backed by one configured provider
#[derive(Debug)]
pub struct TranslationService {
    /// Provider implementation
    provider: TranslationProviderImpl,

    /// Configuration for the translation service
    pub config: TranslationConfig,

    /// Languages used to render the repair prompt
    languages: LanguagePair,
}

impl TranslationService {
    /// Create a new translation service with the given configuration
    pub fn new(config: TranslationConfig, languages: LanguagePair) -> Result<Self> {
        let timeout = config.get_timeout();
        let provider = match config.provider {
            ConfigTranslationProvider::Ollama => TranslationProviderImpl::Ollama {
                client: Ollama::new(ollama_base_url(&config.get_endpoint())?, timeout),
            },
            ConfigTranslationProvider::OpenAI => TranslationProviderImpl::OpenAI {
                client: OpenAI::new(config.get_api_key(), config.get_endpoint(), timeout),
            },
            ConfigTranslationProvider::LMStudio => {
                // LM Studio often doesn't require an API key
                let api_key = {
                    let key = config.get_api_key();
                    if key.is_empty() { "lm-studio".to_string() } else { key }
                };
                TranslationProviderImpl::LMStudio {
                    client: OpenAI::with_label("LM Studio", api_key, config.get_endpoint(), timeout),
                }
            }
            ConfigTranslationProvider::Anthropic => TranslationProviderImpl::Anthropic {
                client: Anthropic::new(config.get_api_key(), config.get_endpoint(), timeout),
            },
        };

        Ok(Self { provider, config, languages })
    }

    /// Test the connection to the translation provider
    pub async fn test_connection(&self) -> Result<()> {
        let result = match &self.provider {
            TranslationProviderImpl::Ollama { client } => client.test_connection().await,
            TranslationProviderImpl::OpenAI { client } | TranslationProviderImpl::LMStudio { client } => {
                client.test_connection().await
            }
            TranslationProviderImpl::Anthropic { client } => client.test_connection().await,
        };
        result.map_err(|e| anyhow!("Failed to connect to {}: {}", self.config.provider.display_name(), e))
    }

    /// One system + user exchange with the configured provider
    async fn complete(&self, system: &str, user: &str) -> Result<Completion, ProviderError> {
        let model = self.config.get_model();
        let temperature = self.config.common.temperature;
        let max_tokens = self.config.get_max_tokens();
        debug!("Sending {} chars to {} ({})", user.len(), self.config.provider, model);

        match &self.provider {
            TranslationProviderImpl::Ollama { client } => {
                let request = GenerationRequest::new(model, user)
                    .system(system)
                    .temperature(temperature)
                    .max_tokens(max_tokens);
                client.complete(request).await.map(Ollama::to_completion)
            }
            TranslationProviderImpl::OpenAI { client } | TranslationProviderImpl::LMStudio { client } => {
                let request = OpenAIRequest::new(model)
                    .add_message("system", system)
                    .add_message("user", user)
                    .temperature(temperature)
                    .max_tokens(max_tokens);
                client.complete(request).await.map(OpenAI::to_completion)
            }
            TranslationProviderImpl::Anthropic { client } => {
                let request = AnthropicRequest::new(model, max_tokens)
                    .system(system)
                    .add_message("user", user)
                    .temperature(temperature);
                client.complete(request).await.map(Anthropic::to_completion)
            }
        }
    }
}

#[async_trait]
impl TranslationBackend for TranslationService {
    async fn translate(&self, text: &str, instructions: &str) -> Result<Completion, ProviderError> {
        self.complete(instructions, text).await
    }
}

#[async_trait]
impl RepairBackend for TranslationService {
    async fn repair(&self, file_content: &str, error_excerpt: &str) -> Result<Completion, ProviderError> {
        let system = self.languages.render(&self.config.common.repair_prompt);
        self.complete(&system, &build_repair_request(file_content, error_excerpt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::ProviderConfig;

    #[test]
    fn test_ollamaBaseUrl_shouldAddSchemeAndPort() {
        assert_eq!(ollama_base_url("localhost").unwrap(), "http://localhost:11434");
        assert_eq!(ollama_base_url("http://gpu-box:8080/").unwrap(), "http://gpu-box:8080");
        assert!(ollama_base_url("").is_err());
    }

    #[test]
    fn test_new_forEachProvider_shouldBuildClient() {
        for provider in [
            ConfigTranslationProvider::Ollama,
            ConfigTranslationProvider::OpenAI,
            ConfigTranslationProvider::LMStudio,
            ConfigTranslationProvider::Anthropic,
        ] {
            let config = TranslationConfig {
                provider: provider.clone(),
                available_providers: vec![ProviderConfig::new(provider)],
                ..Default::default()
            };
            assert!(TranslationService::new(config, LanguagePair::new("en", "fr")).is_ok());
        }
    }
}
