use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::default::Default;
use std::time::Duration;

/// Run configuration: language pair, provider selection, pipeline
/// limits and compile settings, loaded from JSON.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Source language code (ISO)
    pub source_language: String,

    /// Target language code (ISO)
    pub target_language: String,

    /// Translation config
    pub translation: TranslationConfig,

    /// Pipeline behaviour (concurrency, batching, fix loop)
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Document compiler settings
    #[serde(default)]
    pub compiler: CompilerSettings,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

/// Translation provider type
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranslationProvider {
    // @provider: Ollama
    #[default]
    Ollama,
    // @provider: OpenAI
    OpenAI,
    // @provider: Anthropic
    Anthropic,
    // @provider: LM Studio (OpenAI-compatible local server)
    LMStudio,
}

impl TranslationProvider {
    // @returns: Capitalized provider name
    pub fn display_name(&self) -> &str {
        match self {
            Self::Ollama => "Ollama",
            Self::OpenAI => "OpenAI",
            Self::Anthropic => "Anthropic",
            Self::LMStudio => "LM Studio",
        }
    }

    // @returns: Lowercase provider identifier
    pub fn to_lowercase_string(&self) -> String {
        match self {
            Self::Ollama => "ollama".to_string(),
            Self::OpenAI => "openai".to_string(),
            Self::Anthropic => "anthropic".to_string(),
            Self::LMStudio => "lmstudio".to_string(),
        }
    }
}

impl std::fmt::Display for TranslationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_lowercase_string())
    }
}

impl std::str::FromStr for TranslationProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "anthropic" => Ok(Self::Anthropic),
            "lmstudio" => Ok(Self::LMStudio),
            _ => Err(anyhow!("Invalid provider type: {}", s)),
        }
    }
}

/// Provider configuration wrapper
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderConfig {
    // @field: Provider type identifier
    #[serde(rename = "type")]
    pub provider_type: String,

    // @field: Model name
    #[serde(default = "String::new")]
    pub model: String,

    // @field: API key
    #[serde(default = "String::new")]
    pub api_key: String,

    // @field: Service URL
    #[serde(default = "String::new")]
    pub endpoint: String,

    // @field: Timeout seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // @field: Max output tokens per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl ProviderConfig {
    // @param provider_type: Provider enum
    // @returns: Provider config with defaults
    pub fn new(provider_type: TranslationProvider) -> Self {
        let (model, endpoint) = match provider_type {
            TranslationProvider::Ollama => (default_ollama_model(), default_ollama_endpoint()),
            TranslationProvider::OpenAI => (default_openai_model(), default_openai_endpoint()),
            TranslationProvider::Anthropic => (default_anthropic_model(), default_anthropic_endpoint()),
            TranslationProvider::LMStudio => (default_lmstudio_model(), default_lmstudio_endpoint()),
        };

        Self {
            provider_type: provider_type.to_lowercase_string(),
            model,
            api_key: String::new(),
            endpoint,
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Translation service configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationConfig {
    /// Translation provider to use
    #[serde(default)]
    pub provider: TranslationProvider,

    /// Available translation providers
    #[serde(default)]
    pub available_providers: Vec<ProviderConfig>,

    /// Common translation settings
    #[serde(default)]
    pub common: TranslationCommonConfig,
}

/// Common translation settings applicable to all providers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TranslationCommonConfig {
    /// System prompt template for translation
    /// Placeholders: {source_language}, {target_language}
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// System prompt template for compile-error repair
    #[serde(default = "default_repair_prompt")]
    pub repair_prompt: String,

    /// Total attempts per request (first try included)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Base backoff in milliseconds, doubled after each failed attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Temperature parameter for text generation (0.0 to 1.0)
    /// Lower values make output more deterministic, higher values more creative
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Minimum translated/original length ratio accepted for a unit
    #[serde(default = "default_min_length_ratio")]
    pub min_length_ratio: f32,
}

impl Default for TranslationCommonConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            repair_prompt: default_repair_prompt(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            temperature: default_temperature(),
            min_length_ratio: default_min_length_ratio(),
        }
    }
}

/// How prose spans of one file are grouped into translation requests.
///
/// Spans are never split under either policy.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BatchingPolicy {
    /// Every prose span of a file goes into a single request
    WholeFile,
    /// Consecutive spans are packed greedily up to a character budget
    Paragraph {
        #[serde(default = "default_max_unit_chars")]
        max_chars: usize,
    },
}

impl Default for BatchingPolicy {
    fn default() -> Self {
        Self::Paragraph { max_chars: default_max_unit_chars() }
    }
}

/// Pipeline-level settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineSettings {
    /// Upper bound on simultaneously in-flight translation requests
    #[serde(default = "default_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Span grouping policy
    #[serde(default)]
    pub batching: BatchingPolicy,

    /// Compile attempts made by the fix loop before rescue
    #[serde(default = "default_max_compile_attempts")]
    pub max_compile_attempts: u32,

    /// Run the deterministic rescuer after the fix loop is exhausted
    #[serde(default = "default_true")]
    pub rescue: bool,

    /// Compile the untranslated source first, to tell breakage that predates
    /// translation apart from breakage it caused
    #[serde(default = "default_true")]
    pub preflight: bool,

    /// Strip comment lines and collapse blank runs before extraction. Off by
    /// default: it rewrites structural text.
    #[serde(default)]
    pub clean_sources: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_concurrent_requests(),
            batching: BatchingPolicy::default(),
            max_compile_attempts: default_max_compile_attempts(),
            rescue: true,
            preflight: true,
            clean_sources: false,
        }
    }
}

/// TeX engine selected for latexmk
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LatexEngine {
    Pdf,
    Xelatex,
    Lualatex,
}

impl LatexEngine {
    /// latexmk flag selecting this engine
    pub fn latexmk_flag(&self) -> &'static str {
        match self {
            Self::Pdf => "-pdf",
            Self::Xelatex => "-xelatex",
            Self::Lualatex => "-lualatex",
        }
    }
}

/// Document compiler settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CompilerSettings {
    /// latexmk executable
    #[serde(default = "default_latexmk_path")]
    pub latexmk_path: String,

    /// Engine override; chosen from the target script when absent
    #[serde(default)]
    pub engine: Option<LatexEngine>,

    /// Timeout floor in seconds
    #[serde(default = "default_base_timeout_secs")]
    pub base_timeout_secs: u64,

    /// Extra seconds granted per `tokens_per_unit` output tokens
    #[serde(default = "default_timeout_secs_per_unit")]
    pub timeout_secs_per_unit: u64,

    /// Output tokens per timeout unit
    #[serde(default = "default_tokens_per_unit")]
    pub tokens_per_unit: u64,

    /// Timeout ceiling in seconds
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Timeout of the pre-flight compile in seconds
    #[serde(default = "default_preflight_timeout_secs")]
    pub preflight_timeout_secs: u64,

    /// Characters of compiler log kept per attempt (tail)
    #[serde(default = "default_max_log_chars")]
    pub max_log_chars: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            latexmk_path: default_latexmk_path(),
            engine: None,
            base_timeout_secs: default_base_timeout_secs(),
            timeout_secs_per_unit: default_timeout_secs_per_unit(),
            tokens_per_unit: default_tokens_per_unit(),
            max_timeout_secs: default_max_timeout_secs(),
            preflight_timeout_secs: default_preflight_timeout_secs(),
            max_log_chars: default_max_log_chars(),
        }
    }
}

impl CompilerSettings {
    /// Base compile timeout
    pub fn base_timeout(&self) -> Duration {
        Duration::from_secs(self.base_timeout_secs)
    }

    /// Maximum compile timeout
    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }

    pub fn preflight_timeout(&self) -> Duration {
        Duration::from_secs(self.preflight_timeout_secs)
    }
}

/// Log verbosity level
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

fn default_concurrent_requests() -> usize {
    4
}

fn default_max_unit_chars() -> usize {
    3000
}

fn default_max_compile_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000 // 1 second base backoff time, doubled on each retry
}

fn default_temperature() -> f32 {
    0.3
}

fn default_min_length_ratio() -> f32 {
    0.15
}

fn default_true() -> bool {
    true
}

fn default_latexmk_path() -> String {
    "latexmk".to_string()
}

fn default_base_timeout_secs() -> u64 {
    120
}

fn default_timeout_secs_per_unit() -> u64 {
    15
}

fn default_tokens_per_unit() -> u64 {
    10_000
}

fn default_max_timeout_secs() -> u64 {
    600
}

fn default_preflight_timeout_secs() -> u64 {
    120
}

fn default_max_log_chars() -> usize {
    20_000
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_openai_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_anthropic_endpoint() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_lmstudio_endpoint() -> String {
    // LM Studio default server (OpenAI compatible) runs on port 1234 under /v1
    "http://localhost:1234/v1".to_string()
}

fn default_ollama_model() -> String {
    "qwen2.5:14b".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_lmstudio_model() -> String {
    // Placeholder; users should set to the loaded model name in LM Studio
    "local-model".to_string()
}

fn default_system_prompt() -> String {
    "You are a professional translator of scientific writing. Translate the text of every \
     segment from {source_language} to {target_language}. Keep each <<SEG_n>> marker line \
     exactly as given and end with <<END>>. Do not add LaTeX commands, math, comments or \
     explanations, and do not translate proper names or abbreviations that are usually kept \
     in the original."
        .to_string()
}

fn default_repair_prompt() -> String {
    "You are an expert LaTeX engineer. The document below was machine translated from \
     {source_language} to {target_language} and now fails to compile. Fix only what causes \
     the reported error, keep all translated text unchanged, and return the complete \
     corrected file content without explanations."
        .to_string()
}

impl Config {
    /// Validate the configuration for consistency and required values
    pub fn validate(&self) -> Result<()> {
        // Validate languages
        let _source_name = crate::language_utils::get_language_name(&self.source_language)?;
        let _target_name = crate::language_utils::get_language_name(&self.target_language)?;

        // Validate API key for hosted providers
        match self.translation.provider {
            TranslationProvider::OpenAI | TranslationProvider::Anthropic => {
                if self.translation.get_api_key().is_empty() {
                    return Err(anyhow!(
                        "Translation API key is required for {} provider",
                        self.translation.provider.display_name()
                    ));
                }
            },
            _ => {}
        }

        if self.pipeline.max_concurrent_requests == 0 {
            return Err(anyhow!("pipeline.max_concurrent_requests must be at least 1"));
        }
        if self.pipeline.max_compile_attempts == 0 {
            return Err(anyhow!("pipeline.max_compile_attempts must be at least 1"));
        }
        if self.translation.common.retry_count == 0 {
            return Err(anyhow!("translation.common.retry_count must be at least 1"));
        }
        if let BatchingPolicy::Paragraph { max_chars: 0 } = self.pipeline.batching {
            return Err(anyhow!("pipeline.batching.max_chars must be at least 1"));
        }
        if self.compiler.tokens_per_unit == 0 {
            return Err(anyhow!("compiler.tokens_per_unit must be at least 1"));
        }

        Ok(())
    }
}

/// Default implementation for Config
impl Default for Config {
    fn default() -> Self {
        Config {
            source_language: "en".to_string(),
            target_language: "zh".to_string(),
            translation: TranslationConfig::default(),
            pipeline: PipelineSettings::default(),
            compiler: CompilerSettings::default(),
            log_level: LogLevel::default(),
        }
    }
}

impl TranslationConfig {
    /// Get the active provider configuration from the available_providers array
    pub fn get_active_provider_config(&self) -> Option<&ProviderConfig> {
        self.get_provider_config(&self.provider)
    }

    /// Get a specific provider configuration by type
    pub fn get_provider_config(&self, provider_type: &TranslationProvider) -> Option<&ProviderConfig> {
        let provider_str = provider_type.to_lowercase_string();
        self.available_providers.iter()
            .find(|p| p.provider_type == provider_str)
    }

    /// Get the model for the active provider
    pub fn get_model(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.model.is_empty() {
                return provider_config.model.clone();
            }
        }

        // Default fallback based on provider type
        match self.provider {
            TranslationProvider::Ollama => default_ollama_model(),
            TranslationProvider::OpenAI => default_openai_model(),
            TranslationProvider::Anthropic => default_anthropic_model(),
            TranslationProvider::LMStudio => default_lmstudio_model(),
        }
    }

    /// Get the API key for the active provider
    pub fn get_api_key(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.api_key.is_empty() {
                return provider_config.api_key.clone();
            }
        }

        // Default fallback - Ollama doesn't use API keys
        String::new()
    }

    /// Get the endpoint for the active provider
    pub fn get_endpoint(&self) -> String {
        if let Some(provider_config) = self.get_active_provider_config() {
            if !provider_config.endpoint.is_empty() {
                return provider_config.endpoint.clone();
            }
        }

        // Default fallback based on provider type
        match self.provider {
            TranslationProvider::Ollama => default_ollama_endpoint(),
            TranslationProvider::OpenAI => default_openai_endpoint(),
            TranslationProvider::Anthropic => default_anthropic_endpoint(),
            TranslationProvider::LMStudio => default_lmstudio_endpoint(),
        }
    }

    /// Request timeout for the active provider
    pub fn get_timeout(&self) -> Duration {
        let secs = self.get_active_provider_config()
            .map(|p| p.timeout_secs)
            .filter(|secs| *secs > 0)
            .unwrap_or_else(default_timeout_secs);
        Duration::from_secs(secs)
    }

    /// Max output tokens for the active provider
    pub fn get_max_tokens(&self) -> u32 {
        self.get_active_provider_config()
            .map(|p| p.max_tokens)
            .filter(|tokens| *tokens > 0)
            .unwrap_or_else(default_max_tokens)
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: TranslationProvider::default(),
            available_providers: vec![
                ProviderConfig::new(TranslationProvider::Ollama),
                ProviderConfig::new(TranslationProvider::OpenAI),
                ProviderConfig::new(TranslationProvider::Anthropic),
                ProviderConfig::new(TranslationProvider::LMStudio),
            ],
            common: TranslationCommonConfig::default(),
        }
    }
}
