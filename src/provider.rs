//! AI Completion Service
//!
//! The pipeline treats text generation as a black-box capability: a prompt and a model
//! tier go in, text plus a cost record come out. `CompletionService` is the injection
//! seam; `OpenAiCompletionService` is the production binding for any OpenAI-compatible
//! chat-completions endpoint.

use crate::error::PipelineError;
use crate::model::{ModelTier, PricingConfig};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Completion response plus its cost accounting record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    /// Cost of this call; never negative
    pub cost_units: f64,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub model: String,
}

impl Completion {
    pub fn new(text: impl Into<String>, cost_units: f64) -> Self {
        Self {
            text: text.into(),
            cost_units: cost_units.max(0.0),
            usage: TokenUsage::default(),
            model: String::new(),
        }
    }
}

/// External completion capability
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<Completion, PipelineError>;
}

/// Model name per tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_economy_model")]
    pub economy: String,
    #[serde(default = "default_standard_model")]
    pub standard: String,
    #[serde(default = "default_premium_model")]
    pub premium: String,
}

fn default_economy_model() -> String {
    "gpt-4.1-nano".to_string()
}

fn default_standard_model() -> String {
    "gpt-4.1-mini".to_string()
}

fn default_premium_model() -> String {
    "gpt-4.1".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            economy: default_economy_model(),
            standard: default_standard_model(),
            premium: default_premium_model(),
        }
    }
}

impl ModelsConfig {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Economy => &self.economy,
            ModelTier::Standard => &self.standard,
            ModelTier::Premium => &self.premium,
        }
    }
}

/// HTTP provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Explicit key; takes precedence over `api_key_env`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_system_prompt() -> String {
    "You are an educational content assistant.".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: None,
            api_key_env: default_api_key_env(),
            system_prompt: default_system_prompt(),
            temperature: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(format!("Invalid endpoint URL: {}", self.endpoint));
        }
        Ok(())
    }

    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn map_http_error(error: reqwest::Error, timeout_ms: u64) -> PipelineError {
    transport_error(error.is_timeout(), error.is_connect(), error.to_string(), timeout_ms)
}

fn transport_error(timed_out: bool, connect: bool, detail: String, timeout_ms: u64) -> PipelineError {
    if timed_out {
        PipelineError::Timeout(timeout_ms)
    } else if connect {
        PipelineError::Transient(format!("Connection error: {}", detail))
    } else {
        PipelineError::Transient(format!("HTTP error: {}", detail))
    }
}

fn map_status(status: u16, body: String) -> PipelineError {
    match status {
        401 | 403 => PipelineError::Auth(format!("Authentication failed: {}", body)),
        429 => PipelineError::RateLimit(format!("Rate limit exceeded: {}", body)),
        400..=499 => PipelineError::Configuration(format!(
            "Request rejected with status {}: {}",
            status, body
        )),
        _ => PipelineError::Transient(format!("Request failed with status {}: {}", status, body)),
    }
}

/// OpenAI-compatible chat completions client
pub struct OpenAiCompletionService {
    client: Client,
    config: ProviderConfig,
    models: ModelsConfig,
    pricing: PricingConfig,
    api_key: String,
}

impl OpenAiCompletionService {
    pub fn new(
        config: ProviderConfig,
        models: ModelsConfig,
        pricing: PricingConfig,
    ) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::Configuration)?;
        let api_key = config.resolve_api_key().ok_or_else(|| {
            PipelineError::Auth(format!(
                "No API key configured (set provider.api_key or ${})",
                config.api_key_env
            ))
        })?;
        // Per-call deadlines are enforced by the retry policy.
        let client = Client::builder()
            .no_proxy()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                PipelineError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self {
            client,
            config,
            models,
            pricing,
            api_key,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletionService {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<Completion, PipelineError> {
        let model = self.models.model_for(tier);
        let request = ChatCompletionRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            stream: false,
        };

        let url = format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| map_http_error(e, self.config.connect_timeout_secs.saturating_mul(1000)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status.as_u16(), body));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            PipelineError::MalformedResponse(format!("Failed to parse response: {}", e))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::MalformedResponse("No choices in response".to_string()))?;

        let usage = completion
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();
        let cost_units = self
            .pricing
            .cost_for_tokens(tier, u64::from(usage.total_tokens));

        debug!(
            model = %completion.model,
            tier = %tier,
            total_tokens = usage.total_tokens,
            cost_units,
            "Provider completion succeeded"
        );

        Ok(Completion {
            text: text.trim().to_string(),
            cost_units,
            usage,
            model: completion.model,
        })
    }
}
