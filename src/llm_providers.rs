use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.opentyphoon.ai/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "typhoon-v2.1-12b-instruct";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// Common message structure for LLM requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: String,
    pub content: String,
}

/// Sampling and transport knobs for one completion call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub timeout: Option<Duration>,
}

/// Failures talking to a vendor, kept typed so callers can tell timeouts apart
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request timed out after {after:?}")]
    Timeout { provider: &'static str, after: Duration },

    #[error("{provider} API request failed with status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{0} response contained no completion")]
    EmptyResponse(&'static str),

    #[error("{provider} response could not be used: {reason}")]
    InvalidResponse { provider: &'static str, reason: String },

    #[error("{provider} transport error: {source}")]
    Transport {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl ProviderError {
    pub fn from_reqwest(provider: &'static str, timeout: Option<Duration>, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider,
                after: timeout.unwrap_or_default(),
            }
        } else {
            ProviderError::Transport { provider, source: err }
        }
    }
}

/// Enum-based LLM provider implementation
#[derive(Debug, Clone)]
pub enum LLMProvider {
    OpenAI(OpenAIProvider),
    Gemini(GeminiProvider),
}

impl LLMProvider {
    /// Make a request to the LLM provider with optional system message
    pub async fn make_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        match self {
            LLMProvider::OpenAI(provider) => provider.make_request(system_message, prompt, options).await,
            LLMProvider::Gemini(provider) => provider.make_request(system_message, prompt, options).await,
        }
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI(provider) => provider.provider_name(),
            LLMProvider::Gemini(provider) => provider.provider_name(),
        }
    }

    /// Get the model name being used
    pub fn model_name(&self) -> &str {
        match self {
            LLMProvider::OpenAI(provider) => provider.model_name(),
            LLMProvider::Gemini(provider) => provider.model_name(),
        }
    }
}

/// OpenAI-compatible chat completions provider (Typhoon speaks this protocol)
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<LLMMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIChoice {
    message: LLMMessage,
}

impl OpenAIProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        }
    }

    pub async fn make_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = system_message {
            messages.push(LLMMessage {
                role: "system".to_string(),
                content: sys_msg.to_string(),
            });
        }

        messages.push(LLMMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages,
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            frequency_penalty: options.frequency_penalty,
            presence_penalty: options.presence_penalty,
        };

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request_body);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider_name(), options.timeout, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(ProviderError::Status {
                provider: self.provider_name(),
                status: status.as_u16(),
                body: error_text,
            }
            .into());
        }

        let openai_response: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider_name(), options.timeout, e))?;

        let response_content = openai_response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse(self.provider_name()))?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "OpenAI"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

/// Gemini provider implementation
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

impl GeminiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
        }
    }

    pub async fn make_request(
        &self,
        system_message: Option<&str>,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        let full_prompt = match system_message {
            Some(sys_msg) => format!("{}\n\n{}", sys_msg, prompt),
            None => prompt.to_string(),
        };

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart { text: full_prompt }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: options.temperature.unwrap_or(0.7),
                top_p: options.top_p.unwrap_or(0.9),
                max_output_tokens: options.max_tokens.unwrap_or(2048),
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        info!(
            provider = self.provider_name(),
            model = %self.model,
            base_url = %self.base_url,
            prompt_length = prompt.len(),
            "Making LLM request"
        );

        let mut request = self.client.post(&url).json(&request_body);
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider_name(), options.timeout, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                provider = self.provider_name(),
                status = %status,
                error = %error_text,
                "LLM API request failed"
            );
            return Err(ProviderError::Status {
                provider: self.provider_name(),
                status: status.as_u16(),
                body: error_text,
            }
            .into());
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.provider_name(), options.timeout, e))?;

        let response_content = gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or(ProviderError::EmptyResponse(self.provider_name()))?;

        info!(
            provider = self.provider_name(),
            response_length = response_content.len(),
            "Successfully received LLM response"
        );

        Ok(response_content)
    }

    pub fn provider_name(&self) -> &'static str {
        "Gemini"
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

static FENCED_ARRAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").expect("fenced array pattern is valid")
});

/// Centralized JSON response parser with robust extraction logic
#[derive(Debug, Clone, Default)]
pub struct JsonResponseParser;

impl JsonResponseParser {
    /// Body of the first ```json fence that holds an array
    pub fn fenced_array(content: &str) -> Option<&str> {
        FENCED_ARRAY
            .captures(content)
            .and_then(|captures| captures.get(1))
            .map(|group| group.as_str())
    }

    /// Extract a top-level JSON array: a fenced array first, then the outermost brackets
    pub fn extract_json_array(content: &str) -> String {
        if let Some(fenced) = Self::fenced_array(content) {
            return fenced.to_string();
        }

        let trimmed = content.trim();
        if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }

        trimmed.to_string()
    }

    /// Parse a JSON array response into a vector of records
    pub fn parse_json_array<T>(&self, content: &str) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let json_content = Self::extract_json_array(content);
        serde_json::from_str::<Vec<T>>(&json_content)
            .map_err(|e| anyhow::anyhow!("Failed to parse JSON array: {}", e))
    }
}

/// Factory for creating LLM providers based on provider type
pub struct LLMProviderFactory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LLMProviderType {
    OpenAI,
    Gemini,
}

impl LLMProviderType {
    /// Parse a configuration string; unknown names fall back to the OpenAI-compatible protocol
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "gemini" | "google" => LLMProviderType::Gemini,
            _ => LLMProviderType::OpenAI,
        }
    }
}

impl LLMProviderFactory {
    /// Create a new LLM provider instance based on provider type
    pub fn create_provider(
        provider_type: LLMProviderType,
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
    ) -> LLMProvider {
        match provider_type {
            LLMProviderType::OpenAI => LLMProvider::OpenAI(OpenAIProvider::new(api_key, base_url, model)),
            LLMProviderType::Gemini => LLMProvider::Gemini(GeminiProvider::new(api_key, base_url, model)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_array_only_matches_fences() {
        let content = "Here you go:\n```json\n[1, 2]\n```\nDone";
        assert_eq!(JsonResponseParser::fenced_array(content), Some("[1, 2]"));
        assert_eq!(JsonResponseParser::fenced_array("[1, 2]"), None);
    }

    #[test]
    fn test_timeout_message_keeps_sub_second_precision() {
        let short = ProviderError::Timeout {
            provider: "OpenAI",
            after: Duration::from_millis(250),
        };
        assert_eq!(short.to_string(), "OpenAI request timed out after 250ms");

        let long = ProviderError::Timeout {
            provider: "TyphoonOCR",
            after: Duration::from_secs(30),
        };
        assert_eq!(long.to_string(), "TyphoonOCR request timed out after 30s");
    }

    #[test]
    fn test_extract_json_array_prefers_fenced_block() {
        let content = "Sure [note]\n```json\n[{\"question\": \"q\"}]\n```";
        assert_eq!(
            JsonResponseParser::extract_json_array(content),
            "[{\"question\": \"q\"}]"
        );
    }

    #[test]
    fn test_extract_json_array_outermost_brackets() {
        let content = "Flashcards: [{\"question\": \"a\", \"answer\": \"b\"}] hope this helps";
        assert_eq!(
            JsonResponseParser::extract_json_array(content),
            "[{\"question\": \"a\", \"answer\": \"b\"}]"
        );
    }

    #[test]
    fn test_parse_json_array_rejects_prose() {
        let parser = JsonResponseParser;
        let parsed: Result<Vec<serde_json::Value>> = parser.parse_json_array("no json here");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!(LLMProviderType::parse("typhoon"), LLMProviderType::OpenAI);
        assert_eq!(LLMProviderType::parse("OpenAI"), LLMProviderType::OpenAI);
        assert_eq!(LLMProviderType::parse("GEMINI"), LLMProviderType::Gemini);
        assert_eq!(LLMProviderType::parse("google"), LLMProviderType::Gemini);
        assert_eq!(LLMProviderType::parse("mystery"), LLMProviderType::OpenAI);
    }

    #[test]
    fn test_openai_request_omits_unset_options() {
        let request = OpenAIRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: Some(0.5),
            top_p: None,
            max_tokens: Some(10),
            frequency_penalty: None,
            presence_penalty: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_tokens"], 10);
        assert!(value.get("top_p").is_none());
        assert!(value.get("presence_penalty").is_none());
    }

    #[test]
    fn test_factory_defaults() {
        let provider = LLMProviderFactory::create_provider(
            LLMProviderType::OpenAI,
            "key".to_string(),
            Some("http://localhost:9999/v1/".to_string()),
            None,
        );
        assert_eq!(provider.provider_name(), "OpenAI");
        assert_eq!(provider.model_name(), DEFAULT_OPENAI_MODEL);

        let gemini = LLMProviderFactory::create_provider(LLMProviderType::Gemini, "key".to_string(), None, None);
        assert_eq!(gemini.provider_name(), "Gemini");
    }
}
