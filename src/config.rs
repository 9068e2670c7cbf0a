use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::llm_providers::{DEFAULT_OPENAI_BASE_URL, DEFAULT_OPENAI_MODEL, LLMProviderType};
use crate::ocr::{DEFAULT_OCR_BASE_URL, DEFAULT_OCR_MODEL};

// Import logging macros
use crate::{log_system_event, log_validation};

const PLACEHOLDER_API_KEY: &str = "your-api-key";

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LLMConfig,
    pub ocr: OcrConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Chat completion vendor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub provider: LLMProviderType,
    /// `LLM_PROVIDER` as given, kept for diagnostics
    pub provider_name: String,
    pub model: Option<String>,
}

/// OCR vendor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub max_upload_mb: usize,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    ///
    /// Nothing is logged here: the subscriber is configured from the result.
    pub fn from_env() -> Result<Self> {
        let llm = LLMConfig::from_env()?;
        Ok(Config {
            database: DatabaseConfig::from_env()?,
            ocr: OcrConfig::from_env(&llm.api_key)?,
            llm,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        })
    }

    /// Log a summary of loaded configuration (without sensitive data)
    pub fn log_configuration_summary(&self) {
        log_system_event!(config, "Configuration loaded from environment");
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            llm_provider = ?self.llm.provider,
            llm_model = ?self.llm.model,
            llm_api_key_masked = %mask_sensitive_data(&self.llm.api_key),
            ocr_model = %self.ocr.model,
            server_address = %self.server.address(),
            max_upload_mb = self.server.max_upload_mb,
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.server.max_upload_mb == 0 {
            return Err(anyhow!("MAX_UPLOAD_MB must be greater than 0"));
        }

        if !self.llm.has_known_provider() {
            warn!(
                provider = %self.llm.provider_name,
                "Unknown LLM provider, defaulting to OpenAI-compatible"
            );
        }

        if self.llm.api_key.is_empty() || self.llm.api_key == PLACEHOLDER_API_KEY {
            warn!("LLM API key appears to be placeholder or empty - summaries and quizzes will fail");
        }

        if self.ocr.api_key.is_empty() || self.ocr.api_key == PLACEHOLDER_API_KEY {
            warn!("OCR API key appears to be placeholder or empty - uploads will fail");
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:note2brain.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl LLMConfig {
    pub fn has_known_provider(&self) -> bool {
        matches!(
            self.provider_name.to_lowercase().as_str(),
            "openai" | "typhoon" | "chatgpt" | "gpt" | "gemini" | "google"
        )
    }

    fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY")
            .or_else(|_| env::var("TYPHOON_API_KEY"))
            .unwrap_or_else(|_| PLACEHOLDER_API_KEY.to_string());

        let provider_name = env::var("LLM_PROVIDER").unwrap_or_else(|_| "typhoon".to_string());
        let provider = LLMProviderType::parse(&provider_name);

        let (base_url, model) = match provider {
            LLMProviderType::OpenAI => (
                Some(env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string())),
                Some(env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string())),
            ),
            LLMProviderType::Gemini => (env::var("LLM_BASE_URL").ok(), env::var("LLM_MODEL").ok()),
        };

        Ok(LLMConfig {
            api_key,
            base_url,
            provider,
            provider_name,
            model,
        })
    }
}

impl OcrConfig {
    fn from_env(llm_api_key: &str) -> Result<Self> {
        let api_key = env::var("OCR_API_KEY").unwrap_or_else(|_| llm_api_key.to_string());
        let base_url = env::var("OCR_BASE_URL").unwrap_or_else(|_| DEFAULT_OCR_BASE_URL.to_string());
        let model = env::var("OCR_MODEL").unwrap_or_else(|_| DEFAULT_OCR_MODEL.to_string());

        Ok(OcrConfig {
            api_key,
            base_url,
            model,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "8000".to_string());

        let port = port_str
            .parse::<u16>()
            .map_err(|_| anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str))?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let upload_str = env::var("MAX_UPLOAD_MB").unwrap_or_else(|_| "50".to_string());
        let max_upload_mb = upload_str
            .parse::<usize>()
            .map_err(|_| anyhow!("Invalid MAX_UPLOAD_MB value: '{}'", upload_str))?;

        Ok(ServerConfig {
            port,
            host,
            max_upload_mb,
        })
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,note2brain=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    let chars: Vec<char> = data.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}
