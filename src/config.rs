use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::llm::registry::ProviderSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub staging_dir: PathBuf,
    pub archive_path: PathBuf,
    pub pacing_delay: Duration,
    pub provider_timeout: Duration,
    pub request_timeout: Duration,
    pub openai_model: String,
    pub gemini_model: String,
    pub anthropic_model: String,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("APP_PORT must be a number"),
            environment: env::var("APP_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            staging_dir: env::var("STAGING_DIR")
                .unwrap_or_else(|_| "./staging".to_string())
                .into(),
            archive_path: env::var("ARCHIVE_PATH")
                .unwrap_or_else(|_| "./prompts.zip".to_string())
                .into(),
            pacing_delay: Duration::from_millis(
                env::var("PACING_DELAY_MS")
                    .unwrap_or_else(|_| "1000".to_string())
                    .parse()
                    .expect("PACING_DELAY_MS must be a number"),
            ),
            provider_timeout: Duration::from_secs(
                env::var("PROVIDER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()
                    .expect("PROVIDER_TIMEOUT_SECS must be a number"),
            ),
            request_timeout: Duration::from_secs(
                env::var("REQUEST_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "1800".to_string())
                    .parse()
                    .expect("REQUEST_TIMEOUT_SECS must be a number"),
            ),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            gemini_model: env::var("GEMINI_MODEL")
                .unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            anthropic_model: env::var("ANTHROPIC_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            gemini_base_url: env::var("GEMINI_BASE_URL").ok(),
            anthropic_base_url: env::var("ANTHROPIC_BASE_URL").ok(),
            default_temperature: env::var("DEFAULT_TEMPERATURE")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse()
                .expect("DEFAULT_TEMPERATURE must be a number"),
            default_max_tokens: env::var("DEFAULT_MAX_TOKENS")
                .unwrap_or_else(|_| "4096".to_string())
                .parse()
                .expect("DEFAULT_MAX_TOKENS must be a number"),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "prompt-batch-generator".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Provider construction parameters. API keys are not part of these;
    /// they arrive with each batch request.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            openai_model: self.openai_model.clone(),
            gemini_model: self.gemini_model.clone(),
            anthropic_model: self.anthropic_model.clone(),
            openai_base_url: self.openai_base_url.clone(),
            gemini_base_url: self.gemini_base_url.clone(),
            anthropic_base_url: self.anthropic_base_url.clone(),
            timeout: self.provider_timeout,
            temperature: self.default_temperature,
            max_tokens: self.default_max_tokens,
        }
    }
}
