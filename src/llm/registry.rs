use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::anthropic::AnthropicProvider;
use super::gemini::GeminiProvider;
use super::openai::OpenAIProvider;
use super::{LlmClient, Provider};
use crate::error::{AppError, AppResult};

/// The known backends. Provider identity is only ever branched on here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Gemini,
    Anthropic,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::OpenAi, ProviderId::Gemini, ProviderId::Anthropic];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Gemini => "gemini",
            ProviderId::Anthropic => "anthropic",
        }
    }

    fn server_address(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "api.openai.com",
            ProviderId::Gemini => "generativelanguage.googleapis.com",
            ProviderId::Anthropic => "api.anthropic.com",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "gemini" | "google" => Ok(ProviderId::Gemini),
            "anthropic" | "claude" => Ok(ProviderId::Anthropic),
            other => Err(AppError::Config(format!(
                "unknown provider '{other}', expected one of: openai, gemini, anthropic"
            ))),
        }
    }
}

/// A provider selection plus its secret, scoped to one batch request.
#[derive(Clone)]
pub struct ProviderCredential {
    provider_id: String,
    secret: String,
}

impl ProviderCredential {
    pub fn new(provider_id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            secret: secret.into(),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }
}

impl fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("provider_id", &self.provider_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub openai_model: String,
    pub gemini_model: String,
    pub anthropic_model: String,
    pub openai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            openai_model: "gpt-4.1-mini".to_string(),
            gemini_model: "gemini-2.5-flash".to_string(),
            anthropic_model: "claude-haiku-4-5-20251001".to_string(),
            openai_base_url: None,
            gemini_base_url: None,
            anthropic_base_url: None,
            timeout: Duration::from_secs(120),
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    pub id: ProviderId,
    pub default_model: String,
}

pub struct ResolvedProvider {
    pub id: ProviderId,
    pub client: LlmClient,
    pub default_model: String,
}

pub struct ProviderRegistry {
    settings: ProviderSettings,
}

impl ProviderRegistry {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    pub fn default_model(&self, id: ProviderId) -> &str {
        match id {
            ProviderId::OpenAi => &self.settings.openai_model,
            ProviderId::Gemini => &self.settings.gemini_model,
            ProviderId::Anthropic => &self.settings.anthropic_model,
        }
    }

    pub fn providers(&self) -> Vec<ProviderInfo> {
        ProviderId::ALL
            .iter()
            .map(|&id| ProviderInfo {
                id,
                default_model: self.default_model(id).to_string(),
            })
            .collect()
    }

    /// Builds a fresh adapter for this credential. Adapters are never cached.
    pub fn resolve(&self, credential: &ProviderCredential) -> AppResult<ResolvedProvider> {
        let id: ProviderId = credential.provider_id().parse()?;

        if credential.secret.trim().is_empty() {
            return Err(AppError::Validation(format!(
                "credential for provider '{id}' must not be empty"
            )));
        }

        let secret = credential.secret.trim();
        let provider: Arc<dyn Provider> = match id {
            ProviderId::OpenAi => Arc::new(OpenAIProvider::new(
                secret,
                self.settings.openai_base_url.as_deref(),
            )),
            ProviderId::Gemini => Arc::new(GeminiProvider::new(
                secret,
                self.settings.gemini_base_url.as_deref(),
            )),
            ProviderId::Anthropic => Arc::new(AnthropicProvider::new(
                secret,
                self.settings.anthropic_base_url.as_deref(),
            )),
        };

        tracing::debug!(provider = %id, "provider adapter constructed");

        Ok(ResolvedProvider {
            id,
            client: LlmClient::new(provider, id.server_address(), 443, self.settings.timeout),
            default_model: self.default_model(id).to_string(),
        })
    }
}

/// Model names end up in request URLs and bodies, so only identifier
/// characters are accepted.
pub fn validate_model(model: &str) -> AppResult<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | ':' | '@');
    if model.is_empty() || model.len() > 128 || !model.chars().all(allowed) || model.starts_with('.')
    {
        return Err(AppError::Validation(format!(
            "model '{model}' must be 1-128 characters of letters, digits, '-', '.', '_', ':' or '@'"
        )));
    }
    Ok(())
}
