pub mod anthropic;
pub mod client;
pub mod gemini;
pub mod openai;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_server;

use std::fmt;

use reqwest::StatusCode;
use serde::Serialize;

pub use client::LlmClient;
pub use registry::{ProviderCredential, ProviderId, ProviderRegistry, ProviderSettings};

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub work_item: String,
}

#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: String,
}

/// Why a single generation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    AuthError,
    RateLimited,
    Timeout,
    BadResponse,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AuthError => "AuthError",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::BadResponse => "BadResponse",
            ErrorKind::Unknown => "Unknown",
        }
    }

    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => ErrorKind::AuthError,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::Timeout,
            _ => ErrorKind::BadResponse,
        }
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_decode() || err.is_body() {
            ErrorKind::BadResponse
        } else if let Some(status) = err.status() {
            ErrorKind::from_status(status)
        } else {
            ErrorKind::Unknown
        }
    }

    /// Keyword classification for errors that only surface as text, such as
    /// those wrapped by an SDK client.
    pub fn classify_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("rate limit") || msg.contains("429") || msg.contains("quota") {
            ErrorKind::RateLimited
        } else if msg.contains("timeout") || msg.contains("timed out") || msg.contains("deadline")
        {
            ErrorKind::Timeout
        } else if msg.contains("401")
            || msg.contains("403")
            || msg.contains("auth")
            || msg.contains("api key")
        {
            ErrorKind::AuthError
        } else if msg.contains("400")
            || msg.contains("404")
            || msg.contains("422")
            || msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("invalid")
            || msg.contains("deserializ")
            || msg.contains("json")
        {
            ErrorKind::BadResponse
        } else {
            ErrorKind::Unknown
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl ProviderFailure {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn status(provider: &str, status: StatusCode, message: &str) -> Self {
        // Some backends answer a rejected key with 400 rather than 401.
        let kind = match ErrorKind::from_status(status) {
            ErrorKind::BadResponse
                if ErrorKind::classify_message(message) == ErrorKind::AuthError =>
            {
                ErrorKind::AuthError
            }
            kind => kind,
        };
        Self::new(kind, format!("{provider} API error ({status}): {message}"))
    }
}

impl From<reqwest::Error> for ProviderFailure {
    fn from(err: reqwest::Error) -> Self {
        Self::new(ErrorKind::from_transport(&err), err.to_string())
    }
}

/// Outcome of one adapter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Success { text: String },
    Failure { reason: ErrorKind, detail: String },
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success { .. })
    }
}

impl From<Result<String, ProviderFailure>> for GenerationResult {
    fn from(result: Result<String, ProviderFailure>) -> Self {
        match result {
            Ok(text) => GenerationResult::Success { text },
            Err(failure) => GenerationResult::Failure {
                reason: failure.kind,
                detail: failure.detail,
            },
        }
    }
}

/// One concrete backend. Implementations perform exactly one outbound call
/// per invocation and never retry.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderFailure>;
    fn name(&self) -> &str;
}
