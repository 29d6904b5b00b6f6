use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::{ErrorKind, GenerateRequest, GenerateResponse, Provider, ProviderFailure};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }
    }

    /// The model goes in as one percent-encoded path segment.
    fn endpoint(&self, model: &str) -> Result<Url, ProviderFailure> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            ProviderFailure::new(
                ErrorKind::Unknown,
                format!("Gemini base URL {} is invalid: {e}", self.base_url),
            )
        })?;
        let target = format!("{model}:generateContent");
        url.path_segments_mut()
            .map_err(|_| {
                ProviderFailure::new(
                    ErrorKind::Unknown,
                    format!("Gemini base URL {} cannot carry a path", self.base_url),
                )
            })?
            .pop_if_empty()
            .extend(["v1beta", "models", target.as_str()]);
        Ok(url)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    system_instruction: GeminiContent,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    model_version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

fn parse_response(body: &str, requested_model: &str) -> Result<GenerateResponse, ProviderFailure> {
    let resp: GeminiResponse = serde_json::from_str(body).map_err(|e| {
        ProviderFailure::new(
            ErrorKind::BadResponse,
            format!("Gemini response could not be decoded: {e}"),
        )
    })?;

    let candidate = resp.candidates.into_iter().next().ok_or_else(|| {
        ProviderFailure::new(ErrorKind::BadResponse, "Gemini response has no candidates")
    })?;

    let content = candidate
        .content
        .map(|c| {
            c.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let (input_tokens, output_tokens) = resp
        .usage_metadata
        .map(|u| (u.prompt_token_count, u.candidates_token_count))
        .unwrap_or((0, 0));

    Ok(GenerateResponse {
        content,
        model: resp
            .model_version
            .unwrap_or_else(|| requested_model.to_string()),
        input_tokens,
        output_tokens,
        finish_reason: candidate.finish_reason.unwrap_or_default().to_lowercase(),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<GeminiError>(body)
        .map(|err| err.error.message)
        .unwrap_or_else(|_| body.to_string())
}

#[async_trait::async_trait]
impl Provider for GeminiProvider {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderFailure> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&self.api_key).map_err(|_| {
                ProviderFailure::new(
                    ErrorKind::AuthError,
                    "API key contains characters not allowed in a header",
                )
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(req.system.clone()),
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(req.prompt.clone()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
            },
        };

        let response = self
            .client
            .post(self.endpoint(&req.model)?)
            .headers(headers)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ProviderFailure::status(
                "Gemini",
                status,
                &error_message(&text),
            ));
        }

        parse_response(&text, &req.model)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
