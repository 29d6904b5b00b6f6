use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
};

use super::{ErrorKind, GenerateRequest, GenerateResponse, Provider, ProviderFailure};

pub struct OpenAIProvider {
    client: Client<OpenAIConfig>,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>) -> Self {
        let mut config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = api_base {
            config = config.with_api_base(base);
        }
        // The SDK retries 429 and 5xx on its own; one attempt per call here.
        let no_retry = backoff::ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::ZERO))
            .build();
        Self {
            client: Client::with_config(config).with_backoff(no_retry),
        }
    }
}

/// Maps SDK errors onto the taxonomy using the structured `code`/`type`
/// fields first and the message text last.
fn classify(err: &OpenAIError) -> ErrorKind {
    match err {
        OpenAIError::Reqwest(e) => ErrorKind::from_transport(e),
        OpenAIError::ApiError(api) => classify_api_error(api),
        OpenAIError::JSONDeserialize(..) => ErrorKind::BadResponse,
        other => ErrorKind::classify_message(&other.to_string()),
    }
}

fn classify_api_error(api: &ApiError) -> ErrorKind {
    let tags = [api.code.as_deref(), api.r#type.as_deref()];
    for tag in tags.into_iter().flatten() {
        match tag {
            "rate_limit_exceeded" | "insufficient_quota" | "requests" | "tokens" => {
                return ErrorKind::RateLimited;
            }
            "invalid_api_key" | "invalid_authentication" | "authentication_error"
            | "permission_error" => return ErrorKind::AuthError,
            _ => {}
        }
    }
    ErrorKind::classify_message(&api.message)
}

#[async_trait::async_trait]
impl Provider for OpenAIProvider {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderFailure> {
        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(req.system.clone()),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(req.prompt.clone()),
                name: None,
            }),
        ];

        #[allow(deprecated)]
        let request = CreateChatCompletionRequest {
            model: req.model.clone(),
            messages,
            temperature: Some(req.temperature),
            max_completion_tokens: Some(req.max_tokens),
            ..Default::default()
        };

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| ProviderFailure::new(classify(&e), format!("OpenAI API error: {e}")))?;

        let choice = response.choices.first().ok_or_else(|| {
            ProviderFailure::new(ErrorKind::BadResponse, "OpenAI response has no choices")
        })?;

        let content = choice.message.content.clone().unwrap_or_default();

        let finish_reason = choice
            .finish_reason
            .map(|r| format!("{r:?}").to_lowercase())
            .unwrap_or_default();

        let (input_tokens, output_tokens) = match &response.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (0, 0),
        };

        Ok(GenerateResponse {
            content,
            model: response.model,
            input_tokens,
            output_tokens,
            finish_reason,
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::LlmClient;
    use crate::llm::test_server::{Hits, serve};
    use crate::llm::GenerationResult;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "gpt-4.1-mini".into(),
            system: "system".into(),
            prompt: "prompt".into(),
            temperature: 0.7,
            max_tokens: 256,
            work_item: "a.md".into(),
        }
    }

    fn client(base: &str) -> LlmClient {
        let provider = OpenAIProvider::new("sk-test", Some(&format!("{base}/v1")));
        LlmClient::new(Arc::new(provider), "openai", 0, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_rate_limit_is_single_attempt() {
        let hits = Hits::default();
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.record();
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({
                            "error": {
                                "message": "Rate limit reached for requests",
                                "type": "requests",
                                "param": null,
                                "code": "rate_limit_exceeded"
                            }
                        })),
                    )
                }
            }),
        );
        let base = serve(router).await;

        let result = client(&base).generate(&request()).await;

        assert_eq!(hits.count(), 1);
        match result {
            GenerationResult::Failure { reason, .. } => assert_eq!(reason, ErrorKind::RateLimited),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_single_attempt() {
        let hits = Hits::default();
        let counter = hits.clone();
        let router = Router::new().route(
            "/v1/chat/completions",
            post(move || {
                let counter = counter.clone();
                async move {
                    counter.record();
                    (StatusCode::GATEWAY_TIMEOUT, "upstream timed out")
                }
            }),
        );
        let base = serve(router).await;

        let result = client(&base).generate(&request()).await;

        assert_eq!(hits.count(), 1);
        match result {
            GenerationResult::Failure { reason, .. } => assert_eq!(reason, ErrorKind::Timeout),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completion_text_is_returned() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "gpt-4.1-mini");
                Json(json!({
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1,
                    "model": "gpt-4.1-mini",
                    "choices": [{
                        "index": 0,
                        "message": {"role": "assistant", "content": "## Overview"},
                        "finish_reason": "stop"
                    }],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }))
            }),
        );
        let base = serve(router).await;

        let provider = OpenAIProvider::new("sk-test", Some(&format!("{base}/v1")));
        let response = provider.generate(&request()).await.unwrap();

        assert_eq!(response.content, "## Overview");
        assert_eq!(response.input_tokens, 10);
        assert_eq!(response.output_tokens, 5);
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn test_api_error_code_wins_over_message() {
        let api = ApiError {
            message: "Incorrect API key provided".into(),
            r#type: Some("invalid_request_error".into()),
            param: None,
            code: Some("invalid_api_key".into()),
        };
        assert_eq!(classify_api_error(&api), ErrorKind::AuthError);

        let quota = ApiError {
            message: "You exceeded your current quota".into(),
            r#type: Some("insufficient_quota".into()),
            param: None,
            code: None,
        };
        assert_eq!(classify_api_error(&quota), ErrorKind::RateLimited);
    }
}
