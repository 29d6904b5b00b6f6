use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{ErrorKind, GenerateRequest, GenerationResult, Provider, ProviderFailure};
use crate::telemetry::metrics::{
    GEN_AI_ERROR_COUNT, GEN_AI_OPERATION_DURATION, GEN_AI_TOKEN_USAGE,
};

/// Uniform handle over one concrete provider: bounds the wait, normalizes
/// every outcome into a [`GenerationResult`], and records telemetry.
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    server_address: &'static str,
    server_port: i64,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(
        provider: Arc<dyn Provider>,
        server_address: &'static str,
        server_port: i64,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            server_address,
            server_port,
            timeout,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn generate(&self, req: &GenerateRequest) -> GenerationResult {
        let provider_name = self.provider.name().to_string();
        let span_display_name = format!("gen_ai.chat {}", req.model);
        let start = Instant::now();

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %span_display_name,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_name,
            gen_ai.request.model = %req.model,
            server.address = %self.server_address,
            server.port = self.server_port,
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = req.max_tokens as i64,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            batch.work_item = %req.work_item,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        {
            let mut user_event_attrs =
                vec![KeyValue::new("gen_ai.prompt", truncate(&req.prompt, 1000))];
            if !req.system.is_empty() {
                user_event_attrs.push(KeyValue::new(
                    "gen_ai.system_instructions",
                    truncate(&req.system, 500),
                ));
            }
            span.add_event("gen_ai.user.message", user_event_attrs);
        }

        let call = self.provider.generate(req).instrument(span.clone());
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(resp)) if resp.content.trim().is_empty() => Err(ProviderFailure::new(
                ErrorKind::BadResponse,
                format!("{provider_name} returned an empty completion"),
            )),
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(ProviderFailure::new(
                ErrorKind::Timeout,
                format!(
                    "{provider_name} call timed out after {}s",
                    self.timeout.as_secs_f64()
                ),
            )),
        };

        let duration = start.elapsed().as_secs_f64();
        let op_kv = KeyValue::new("gen_ai.operation.name", "chat");
        let provider_kv = KeyValue::new("gen_ai.provider.name", provider_name.clone());

        match outcome {
            Ok(resp) => {
                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", resp.input_tokens as i64);
                span.record("gen_ai.usage.output_tokens", resp.output_tokens as i64);
                if !resp.finish_reason.is_empty() {
                    span.record(
                        "gen_ai.response.finish_reasons",
                        resp.finish_reason.as_str(),
                    );
                }

                span.add_event(
                    "gen_ai.assistant.message",
                    vec![KeyValue::new(
                        "gen_ai.completion",
                        truncate(&resp.content, 2000),
                    )],
                );

                let model_kv = KeyValue::new("gen_ai.request.model", resp.model.clone());

                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.input_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "input"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.output_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "output"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_OPERATION_DURATION.record(duration, &[op_kv, provider_kv, model_kv]);

                GenerationResult::Success { text: resp.content }
            }
            Err(failure) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.type", failure.kind.as_str());

                GEN_AI_ERROR_COUNT.add(
                    1,
                    &[
                        provider_kv,
                        KeyValue::new("gen_ai.request.model", req.model.clone()),
                        KeyValue::new("error.type", failure.kind.as_str()),
                    ],
                );

                tracing::warn!(
                    provider = %provider_name,
                    model = %req.model,
                    work_item = %req.work_item,
                    reason = %failure.kind,
                    error = %failure.detail,
                    "LLM call failed"
                );

                GenerationResult::Failure {
                    reason: failure.kind,
                    detail: failure.detail,
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.char_indices()
            .take_while(|&(i, _)| i < max)
            .map(|(_, c)| c)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::llm::GenerateResponse;

    /// Scripted provider: answers each call with the next queued outcome,
    /// keyed by work item name when a keyed script exists.
    pub(crate) struct ScriptedProvider {
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<GenerateRequest>>,
        script: Mutex<VecDeque<Result<String, ProviderFailure>>>,
        by_item: Vec<(String, Result<String, ProviderFailure>)>,
        delay: Duration,
    }

    impl ScriptedProvider {
        pub(crate) fn sequence(outcomes: Vec<Result<String, ProviderFailure>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                script: Mutex::new(outcomes.into()),
                by_item: Vec::new(),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn by_item(outcomes: Vec<(&str, Result<String, ProviderFailure>)>) -> Self {
            Self {
                by_item: outcomes
                    .into_iter()
                    .map(|(name, outcome)| (name.to_string(), outcome))
                    .collect(),
                ..Self::sequence(Vec::new())
            }
        }

        pub(crate) fn always_ok() -> Self {
            Self::sequence(Vec::new())
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait::async_trait]
    impl Provider for ScriptedProvider {
        async fn generate(
            &self,
            req: &GenerateRequest,
        ) -> Result<GenerateResponse, ProviderFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(req.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let outcome = match self.by_item.iter().find(|(name, _)| *name == req.work_item) {
                Some((_, outcome)) => outcome.clone(),
                None => self
                    .script
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(format!("# Prompt for {}", req.work_item))),
            };

            outcome.map(|content| GenerateResponse {
                content,
                model: req.model.clone(),
                input_tokens: 10,
                output_tokens: 20,
                finish_reason: "stop".to_string(),
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    pub(crate) fn client_for(provider: Arc<ScriptedProvider>) -> LlmClient {
        LlmClient::new(provider, "localhost", 443, Duration::from_secs(5))
    }

    fn request(item: &str) -> GenerateRequest {
        GenerateRequest {
            model: "test-model".to_string(),
            system: "system".to_string(),
            prompt: "prompt".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            work_item: item.to_string(),
        }
    }

    #[tokio::test]
    async fn test_generate_success() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![Ok("hello".to_string())]));
        let client = client_for(provider.clone());

        let result = client.generate(&request("a.md")).await;

        assert_eq!(
            result,
            GenerationResult::Success {
                text: "hello".to_string()
            }
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generate_passes_failure_through() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![Err(ProviderFailure::new(
            ErrorKind::AuthError,
            "bad key",
        ))]));
        let client = client_for(provider.clone());

        let result = client.generate(&request("a.md")).await;

        assert_eq!(
            result,
            GenerationResult::Failure {
                reason: ErrorKind::AuthError,
                detail: "bad key".to_string()
            }
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1, "no retry");
    }

    #[tokio::test]
    async fn test_generate_empty_completion_is_bad_response() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![Ok("   \n".to_string())]));
        let client = client_for(provider);

        match client.generate(&request("a.md")).await {
            GenerationResult::Failure { reason, .. } => assert_eq!(reason, ErrorKind::BadResponse),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_generate_times_out() {
        let provider =
            Arc::new(ScriptedProvider::always_ok().with_delay(Duration::from_millis(500)));
        let client = LlmClient::new(provider, "localhost", 443, Duration::from_millis(20));

        let start = Instant::now();
        let result = client.generate(&request("slow.md")).await;

        assert!(start.elapsed() < Duration::from_millis(400));
        match result {
            GenerationResult::Failure { reason, detail } => {
                assert_eq!(reason, ErrorKind::Timeout);
                assert!(detail.contains("timed out"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_long() {
        assert_eq!(truncate("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let result = truncate("hé世界!", 3);
        assert!(result.len() <= 3);
        assert!(result.is_char_boundary(result.len()));
    }
}
