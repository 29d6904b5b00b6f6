use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::llm::registry::{ResolvedProvider, validate_model};
use crate::llm::{ProviderCredential, ProviderRegistry};
use crate::telemetry::metrics::BATCH_REJECTIONS;

use super::orchestrator::{BatchOrchestrator, BatchReport, BatchState, ItemFailure};
use super::packager::ArtifactStore;
use super::prompt::ArtifactGenerator;
use super::work_item::{WorkItem, validate_work_items};

#[derive(Clone, Deserialize)]
pub struct BatchRequest {
    pub work_item_names: Vec<String>,
    pub sample_text: String,
    pub provider_id: String,
    pub credential: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl fmt::Debug for BatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchRequest")
            .field("work_item_names", &self.work_item_names)
            .field("sample_text_len", &self.sample_text.len())
            .field("provider_id", &self.provider_id)
            .field("credential", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub succeeded: usize,
    pub total: usize,
    pub failures: Vec<ItemFailure>,
    pub archive_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packaging_error: Option<String>,
}

impl From<&BatchReport> for BatchSummary {
    fn from(report: &BatchReport) -> Self {
        Self {
            batch_id: report.batch_id,
            succeeded: report.succeeded,
            total: report.total,
            failures: report.failures.clone(),
            archive_available: report.archive_available(),
            packaging_error: report.packaging_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub state: BatchState,
    pub last_report: Option<BatchReport>,
}

struct PreparedBatch {
    items: Vec<WorkItem>,
    sample_text: String,
    provider: ResolvedProvider,
    model: String,
}

/// Runs one batch at a time against a single artifact store.
pub struct BatchService {
    registry: ProviderRegistry,
    orchestrator: BatchOrchestrator,
    store: Arc<Mutex<Box<dyn ArtifactStore>>>,
    status: RwLock<BatchStatus>,
}

impl BatchService {
    pub fn new(registry: ProviderRegistry, store: Box<dyn ArtifactStore>, pacing: Duration) -> Self {
        Self {
            registry,
            orchestrator: BatchOrchestrator::new(pacing),
            store: Arc::new(Mutex::new(store)),
            status: RwLock::new(BatchStatus {
                state: BatchState::Idle,
                last_report: None,
            }),
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn status(&self) -> BatchStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: BatchState) {
        self.status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .state = state;
    }

    /// The store is about to be wiped, so the last report stops advertising
    /// an archive.
    fn forget_archive(&self) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(report) = status.last_report.as_mut() {
            report.archive = None;
        }
    }

    fn complete(&self, report: &BatchReport) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        status.state = BatchState::Completed;
        status.last_report = Some(report.clone());
    }

    fn prepare(&self, request: BatchRequest) -> AppResult<PreparedBatch> {
        let credential = ProviderCredential::new(request.provider_id, request.credential);
        let provider = self.registry.resolve(&credential)?;

        let items = validate_work_items(&request.work_item_names)?;

        if request.sample_text.trim().is_empty() {
            return Err(AppError::Validation("sample_text must not be empty".into()));
        }

        let model = request
            .model
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| provider.default_model.clone());
        validate_model(&model)?;

        Ok(PreparedBatch {
            items,
            sample_text: request.sample_text,
            provider,
            model,
        })
    }

    /// Validates, then runs the whole batch. A second submission while one is
    /// running is rejected with `Busy`. The run itself is detached from the
    /// caller, so dropping the returned future does not stop it midway.
    pub async fn submit(self: Arc<Self>, request: BatchRequest) -> AppResult<BatchReport> {
        let store = Arc::clone(&self.store)
            .try_lock_owned()
            .map_err(|_| {
                BATCH_REJECTIONS.add(1, &[KeyValue::new("reason", "busy")]);
                AppError::Busy("a batch is already running".into())
            })?;

        self.set_state(BatchState::Running);

        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.set_state(BatchState::Aborted);
                BATCH_REJECTIONS.add(1, &[KeyValue::new("reason", "preflight")]);
                tracing::warn!(error = %e, "batch rejected before start");
                return Err(e);
            }
        };

        let service = Arc::clone(&self);
        let run = tokio::spawn(
            async move { service.execute(prepared, store).await }
                .instrument(tracing::Span::current()),
        );

        match run.await {
            Ok(result) => result,
            Err(e) => {
                self.set_state(BatchState::Aborted);
                Err(AppError::Internal(format!("batch task failed: {e}")))
            }
        }
    }

    async fn execute(
        &self,
        prepared: PreparedBatch,
        mut store: OwnedMutexGuard<Box<dyn ArtifactStore>>,
    ) -> AppResult<BatchReport> {
        self.forget_archive();
        if let Err(e) = store.reset() {
            self.set_state(BatchState::Aborted);
            return Err(e.into());
        }

        let settings = self.registry.settings();
        let generator = ArtifactGenerator::new(
            &prepared.provider.client,
            prepared.model,
            settings.temperature,
            settings.max_tokens,
        );

        let report = self
            .orchestrator
            .run(
                &prepared.items,
                &prepared.sample_text,
                &generator,
                &mut **store,
            )
            .await;

        self.complete(&report);
        Ok(report)
    }

    /// Bytes of the archive from the most recent completed run.
    pub async fn archive(&self) -> AppResult<Vec<u8>> {
        let store = self
            .store
            .try_lock()
            .map_err(|_| AppError::Busy("a batch is running; archive not yet available".into()))?;

        store
            .archive_bytes()?
            .ok_or_else(|| AppError::NotFound("no archive from a completed batch".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::llm::ProviderSettings;
    use crate::llm::test_server::{Hits, serve};
    use crate::pipeline::packager::MemoryArtifactStore;
    use crate::pipeline::packager::tests::read_zip;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};
    use tokio::sync::Notify;

    /// Anthropic stand-in: `b.md` gets a 504, `slow.md` waits for `gate`,
    /// everything else succeeds.
    async fn anthropic_backend(gate: Arc<Notify>, slow_hits: Hits) -> String {
        let router = Router::new().route(
            "/v1/messages",
            post(move |Json(body): Json<Value>| {
                let gate = gate.clone();
                let slow_hits = slow_hits.clone();
                async move {
                    let prompt = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
                    if prompt.contains("`b.md`") {
                        return (StatusCode::GATEWAY_TIMEOUT, "upstream timeout").into_response();
                    }
                    if prompt.contains("`slow.md`") {
                        slow_hits.record();
                        gate.notified().await;
                    }
                    Json(json!({
                        "content": [{"type": "text", "text": "## Overview\nGenerated."}],
                        "model": "claude-haiku-4-5-20251001",
                        "usage": {"input_tokens": 10, "output_tokens": 3},
                        "stop_reason": "end_turn"
                    }))
                    .into_response()
                }
            }),
        );
        serve(router).await
    }

    fn backed_service(base: &str) -> Arc<BatchService> {
        let settings = ProviderSettings {
            anthropic_base_url: Some(base.to_string()),
            ..ProviderSettings::default()
        };
        Arc::new(BatchService::new(
            ProviderRegistry::new(settings),
            Box::new(MemoryArtifactStore::new()),
            Duration::ZERO,
        ))
    }

    #[tokio::test]
    async fn test_batch_runs_to_completion_with_partial_failure() {
        let base = anthropic_backend(Arc::new(Notify::new()), Hits::default()).await;
        let service = backed_service(&base);

        let report = service
            .clone()
            .submit(request("anthropic", &["a.md", "b.md"]))
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 1);
        let failures: Vec<_> = report
            .failures
            .iter()
            .map(|f| (f.name.as_str(), f.detail.as_str()))
            .collect();
        assert_eq!(failures, vec![("b.md", "Timeout")]);

        let status = service.status();
        assert_eq!(status.state, BatchState::Completed);
        assert_eq!(status.last_report.unwrap().batch_id, report.batch_id);

        let files = read_zip(&service.archive().await.unwrap());
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "a.md");
        assert!(files[0].1.starts_with("## Overview"));
    }

    #[tokio::test]
    async fn test_new_run_hides_previous_archive_in_status() {
        let gate = Arc::new(Notify::new());
        let slow_hits = Hits::default();
        let base = anthropic_backend(gate.clone(), slow_hits.clone()).await;
        let service = backed_service(&base);

        service
            .clone()
            .submit(request("anthropic", &["a.md"]))
            .await
            .unwrap();
        assert!(service.status().last_report.unwrap().archive_available());

        let running = tokio::spawn(service.clone().submit(request("anthropic", &["slow.md"])));
        while slow_hits.count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let status = service.status();
        assert_eq!(status.state, BatchState::Running);
        assert!(!status.last_report.unwrap().archive_available());

        gate.notify_one();
        let report = running.await.unwrap().unwrap();
        assert_eq!(report.succeeded, 1);
        assert_eq!(service.status().state, BatchState::Completed);
    }

    #[tokio::test]
    async fn test_model_with_path_characters_rejected() {
        let service = service(Duration::ZERO);

        let mut bad_model = request("gemini", &["a.md"]);
        bad_model.model = Some("../x?alt=1".to_string());
        let result = service.clone().submit(bad_model).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(service.status().state, BatchState::Aborted);
    }

    fn service(pacing: Duration) -> Arc<BatchService> {
        Arc::new(BatchService::new(
            ProviderRegistry::new(ProviderSettings::default()),
            Box::new(MemoryArtifactStore::new()),
            pacing,
        ))
    }

    fn request(provider_id: &str, names: &[&str]) -> BatchRequest {
        BatchRequest {
            work_item_names: names.iter().map(|s| s.to_string()).collect(),
            sample_text: "# Sample prompt".to_string(),
            provider_id: provider_id.to_string(),
            credential: "sk-test".to_string(),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_fails_before_any_work() {
        let service = service(Duration::from_secs(5));

        let start = Instant::now();
        let result = service
            .clone()
            .submit(request("unknown", &["a.md", "b.md"]))
            .await;

        assert!(matches!(result, Err(AppError::Config(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(service.status().state, BatchState::Aborted);
        assert!(service.status().last_report.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected_before_any_work() {
        let service = service(Duration::from_secs(5));

        let result = service
            .clone()
            .submit(request("openai", &["a.md", " a.md"]))
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(service.status().state, BatchState::Aborted);
    }

    #[tokio::test]
    async fn test_empty_items_and_sample_rejected() {
        let service = service(Duration::ZERO);

        let result = service.clone().submit(request("gemini", &[])).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let mut blank_sample = request("gemini", &["a.md"]);
        blank_sample.sample_text = "  ".to_string();
        let result = service.clone().submit(blank_sample).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_rejected_request_keeps_previous_archive() {
        let mut store = MemoryArtifactStore::new();
        store.stage("previous.md", "# Prev").unwrap();
        store.finalize().unwrap();
        let service = Arc::new(BatchService::new(
            ProviderRegistry::new(ProviderSettings::default()),
            Box::new(store),
            Duration::ZERO,
        ));

        let result = service.clone().submit(request("nope", &["a.md"])).await;
        assert!(result.is_err());

        let bytes = service.archive().await.unwrap();
        assert_eq!(read_zip(&bytes)[0].0, "previous.md");
    }

    #[tokio::test]
    async fn test_archive_not_found_before_any_run() {
        let service = service(Duration::ZERO);
        assert!(matches!(
            service.archive().await,
            Err(AppError::NotFound(_))
        ));
        assert_eq!(service.status().state, BatchState::Idle);
    }

    #[tokio::test]
    async fn test_second_batch_rejected_while_running() {
        let service = service(Duration::ZERO);
        let _held = Arc::clone(&service.store).try_lock_owned().unwrap();

        let result = service.clone().submit(request("openai", &["a.md"])).await;
        assert!(matches!(result, Err(AppError::Busy(_))));
        assert!(matches!(service.archive().await, Err(AppError::Busy(_))));
    }

    #[test]
    fn test_request_debug_redacts_credential() {
        let rendered = format!("{:?}", request("openai", &["a.md"]));
        assert!(!rendered.contains("sk-test"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_request_model_is_optional() {
        let body: BatchRequest = serde_json::from_str(
            r#"{"work_item_names": ["a.md"], "sample_text": "s", "provider_id": "openai", "credential": "k"}"#,
        )
        .unwrap();
        assert!(body.model.is_none());
    }

    #[test]
    fn test_summary_from_report() {
        let report = BatchReport {
            batch_id: Uuid::new_v4(),
            provider: "openai".to_string(),
            model: "gpt-4.1-mini".to_string(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
            total: 2,
            succeeded: 1,
            failures: vec![ItemFailure {
                name: "b.md".to_string(),
                detail: "Timeout".to_string(),
                message: "timed out".to_string(),
            }],
            archive: None,
            packaging_error: None,
        };

        let summary = BatchSummary::from(&report);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["succeeded"], 1);
        assert_eq!(json["total"], 2);
        assert_eq!(json["failures"][0]["name"], "b.md");
        assert_eq!(json["failures"][0]["detail"], "Timeout");
        assert_eq!(json["archive_available"], false);
        assert!(json.get("packaging_error").is_none());
    }
}
