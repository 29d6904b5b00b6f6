use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use serde::Serialize;
use uuid::Uuid;

use crate::llm::GenerationResult;
use crate::telemetry::metrics::{BATCH_DURATION, BATCH_ITEMS, BATCH_STAGING_FAILURES};

use super::packager::{ArchiveHandle, ArtifactStore};
use super::prompt::{ArtifactGenerator, ItemResult};
use super::work_item::WorkItem;

/// Failure label for artifacts that generated fine but could not be staged.
pub const STAGING_FAILURE: &str = "StagingFailure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Idle,
    Running,
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub name: String,
    /// Reason label: a generation `ErrorKind` or `StagingFailure`.
    pub detail: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub provider: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub failures: Vec<ItemFailure>,
    pub archive: Option<ArchiveHandle>,
    pub packaging_error: Option<String>,
}

impl BatchReport {
    pub fn archive_available(&self) -> bool {
        self.archive.is_some()
    }
}

/// Drives one batch: items strictly in order, a fixed pause between calls,
/// successes staged as they arrive. Never stops early on an item failure.
pub struct BatchOrchestrator {
    pacing: Duration,
}

impl BatchOrchestrator {
    pub fn new(pacing: Duration) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    #[tracing::instrument(
        name = "pipeline batch",
        skip_all,
        fields(
            batch.id = tracing::field::Empty,
            batch.provider = %generator.provider_name(),
            batch.model = %generator.model(),
            batch.total = items.len(),
            batch.succeeded = tracing::field::Empty,
            batch.failed = tracing::field::Empty,
        )
    )]
    pub async fn run(
        &self,
        items: &[WorkItem],
        sample_text: &str,
        generator: &ArtifactGenerator<'_>,
        store: &mut dyn ArtifactStore,
    ) -> BatchReport {
        let batch_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let span = tracing::Span::current();
        span.record("batch.id", batch_id.to_string().as_str());

        let mut succeeded = 0;
        let mut failures = Vec::new();

        for (index, item) in items.iter().enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let ItemResult { name, result } = generator.generate(item, sample_text).await;

            match result {
                GenerationResult::Success { text } => match store.stage(&name, &text) {
                    Ok(()) => {
                        succeeded += 1;
                        BATCH_ITEMS.add(1, &[KeyValue::new("batch.item.outcome", "success")]);
                        tracing::info!(work_item = %name, bytes = text.len(), "artifact staged");
                    }
                    Err(e) => {
                        BATCH_ITEMS.add(1, &[KeyValue::new("batch.item.outcome", "failure")]);
                        BATCH_STAGING_FAILURES.add(1, &[]);
                        tracing::error!(work_item = %name, error = %e, "failed to stage artifact");
                        failures.push(ItemFailure {
                            name,
                            detail: STAGING_FAILURE.to_string(),
                            message: e.to_string(),
                        });
                    }
                },
                GenerationResult::Failure { reason, detail } => {
                    BATCH_ITEMS.add(
                        1,
                        &[
                            KeyValue::new("batch.item.outcome", "failure"),
                            KeyValue::new("error.type", reason.as_str()),
                        ],
                    );
                    failures.push(ItemFailure {
                        name,
                        detail: reason.as_str().to_string(),
                        message: detail,
                    });
                }
            }
        }

        let (archive, packaging_error) = match store.finalize() {
            Ok(archive) => (archive, None),
            Err(e) => {
                tracing::error!(error = %e, "failed to package artifacts");
                (None, Some(e.to_string()))
            }
        };

        BATCH_DURATION.record(start.elapsed().as_secs_f64(), &[]);
        span.record("batch.succeeded", succeeded as u64);
        span.record("batch.failed", failures.len() as u64);

        tracing::info!(
            batch_id = %batch_id,
            total = items.len(),
            succeeded,
            failed = failures.len(),
            archive_available = archive.is_some(),
            "batch completed"
        );

        BatchReport {
            batch_id,
            provider: generator.provider_name().to_string(),
            model: generator.model().to_string(),
            started_at,
            finished_at: Utc::now(),
            total: items.len(),
            succeeded,
            failures,
            archive,
            packaging_error,
        }
    }
}
