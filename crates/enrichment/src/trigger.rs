//! Enrichment trigger

use crate::edge::newly_requested;
use crate::task::{EnrichmentReport, EnrichmentTask, FeatureFailure};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use studyspark_common::{
    errors::{AppError, Result},
    metrics,
    model::{FileHandle, GenerativeModel},
    prompts::{parse_detailed_summary, parse_flashcards, parse_quiz, Prompt},
    record::{Feature, ProcessingRecord, RecordPatch, SummaryMode},
    retry::{retry, RetryPolicy},
    storage::{DocumentChange, DocumentStore},
};
use tracing::{debug, error, info, instrument, warn};

/// Enrichment trigger
pub struct EnrichmentTrigger {
    documents: Arc<dyn DocumentStore>,
    model: Arc<dyn GenerativeModel>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl EnrichmentTrigger {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        model: Arc<dyn GenerativeModel>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            documents,
            model,
            retry,
            timeout,
        }
    }

    /// Turn a record update into one task per newly requested feature.
    pub fn tasks_for(&self, change: &DocumentChange) -> Vec<EnrichmentTask> {
        let Some(after) = &change.after else {
            return Vec::new();
        };
        newly_requested(change.before.as_ref(), after)
            .into_iter()
            .map(|feature| EnrichmentTask::new(&change.id, feature))
            .collect()
    }

    /// Handle a record update.
    #[instrument(skip(self, change), fields(document_id = %change.id))]
    pub async fn handle(&self, change: &DocumentChange) -> Result<EnrichmentReport> {
        let mut report = EnrichmentReport::new(&change.id);

        let tasks = self.tasks_for(change);
        let Some(fields) = change.after.as_ref().filter(|_| !tasks.is_empty()) else {
            return Ok(report);
        };

        let record = match ProcessingRecord::from_fields(fields) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Enrichment requested on an unreadable record");
                return self.reject_all(&change.id, &tasks, e.to_string(), report).await;
            }
        };

        let Some(handle) = record.file_handle().map(FileHandle::new) else {
            warn!("Enrichment requested before a model handle exists");
            let message = AppError::MissingFileHandle {
                document_id: change.id.clone(),
            }
            .to_string();
            return self.reject_all(&change.id, &tasks, message, report).await;
        };

        info!(
            features = ?tasks.iter().map(|t| t.feature).collect::<Vec<_>>(),
            "Enrichment requested"
        );

        let results = join_all(tasks.iter().map(|task| self.run_task(task, &handle, &record))).await;

        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(()) => report.succeeded.push(task.feature),
                Err(message) => report.failed.push(FeatureFailure {
                    feature: task.feature,
                    message,
                }),
            }
        }

        Ok(report)
    }

    /// Fail every requested feature at once without calling the model,
    /// resetting each flag in the same update.
    async fn reject_all(
        &self,
        document_id: &str,
        tasks: &[EnrichmentTask],
        message: String,
        mut report: EnrichmentReport,
    ) -> Result<EnrichmentReport> {
        let patch = tasks.iter().fold(RecordPatch::new(), |patch, task| {
            patch
                .request(task.feature, false)
                .feature_error(task.feature, message.clone())
        });
        self.documents.update(document_id, patch.into_fields()).await?;

        report.failed = tasks
            .iter()
            .map(|task| FeatureFailure {
                feature: task.feature,
                message: message.clone(),
            })
            .collect();
        Ok(report)
    }

    /// Generate one artifact and commit it (or its error) right away.
    /// Returns the failure message when the feature failed.
    async fn run_task(
        &self,
        task: &EnrichmentTask,
        handle: &FileHandle,
        record: &ProcessingRecord,
    ) -> std::result::Result<(), String> {
        let feature = task.feature;
        let start = Instant::now();

        let generation = self.generate(feature, handle, record);
        let generated = match tokio::time::timeout(self.timeout, generation).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TriggerTimeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let (patch, outcome) = match generated {
            Ok(patch) => (patch.clear_feature_error(feature), Ok(())),
            Err(e) => {
                warn!(task_id = %task.id, feature = %feature, error = %e, "Feature generation failed");
                let message = e.to_string();
                (RecordPatch::new().feature_error(feature, message.clone()), Err(message))
            }
        };

        // The flag reset acknowledges the task on every path.
        let patch = patch.request(feature, false);
        let write = self.documents.update(&task.document_id, patch.into_fields()).await;
        let committed = match write {
            Ok(()) => outcome,
            Err(AppError::RecordNotFound { .. }) => {
                warn!(task_id = %task.id, feature = %feature, "Record deleted before enrichment finished");
                Err("Processing record no longer exists".to_string())
            }
            Err(e) => {
                error!(task_id = %task.id, feature = %feature, error = %e, "Failed to commit enrichment");
                Err(e.to_string())
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        metrics::record_enrichment(feature.as_str(), committed.is_ok(), elapsed);
        if committed.is_ok() {
            debug!(task_id = %task.id, feature = %feature, "Feature generated");
        }
        committed
    }

    async fn generate(
        &self,
        feature: Feature,
        handle: &FileHandle,
        record: &ProcessingRecord,
    ) -> Result<RecordPatch> {
        let prompt = Prompt::for_feature(feature);
        let raw = retry(&self.retry, feature.as_str(), || self.model.generate(handle, &prompt)).await?;

        match feature {
            Feature::DetailedSummary => {
                let detailed = parse_detailed_summary(&raw)?;
                let patch = match record.summary.as_ref().filter(|s| s.is_cheat_sheet()) {
                    Some(cheat_sheet) => RecordPatch::new().cheat_sheet_summary(cheat_sheet),
                    None => RecordPatch::new(),
                };
                Ok(patch
                    .detailed_summary(&detailed)
                    .summary(&detailed)
                    .summary_mode(SummaryMode::Detailed))
            }
            Feature::Flashcards => Ok(RecordPatch::new().flashcards(&parse_flashcards(&raw)?)),
            Feature::Quiz => Ok(RecordPatch::new().quiz(&parse_quiz(&raw)?)),
        }
    }
}
