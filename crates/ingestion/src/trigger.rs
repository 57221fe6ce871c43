//! Ingestion trigger
//!
//! One invocation per finalize event. Every exit path after the PDF filter
//! leaves the record in a terminal status.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use studyspark_common::{
    errors::{AppError, Result},
    metrics,
    model::{GenerativeModel, PDF_MIME_TYPE},
    prompts::{parse_summary, Prompt},
    record::{
        document_id, is_pdf, ProcessingStatus, RecordPatch, SummaryMode,
        SUMMARY_MODE_METADATA_KEY,
    },
    retry::{retry, RetryPolicy},
    storage::{BlobStore, DocumentStore, FinalizeEvent},
};
use tempfile::NamedTempFile;
use tracing::{debug, error, info, instrument};

/// Result of one ingestion invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionOutcome {
    /// Not a PDF; nothing was called or written.
    Skipped { name: String },
    Completed { document_id: String, mode: SummaryMode },
    /// The record was marked `status=error` with `error` as its message.
    Failed { document_id: String, error: String },
}

impl IngestionOutcome {
    fn label(&self) -> &'static str {
        match self {
            IngestionOutcome::Skipped { .. } => "skipped",
            IngestionOutcome::Completed { .. } => "completed",
            IngestionOutcome::Failed { .. } => "failed",
        }
    }
}

/// Ingestion trigger
pub struct IngestionTrigger {
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentStore>,
    model: Arc<dyn GenerativeModel>,
    retry: RetryPolicy,
    timeout: Duration,
    tmp_dir: Option<PathBuf>,
}

impl IngestionTrigger {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentStore>,
        model: Arc<dyn GenerativeModel>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            documents,
            model,
            retry,
            timeout,
            tmp_dir: None,
        }
    }

    /// Place transient buffers in `dir` instead of the system temp dir.
    pub fn with_tmp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.tmp_dir = dir;
        self
    }

    /// Handle a storage finalize event.
    #[instrument(skip(self, event), fields(name = %event.name, bucket = %event.bucket))]
    pub async fn handle(&self, event: &FinalizeEvent) -> IngestionOutcome {
        if !is_pdf(&event.name) {
            debug!("Not a PDF, skipping");
            return IngestionOutcome::Skipped {
                name: event.name.clone(),
            };
        }

        let id = document_id(&event.name);
        let start = Instant::now();

        let result = match tokio::time::timeout(self.timeout, self.process(&event.name, &id)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::TriggerTimeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        };

        let (outcome, mode) = match result {
            Ok(mode) => {
                info!(document_id = %id, mode = %mode, "Study summary generated");
                (
                    IngestionOutcome::Completed {
                        document_id: id,
                        mode,
                    },
                    mode.as_str(),
                )
            }
            Err(e) => {
                error!(document_id = %id, error = %e, code = e.code().as_code(), "Ingestion failed");
                self.record_failure(&event.name, &id, &e).await;
                (
                    IngestionOutcome::Failed {
                        document_id: id,
                        error: e.to_string(),
                    },
                    "unknown",
                )
            }
        };

        metrics::record_ingestion(outcome.label(), mode, start.elapsed().as_secs_f64());
        outcome
    }

    async fn process(&self, name: &str, id: &str) -> Result<SummaryMode> {
        // Removed on drop, whichever way this function exits.
        let buffer = self.buffer_blob(name).await?;
        let content = tokio::fs::read(buffer.path()).await?;

        let handle = retry(&self.retry, "upload_file", || {
            self.model.upload_file(&content, PDF_MIME_TYPE)
        })
        .await?;
        debug!(handle = %handle, "File registered with model provider");

        let info = self.blobs.metadata(name).await?;
        let mode = SummaryMode::from_metadata(
            info.metadata
                .get(SUMMARY_MODE_METADATA_KEY)
                .map(String::as_str),
        );

        // Written before the summary call so late enrichment requests
        // already find the handle.
        let initial = RecordPatch::new()
            .status(ProcessingStatus::Processing)
            .original_file(name)
            .processed_at(Utc::now())
            .model_file_handle(handle.as_str())
            .summary_mode(mode);
        self.documents.set(id, initial.into_fields(), false).await?;

        let prompt = Prompt::for_mode(mode);
        let raw = retry(&self.retry, "generate", || self.model.generate(&handle, &prompt)).await?;
        let summary = parse_summary(mode, &raw)?;

        let patch = RecordPatch::new()
            .summary(&summary)
            .status(ProcessingStatus::SummaryCompleted);
        let patch = match mode {
            SummaryMode::CheatSheet => patch.cheat_sheet_summary(&summary),
            SummaryMode::Detailed => patch.detailed_summary(&summary),
        };
        self.documents.set(id, patch.into_fields(), true).await?;

        Ok(mode)
    }

    async fn buffer_blob(&self, name: &str) -> Result<NamedTempFile> {
        let bytes = self.blobs.get(name).await?;

        let buffer = match &self.tmp_dir {
            Some(dir) => tempfile::Builder::new().suffix(".pdf").tempfile_in(dir)?,
            None => tempfile::Builder::new().suffix(".pdf").tempfile()?,
        };
        tokio::fs::write(buffer.path(), &bytes).await?;

        debug!(path = %buffer.path().display(), size = bytes.len(), "Blob buffered locally");
        Ok(buffer)
    }

    async fn record_failure(&self, name: &str, id: &str, err: &AppError) {
        let patch = RecordPatch::new()
            .failed(err.to_string())
            .original_file(name)
            .processed_at(Utc::now());

        if let Err(write_err) = self.documents.set(id, patch.into_fields(), true).await {
            error!(
                document_id = %id,
                error = %write_err,
                "Failed to record ingestion failure"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use studyspark_common::{
        model::MockModel,
        prompts::PromptKind,
        record::{ProcessingRecord, Summary},
        storage::{BlobMetadata, MemoryBlobStore, MemoryDocumentStore},
    };
    use tokio_test::assert_ok;

    struct Harness {
        blobs: Arc<MemoryBlobStore>,
        documents: Arc<MemoryDocumentStore>,
        model: Arc<MockModel>,
        tmp: tempfile::TempDir,
    }

    impl Harness {
        fn new(model: MockModel) -> Self {
            Self {
                blobs: Arc::new(MemoryBlobStore::new("uploads")),
                documents: Arc::new(MemoryDocumentStore::new()),
                model: Arc::new(model),
                tmp: tempfile::tempdir().unwrap(),
            }
        }

        fn trigger(&self, timeout: Duration) -> IngestionTrigger {
            let policy = RetryPolicy {
                max_attempts: 4,
                base_delay_ms: 1,
                multiplier: 2.0,
                max_delay_ms: 5,
                jitter_ratio: 0.5,
            };
            IngestionTrigger::new(
                self.blobs.clone(),
                self.documents.clone(),
                self.model.clone(),
                policy,
                timeout,
            )
            .with_tmp_dir(Some(self.tmp.path().to_path_buf()))
        }

        async fn upload(&self, name: &str, mode: Option<&str>) -> FinalizeEvent {
            let mut metadata = BlobMetadata::new();
            if let Some(mode) = mode {
                metadata.insert(SUMMARY_MODE_METADATA_KEY.to_string(), mode.to_string());
            }
            assert_ok!(self.blobs.put(name, b"%PDF-1.7 test".to_vec(), metadata).await);
            FinalizeEvent {
                name: name.to_string(),
                bucket: "uploads".to_string(),
            }
        }

        async fn record(&self, id: &str) -> ProcessingRecord {
            let fields = self.documents.get(id).await.unwrap().expect("record exists");
            ProcessingRecord::from_fields(&fields).unwrap()
        }

        fn tmp_is_empty(&self) -> bool {
            std::fs::read_dir(self.tmp.path()).unwrap().next().is_none()
        }
    }

    #[tokio::test]
    async fn test_non_pdf_is_skipped_without_side_effects() {
        let h = Harness::new(MockModel::new());
        let event = h.upload("notes.txt", None).await;

        let outcome = h.trigger(Duration::from_secs(5)).handle(&event).await;

        assert_eq!(outcome, IngestionOutcome::Skipped { name: "notes.txt".into() });
        assert_eq!(h.model.uploads(), 0);
        assert_eq!(h.model.generations(), 0);
        assert!(h.documents.get("notes").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cheat_sheet_upload_completes() {
        let h = Harness::new(MockModel::new());
        let event = h.upload("physics/lecture1.pdf", Some("cheat-sheet")).await;

        let outcome = h.trigger(Duration::from_secs(5)).handle(&event).await;
        assert_eq!(
            outcome,
            IngestionOutcome::Completed {
                document_id: "physics/lecture1".into(),
                mode: SummaryMode::CheatSheet,
            }
        );

        let record = h.record("physics/lecture1").await;
        assert_eq!(record.status, Some(ProcessingStatus::SummaryCompleted));
        assert_eq!(record.summary_mode, Some(SummaryMode::CheatSheet));
        assert_eq!(record.original_file.as_deref(), Some("physics/lecture1.pdf"));
        assert!(record.file_handle().is_some());
        assert!(matches!(record.summary, Some(Summary::CheatSheet(_))));
        assert_eq!(record.cheat_sheet_summary, record.summary);
        assert_eq!(h.model.generations_for(PromptKind::CheatSheet), 1);
        assert!(h.tmp_is_empty());
    }

    #[tokio::test]
    async fn test_missing_mode_defaults_to_detailed() {
        let h = Harness::new(MockModel::new());
        let event = h.upload("Lecture.PDF", None).await;

        h.trigger(Duration::from_secs(5)).handle(&event).await;

        let record = h.record("Lecture").await;
        assert_eq!(record.summary_mode, Some(SummaryMode::Detailed));
        assert_eq!(record.has_detailed_summary, Some(true));
        assert!(matches!(record.summary, Some(Summary::Detailed(_))));
        assert_eq!(h.model.generations_for(PromptKind::DetailedSummary), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_marks_record_failed() {
        let h = Harness::new(MockModel::new().with_generate(|_, _| Ok(Some("Sure! Here is".into()))));
        let event = h.upload("bad.pdf", Some("detailed")).await;

        let outcome = h.trigger(Duration::from_secs(5)).handle(&event).await;
        assert!(matches!(outcome, IngestionOutcome::Failed { .. }));

        let record = h.record("bad").await;
        assert_eq!(record.status, Some(ProcessingStatus::Error));
        assert!(record.error.as_deref().unwrap().contains("malformed"));
        // The handle written before the summary call survives.
        assert!(record.file_handle().is_some());
        // Parse failures are not retried.
        assert_eq!(h.model.generations(), 1);
        assert!(h.tmp_is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_upload_is_retried() {
        let model = MockModel::new().with_upload(|index| {
            if index < 2 {
                Err(AppError::Model {
                    status: Some(429),
                    message: "Resource exhausted".into(),
                })
            } else {
                Ok(studyspark_common::FileHandle::new("mock://files/retried"))
            }
        });
        let h = Harness::new(model);
        let event = h.upload("retry.pdf", Some("cheat-sheet")).await;

        let outcome = h.trigger(Duration::from_secs(5)).handle(&event).await;

        assert!(matches!(outcome, IngestionOutcome::Completed { .. }));
        assert_eq!(h.model.uploads(), 3);
        assert_eq!(h.record("retry").await.file_handle(), Some("mock://files/retried"));
    }

    #[tokio::test]
    async fn test_upload_failure_creates_error_record() {
        let model = MockModel::new().with_upload(|_| {
            Err(AppError::Model {
                status: Some(400),
                message: "Unsupported file".into(),
            })
        });
        let h = Harness::new(model);
        let event = h.upload("rejected.pdf", None).await;

        h.trigger(Duration::from_secs(5)).handle(&event).await;

        let fields = h.documents.get("rejected").await.unwrap().unwrap();
        assert_eq!(fields["status"], json!("error"));
        assert_eq!(fields["originalFile"], json!("rejected.pdf"));
        assert_eq!(h.model.uploads(), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_recorded_as_error() {
        let h = Harness::new(MockModel::new().with_latency(Duration::from_millis(500)));
        let event = h.upload("slow.pdf", None).await;

        let outcome = h.trigger(Duration::from_millis(50)).handle(&event).await;

        match outcome {
            IngestionOutcome::Failed { error, .. } => assert!(error.contains("budget")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(h.record("slow").await.status, Some(ProcessingStatus::Error));
        assert!(h.tmp_is_empty());
    }
}
