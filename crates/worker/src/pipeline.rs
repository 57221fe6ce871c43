//! Process wiring
//!
//! Connects the store event feeds to the triggers, the way the hosting
//! platform would: every finalize event and every document change is handed
//! to its trigger on a task of its own.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use studyspark_common::{
    config::AppConfig,
    errors::{AppError, Result},
    model::GenerativeModel,
    storage::{
        BlobStore, DirBlobStore, DocumentChange, FinalizeEvent, MemoryBlobStore,
        MemoryDocumentStore,
    },
    RetryPolicy,
};
use studyspark_enrichment::EnrichmentTrigger;
use studyspark_ingestion::{IngestionOutcome, IngestionTrigger};
use studyspark_janitor::SweepReport;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Pipeline {
    pub blobs: Arc<dyn BlobStore>,
    pub documents: Arc<MemoryDocumentStore>,
    /// Set when uploads live in a directory other processes can write to.
    directory: Option<Arc<DirBlobStore>>,
    records_dir: Option<PathBuf>,
    ingestion: Arc<IngestionTrigger>,
    enrichment: Arc<EnrichmentTrigger>,
    retention: Duration,
    sweep_interval: Duration,
    scan_interval: Duration,
}

impl Pipeline {
    pub async fn new(config: &AppConfig, model: Arc<dyn GenerativeModel>) -> Result<Self> {
        let directory = match &config.storage.blob_dir {
            Some(dir) => Some(Arc::new(
                DirBlobStore::open(dir, config.storage.bucket.clone()).await?,
            )),
            None => None,
        };
        let blobs: Arc<dyn BlobStore> = match &directory {
            Some(dir) => dir.clone(),
            None => Arc::new(MemoryBlobStore::new(config.storage.bucket.clone())),
        };

        if let Some(dir) = &config.storage.records_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::Storage {
                    message: format!("creating {}: {}", dir.display(), e),
                })?;
        }

        let documents = Arc::new(MemoryDocumentStore::new());
        let retry = RetryPolicy::from_config(&config.retry);

        let ingestion = IngestionTrigger::new(
            blobs.clone(),
            documents.clone(),
            model.clone(),
            retry.clone(),
            config.trigger_timeout(),
        )
        .with_tmp_dir(config.pipeline.tmp_dir.clone());

        let enrichment =
            EnrichmentTrigger::new(documents.clone(), model, retry, config.trigger_timeout());

        Ok(Self {
            blobs,
            documents,
            directory,
            records_dir: config.storage.records_dir.clone(),
            ingestion: Arc::new(ingestion),
            enrichment: Arc::new(enrichment),
            retention: config.retention(),
            sweep_interval: config.sweep_interval(),
            scan_interval: config.scan_interval(),
        })
    }

    /// Whether uploads outlive the process.
    pub fn is_persistent(&self) -> bool {
        self.directory.is_some()
    }

    /// Start both dispatch loops and the janitor schedule, plus the
    /// directory scanner and the record mirror when configured.
    ///
    /// Subscriptions are taken before returning, so nothing written after
    /// this call is missed.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let finalize = self.blobs.finalize_events();
        let changes = self.documents.changes();

        let mut tasks = vec![
            tokio::spawn(dispatch_finalize_events(finalize, self.ingestion.clone())),
            tokio::spawn(dispatch_document_changes(changes, self.enrichment.clone())),
            tokio::spawn(run_janitor(
                self.blobs.clone(),
                self.retention,
                self.sweep_interval,
            )),
        ];

        if let Some(dir) = &self.directory {
            tasks.push(tokio::spawn(run_scanner(dir.clone(), self.scan_interval)));
        }
        if let Some(dir) = &self.records_dir {
            tasks.push(tokio::spawn(mirror_records(
                self.documents.changes(),
                dir.clone(),
            )));
        }
        tasks
    }

    pub async fn sweep_once(&self) -> Result<SweepReport> {
        studyspark_janitor::sweep(self.blobs.as_ref(), Utc::now(), self.retention).await
    }
}

async fn dispatch_finalize_events(
    mut events: broadcast::Receiver<FinalizeEvent>,
    trigger: Arc<IngestionTrigger>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let trigger = trigger.clone();
                tokio::spawn(async move {
                    match trigger.handle(&event).await {
                        IngestionOutcome::Failed { document_id, error } => {
                            error!(document_id = %document_id, error = %error, "Ingestion failed");
                        }
                        outcome => debug!(?outcome, "Ingestion finished"),
                    }
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Ingestion dispatch lagged, finalize events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("Finalize event feed closed");
}

async fn dispatch_document_changes(
    mut changes: broadcast::Receiver<DocumentChange>,
    trigger: Arc<EnrichmentTrigger>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                let trigger = trigger.clone();
                tokio::spawn(async move {
                    match trigger.handle(&change).await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => debug!(
                            document_id = %report.document_id,
                            succeeded = report.succeeded.len(),
                            failed = report.failed.len(),
                            "Enrichment finished"
                        ),
                        Err(e) => {
                            warn!(document_id = %change.id, error = %e, "Enrichment failed")
                        }
                    }
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Enrichment dispatch lagged, document changes dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
    info!("Document change feed closed");
}

async fn run_janitor(blobs: Arc<dyn BlobStore>, retention: Duration, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // The first tick completes immediately; sweeping at startup is fine.
    loop {
        ticker.tick().await;
        if let Err(e) = studyspark_janitor::sweep(blobs.as_ref(), Utc::now(), retention).await {
            error!(error = %e, "Janitor sweep failed");
        }
    }
}

async fn run_scanner(dir: Arc<DirBlobStore>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match dir.scan().await {
            Ok(0) => {}
            Ok(discovered) => info!(discovered, "New files in blob directory"),
            Err(e) => warn!(error = %e, "Blob directory scan failed"),
        }
    }
}

/// Keep `<dir>/<id>.json` equal to the latest snapshot of every record.
async fn mirror_records(mut changes: broadcast::Receiver<DocumentChange>, dir: PathBuf) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                if let Err(e) = write_record(&dir, &change).await {
                    warn!(document_id = %change.id, error = %e, "Record not mirrored");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Record mirror lagged, snapshots dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn write_record(dir: &Path, change: &DocumentChange) -> std::io::Result<()> {
    if change.id.is_empty() || change.id.contains(['/', '\\']) || change.id.starts_with('.') {
        return Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            "record id is not a file name",
        ));
    }

    let path = dir.join(format!("{}.json", change.id));
    match &change.after {
        Some(fields) => tokio::fs::write(&path, serde_json::to_vec_pretty(fields)?).await,
        None => match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            result => result,
        },
    }
}
