//! Async driver for the session machine
//!
//! Multiplexes the upload progress stream and the processing record
//! subscription into one `SessionMachine` and publishes every change on a
//! watch channel.

use crate::machine::{Phase, SessionMachine, SessionSnapshot};
use crate::upload::Uploader;
use std::sync::{Arc, Mutex, MutexGuard};
use studyspark_common::{
    errors::Result,
    record::{Feature, ProcessingRecord, RecordPatch, SummaryMode, SUMMARY_MODE_METADATA_KEY},
    storage::{BlobMetadata, DocumentStore},
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

struct Shared {
    machine: Mutex<SessionMachine>,
    state: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionMachine> {
        self.machine.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the machine and publish the result if it changed.
    fn update<R>(&self, f: impl FnOnce(&mut SessionMachine) -> R) -> R {
        let mut machine = self.lock();
        let result = f(&mut machine);
        let snapshot = machine.snapshot().clone();
        self.state.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
        result
    }
}

/// Client-side session: uploads a file and follows its processing record.
pub struct SyncClient {
    uploader: Arc<dyn Uploader>,
    documents: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SyncClient {
    pub fn new(uploader: Arc<dyn Uploader>, documents: Arc<dyn DocumentStore>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            uploader,
            documents,
            shared: Arc::new(Shared {
                machine: Mutex::new(SessionMachine::new()),
                state,
            }),
            driver: Mutex::new(None),
        }
    }

    /// Receive every published session state.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`.
        let found = rx.wait_for(|s| predicate(s)).await.map(|s| s.clone());
        found.unwrap_or_else(|_| self.snapshot())
    }

    /// Start uploading `file_name`. Must be called within a Tokio runtime.
    ///
    /// Returns the session generation.
    pub fn upload(&self, file_name: &str, bytes: Vec<u8>, mode: SummaryMode) -> Result<u64> {
        let generation = self.shared.update(|m| m.start(file_name, mode))?;
        let document_id = self.snapshot().document_id.unwrap_or_default();
        info!(file = %file_name, document_id = %document_id, mode = %mode, generation, "Upload started");

        let session = Session {
            generation,
            file_name: file_name.to_string(),
            document_id,
            mode,
            uploader: self.uploader.clone(),
            documents: self.documents.clone(),
            shared: self.shared.clone(),
        };

        let handle = tokio::spawn(session.run(bytes));
        if let Some(previous) = self.lock_driver().replace(handle) {
            previous.abort();
        }
        Ok(generation)
    }

    /// Ask for an additional artifact on the completed record.
    #[instrument(skip(self))]
    pub async fn request_feature(&self, feature: Feature) -> Result<()> {
        let document_id = self.shared.update(|m| m.request_feature(feature))?;

        let patch = RecordPatch::new()
            .request(feature, true)
            .clear_feature_error(feature);

        if let Err(e) = self.documents.update(&document_id, patch.into_fields()).await {
            warn!(document_id = %document_id, error = %e, "Failed to request feature");
            self.shared.update(|m| m.request_failed(feature));
            return Err(e);
        }

        debug!(document_id = %document_id, "Feature requested");
        Ok(())
    }

    /// Back to idle, tearing down the upload and record subscription.
    pub fn reset(&self) {
        if let Some(driver) = self.lock_driver().take() {
            driver.abort();
        }
        self.shared.update(|m| m.reset());
    }

    fn lock_driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        if let Some(driver) = self.lock_driver().take() {
            driver.abort();
        }
    }
}

/// One upload session, owned by its driver task.
struct Session {
    generation: u64,
    file_name: String,
    document_id: String,
    mode: SummaryMode,
    uploader: Arc<dyn Uploader>,
    documents: Arc<dyn DocumentStore>,
    shared: Arc<Shared>,
}

impl Session {
    async fn run(self, bytes: Vec<u8>) {
        // Best effort: a stale record must not leak into the new session.
        if let Err(e) = self.documents.delete(&self.document_id).await {
            warn!(document_id = %self.document_id, error = %e, "Could not delete previous record");
        }

        if self.upload(bytes).await {
            self.follow_record().await;
        }
    }

    async fn upload(&self, bytes: Vec<u8>) -> bool {
        let generation = self.generation;
        let mut metadata = BlobMetadata::new();
        metadata.insert(
            SUMMARY_MODE_METADATA_KEY.to_string(),
            self.mode.as_str().to_string(),
        );

        let (tx, mut progress) = mpsc::unbounded_channel();
        let upload = self.uploader.upload(&self.file_name, bytes, metadata, tx);
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                result = &mut upload => break result,
                Some(percent) = progress.recv() => {
                    self.shared.update(|m| m.progress(generation, percent));
                }
            }
        };
        while let Ok(percent) = progress.try_recv() {
            self.shared.update(|m| m.progress(generation, percent));
        }

        match result {
            Ok(()) => {
                self.shared.update(|m| m.upload_succeeded(generation));
                true
            }
            Err(e) => {
                warn!(file = %self.file_name, error = %e, "Upload failed");
                self.shared.update(|m| m.upload_failed(generation));
                false
            }
        }
    }

    async fn follow_record(&self) {
        let generation = self.generation;

        let mut records = match self.documents.subscribe(&self.document_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(document_id = %self.document_id, error = %e, "Could not subscribe to record");
                self.shared
                    .update(|m| m.fail(generation, "Could not follow processing. Please try again."));
                return;
            }
        };
        self.shared.update(|m| m.begin_analysis(generation));

        loop {
            let fields = records.borrow_and_update().clone();
            match fields.as_ref().map(ProcessingRecord::from_fields).transpose() {
                Ok(record) => {
                    let phase = self.shared.update(|m| {
                        m.apply_snapshot(generation, record);
                        m.phase()
                    });
                    if phase == Phase::Error {
                        debug!(document_id = %self.document_id, "Processing failed, no longer following record");
                        return;
                    }
                }
                Err(e) => {
                    warn!(document_id = %self.document_id, error = %e, "Skipping unreadable record snapshot");
                }
            }

            if records.changed().await.is_err() {
                return;
            }
        }
    }
}
