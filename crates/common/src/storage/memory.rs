//! In-memory blob and document stores.

use super::{
    BlobInfo, BlobMetadata, BlobStore, DocumentChange, DocumentStore, Fields, FinalizeEvent,
};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

const EVENT_CAPACITY: usize = 256;

struct StoredBlob {
    bytes: Vec<u8>,
    metadata: BlobMetadata,
    time_created: DateTime<Utc>,
}

/// Blob store that keeps objects in memory and raises finalize events on a
/// broadcast channel.
pub struct MemoryBlobStore {
    bucket: String,
    blobs: RwLock<HashMap<String, StoredBlob>>,
    finalized: broadcast::Sender<FinalizeEvent>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        let (finalized, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            bucket: bucket.into(),
            blobs: RwLock::new(HashMap::new()),
            finalized,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Store an object with an explicit creation time.
    pub async fn put_with_created_at(
        &self,
        name: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
        time_created: DateTime<Utc>,
    ) -> Result<()> {
        let size = bytes.len();
        self.blobs.write().await.insert(
            name.to_string(),
            StoredBlob {
                bytes,
                metadata,
                time_created,
            },
        );
        debug!(name = %name, size, "Blob finalized");

        // No subscribers simply means nobody is listening yet.
        let _ = self.finalized.send(FinalizeEvent {
            name: name.to_string(),
            bucket: self.bucket.clone(),
        });
        Ok(())
    }

    fn info(name: &str, blob: &StoredBlob) -> BlobInfo {
        BlobInfo {
            name: name.to_string(),
            time_created: blob.time_created,
            size: blob.bytes.len(),
            metadata: blob.metadata.clone(),
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        self.put_with_created_at(name, bytes, metadata, Utc::now()).await
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(name)
            .map(|b| b.bytes.clone())
            .ok_or_else(|| AppError::BlobNotFound {
                name: name.to_string(),
            })
    }

    async fn metadata(&self, name: &str) -> Result<BlobInfo> {
        self.blobs
            .read()
            .await
            .get(name)
            .map(|b| Self::info(name, b))
            .ok_or_else(|| AppError::BlobNotFound {
                name: name.to_string(),
            })
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match self.blobs.write().await.remove(name) {
            Some(_) => Ok(()),
            None => Err(AppError::BlobNotFound {
                name: name.to_string(),
            }),
        }
    }

    fn finalize_events(&self) -> broadcast::Receiver<FinalizeEvent> {
        self.finalized.subscribe()
    }

    async fn list(&self) -> Result<Vec<BlobInfo>> {
        let blobs = self.blobs.read().await;
        let mut infos: Vec<BlobInfo> = blobs.iter().map(|(n, b)| Self::info(n, b)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

#[derive(Default)]
struct Documents {
    docs: HashMap<String, Fields>,
    watchers: HashMap<String, watch::Sender<Option<Fields>>>,
}

/// Document store with atomic field-level merges, per-document watch
/// subscriptions and a change feed of before/after snapshots.
pub struct MemoryDocumentStore {
    inner: RwLock<Documents>,
    changes: broadcast::Sender<DocumentChange>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: RwLock::new(Documents::default()),
            changes,
        }
    }

    /// Receive every document write made after this call.
    pub fn changes(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }

    /// Apply a write under the store lock and publish it. Returns `false`
    /// (and publishes nothing) when `apply` declines the write.
    async fn write<F>(&self, id: &str, apply: F) -> bool
    where
        F: FnOnce(Option<&Fields>) -> Option<Option<Fields>>,
    {
        let mut inner = self.inner.write().await;
        let before = inner.docs.get(id).cloned();

        let after = match apply(before.as_ref()) {
            Some(after) => after,
            None => return false,
        };

        match &after {
            Some(fields) => inner.docs.insert(id.to_string(), fields.clone()),
            None => inner.docs.remove(id),
        };

        let orphaned = match inner.watchers.get(id) {
            Some(watcher) => {
                watcher.send_replace(after.clone());
                watcher.receiver_count() == 0
            }
            None => false,
        };
        if orphaned {
            inner.watchers.remove(id);
        }

        let _ = self.changes.send(DocumentChange {
            id: id.to_string(),
            before,
            after,
        });
        true
    }
}

fn merged(before: Option<&Fields>, fields: Fields) -> Fields {
    let mut doc = before.cloned().unwrap_or_default();
    doc.extend(fields);
    doc
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn set(&self, id: &str, fields: Fields, merge: bool) -> Result<()> {
        self.write(id, |before| {
            let after = if merge { merged(before, fields) } else { fields };
            Some(Some(after))
        })
        .await;
        debug!(id = %id, merge, "Document set");
        Ok(())
    }

    async fn update(&self, id: &str, fields: Fields) -> Result<()> {
        let applied = self
            .write(id, |before| before.map(|doc| Some(merged(Some(doc), fields))))
            .await;

        if applied {
            debug!(id = %id, "Document updated");
            Ok(())
        } else {
            Err(AppError::RecordNotFound { id: id.to_string() })
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Fields>> {
        Ok(self.inner.read().await.docs.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.write(id, |before| before.map(|_| None)).await;
        debug!(id = %id, "Document deleted");
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<watch::Receiver<Option<Fields>>> {
        let mut inner = self.inner.write().await;
        inner.watchers.retain(|_, w| w.receiver_count() > 0);
        let current = inner.docs.get(id).cloned();
        let watcher = inner
            .watchers
            .entry(id.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Ok(watcher.subscribe())
    }
}
