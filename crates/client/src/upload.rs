//! Upload transport.

use async_trait::async_trait;
use std::sync::Arc;
use studyspark_common::{
    errors::Result,
    storage::{BlobMetadata, BlobStore},
};
use tokio::sync::mpsc;

/// Sends a file to blob storage, reporting progress as 0-100.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<()>;
}

const STAGING_CHUNK: usize = 256 * 1024;

/// Uploader backed directly by a `BlobStore`.
///
/// Progress covers staging the payload in chunks; 100 is only reported
/// once the store has accepted the object.
pub struct BlobUploader {
    store: Arc<dyn BlobStore>,
}

impl BlobUploader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Uploader for BlobUploader {
    async fn upload(
        &self,
        name: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<()> {
        let total = bytes.len().max(1);
        let mut staged = Vec::with_capacity(bytes.len());

        for chunk in bytes.chunks(STAGING_CHUNK) {
            staged.extend_from_slice(chunk);
            let percent = (staged.len() * 99 / total) as u8;
            // The receiver going away only means nobody is watching.
            let _ = progress.send(percent);
            tokio::task::yield_now().await;
        }

        self.store.put(name, staged, metadata).await?;
        let _ = progress.send(100);
        Ok(())
    }
}
