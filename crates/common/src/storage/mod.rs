//! Storage contracts the pipeline needs from its collaborators
//!
//! - `BlobStore`: object storage that raises one finalize event per upload
//! - `DocumentStore`: reactive key-value store with merge writes and
//!   per-document subscriptions
//!
//! In-memory implementations back the tests and one-shot runs; the
//! directory-backed blob store lets a long-running worker pick up files
//! written by other processes.

mod dir;
mod memory;

pub use dir::DirBlobStore;
pub use memory::{MemoryBlobStore, MemoryDocumentStore};

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, watch};

/// A document snapshot: flat map of field name to JSON value.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Custom metadata that travels with an uploaded blob.
pub type BlobMetadata = HashMap<String, String>;

/// Raised once when an object is fully written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeEvent {
    pub name: String,
    pub bucket: String,
}

/// Listing entry for a stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobInfo {
    pub name: String,
    pub time_created: DateTime<Utc>,
    pub size: usize,
    pub metadata: BlobMetadata,
}

/// Before/after snapshots of a single document write.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub id: String,
    pub before: Option<Fields>,
    pub after: Option<Fields>,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store an object and raise its finalize event.
    async fn put(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Listing entry for one object, including its custom metadata.
    async fn metadata(&self, name: &str) -> Result<BlobInfo>;

    async fn delete(&self, name: &str) -> Result<()>;

    async fn list(&self) -> Result<Vec<BlobInfo>>;

    /// Receive a `FinalizeEvent` for every object finalized after this call.
    fn finalize_events(&self) -> broadcast::Receiver<FinalizeEvent>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Write `fields`; with `merge` existing fields not named are kept,
    /// without it the document is replaced.
    async fn set(&self, id: &str, fields: Fields, merge: bool) -> Result<()>;

    /// Merge `fields` into an existing document. Fails with
    /// `AppError::RecordNotFound` when the document is absent.
    async fn update(&self, id: &str, fields: Fields) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Fields>>;

    /// Remove a document. Deleting an absent document succeeds.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Latest snapshot of a document, refreshed on every write.
    async fn subscribe(&self, id: &str) -> Result<watch::Receiver<Option<Fields>>>;
}
