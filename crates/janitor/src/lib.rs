//! StudySpark Janitor
//!
//! Deletes uploaded blobs older than the retention window. Processing
//! records are never swept.

use chrono::{DateTime, Utc};
use std::time::Duration;
use studyspark_common::{
    errors::{AppError, Result},
    metrics,
    storage::BlobStore,
};
use tracing::{info, instrument, warn};

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Delete every blob created strictly before `now - retention`.
///
/// A failed delete is logged and the sweep moves on to the next blob.
#[instrument(skip(store))]
pub async fn sweep(store: &dyn BlobStore, now: DateTime<Utc>, retention: Duration) -> Result<SweepReport> {
    let retention = chrono::Duration::from_std(retention).map_err(|e| AppError::Configuration {
        message: format!("Invalid retention window: {}", e),
    })?;
    let cutoff = now - retention;

    let blobs = store.list().await?;
    let mut report = SweepReport {
        scanned: blobs.len(),
        ..Default::default()
    };

    for blob in blobs.iter().filter(|b| b.time_created < cutoff) {
        match store.delete(&blob.name).await {
            Ok(()) => report.deleted += 1,
            Err(e) => {
                report.failed += 1;
                warn!(name = %blob.name, error = %e, "Failed to delete expired blob");
            }
        }
    }

    metrics::record_sweep(report.deleted, report.failed);
    info!(
        scanned = report.scanned,
        deleted = report.deleted,
        failed = report.failed,
        "Janitor sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};
    use studyspark_common::storage::{BlobInfo, BlobMetadata, FinalizeEvent, MemoryBlobStore};
    use tokio::sync::broadcast;

    const TWO_HOURS: Duration = Duration::from_secs(2 * 60 * 60);

    async fn seeded(now: DateTime<Utc>) -> MemoryBlobStore {
        let store = MemoryBlobStore::new("uploads");
        for (name, age_mins) in [("old.pdf", 180), ("fresh.pdf", 60), ("edge.pdf", 120)] {
            store
                .put_with_created_at(
                    name,
                    b"%PDF".to_vec(),
                    BlobMetadata::new(),
                    now - chrono::Duration::minutes(age_mins),
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_sweep_deletes_only_expired_blobs() {
        let now = Utc::now();
        let store = seeded(now).await;

        let report = sweep(&store, now, TWO_HOURS).await.unwrap();

        assert_eq!(report, SweepReport { scanned: 3, deleted: 1, failed: 0 });
        let remaining: Vec<String> = store.list().await.unwrap().into_iter().map(|b| b.name).collect();
        assert_eq!(remaining, vec!["edge.pdf".to_string(), "fresh.pdf".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_bucket() {
        let store = MemoryBlobStore::new("uploads");
        let report = sweep(&store, Utc::now(), TWO_HOURS).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    /// Refuses to delete one particular blob.
    struct StubbornStore {
        inner: MemoryBlobStore,
        protected: &'static str,
    }

    #[async_trait]
    impl BlobStore for StubbornStore {
        async fn put(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
            self.inner.put(name, bytes, metadata).await
        }

        async fn get(&self, name: &str) -> Result<Vec<u8>> {
            self.inner.get(name).await
        }

        async fn metadata(&self, name: &str) -> Result<BlobInfo> {
            self.inner.metadata(name).await
        }

        async fn delete(&self, name: &str) -> Result<()> {
            if name == self.protected {
                return Err(AppError::Storage {
                    message: "permission denied".into(),
                });
            }
            self.inner.delete(name).await
        }

        async fn list(&self) -> Result<Vec<BlobInfo>> {
            self.inner.list().await
        }

        fn finalize_events(&self) -> broadcast::Receiver<FinalizeEvent> {
            self.inner.finalize_events()
        }
    }

    #[tokio::test]
    async fn test_delete_failure_does_not_stop_sweep() {
        let now = Utc::now();
        let inner = seeded(now).await;
        inner
            .put_with_created_at("older.pdf", vec![], BlobMetadata::new(), now - chrono::Duration::hours(5))
            .await
            .unwrap();
        let store = StubbornStore {
            inner,
            protected: "old.pdf",
        };

        let report = sweep(&store, now, TWO_HOURS).await.unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.failed, 1);
        assert_ok!(store.get("old.pdf").await);
        assert_err!(store.get("older.pdf").await);
    }
}
