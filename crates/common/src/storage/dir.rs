//! Directory-backed blob store.
//!
//! Each blob is a plain file under the root directory. Custom metadata and
//! the creation time live in a JSON sidecar under `.meta/`; files dropped
//! into the directory by another process have no sidecar and take their
//! creation time from the filesystem.

use super::{BlobInfo, BlobMetadata, BlobStore, FinalizeEvent};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const META_DIR: &str = ".meta";
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    time_created: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: BlobMetadata,
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AppError {
    AppError::Storage {
        message: format!("{} {}: {}", action, path.display(), e),
    }
}

/// Blob names map straight onto file names, so anything that could escape
/// the root or collide with internal files is rejected.
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(AppError::Validation {
            message: format!("invalid blob name: {:?}", name),
        });
    }
    Ok(())
}

pub struct DirBlobStore {
    bucket: String,
    root: PathBuf,
    /// Names that already had a finalize event raised.
    seen: Mutex<HashSet<String>>,
    finalized: broadcast::Sender<FinalizeEvent>,
}

impl DirBlobStore {
    /// Open (creating if needed) a store rooted at `root`. Files already
    /// present count as finalized and raise no events.
    pub async fn open(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Result<Self> {
        let root = root.into();
        let meta = root.join(META_DIR);
        fs::create_dir_all(&meta)
            .await
            .map_err(|e| io_error("creating", &meta, e))?;

        let (finalized, _) = broadcast::channel(EVENT_CAPACITY);
        let store = Self {
            bucket: bucket.into(),
            root,
            seen: Mutex::new(HashSet::new()),
            finalized,
        };

        let existing = store.blob_names().await?;
        info!(root = %store.root.display(), blobs = existing.len(), "Blob directory opened");
        *store.seen.lock().await = existing.into_iter().collect();
        Ok(store)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn sidecar_path(&self, name: &str) -> PathBuf {
        self.root.join(META_DIR).join(format!("{}.json", name))
    }

    /// Store an object with an explicit creation time.
    pub async fn put_with_created_at(
        &self,
        name: &str,
        bytes: Vec<u8>,
        metadata: BlobMetadata,
        time_created: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.blob_path(name)?;
        let size = bytes.len();

        let sidecar = Sidecar {
            time_created: Some(time_created),
            metadata,
        };
        let sidecar_path = self.sidecar_path(name);
        fs::write(&sidecar_path, serde_json::to_vec(&sidecar)?)
            .await
            .map_err(|e| io_error("writing", &sidecar_path, e))?;

        // Write under a hidden name and rename, so a scan never sees a
        // partial file.
        let partial = self.root.join(format!(".{}.partial", name));
        let mut file = fs::File::create(&partial)
            .await
            .map_err(|e| io_error("creating", &partial, e))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| io_error("writing", &partial, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("syncing", &partial, e))?;
        drop(file);

        let mut seen = self.seen.lock().await;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| io_error("renaming", &partial, e))?;
        seen.insert(name.to_string());
        drop(seen);

        debug!(name = %name, size, "Blob finalized");
        self.announce(name);
        Ok(())
    }

    /// Raise finalize events for files that appeared in the directory
    /// without going through `put`. Returns how many were raised.
    pub async fn scan(&self) -> Result<usize> {
        let names = self.blob_names().await?;
        let mut seen = self.seen.lock().await;

        // Forget deleted files so a later file of the same name is new.
        let present: HashSet<&String> = names.iter().collect();
        seen.retain(|n| present.contains(n));

        let mut raised = 0;
        for name in names {
            if seen.insert(name.clone()) {
                debug!(name = %name, "Blob discovered");
                self.announce(&name);
                raised += 1;
            }
        }
        Ok(raised)
    }

    fn announce(&self, name: &str) {
        // No subscribers simply means nobody is listening yet.
        let _ = self.finalized.send(FinalizeEvent {
            name: name.to_string(),
            bucket: self.bucket.clone(),
        });
    }

    async fn blob_names(&self) -> Result<Vec<String>> {
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error("listing", &self.root, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error("listing", &self.root, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_file() => names.push(name),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    async fn read_sidecar(&self, name: &str) -> Sidecar {
        let path = self.sidecar_path(name);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(name = %name, error = %e, "Unreadable blob sidecar, ignoring it");
                Sidecar::default()
            }),
            Err(_) => Sidecar::default(),
        }
    }

    async fn info(&self, name: &str) -> Result<BlobInfo> {
        let path = self.blob_path(name)?;
        let stat = match fs::metadata(&path).await {
            Ok(stat) if stat.is_file() => stat,
            Ok(_) => {
                return Err(AppError::BlobNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::BlobNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(io_error("reading", &path, e)),
        };

        let sidecar = self.read_sidecar(name).await;
        let time_created = sidecar.time_created.unwrap_or_else(|| {
            stat.created()
                .or_else(|_| stat.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now())
        });

        Ok(BlobInfo {
            name: name.to_string(),
            time_created,
            size: stat.len() as usize,
            metadata: sidecar.metadata,
        })
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn put(&self, name: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        self.put_with_created_at(name, bytes, metadata, Utc::now()).await
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(name)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::BlobNotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(io_error("reading", &path, e)),
        }
    }

    async fn metadata(&self, name: &str) -> Result<BlobInfo> {
        self.info(name).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.blob_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(AppError::BlobNotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => return Err(io_error("deleting", &path, e)),
        }

        let sidecar = self.sidecar_path(name);
        if let Err(e) = fs::remove_file(&sidecar).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(name = %name, error = %e, "Blob sidecar not removed");
            }
        }
        self.seen.lock().await.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BlobInfo>> {
        let mut infos = Vec::new();
        for name in self.blob_names().await? {
            match self.info(&name).await {
                Ok(info) => infos.push(info),
                // Removed between listing and stat.
                Err(AppError::BlobNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(infos)
    }

    fn finalize_events(&self) -> broadcast::Receiver<FinalizeEvent> {
        self.finalized.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    async fn store() -> (TempDir, DirBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::open(dir.path(), "uploads").await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_persists_bytes_and_metadata() {
        let (dir, store) = store().await;
        let mut events = store.finalize_events();

        let mut metadata = BlobMetadata::new();
        metadata.insert("summaryMode".into(), "cheat-sheet".into());
        assert_ok!(store.put("notes.pdf", b"%PDF".to_vec(), metadata).await);

        let event = events.recv().await.unwrap();
        assert_eq!(event, FinalizeEvent { name: "notes.pdf".into(), bucket: "uploads".into() });

        // A second handle on the same directory sees the same blob.
        let reopened = DirBlobStore::open(dir.path(), "uploads").await.unwrap();
        assert_eq!(reopened.get("notes.pdf").await.unwrap(), b"%PDF");
        let info = reopened.metadata("notes.pdf").await.unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.metadata.get("summaryMode").map(String::as_str), Some("cheat-sheet"));
    }

    #[tokio::test]
    async fn test_list_skips_sidecars_and_keeps_creation_time() {
        let (_dir, store) = store().await;
        let old = Utc::now() - Duration::hours(3);
        store.put_with_created_at("old.pdf", vec![1], BlobMetadata::new(), old).await.unwrap();
        store.put("new.pdf", vec![2, 3], BlobMetadata::new()).await.unwrap();

        let infos = store.list().await.unwrap();
        let names: Vec<&str> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["new.pdf", "old.pdf"]);
        assert_eq!(infos[1].time_created, old);
    }

    #[tokio::test]
    async fn test_delete_removes_blob_and_sidecar() {
        let (dir, store) = store().await;
        store.put("a.pdf", vec![1], BlobMetadata::new()).await.unwrap();

        assert_ok!(store.delete("a.pdf").await);
        assert!(!dir.path().join("a.pdf").exists());
        assert!(!dir.path().join(".meta/a.pdf.json").exists());

        let err = store.delete("a.pdf").await.unwrap_err();
        assert!(matches!(err, AppError::BlobNotFound { .. }));
        assert!(matches!(store.get("a.pdf").await.unwrap_err(), AppError::BlobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_scan_announces_external_files_once() {
        let (dir, store) = store().await;
        std::fs::write(dir.path().join("before.pdf"), b"%PDF").unwrap();
        let store = DirBlobStore::open(dir.path(), "uploads").await.unwrap();
        let mut events = store.finalize_events();

        std::fs::write(dir.path().join("dropped.pdf"), b"%PDF").unwrap();
        assert_eq!(store.scan().await.unwrap(), 1);
        assert_eq!(store.scan().await.unwrap(), 0);
        assert_eq!(events.recv().await.unwrap().name, "dropped.pdf");

        // No sidecar: creation time comes from the filesystem.
        let info = store.metadata("dropped.pdf").await.unwrap();
        assert!(info.metadata.is_empty());
        assert!(Utc::now() - info.time_created < Duration::minutes(1));

        // A replacement after deletion is a new file.
        std::fs::remove_file(dir.path().join("dropped.pdf")).unwrap();
        assert_eq!(store.scan().await.unwrap(), 0);
        std::fs::write(dir.path().join("dropped.pdf"), b"%PDF-2").unwrap();
        assert_eq!(store.scan().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_uploaded_blob_is_not_rediscovered() {
        let (_dir, store) = store().await;
        store.put("up.pdf", vec![1], BlobMetadata::new()).await.unwrap();
        assert_eq!(store.scan().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_names_outside_the_root_are_rejected() {
        let (_dir, store) = store().await;
        for name in ["../escape.pdf", "nested/a.pdf", ".meta", ""] {
            let err = store.put(name, vec![1], BlobMetadata::new()).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }), "{name}");
        }
        assert_err!(store.get("../escape.pdf").await);
    }
}
