//! Durable cache layer backed by flat files.
//!
//! One blob per key, scoped to the local device/session. Keys are hashed to
//! stable file names so arbitrary cache keys (`poste:1`, `tag:POSTE-...`)
//! never leak into the filesystem namespace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Get/set/remove of opaque string-keyed blobs.
///
/// Mutated by any cache call with no locking; last write wins. That matches
/// the read-mostly workload this layer serves.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    async fn remove(&self, key: &str) -> anyhow::Result<()>;
    /// Remove every blob in this store's scope.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// File-per-key store under a dedicated directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        match tokio::fs::read_to_string(self.blob_path(key)).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        tokio::fs::write(self.blob_path(key), value).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        debug!(removed = removed, "Durable cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(store.get("poste:1").await.unwrap().is_none());

        store.set("poste:1", r#"{"tokenId":"1"}"#).await.unwrap();
        assert_eq!(
            store.get("poste:1").await.unwrap().as_deref(),
            Some(r#"{"tokenId":"1"}"#)
        );

        store.remove("poste:1").await.unwrap();
        assert!(store.get("poste:1").await.unwrap().is_none());

        // Removing a missing key is not an error.
        store.remove("poste:1").await.unwrap();
    }

    #[tokio::test]
    async fn clear_removes_all_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.clear().await.unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_with_path_characters_are_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.set("tag:POSTE/../../etc", "safe").await.unwrap();
        assert_eq!(
            store.get("tag:POSTE/../../etc").await.unwrap().as_deref(),
            Some("safe")
        );
    }
}
