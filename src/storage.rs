use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

const STAGING_DIR: &str = ".staging";

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("object {0:?} not found")]
    NotFound(String),
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Bytes fully written to the staging area but not yet visible under any key.
#[derive(Debug)]
pub struct StagedObject {
    id: String,
    len: usize,
}

impl StagedObject {
    pub fn size(&self) -> usize {
        self.len
    }
}

#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn stage_object(&self, body: Bytes) -> Result<StagedObject, WriteError>;
    /// Move a staged object to `key`, replacing whatever is there.
    async fn commit_object(&self, staged: &StagedObject, key: &str) -> Result<(), WriteError>;
    async fn discard_object(&self, staged: StagedObject);
    async fn get_object(&self, key: &str) -> Result<Bytes, WriteError>;
}

/// Filesystem-backed attachment store rooted at a single directory.
///
/// Staged files live under `<root>/.staging` so the final rename never crosses
/// a filesystem boundary.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    staging: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|source| WriteError::Io {
                op: "create dir",
                path: staging.clone(),
                source,
            })?;
        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, WriteError> {
        let rel = Path::new(key);
        let mut components = rel.components().peekable();
        let starts_in_staging =
            components.peek() == Some(&Component::Normal(OsStr::new(STAGING_DIR)));
        let only_normal = components.all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || starts_in_staging || !only_normal {
            return Err(WriteError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn staged_path(&self, staged: &StagedObject) -> PathBuf {
        self.staging.join(&staged.id)
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn stage_object(&self, body: Bytes) -> Result<StagedObject, WriteError> {
        let staged = StagedObject {
            id: Uuid::new_v4().simple().to_string(),
            len: body.len(),
        };
        let path = self.staged_path(&staged);

        let write = async {
            let mut file = tokio::fs::File::create(&path).await?;
            file.write_all(&body).await?;
            file.sync_all().await
        };
        if let Err(source) = write.await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(WriteError::Io {
                op: "write",
                path,
                source,
            });
        }

        debug!(id = %staged.id, bytes = staged.len, "object staged");
        Ok(staged)
    }

    async fn commit_object(&self, staged: &StagedObject, key: &str) -> Result<(), WriteError> {
        let dest = self.resolve(key)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| WriteError::Io {
                    op: "create dir",
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::rename(self.staged_path(staged), &dest)
            .await
            .map_err(|source| WriteError::Io {
                op: "rename",
                path: dest.clone(),
                source,
            })?;
        debug!(key, bytes = staged.len, "object committed");
        Ok(())
    }

    async fn discard_object(&self, staged: StagedObject) {
        let path = self.staged_path(&staged);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(id = %staged.id, "staged object discarded"),
            // already committed
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %path.display(), "failed to discard staged object"),
        }
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, WriteError> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WriteError::NotFound(key.to_string())),
            Err(source) => Err(WriteError::Io {
                op: "read",
                path,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("uploads")).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn staged_object_is_invisible_until_committed() {
        let (_dir, storage) = storage().await;
        let staged = storage
            .stage_object(Bytes::from_static(b"jpeg bytes"))
            .await
            .unwrap();
        assert_eq!(staged.size(), 10);

        let err = storage.get_object("profile/a.jpg").await.unwrap_err();
        assert!(matches!(err, WriteError::NotFound(_)));

        storage.commit_object(&staged, "profile/a.jpg").await.unwrap();
        let got = storage.get_object("profile/a.jpg").await.unwrap();
        assert_eq!(&got[..], b"jpeg bytes");
        assert!(storage.root().join("profile/a.jpg").is_file());
    }

    #[tokio::test]
    async fn commit_overwrites_previous_object() {
        let (_dir, storage) = storage().await;
        for body in [&b"first"[..], &b"second"[..]] {
            let staged = storage.stage_object(Bytes::copy_from_slice(body)).await.unwrap();
            storage.commit_object(&staged, "id/x.png").await.unwrap();
        }
        assert_eq!(&storage.get_object("id/x.png").await.unwrap()[..], b"second");
    }

    #[tokio::test]
    async fn discard_removes_staged_file() {
        let (_dir, storage) = storage().await;
        let staged = storage.stage_object(Bytes::from_static(b"x")).await.unwrap();
        let path = storage.staged_path(&staged);
        assert!(path.is_file());
        storage.discard_object(staged).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn keys_cannot_escape_root_or_reach_staging() {
        let (_dir, storage) = storage().await;
        for key in ["", "../etc/passwd", "/etc/passwd", "profile/../../x", ".staging/abc", "./a"] {
            let err = storage.get_object(key).await.unwrap_err();
            assert!(matches!(err, WriteError::InvalidKey(_)), "key {key:?}");
        }

        let staged = storage.stage_object(Bytes::from_static(b"x")).await.unwrap();
        let err = storage
            .commit_object(&staged, "../outside.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::InvalidKey(_)));
    }
}
