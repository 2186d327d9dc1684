//! Local filesystem backend.

use super::{ByteSource, ObjectInfo, Storage, StorageResult};
use crate::utils::errors::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Suffix of in-flight writes; never reported by `list`.
const PARTIAL_SUFFIX: &str = ".partial";

/// Stores objects as files below a base directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create the backend, creating `base_path` if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve `key` below the base directory, rejecting anything that could
    /// escape it.
    fn full_path(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let clean = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.base_path.join(relative))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn write(&self, key: &str, mut source: ByteSource) -> StorageResult<u64> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io("write", key, e))?;
        }

        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let result = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let written = tokio::io::copy(&mut source, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&partial, &path).await?;
            Ok::<_, std::io::Error>(written)
        }
        .await;

        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(StorageError::io("write", key, e))
            }
        }
    }

    async fn read(&self, key: &str) -> StorageResult<ByteSource> {
        let path = self.full_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::io("read", key, e)),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.full_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::io("delete", key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectInfo>> {
        let base = self.base_path.clone();
        let prefix = prefix.to_string();

        let listed = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<ObjectInfo>> {
            let mut objects = Vec::new();
            if !base.exists() {
                return Ok(objects);
            }
            for entry in WalkDir::new(&base).follow_links(false) {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = match entry.path().strip_prefix(&base) {
                    Ok(r) => r,
                    Err(_) => continue,
                };
                // Keys always use forward slashes.
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(&prefix) {
                    continue;
                }
                let metadata = entry.metadata().map_err(std::io::Error::from)?;
                let modified: DateTime<Utc> = metadata.modified()?.into();
                objects.push(ObjectInfo {
                    key,
                    size: metadata.len(),
                    modified,
                });
            }
            objects.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.key.cmp(&a.key)));
            Ok(objects)
        })
        .await
        .map_err(|e| StorageError::io("list", "", std::io::Error::new(ErrorKind::Other, e)))?;

        listed.map_err(|e| StorageError::io("list", "", e))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.full_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io("exists", key, e)),
        }
    }

    async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.full_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(StorageError::io("size", key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn source(data: &'static [u8]) -> ByteSource {
        Box::new(data)
    }

    #[tokio::test]
    async fn test_write_read_roundtrip() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path())?;

        let written = storage.write("nested/a.db", source(b"payload")).await?;
        assert_eq!(written, 7);
        assert!(storage.exists("nested/a.db").await?);
        assert_eq!(storage.size("nested/a.db").await?, 7);

        let mut buf = Vec::new();
        storage.read("nested/a.db").await?.read_to_end(&mut buf).await?;
        assert_eq!(buf, b"payload");
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_objects() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path())?;

        assert!(!storage.exists("missing").await?);
        assert!(storage.read("missing").await.err().unwrap().is_not_found());
        assert!(storage.size("missing").await.unwrap_err().is_not_found());
        storage.delete("missing").await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_list_filters_prefix() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path())?;

        storage.write("backup_1.meta.json", source(b"{}")).await?;
        storage.write("backup_1.db.gz", source(b"xx")).await?;
        storage.write("other/file", source(b"x")).await?;
        std::fs::write(dir.path().join("backup_2.db.partial"), b"half")?;

        let mut keys: Vec<_> = storage
            .list("backup_")
            .await?
            .into_iter()
            .map(|o| o.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["backup_1.db.gz", "backup_1.meta.json"]);

        assert_eq!(storage.list("").await?.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path())?;

        for key in ["../x", "/etc/passwd", "", "a/../../b"] {
            let err = storage.write(key, source(b"x")).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey { .. }), "{key}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_object() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let storage = LocalStorage::new(dir.path())?;

        storage.write("a", source(b"x")).await?;
        storage.delete("a").await?;
        assert!(!storage.exists("a").await?);
        Ok(())
    }
}
